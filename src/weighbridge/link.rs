use std::io::{self, Read};

use log::warn;

use crate::error::ConnectionError;

use super::params::{Parity, SerialParams, StopBits};

/// Byte-oriented channel to the indicator. Owned exclusively by the reader task.
pub trait SerialLink: Send {
    /// Bytes waiting in the driver's receive buffer.
    fn bytes_available(&mut self) -> io::Result<u32>;

    /// Reads whatever is available into `buf`, waiting at most the configured
    /// read timeout.
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens serial links. Real hardware goes through [`SystemPorts`]; tests
/// substitute scripted links.
pub trait LinkOpener: Send + Sync + 'static {
    fn open(&self, params: &SerialParams) -> Result<Box<dyn SerialLink>, ConnectionError>;
}

/// Serial ports provided by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

struct SystemLink {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialLink for SystemLink {
    fn bytes_available(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io::Error::from)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

fn driver_data_bits(bits: u8) -> Result<serialport::DataBits, ConnectionError> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        other => Err(ConnectionError::InvalidParams(format!(
            "data bits {other} outside 5-8"
        ))),
    }
}

fn driver_parity(parity: Parity) -> Result<serialport::Parity, ConnectionError> {
    match parity {
        Parity::None => Ok(serialport::Parity::None),
        Parity::Odd => Ok(serialport::Parity::Odd),
        Parity::Even => Ok(serialport::Parity::Even),
        Parity::Mark | Parity::Space => Err(ConnectionError::Unsupported {
            setting: format!("parity {}", parity.label()),
        }),
    }
}

fn driver_stop_bits(stop_bits: StopBits) -> Result<serialport::StopBits, ConnectionError> {
    match stop_bits {
        StopBits::One => Ok(serialport::StopBits::One),
        StopBits::Two => Ok(serialport::StopBits::Two),
        StopBits::OnePointFive => Err(ConnectionError::Unsupported {
            setting: "1.5 stop bits".into(),
        }),
    }
}

impl LinkOpener for SystemPorts {
    fn open(&self, params: &SerialParams) -> Result<Box<dyn SerialLink>, ConnectionError> {
        params.validate()?;

        let port = serialport::new(params.port_name.as_str(), params.baud_rate)
            .data_bits(driver_data_bits(params.data_bits)?)
            .parity(driver_parity(params.parity)?)
            .stop_bits(driver_stop_bits(params.stop_bits)?)
            .flow_control(serialport::FlowControl::None)
            .timeout(params.read_timeout())
            .open()
            .map_err(|err| ConnectionError::Open {
                port: params.port_name.clone(),
                reason: err.to_string(),
            })?;

        Ok(Box::new(SystemLink { port }))
    }
}

/// Serial devices currently visible to the host.
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|info| info.port_name).collect(),
        Err(err) => {
            warn!("Failed to enumerate serial ports: {err}");
            Vec::new()
        }
    }
}
