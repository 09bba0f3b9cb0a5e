use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;

pub const MIN_BAUD_RATE: u32 = 600;
pub const MAX_BAUD_RATE: u32 = 115_200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    /// Parses the operator's choice by its first letter (`N`, `O`, `E`, `M`, `S`).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().chars().next()?.to_ascii_uppercase() {
            'N' => Some(Parity::None),
            'O' => Some(Parity::Odd),
            'E' => Some(Parity::Even),
            'M' => Some(Parity::Mark),
            'S' => Some(Parity::Space),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Parity::None => "N",
            Parity::Odd => "O",
            Parity::Even => "E",
            Parity::Mark => "M",
            Parity::Space => "S",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StopBits {
    #[default]
    #[serde(rename = "1")]
    One,
    #[serde(rename = "1.5")]
    OnePointFive,
    #[serde(rename = "2")]
    Two,
}

impl StopBits {
    pub fn from_value(value: f32) -> Option<Self> {
        if value == 1.0 {
            Some(StopBits::One)
        } else if value == 1.5 {
            Some(StopBits::OnePointFive)
        } else if value == 2.0 {
            Some(StopBits::Two)
        } else {
            None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        }
    }
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_read_timeout_ms() -> u64 {
    1000
}

/// Connection parameters for the indicator's serial output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialParams {
    #[serde(default)]
    pub port_name: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub stop_bits: StopBits,
    /// Poll cadence for reads; a read never blocks longer than this.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl SerialParams {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConnectionError> {
        if self.port_name.trim().is_empty() {
            return Err(ConnectionError::NoPort);
        }
        self.validate_frame()
    }

    /// Checks everything except the port, so a frame can be stored before
    /// a port is chosen.
    pub fn validate_frame(&self) -> Result<(), ConnectionError> {
        if !(MIN_BAUD_RATE..=MAX_BAUD_RATE).contains(&self.baud_rate) {
            return Err(ConnectionError::InvalidParams(format!(
                "baud rate {} outside {MIN_BAUD_RATE}-{MAX_BAUD_RATE}",
                self.baud_rate
            )));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ConnectionError::InvalidParams(format!(
                "data bits {} outside 5-8",
                self.data_bits
            )));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConnectionError::InvalidParams(
                "read timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Short form used in logs, e.g. `COM3 9600 8N1`.
    pub fn describe(&self) -> String {
        format!(
            "{} {} {}{}{}",
            self.port_name,
            self.baud_rate,
            self.data_bits,
            self.parity.label(),
            self.stop_bits.label()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(port: &str) -> SerialParams {
        SerialParams {
            port_name: port.into(),
            ..SerialParams::default()
        }
    }

    #[test]
    fn parity_parses_first_letter() {
        assert_eq!(Parity::from_label("None"), Some(Parity::None));
        assert_eq!(Parity::from_label("even"), Some(Parity::Even));
        assert_eq!(Parity::from_label("Mark"), Some(Parity::Mark));
        assert_eq!(Parity::from_label("space"), Some(Parity::Space));
        assert_eq!(Parity::from_label("x"), None);
        assert_eq!(Parity::from_label(""), None);
    }

    #[test]
    fn stop_bits_accept_one_and_a_half() {
        assert_eq!(StopBits::from_value(1.5), Some(StopBits::OnePointFive));
        assert_eq!(StopBits::from_value(3.0), None);
    }

    #[test]
    fn validate_rejects_missing_port_and_out_of_range_values() {
        assert!(matches!(params("").validate(), Err(ConnectionError::NoPort)));

        let mut slow = params("COM3");
        slow.baud_rate = 300;
        assert!(matches!(slow.validate(), Err(ConnectionError::InvalidParams(_))));

        let mut wide = params("COM3");
        wide.data_bits = 9;
        assert!(matches!(wide.validate(), Err(ConnectionError::InvalidParams(_))));

        assert!(params("COM3").validate().is_ok());
    }

    #[test]
    fn frame_validates_without_a_port() {
        assert!(params("").validate_frame().is_ok());

        let mut fast = params("");
        fast.baud_rate = 230_400;
        assert!(matches!(fast.validate_frame(), Err(ConnectionError::InvalidParams(_))));
    }

    #[test]
    fn describe_uses_compact_frame_notation() {
        assert_eq!(params("/dev/ttyUSB0").describe(), "/dev/ttyUSB0 9600 8N1");
    }

    #[test]
    fn stop_bits_serialize_as_numbers() {
        let json = serde_json::to_string(&StopBits::OnePointFive).unwrap();
        assert_eq!(json, "\"1.5\"");
    }
}
