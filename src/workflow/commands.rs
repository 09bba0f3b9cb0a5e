//! Operator console: a line-oriented command surface over the workflow and
//! the weighbridge session.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};

use crate::settings::SettingsStore;
use crate::store::Ticket;
use crate::weighbridge::{
    available_ports, Parity, StopBits, WeighbridgeSession, WeighbridgeStatus,
};

use super::{FormField, FormSnapshot, ImageSide, WeighmentWorkflow};

pub const HELP: &str = "\
commands:
  ports                      list serial ports
  connect [port]             connect to the weighbridge
  serial [baud bits parity stop]
                             show or set the serial frame, e.g. 9600 8 N 1
  disconnect                 release the serial port
  status                     weighbridge and form status
  ticket <no>                enter a ticket number
  next                       issue the next ticket number
  set <field> <value>        site | agency | material | vehicle | tpt | type
  first                      capture the first weighment
  second                     capture the second weighment
  save                       save edits to a pending ticket
  clear                      reset the form
  pending                    list tickets awaiting a second weighment
  find <text>                search all records
  vehicle <no>               show the first record for a vehicle
  image <front|back> [file]  issue an image name, copying <file> into place
  quit                       exit";

/// Line settings the operator can change from the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialFrame {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl SerialFrame {
    fn parse(args: &str) -> Result<Self> {
        let parts: Vec<&str> = args.split_whitespace().collect();
        let [baud, bits, parity, stop] = parts[..] else {
            bail!("usage: serial <baud> <data bits> <N|O|E|M|S> <1|1.5|2>");
        };
        let baud_rate = baud
            .parse::<u32>()
            .with_context(|| format!("invalid baud rate '{baud}'"))?;
        let data_bits = bits
            .parse::<u8>()
            .with_context(|| format!("invalid data bits '{bits}'"))?;
        let parity =
            Parity::from_label(parity).ok_or_else(|| anyhow!("unknown parity '{parity}'"))?;
        let stop_bits = stop
            .parse::<f32>()
            .ok()
            .and_then(StopBits::from_value)
            .ok_or_else(|| anyhow!("stop bits must be 1, 1.5 or 2, not '{stop}'"))?;
        Ok(Self {
            baud_rate,
            data_bits,
            parity,
            stop_bits,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ports,
    Connect(Option<String>),
    Serial(Option<SerialFrame>),
    Disconnect,
    Status,
    Ticket(String),
    Next,
    Set(FormField, String),
    First,
    Second,
    Save,
    Clear,
    Pending,
    Find(String),
    Vehicle(String),
    Image(ImageSide, Option<PathBuf>),
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let required = |what: &str| -> Result<String> {
            if rest.is_empty() {
                bail!("usage: {word} <{what}>");
            }
            Ok(rest.to_string())
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "ports" => Command::Ports,
            "connect" => Command::Connect((!rest.is_empty()).then(|| rest.to_string())),
            "serial" if rest.is_empty() => Command::Serial(None),
            "serial" => Command::Serial(Some(SerialFrame::parse(rest)?)),
            "disconnect" => Command::Disconnect,
            "status" => Command::Status,
            "ticket" => Command::Ticket(required("ticket no")?),
            "next" => Command::Next,
            "set" => {
                let (field, value) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| anyhow!("usage: set <field> <value>"))?;
                let field = field.parse::<FormField>().map_err(|err| anyhow!(err))?;
                Command::Set(field, value.trim().to_string())
            }
            "first" => Command::First,
            "second" => Command::Second,
            "save" => Command::Save,
            "clear" => Command::Clear,
            "pending" => Command::Pending,
            "find" => Command::Find(rest.to_string()),
            "vehicle" => Command::Vehicle(required("vehicle no")?),
            "image" => {
                let (side, source) = match rest.split_once(char::is_whitespace) {
                    Some((side, source)) => (side, Some(PathBuf::from(source.trim()))),
                    None => (rest, None),
                };
                let side = side.parse::<ImageSide>().map_err(|err| anyhow!(err))?;
                Command::Image(side, source)
            }
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command '{other}' (try 'help')"),
        };
        Ok(command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
}

pub struct Console {
    session: Arc<WeighbridgeSession>,
    workflow: WeighmentWorkflow,
    settings: Arc<SettingsStore>,
    images_dir: PathBuf,
}

impl Console {
    pub fn new(
        session: Arc<WeighbridgeSession>,
        workflow: WeighmentWorkflow,
        settings: Arc<SettingsStore>,
        images_dir: PathBuf,
    ) -> Self {
        Self {
            session,
            workflow,
            settings,
            images_dir,
        }
    }

    pub async fn execute(&mut self, command: Command) -> Result<Reply> {
        let text = match command {
            Command::Ports => {
                let ports = available_ports();
                if ports.is_empty() {
                    "no serial ports found".to_string()
                } else {
                    ports.join("\n")
                }
            }
            Command::Connect(port) => {
                let mut params = self.settings.weighbridge();
                if let Some(port) = port {
                    params.port_name = port;
                }
                self.session.connect(params.clone()).await?;
                self.settings.update_weighbridge(params.clone())?;
                format!("connected: {}", params.describe())
            }
            Command::Serial(frame) => self.serial(frame).await?,
            Command::Disconnect => {
                self.session.disconnect().await;
                "disconnected".to_string()
            }
            Command::Status => self.status(),
            Command::Ticket(ticket_no) => {
                let state = self.workflow.enter_ticket(&ticket_no)?;
                format!("{} ({})", describe(self.workflow.ticket()), state.label())
            }
            Command::Next => {
                let ticket_no = self.workflow.next_ticket_no()?;
                format!("ticket {ticket_no}")
            }
            Command::Set(field, value) => {
                let snapshot = FormSnapshot::default().with(field, value.clone());
                self.workflow.update_form(&snapshot)?;
                if field == FormField::AgencyName && self.settings.remember_agency(&value)? {
                    log::info!("added agency {value:?} to station settings");
                }
                describe(self.workflow.ticket())
            }
            Command::First => {
                let ticket = self.workflow.capture_first_weight()?;
                format!("first weighment saved: {}", describe(&ticket))
            }
            Command::Second => {
                let ticket = self.workflow.capture_second_weight()?;
                format!("ticket completed: {}", describe(&ticket))
            }
            Command::Save => {
                let ticket = self.workflow.save_form()?;
                format!("saved: {}", describe(&ticket))
            }
            Command::Clear => {
                self.workflow.clear();
                "form cleared".to_string()
            }
            Command::Pending => listing(self.workflow.pending()?, "no pending tickets"),
            Command::Find(needle) => listing(self.workflow.search(&needle)?, "no matches"),
            Command::Vehicle(vehicle_no) => match self.workflow.find_vehicle(&vehicle_no)? {
                Some(ticket) => describe(&ticket),
                None => format!("no record for vehicle {vehicle_no}"),
            },
            Command::Image(side, source) => self.image(side, source)?,
            Command::Help => HELP.to_string(),
            Command::Quit => return Ok(Reply::Quit),
        };
        Ok(Reply::Text(text))
    }

    fn status(&self) -> String {
        let scale = match self.session.status() {
            WeighbridgeStatus::Disconnected => "weighbridge: not connected".to_string(),
            WeighbridgeStatus::AwaitingReading => "weighbridge: waiting for a reading".to_string(),
            WeighbridgeStatus::Reading { weight } => format!("weighbridge: {weight} kg"),
        };
        let ticket = self.workflow.ticket();
        let form = if ticket.ticket_no.is_empty() {
            "form: empty".to_string()
        } else {
            format!(
                "form: {} ({})",
                describe(ticket),
                self.workflow.state().label()
            )
        };
        format!("{scale}\n{form}")
    }

    async fn serial(&self, frame: Option<SerialFrame>) -> Result<String> {
        let mut params = self.settings.weighbridge();
        let Some(frame) = frame else {
            return Ok(format!("serial: {}", params.describe().trim_start()));
        };

        params.baud_rate = frame.baud_rate;
        params.data_bits = frame.data_bits;
        params.parity = frame.parity;
        params.stop_bits = frame.stop_bits;
        params.validate_frame()?;
        self.settings.update_weighbridge(params.clone())?;

        let mut text = format!("serial set: {}", params.describe().trim_start());
        if self.session.is_connected().await {
            text.push_str(" (takes effect on the next connect)");
        }
        Ok(text)
    }

    fn image(&mut self, side: ImageSide, source: Option<PathBuf>) -> Result<String> {
        let name = self.workflow.image_name(side)?;
        if let Some(source) = source {
            let target = self.images_dir.join(&name.file_name);
            fs::copy(&source, &target).with_context(|| {
                format!("Failed to copy {} to {}", source.display(), target.display())
            })?;
        }
        self.workflow.attach_image(side, &name.file_name)?;
        Ok(format!(
            "{} image: {} (watermark \"{}\")",
            side.suffix(),
            name.file_name,
            name.watermark
        ))
    }
}

fn weight_text(weight: Option<f64>) -> String {
    weight.map(|w| w.to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn describe(ticket: &Ticket) -> String {
    format!(
        "{} | {} | {} | {} | first {} | second {} | net {}",
        ticket.ticket_no,
        ticket.vehicle_no,
        ticket.agency_name,
        ticket.material,
        weight_text(ticket.first_weight),
        weight_text(ticket.second_weight),
        weight_text(ticket.net_weight()),
    )
}

fn listing(tickets: Vec<Ticket>, empty: &str) -> String {
    if tickets.is_empty() {
        return empty.to_string();
    }
    tickets.iter().map(describe).collect::<Vec<_>>().join("\n")
}
