pub mod commands;
pub mod controller;
pub mod state;

pub use commands::{Command, Console, Reply};
pub use controller::WeighmentWorkflow;
pub use state::{FormDefaults, FormField, FormSnapshot, ImageName, ImageSide, TicketState};
