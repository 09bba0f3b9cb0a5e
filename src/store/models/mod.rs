pub mod ticket;

pub use ticket::{net_weight, Ticket, DATE_FORMAT, TIMESTAMP_FORMAT, TIME_FORMAT};
