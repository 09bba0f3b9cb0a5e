//! The ticket record: one vehicle visit across both weighments.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::workflow::TicketState;

pub const DATE_FORMAT: &str = "%d-%m-%Y";
pub const TIME_FORMAT: &str = "%H:%M:%S";
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    /// Creation date of the record (`dd-mm-YYYY`).
    pub date: String,
    /// Creation time of the record (`HH:MM:SS`).
    pub time: String,
    pub site_name: String,
    pub agency_name: String,
    pub material: String,
    pub ticket_no: String,
    pub vehicle_no: String,
    pub transfer_party_name: String,
    pub first_weight: Option<f64>,
    pub first_timestamp: Option<NaiveDateTime>,
    pub second_weight: Option<f64>,
    pub second_timestamp: Option<NaiveDateTime>,
    pub material_type: String,
    pub front_image: Option<String>,
    pub back_image: Option<String>,
}

impl Ticket {
    pub fn new(ticket_no: impl Into<String>) -> Self {
        Self {
            ticket_no: ticket_no.into(),
            ..Self::default()
        }
    }

    /// Absolute difference of the two weighments, once both exist.
    pub fn net_weight(&self) -> Option<f64> {
        match (self.first_weight, self.second_weight) {
            (Some(first), Some(second)) => Some(net_weight(first, second)),
            _ => None,
        }
    }

    pub fn state(&self) -> TicketState {
        match (self.first_weight, self.second_weight) {
            (Some(_), Some(_)) => TicketState::Completed,
            (Some(_), None) => TicketState::FirstPending,
            // A stray second weight without a first cannot be completed.
            (None, _) => TicketState::New,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.first_weight.is_some() && self.second_weight.is_none()
    }
}

/// Net weight is order-independent: gross/tare may arrive in either order.
pub fn net_weight(first: f64, second: f64) -> f64 {
    (first - second).abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_weight_is_absolute_difference_in_either_order() {
        assert_eq!(net_weight(18000.0, 12000.0), 6000.0);
        assert_eq!(net_weight(12000.0, 18000.0), 6000.0);
        assert_eq!(net_weight(15000.5, 15000.5), 0.0);
    }

    #[test]
    fn net_weight_requires_both_weighments() {
        let mut ticket = Ticket::new("T0001");
        assert_eq!(ticket.net_weight(), None);
        ticket.first_weight = Some(18000.0);
        assert_eq!(ticket.net_weight(), None);
        ticket.second_weight = Some(12000.0);
        assert_eq!(ticket.net_weight(), Some(6000.0));
    }

    #[test]
    fn state_follows_recorded_weights() {
        let mut ticket = Ticket::new("T0001");
        assert_eq!(ticket.state(), TicketState::New);
        ticket.first_weight = Some(18000.0);
        assert_eq!(ticket.state(), TicketState::FirstPending);
        assert!(ticket.is_pending());
        ticket.second_weight = Some(12000.0);
        assert_eq!(ticket.state(), TicketState::Completed);
        assert!(!ticket.is_pending());
    }
}
