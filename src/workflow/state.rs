use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::store::Ticket;

/// Lifecycle of one ticket. `Completed` is terminal.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TicketState {
    #[default]
    New,
    FirstPending,
    Completed,
}

impl TicketState {
    pub fn label(&self) -> &'static str {
        match self {
            TicketState::New => "new",
            TicketState::FirstPending => "first weighment recorded, awaiting second",
            TicketState::Completed => "completed",
        }
    }

    pub fn can_capture_first(&self) -> bool {
        matches!(self, TicketState::New)
    }

    pub fn can_capture_second(&self) -> bool {
        matches!(self, TicketState::FirstPending)
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, TicketState::Completed)
    }
}

/// Values a fresh form starts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FormDefaults {
    pub site_name: String,
    pub material: String,
    pub material_type: String,
    pub transfer_party_name: String,
    pub ticket_prefix: String,
}

impl Default for FormDefaults {
    fn default() -> Self {
        Self {
            site_name: "Guntur".into(),
            material: "MSW".into(),
            material_type: "Inert".into(),
            transfer_party_name: "Advitia Labs".into(),
            ticket_prefix: "T".into(),
        }
    }
}

impl FormDefaults {
    pub fn blank_ticket(&self, ticket_no: &str) -> Ticket {
        Ticket {
            site_name: self.site_name.clone(),
            material: self.material.clone(),
            material_type: self.material_type.clone(),
            transfer_party_name: self.transfer_party_name.clone(),
            ..Ticket::new(ticket_no.trim())
        }
    }
}

/// Operator-editable text fields of the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    SiteName,
    AgencyName,
    Material,
    VehicleNo,
    TransferPartyName,
    MaterialType,
}

impl FromStr for FormField {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "site" | "sitename" => Ok(FormField::SiteName),
            "agency" | "agencyname" => Ok(FormField::AgencyName),
            "material" => Ok(FormField::Material),
            "vehicle" | "vehicleno" => Ok(FormField::VehicleNo),
            "tpt" | "transferparty" | "transferpartyname" => Ok(FormField::TransferPartyName),
            "materialtype" | "type" => Ok(FormField::MaterialType),
            other => Err(format!("unknown form field '{other}'")),
        }
    }
}

/// Snapshot of the form's text fields. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FormSnapshot {
    pub site_name: Option<String>,
    pub agency_name: Option<String>,
    pub material: Option<String>,
    pub vehicle_no: Option<String>,
    pub transfer_party_name: Option<String>,
    pub material_type: Option<String>,
}

impl FormSnapshot {
    pub fn with(mut self, field: FormField, value: impl Into<String>) -> Self {
        let value = Some(value.into());
        match field {
            FormField::SiteName => self.site_name = value,
            FormField::AgencyName => self.agency_name = value,
            FormField::Material => self.material = value,
            FormField::VehicleNo => self.vehicle_no = value,
            FormField::TransferPartyName => self.transfer_party_name = value,
            FormField::MaterialType => self.material_type = value,
        }
        self
    }

    pub fn apply_to(&self, ticket: &mut Ticket) {
        let fields = [
            (&self.site_name, &mut ticket.site_name),
            (&self.agency_name, &mut ticket.agency_name),
            (&self.material, &mut ticket.material),
            (&self.vehicle_no, &mut ticket.vehicle_no),
            (&self.transfer_party_name, &mut ticket.transfer_party_name),
            (&self.material_type, &mut ticket.material_type),
        ];
        for (value, target) in fields {
            if let Some(value) = value {
                *target = value.trim().to_string();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImageSide {
    Front,
    Back,
}

impl ImageSide {
    pub fn suffix(&self) -> &'static str {
        match self {
            ImageSide::Front => "front",
            ImageSide::Back => "back",
        }
    }
}

impl FromStr for ImageSide {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "front" | "f" => Ok(ImageSide::Front),
            "back" | "b" => Ok(ImageSide::Back),
            other => Err(format!("unknown image side '{other}'")),
        }
    }
}

/// File name and watermark text issued for a vehicle image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageName {
    pub file_name: String,
    pub watermark: String,
}
