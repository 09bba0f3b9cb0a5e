//! Column layout of the ticket record file, past and present.
//!
//! The file is read and written by column name. A schema change is a new
//! entry in [`HISTORY`] plus, for renamed columns, an entry in [`RENAMED`];
//! migration derives the rest.

pub const SCHEMA_VERSION: u32 = 2;

/// Current header, order-significant.
pub const COLUMNS: [&str; 16] = [
    "Date",
    "Time",
    "Site Name",
    "Agency Name",
    "Material",
    "Ticket No",
    "Vehicle No",
    "Transfer Party Name",
    "First Weight",
    "First Timestamp",
    "Second Weight",
    "Second Timestamp",
    "Net Weight",
    "Material Type",
    "Front Image",
    "Back Image",
];

/// Header written before weighments were split into first/second captures.
pub const LEGACY_COLUMNS_V1: [&str; 14] = [
    "Date",
    "Time",
    "Site Name",
    "Agency Name",
    "Material",
    "Ticket No",
    "Vehicle No",
    "Transfer Party Name",
    "Gross Weight",
    "Tare Weight",
    "Net Weight",
    "Material Type",
    "Front Image",
    "Back Image",
];

pub struct SchemaRevision {
    pub version: u32,
    pub columns: &'static [&'static str],
}

pub const HISTORY: &[SchemaRevision] = &[
    SchemaRevision {
        version: 1,
        columns: &LEGACY_COLUMNS_V1,
    },
    SchemaRevision {
        version: SCHEMA_VERSION,
        columns: &COLUMNS,
    },
];

/// Old column name -> current column name.
pub const RENAMED: &[(&str, &str)] = &[
    ("Gross Weight", "First Weight"),
    ("Tare Weight", "Second Weight"),
];

pub const DATE: usize = 0;
pub const TIME: usize = 1;
pub const SITE_NAME: usize = 2;
pub const AGENCY_NAME: usize = 3;
pub const MATERIAL: usize = 4;
pub const TICKET_NO: usize = 5;
pub const VEHICLE_NO: usize = 6;
pub const TRANSFER_PARTY_NAME: usize = 7;
pub const FIRST_WEIGHT: usize = 8;
pub const FIRST_TIMESTAMP: usize = 9;
pub const SECOND_WEIGHT: usize = 10;
pub const SECOND_TIMESTAMP: usize = 11;
pub const NET_WEIGHT: usize = 12;
pub const MATERIAL_TYPE: usize = 13;
pub const FRONT_IMAGE: usize = 14;
pub const BACK_IMAGE: usize = 15;

pub fn normalize_name(name: &str) -> &str {
    name.trim_start_matches('\u{feff}').trim()
}

/// Position of `name` (current or renamed) in the current header.
pub fn current_position(name: &str) -> Option<usize> {
    let name = normalize_name(name);
    let current = RENAMED
        .iter()
        .find(|(old, _)| old.eq_ignore_ascii_case(name))
        .map(|(_, new)| *new)
        .unwrap_or(name);

    COLUMNS
        .iter()
        .position(|column| column.eq_ignore_ascii_case(current))
}

/// Version whose header matches exactly, if any.
pub fn identify<'a>(header: impl IntoIterator<Item = &'a str>) -> Option<u32> {
    let names: Vec<&str> = header.into_iter().map(normalize_name).collect();
    HISTORY
        .iter()
        .find(|revision| revision.columns.iter().copied().eq(names.iter().copied()))
        .map(|revision| revision.version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_indices_match_header() {
        assert_eq!(COLUMNS[TICKET_NO], "Ticket No");
        assert_eq!(COLUMNS[FIRST_WEIGHT], "First Weight");
        assert_eq!(COLUMNS[NET_WEIGHT], "Net Weight");
        assert_eq!(COLUMNS[BACK_IMAGE], "Back Image");
    }

    #[test]
    fn renamed_columns_resolve_to_current_positions() {
        assert_eq!(current_position("Gross Weight"), Some(FIRST_WEIGHT));
        assert_eq!(current_position(" tare weight "), Some(SECOND_WEIGHT));
        assert_eq!(current_position("Ticket No"), Some(TICKET_NO));
        assert_eq!(current_position("Driver Phone"), None);
    }

    #[test]
    fn identifies_known_headers() {
        assert_eq!(identify(COLUMNS.iter().copied()), Some(SCHEMA_VERSION));
        assert_eq!(identify(LEGACY_COLUMNS_V1.iter().copied()), Some(1));
        assert_eq!(identify(["Date", "Ticket No"]), None);
    }

    #[test]
    fn byte_order_mark_is_ignored() {
        assert_eq!(current_position("\u{feff}Date"), Some(DATE));
    }
}
