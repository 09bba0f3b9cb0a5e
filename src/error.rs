use std::fmt;
use std::io;

use thiserror::Error;

/// Failure to bring up the serial link. Fatal to that `connect()` attempt.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("no serial port selected")]
    NoPort,
    #[error("weighbridge already connected on {0}")]
    AlreadyConnected(String),
    #[error("invalid serial parameter: {0}")]
    InvalidParams(String),
    #[error("{setting} is not supported by the serial driver")]
    Unsupported { setting: String },
    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },
}

/// A read failure after a successful connect. Recovered locally by the
/// reader with a short backoff; never propagated to callers.
#[derive(Debug, Error)]
#[error("serial read failed: {0}")]
pub struct TransientReadError(#[from] pub io::Error);

/// Fields the operator must fill before a weighment can be captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredField {
    TicketNo,
    VehicleNo,
    AgencyName,
}

impl RequiredField {
    pub fn label(&self) -> &'static str {
        match self {
            RequiredField::TicketNo => "Ticket No",
            RequiredField::VehicleNo => "Vehicle No",
            RequiredField::AgencyName => "Agency Name",
        }
    }
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A rejected operator action. State is unchanged when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required fields: {}", join_labels(.0))]
    MissingFields(Vec<RequiredField>),
    #[error("weighbridge not connected")]
    WeighbridgeNotConnected,
    #[error("no weight reading received from the weighbridge yet")]
    NoWeightReading,
    #[error("first weight already captured for ticket {0}")]
    FirstWeightAlreadyCaptured(String),
    #[error("first weight not captured for ticket {0}")]
    FirstWeightMissing(String),
    #[error("ticket {0} is completed and read-only")]
    TicketCompleted(String),
    #[error("vehicle number is required before capturing images")]
    VehicleRequiredForImage,
}

fn join_labels(fields: &[RequiredField]) -> String {
    fields
        .iter()
        .map(RequiredField::label)
        .collect::<Vec<_>>()
        .join(", ")
}

/// File I/O failure in the ticket store. The record file is left in its
/// last-known-good state whenever one of these is returned.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{operation} failed: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{operation} failed: {source}")]
    Csv {
        operation: &'static str,
        #[source]
        source: csv::Error,
    },
    #[error("record on line {line} is malformed: {reason}")]
    MalformedRow { line: u64, reason: String },
    #[error("cannot save a record without a ticket number")]
    EmptyTicketNo,
    #[error("no ticket numbers left after {0}")]
    TicketNumbersExhausted(String),
}

impl StorageError {
    pub fn io(operation: &'static str, source: io::Error) -> Self {
        StorageError::Io { operation, source }
    }

    pub fn csv(operation: &'static str, source: csv::Error) -> Self {
        StorageError::Csv { operation, source }
    }
}

/// A record file whose header cannot be mapped onto the current schema.
/// The original file is never modified when this is returned.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("record file has no header row")]
    EmptyHeader,
    #[error("record file header is missing the {0:?} column")]
    MissingIdentity(&'static str),
    #[error("record file header has unknown columns: {}", .0.join(", "))]
    UnknownColumns(Vec<String>),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Anything the weighment workflow can reject or fail with.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_are_listed_by_label() {
        let err = ValidationError::MissingFields(vec![
            RequiredField::VehicleNo,
            RequiredField::AgencyName,
        ]);
        assert_eq!(
            err.to_string(),
            "missing required fields: Vehicle No, Agency Name"
        );
    }

    #[test]
    fn not_connected_names_the_precondition() {
        assert_eq!(
            ValidationError::WeighbridgeNotConnected.to_string(),
            "weighbridge not connected"
        );
    }

    #[test]
    fn storage_error_carries_operation_name() {
        let err = StorageError::io(
            "append record",
            io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
        );
        assert_eq!(err.to_string(), "append record failed: read-only");
    }
}
