use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use csv::StringRecord;

use crate::error::StorageError;
use crate::store::models::{net_weight, Ticket, TIMESTAMP_FORMAT};
use crate::store::schema::{self, COLUMNS};

pub fn format_weight(weight: f64) -> String {
    format!("{weight}")
}

pub fn parse_weight(value: &str, field: &str, line: u64) -> Result<Option<f64>, StorageError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<f64>()
        .map(Some)
        .map_err(|_| StorageError::MalformedRow {
            line,
            reason: format!("{field} {value:?} is not a number"),
        })
}

pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(
    value: &str,
    field: &str,
    line: u64,
) -> Result<Option<NaiveDateTime>, StorageError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map(Some)
        .map_err(|err| StorageError::MalformedRow {
            line,
            reason: format!("{field} {value:?}: {err}"),
        })
}

fn optional_text(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Pads a row out to the current column count.
pub fn padded(fields: &[String]) -> Vec<String> {
    let mut row: Vec<String> = fields.to_vec();
    if row.len() < COLUMNS.len() {
        row.resize(COLUMNS.len(), String::new());
    }
    row
}

pub fn ticket_to_row(ticket: &Ticket) -> Vec<String> {
    let mut row = vec![String::new(); COLUMNS.len()];
    row[schema::DATE] = ticket.date.clone();
    row[schema::TIME] = ticket.time.clone();
    row[schema::SITE_NAME] = ticket.site_name.clone();
    row[schema::AGENCY_NAME] = ticket.agency_name.clone();
    row[schema::MATERIAL] = ticket.material.clone();
    row[schema::TICKET_NO] = ticket.ticket_no.trim().to_string();
    row[schema::VEHICLE_NO] = ticket.vehicle_no.clone();
    row[schema::TRANSFER_PARTY_NAME] = ticket.transfer_party_name.clone();
    row[schema::FIRST_WEIGHT] = ticket.first_weight.map(format_weight).unwrap_or_default();
    row[schema::FIRST_TIMESTAMP] = ticket
        .first_timestamp
        .as_ref()
        .map(format_timestamp)
        .unwrap_or_default();
    row[schema::SECOND_WEIGHT] = ticket.second_weight.map(format_weight).unwrap_or_default();
    row[schema::SECOND_TIMESTAMP] = ticket
        .second_timestamp
        .as_ref()
        .map(format_timestamp)
        .unwrap_or_default();
    row[schema::NET_WEIGHT] = ticket.net_weight().map(format_weight).unwrap_or_default();
    row[schema::MATERIAL_TYPE] = ticket.material_type.clone();
    row[schema::FRONT_IMAGE] = ticket.front_image.clone().unwrap_or_default();
    row[schema::BACK_IMAGE] = ticket.back_image.clone().unwrap_or_default();
    row
}

/// Parses a current-schema row. The stored net weight is ignored; it is
/// always derived from the two weighments.
pub fn row_to_ticket(fields: &[String], line: u64) -> Result<Ticket, StorageError> {
    let row = padded(fields);
    let text = |index: usize| row[index].trim().to_string();

    Ok(Ticket {
        date: text(schema::DATE),
        time: text(schema::TIME),
        site_name: text(schema::SITE_NAME),
        agency_name: text(schema::AGENCY_NAME),
        material: text(schema::MATERIAL),
        ticket_no: text(schema::TICKET_NO),
        vehicle_no: text(schema::VEHICLE_NO),
        transfer_party_name: text(schema::TRANSFER_PARTY_NAME),
        first_weight: parse_weight(&row[schema::FIRST_WEIGHT], "First Weight", line)?,
        first_timestamp: parse_timestamp(&row[schema::FIRST_TIMESTAMP], "First Timestamp", line)?,
        second_weight: parse_weight(&row[schema::SECOND_WEIGHT], "Second Weight", line)?,
        second_timestamp: parse_timestamp(
            &row[schema::SECOND_TIMESTAMP],
            "Second Timestamp",
            line,
        )?,
        material_type: text(schema::MATERIAL_TYPE),
        front_image: optional_text(&row[schema::FRONT_IMAGE]),
        back_image: optional_text(&row[schema::BACK_IMAGE]),
    })
}

/// Overlays `update` on `prior` column by column; an empty column in
/// `update` keeps the prior value. Columns beyond the current schema are
/// carried over untouched and net weight is re-derived from the result.
pub fn merge_rows(prior: &[String], update: &[String]) -> Vec<String> {
    let mut merged = padded(prior);
    for (index, value) in update.iter().enumerate().take(COLUMNS.len()) {
        if !value.trim().is_empty() {
            merged[index] = value.clone();
        }
    }
    refresh_net_weight(&mut merged);
    merged
}

/// Recomputes the Net Weight column from the weight columns when both parse.
/// Returns false when a weight column holds something that is not a number.
pub fn refresh_net_weight(row: &mut [String]) -> bool {
    let first = row[schema::FIRST_WEIGHT].trim().to_string();
    let second = row[schema::SECOND_WEIGHT].trim().to_string();
    let parsed = (
        (!first.is_empty()).then(|| first.parse::<f64>()),
        (!second.is_empty()).then(|| second.parse::<f64>()),
    );

    match parsed {
        (Some(Ok(first)), Some(Ok(second))) => {
            row[schema::NET_WEIGHT] = format_weight(net_weight(first, second));
            true
        }
        (Some(Err(_)), _) | (_, Some(Err(_))) => false,
        _ => {
            row[schema::NET_WEIGHT] = String::new();
            true
        }
    }
}

/// A data row together with the file line it was read from.
pub struct RawRow {
    pub line: u64,
    pub fields: Vec<String>,
}

/// Reads the header and every data row. Rows may be shorter or longer than
/// the header; blank lines are skipped.
pub fn read_raw(path: &Path) -> Result<(Vec<String>, Vec<RawRow>), StorageError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|err| StorageError::csv("open record file", err))?;

    let header = reader
        .headers()
        .map_err(|err| StorageError::csv("read record header", err))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    let mut record = StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => rows.push(RawRow {
                line: record.position().map(|pos| pos.line()).unwrap_or_default(),
                fields: record.iter().map(str::to_string).collect(),
            }),
            Ok(false) => break,
            Err(err) => return Err(StorageError::csv("read record file", err)),
        }
    }
    Ok((header, rows))
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes `header` and `rows` to a staging file next to `path`, syncs it, and
/// renames it over `path`. `path` is untouched unless the rename succeeds.
pub fn replace_file<'a>(
    path: &Path,
    header: &[&str],
    rows: impl IntoIterator<Item = &'a Vec<String>>,
) -> Result<(), StorageError> {
    let staging = staging_path(path);
    let result = write_staging(&staging, header, rows).and_then(|()| {
        fs::rename(&staging, path).map_err(|err| StorageError::io("replace record file", err))
    });
    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result
}

fn write_staging<'a>(
    staging: &Path,
    header: &[&str],
    rows: impl IntoIterator<Item = &'a Vec<String>>,
) -> Result<(), StorageError> {
    let file =
        File::create(staging).map_err(|err| StorageError::io("create staging file", err))?;
    // Rows that failed to parse are written back as they were read.
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
    writer
        .write_record(header)
        .map_err(|err| StorageError::csv("write record header", err))?;
    for row in rows {
        writer
            .write_record(row)
            .map_err(|err| StorageError::csv("write record", err))?;
    }
    let file = writer
        .into_inner()
        .map_err(|err| StorageError::io("flush staging file", err.into_error()))?;
    file.sync_all()
        .map_err(|err| StorageError::io("sync staging file", err))
}
