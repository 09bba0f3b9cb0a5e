use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::{MigrationError, StorageError};
use crate::store::helpers::{read_raw, refresh_net_weight, replace_file};
use crate::store::schema::{self, COLUMNS, SCHEMA_VERSION};
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;

/// Source column index -> current column index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    pub from_version: Option<u32>,
    positions: Vec<Option<usize>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderCheck {
    Current,
    NeedsMigration(ColumnMap),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: Option<u32>,
    pub backup: PathBuf,
    pub rows: usize,
}

pub fn check_header(header: &[String]) -> Result<HeaderCheck, MigrationError> {
    if header.iter().all(|name| schema::normalize_name(name).is_empty()) {
        return Err(MigrationError::EmptyHeader);
    }

    let from_version = schema::identify(header.iter().map(String::as_str));
    if from_version == Some(SCHEMA_VERSION) {
        return Ok(HeaderCheck::Current);
    }

    let mut positions = Vec::with_capacity(header.len());
    let mut taken = [false; COLUMNS.len()];
    let mut unknown = Vec::new();
    for name in header {
        match schema::current_position(name) {
            Some(index) if !taken[index] => {
                taken[index] = true;
                positions.push(Some(index));
            }
            // Blank trailing header cells carry no data.
            None if schema::normalize_name(name).is_empty() => positions.push(None),
            _ => unknown.push(schema::normalize_name(name).to_string()),
        }
    }

    if !unknown.is_empty() {
        return Err(MigrationError::UnknownColumns(unknown));
    }
    if !taken[schema::TICKET_NO] {
        return Err(MigrationError::MissingIdentity(COLUMNS[schema::TICKET_NO]));
    }

    Ok(HeaderCheck::NeedsMigration(ColumnMap {
        from_version,
        positions,
    }))
}

fn remap(map: &ColumnMap, fields: &[String], line: u64) -> Vec<String> {
    let mut row = vec![String::new(); COLUMNS.len()];
    for (source, value) in fields.iter().enumerate() {
        match map.positions.get(source).copied().flatten() {
            Some(target) => row[target] = value.clone(),
            None if value.trim().is_empty() => {}
            None => {
                log_warn!("line {line}: value {value:?} has no column and stays in the backup only")
            }
        }
    }
    if !refresh_net_weight(&mut row) {
        log_warn!("line {line}: weights are not numeric; net weight left as recorded");
    }
    row
}

fn backup_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "records".to_string());
    let stamp = Local::now().format("%Y%m%d_%H%M%S");

    let mut candidate = path.with_file_name(format!("{stem}.backup-{stamp}.csv"));
    let mut attempt = 1;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{stem}.backup-{stamp}-{attempt}.csv"));
        attempt += 1;
    }
    candidate
}

/// Rewrites the record file under the current header. The original is
/// copied to a timestamped backup before it is replaced, and left as is on
/// any failure.
pub fn migrate_file(path: &Path) -> Result<Option<MigrationReport>, MigrationError> {
    let (header, raw_rows) = read_raw(path)?;
    let map = match check_header(&header)? {
        HeaderCheck::Current => return Ok(None),
        HeaderCheck::NeedsMigration(map) => map,
    };

    let rows: Vec<Vec<String>> = raw_rows
        .iter()
        .map(|raw| remap(&map, &raw.fields, raw.line))
        .collect();

    let backup = backup_path(path);
    fs::copy(path, &backup).map_err(|err| StorageError::io("back up record file", err))?;
    replace_file(path, &COLUMNS, &rows)?;

    log_info!(
        "migrated {} records from schema {:?} to {}; original kept at {}",
        rows.len(),
        map.from_version,
        SCHEMA_VERSION,
        backup.display()
    );

    Ok(Some(MigrationReport {
        from_version: map.from_version,
        backup,
        rows: rows.len(),
    }))
}
