//! Flat-file ticket repository.
//!
//! One CSV file, one row per ticket, keyed by `Ticket No`. Inserts append a
//! row; updates rewrite the whole file through a staging copy that replaces
//! the original only once it is fully written.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::{MigrationError, StorageError};
use crate::{log_debug, log_info, log_warn};

pub mod helpers;
pub mod migrations;
pub mod models;
pub mod schema;

pub use migrations::MigrationReport;
pub use models::Ticket;

use helpers::{merge_rows, read_raw, replace_file, row_to_ticket, ticket_to_row, RawRow};
use schema::COLUMNS;

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    Created,
    Ready,
    Migrated(MigrationReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    Updated,
}

pub struct TicketStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TicketStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Creates the store and brings its file to the current schema.
    pub fn open(path: impl Into<PathBuf>) -> Result<(Self, InitOutcome), MigrationError> {
        let store = Self::new(path);
        let outcome = store.initialize()?;
        Ok((store, outcome))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn initialize(&self) -> Result<InitOutcome, MigrationError> {
        let _guard = self.lock();

        let is_empty = match fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => return Err(StorageError::io("inspect record file", err).into()),
        };

        if is_empty {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .map_err(|err| StorageError::io("create data directory", err))?;
            }
            replace_file(&self.path, &COLUMNS, std::iter::empty::<&Vec<String>>())?;
            log_info!("created record file {}", self.path.display());
            return Ok(InitOutcome::Created);
        }

        match migrations::migrate_file(&self.path)? {
            Some(report) => Ok(InitOutcome::Migrated(report)),
            None => Ok(InitOutcome::Ready),
        }
    }

    fn rows(&self) -> Result<Vec<RawRow>, StorageError> {
        read_raw(&self.path).map(|(_, rows)| rows)
    }

    /// Every parsable record in file order. Malformed rows are skipped here
    /// but never dropped from the file.
    pub fn all(&self) -> Result<Vec<Ticket>, StorageError> {
        let tickets = self
            .rows()?
            .into_iter()
            .filter_map(|raw| match parse_row(&raw) {
                Ok(ticket) => Some(ticket),
                Err(err) => {
                    log_warn!("skipping record: {err}");
                    None
                }
            })
            .collect();
        Ok(tickets)
    }

    pub fn find_by_ticket(&self, ticket_no: &str) -> Result<Option<Ticket>, StorageError> {
        let wanted = ticket_no.trim();
        if wanted.is_empty() {
            return Ok(None);
        }
        self.rows()?
            .iter()
            .find(|raw| field(raw, schema::TICKET_NO) == wanted)
            .map(parse_row)
            .transpose()
    }

    /// First record, in file order, whose vehicle number matches.
    pub fn find_by_vehicle(&self, vehicle_no: &str) -> Result<Option<Ticket>, StorageError> {
        let wanted = vehicle_no.trim();
        if wanted.is_empty() {
            return Ok(None);
        }
        Ok(self
            .all()?
            .into_iter()
            .find(|ticket| ticket.vehicle_no.eq_ignore_ascii_case(wanted)))
    }

    /// Inserts a new row, or merges into the existing row with the same
    /// ticket number. Empty fields of `ticket` keep their stored values.
    pub fn save(&self, ticket: &Ticket) -> Result<SaveOutcome, StorageError> {
        let ticket_no = ticket.ticket_no.trim();
        if ticket_no.is_empty() {
            return Err(StorageError::EmptyTicketNo);
        }

        let _guard = self.lock();
        let rows = self.rows()?;
        let update = ticket_to_row(ticket);

        match rows
            .iter()
            .position(|raw| field(raw, schema::TICKET_NO) == ticket_no)
        {
            Some(index) => {
                let mut rewritten: Vec<Vec<String>> =
                    rows.into_iter().map(|raw| raw.fields).collect();
                rewritten[index] = merge_rows(&rewritten[index], &update);
                replace_file(&self.path, &COLUMNS, &rewritten)?;
                log_info!("updated ticket {ticket_no}");
                Ok(SaveOutcome::Updated)
            }
            None => {
                self.append(&update)?;
                log_info!("inserted ticket {ticket_no}");
                Ok(SaveOutcome::Inserted)
            }
        }
    }

    fn append(&self, row: &[String]) -> Result<(), StorageError> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| StorageError::io("open record file for append", err))?;

        let mut prefix = Vec::new();
        if !ends_with_newline(&mut file)? {
            prefix.push(b'\n');
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(prefix);
        writer
            .write_record(row)
            .map_err(|err| StorageError::csv("encode record", err))?;
        let bytes = writer
            .into_inner()
            .map_err(|err| StorageError::io("encode record", err.into_error()))?;

        file.write_all(&bytes)
            .map_err(|err| StorageError::io("append record", err))?;
        file.sync_all()
            .map_err(|err| StorageError::io("sync record file", err))
    }

    /// Records where any field contains `needle`, ignoring case, most recent
    /// first. An empty needle matches everything.
    pub fn filter(&self, needle: &str) -> Result<Vec<Ticket>, StorageError> {
        let needle = needle.trim().to_lowercase();
        let mut matches: Vec<Ticket> = self
            .rows()?
            .iter()
            .filter(|raw| {
                raw.fields
                    .iter()
                    .any(|value| value.to_lowercase().contains(&needle))
            })
            .filter_map(|raw| parse_row(raw).ok())
            .collect();
        matches.reverse();
        Ok(matches)
    }

    /// Tickets with a first weight but no second, most recent first.
    pub fn pending(&self) -> Result<Vec<Ticket>, StorageError> {
        let mut pending: Vec<Ticket> = self
            .all()?
            .into_iter()
            .filter(Ticket::is_pending)
            .collect();
        pending.reverse();
        Ok(pending)
    }

    /// `{prefix}{n:04}` with `n` one past the highest numeric suffix among
    /// ticket numbers sharing `prefix`.
    pub fn next_ticket_no(&self, prefix: &str) -> Result<String, StorageError> {
        let highest = self
            .rows()?
            .iter()
            .filter_map(|raw| field(raw, schema::TICKET_NO).strip_prefix(prefix))
            .filter(|suffix| {
                !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit())
            })
            .filter_map(|suffix| suffix.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        let Some(following) = highest.checked_add(1) else {
            let last = format!("{prefix}{highest}");
            return Err(StorageError::TicketNumbersExhausted(last));
        };
        let next = format!("{prefix}{following:04}");
        log_debug!("next ticket number {next}");
        Ok(next)
    }
}

fn field(raw: &RawRow, index: usize) -> &str {
    raw.fields.get(index).map(|v| v.trim()).unwrap_or("")
}

fn parse_row(raw: &RawRow) -> Result<Ticket, StorageError> {
    if raw.fields.len() < COLUMNS.len() {
        log_debug!(
            "line {} has {} of {} columns; padding",
            raw.line,
            raw.fields.len(),
            COLUMNS.len()
        );
    }
    row_to_ticket(&raw.fields, raw.line)
}

fn ends_with_newline(file: &mut fs::File) -> Result<bool, StorageError> {
    let len = file
        .metadata()
        .map_err(|err| StorageError::io("inspect record file", err))?
        .len();
    if len == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))
        .and_then(|_| file.read_exact(&mut last))
        .map_err(|err| StorageError::io("read record file tail", err))?;
    Ok(last[0] == b'\n')
}
