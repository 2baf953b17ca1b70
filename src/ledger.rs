use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use serde::Serialize;
use tracing::debug;

use crate::error::QibError;

pub const LEDGER_FILE_NAME: &str = "QIBSubjects.log";
pub const NEW_SUBJECT_LABEL: &str = "New subject: ";
pub const NEW_INFO_LABEL: &str = "New info for Subject: ";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    NewSubject,
    NewInfo,
    Unchanged,
}

/// Classifies `row` against `history` by substring containment. A row that
/// occurs inside an unrelated entry counts as known. `subject_cell` is the
/// row's first field as rendered, delimiter included.
pub fn classify(history: &str, subject_cell: &str, row: &str) -> RowStatus {
    if !history.contains(subject_cell) {
        RowStatus::NewSubject
    } else if !history.contains(row) {
        RowStatus::NewInfo
    } else {
        RowStatus::Unchanged
    }
}

/// First field of a rendered row, up to and including the first tab.
pub fn subject_cell(row: &str) -> &str {
    match row.find('\t') {
        Some(index) => &row[..=index],
        None => row,
    }
}

#[derive(Debug, Clone)]
pub struct ChangeLedger {
    path: Utf8PathBuf,
}

impl ChangeLedger {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Snapshots the current log and opens it for appending.
    pub fn begin(&self) -> Result<LedgerBatch, QibError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| QibError::Filesystem(err.to_string()))?;
        }
        let history = match fs::read_to_string(self.path.as_std_path()) {
            Ok(history) => history,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => {
                return Err(QibError::Filesystem(format!(
                    "read ledger {}: {err}",
                    self.path
                )));
            }
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_std_path())
            .map_err(|err| QibError::Filesystem(format!("open ledger {}: {err}", self.path)))?;
        Ok(LedgerBatch {
            history,
            written: HashSet::new(),
            writer: BufWriter::new(file),
        })
    }

    /// Classifies and records every row of one run.
    pub fn record_all<I, S>(&self, rows: I) -> Result<LedgerSummary, QibError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut batch = self.begin()?;
        let mut summary = LedgerSummary::default();
        for row in rows {
            match batch.classify_and_record(row.as_ref())? {
                RowStatus::NewSubject => summary.new_subjects += 1,
                RowStatus::NewInfo => summary.new_info += 1,
                RowStatus::Unchanged => summary.unchanged += 1,
            }
        }
        batch.finish()?;
        Ok(summary)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub new_subjects: usize,
    pub new_info: usize,
    pub unchanged: usize,
}

/// One run against the ledger. History is read once at the start; rows
/// appended during the batch are remembered so they are not appended twice.
pub struct LedgerBatch {
    history: String,
    written: HashSet<String>,
    writer: BufWriter<File>,
}

impl LedgerBatch {
    pub fn classify_and_record(&mut self, row: &str) -> Result<RowStatus, QibError> {
        let status = classify(&self.history, subject_cell(row), row);
        let label = match status {
            RowStatus::NewSubject => NEW_SUBJECT_LABEL,
            RowStatus::NewInfo => NEW_INFO_LABEL,
            RowStatus::Unchanged => return Ok(status),
        };
        if self.written.contains(row) {
            debug!("row already logged in this run");
            return Ok(status);
        }
        let timestamp = Local::now().format(TIMESTAMP_FORMAT);
        writeln!(self.writer, "{timestamp}:{label}{row}")
            .map_err(|err| QibError::Filesystem(err.to_string()))?;
        self.written.insert(row.to_string());
        Ok(status)
    }

    pub fn finish(mut self) -> Result<(), QibError> {
        self.writer
            .flush()
            .map_err(|err| QibError::Filesystem(err.to_string()))
    }
}
