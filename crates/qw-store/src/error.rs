use std::fmt;

use qw_core::WaveError;
use serde::Serialize;

use crate::store::{ImportReport, IngestOutcome};

/// A write that took effect in memory. Serializes as the inner value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AppliedWrite {
    Ingest(IngestOutcome),
    Import(ImportReport),
}

impl From<IngestOutcome> for AppliedWrite {
    fn from(outcome: IngestOutcome) -> Self {
        AppliedWrite::Ingest(outcome)
    }
}

impl From<ImportReport> for AppliedWrite {
    fn from(report: ImportReport) -> Self {
        AppliedWrite::Import(report)
    }
}

#[derive(Debug)]
pub enum StoreError {
    Wave(WaveError),
    Sqlite(rusqlite::Error),
    /// Durable write or read failed. In-memory state is still valid.
    Persistence(String),
    /// A write was applied in memory but the durable write after it failed.
    /// Nothing was rolled back; `applied` is what the write returned.
    NotDurable {
        applied: Box<AppliedWrite>,
        source: Box<StoreError>,
    },
    /// Records rejected because they break a pattern invariant.
    StoreCorruption { rejected: Vec<String> },
    InvalidArgument(String),
    Config(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Wave(e) => write!(f, "{e}"),
            StoreError::Sqlite(e) => write!(f, "SQLite error: {e}"),
            StoreError::Persistence(msg) => write!(f, "persistence failure: {msg}"),
            StoreError::NotDurable { source, .. } => {
                write!(f, "write applied in memory but not persisted: {source}")
            }
            StoreError::StoreCorruption { rejected } => {
                write!(f, "store corruption: {} record(s) rejected", rejected.len())
            }
            StoreError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            StoreError::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Wave(e) => Some(e),
            StoreError::Sqlite(e) => Some(e),
            StoreError::NotDurable { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl StoreError {
    /// The in-memory result of a write that could not be persisted.
    pub fn applied(&self) -> Option<&AppliedWrite> {
        match self {
            StoreError::NotDurable { applied, .. } => Some(applied.as_ref()),
            _ => None,
        }
    }
}

impl From<WaveError> for StoreError {
    fn from(e: WaveError) -> Self {
        StoreError::Wave(e)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
