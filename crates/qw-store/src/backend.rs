//! Durable snapshot backends.
//!
//! A backend only knows how to read and replace a whole snapshot of pattern
//! records. Validation of what comes back is the store's job.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use qw_core::{PatternRecord, export_json, now_unix_millis, parse_snapshot};

use crate::config::{BackendKind, StoreConfig};
use crate::error::{Result, StoreError};
use crate::sqlite::SqliteBackend;

pub trait SnapshotBackend: Send + Sync {
    /// Read the last durable snapshot. An absent snapshot is empty.
    fn load(&self) -> Result<Vec<PatternRecord>>;

    /// Replace the durable snapshot. Either every record lands or none do.
    fn save(&self, records: &[PatternRecord]) -> Result<()>;

    /// Human-readable location, for logs and stats.
    fn describe(&self) -> String;
}

/// Open the backend named by `config`, creating the data directory if needed.
pub fn open_backend(config: &StoreConfig) -> Result<Box<dyn SnapshotBackend>> {
    fs::create_dir_all(&config.data_dir).map_err(|e| {
        StoreError::Persistence(format!(
            "failed to create {}: {e}",
            config.data_dir.display()
        ))
    })?;

    let path = config.store_path();
    Ok(match config.backend {
        BackendKind::Sqlite => Box::new(SqliteBackend::open(&path)?),
        BackendKind::Json => Box::new(JsonFileBackend::new(path)),
    })
}

/// Snapshot kept as a single pretty-printed JSON file.
///
/// Saves go to `<path>.tmp`, are fsynced, then renamed over the target and the
/// directory is fsynced, so a crash mid-write leaves the previous file intact.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl SnapshotBackend for JsonFileBackend {
    fn load(&self) -> Result<Vec<PatternRecord>> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Persistence(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };
        parse_snapshot(&json).map_err(|e| {
            StoreError::Persistence(format!("invalid snapshot {}: {e}", self.path.display()))
        })
    }

    fn save(&self, records: &[PatternRecord]) -> Result<()> {
        let json = export_json(records.to_vec(), now_unix_millis())
            .map_err(|e| StoreError::Persistence(format!("JSON export failed: {e}")))?;

        let tmp = self.temp_path();
        let write = |path: &Path| -> std::io::Result<()> {
            let mut file = File::create(path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()
        };
        write(&tmp).map_err(|e| {
            StoreError::Persistence(format!("failed to write {}: {e}", tmp.display()))
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            StoreError::Persistence(format!(
                "failed to move {} into place: {e}",
                tmp.display()
            ))
        })?;
        sync_parent(&self.path).map_err(|e| {
            StoreError::Persistence(format!(
                "failed to sync directory of {}: {e}",
                self.path.display()
            ))
        })
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

/// Make a completed rename durable.
#[cfg(unix)]
fn sync_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => File::open(dir)?.sync_all(),
        _ => File::open(".")?.sync_all(),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
