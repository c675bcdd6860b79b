use std::path::{Path, PathBuf};
use std::{env, fs};

use qw_core::DEFAULT_ABSORPTION_THRESHOLD;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// File name looked up inside the data directory.
pub const CONFIG_FILE: &str = "qw.toml";

/// Environment variable that overrides the base data directory.
pub const DATA_DIR_ENV: &str = "QW_DATA_DIR";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sqlite,
    Json,
}

impl BackendKind {
    fn extension(self) -> &'static str {
        match self {
            BackendKind::Sqlite => "db",
            BackendKind::Json => "json",
        }
    }
}

/// Store settings. Every field has a default, so an empty or partial
/// `qw.toml` is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,
    pub store_name: String,
    pub backend: BackendKind,
    pub absorption_threshold: f64,
    pub persist_on_write: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            store_name: "default".to_string(),
            backend: BackendKind::default(),
            absorption_threshold: DEFAULT_ABSORPTION_THRESHOLD,
            persist_on_write: false,
        }
    }
}

impl StoreConfig {
    /// Resolve the data directory (`explicit`, then `QW_DATA_DIR`, then
    /// `~/.quaternion-wave`) and read `qw.toml` from it if present.
    pub fn load(explicit_dir: Option<&Path>) -> Result<Self> {
        let data_dir = explicit_dir
            .map(PathBuf::from)
            .or_else(|| env::var_os(DATA_DIR_ENV).map(PathBuf::from))
            .unwrap_or_else(default_data_dir);

        let path = data_dir.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| {
                StoreError::Config(format!("failed to read {}: {e}", path.display()))
            })?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        config.data_dir = data_dir;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| StoreError::Config(format!("invalid {CONFIG_FILE}: {e}")))?;
        config.store_name = sanitize_name(&config.store_name);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.absorption_threshold) {
            return Err(StoreError::Config(format!(
                "absorption_threshold must be in [0, 1], got {}",
                self.absorption_threshold
            )));
        }
        if sanitize_name(&self.store_name).is_empty() {
            return Err(StoreError::Config("store_name is empty".to_string()));
        }
        Ok(())
    }

    pub fn with_store_name(mut self, name: &str) -> Self {
        self.store_name = sanitize_name(name);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Result<Self> {
        self.absorption_threshold = threshold;
        self.validate()?;
        Ok(self)
    }

    /// Path of the durable snapshot for the configured backend.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(format!(
            "{}.{}",
            sanitize_name(&self.store_name),
            self.backend.extension()
        ))
    }
}

fn default_data_dir() -> PathBuf {
    dirs_home().join(".quaternion-wave")
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Map a store name onto a file-safe stem.
pub fn sanitize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("my store"), "my_store");
        assert_eq!(sanitize_name("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_name("  notes-2026_a "), "notes-2026_a");
        assert_eq!(sanitize_name(""), "");
    }

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = StoreConfig::from_toml("").unwrap();
        assert_eq!(config.store_name, "default");
        assert_eq!(config.backend, BackendKind::Sqlite);
        assert_eq!(config.absorption_threshold, DEFAULT_ABSORPTION_THRESHOLD);
        assert!(!config.persist_on_write);
    }

    #[test]
    fn test_partial_toml() {
        let config = StoreConfig::from_toml(
            "store_name = \"research notes\"\nbackend = \"json\"\nabsorption_threshold = 0.9\n",
        )
        .unwrap();
        assert_eq!(config.store_name, "research_notes");
        assert_eq!(config.backend, BackendKind::Json);
        assert_eq!(config.absorption_threshold, 0.9);
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        assert!(matches!(
            StoreConfig::from_toml("absorption_threshold = 1.5"),
            Err(StoreError::Config(_))
        ));
        assert!(StoreConfig::default().with_threshold(-0.1).is_err());
        assert!(StoreConfig::default().with_threshold(1.0).is_ok());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(StoreConfig::from_toml("backend = \"redis\"").is_err());
    }

    #[test]
    fn test_load_reads_file_from_explicit_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "store_name = \"alpha\"\npersist_on_write = true\n",
        )
        .unwrap();

        let config = StoreConfig::load(Some(dir.path())).unwrap();
        assert_eq!(config.data_dir, dir.path());
        assert_eq!(config.store_name, "alpha");
        assert!(config.persist_on_write);
        assert_eq!(config.store_path(), dir.path().join("alpha.db"));
    }

    #[test]
    fn test_load_without_file() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::load(Some(dir.path())).unwrap();
        assert_eq!(config.store_name, "default");
        assert_eq!(config.store_path(), dir.path().join("default.db"));
    }

    #[test]
    fn test_json_backend_path() {
        let dir = TempDir::new().unwrap();
        let mut config = StoreConfig::load(Some(dir.path())).unwrap();
        config.backend = BackendKind::Json;
        let config = config.with_store_name("a/b");
        assert_eq!(config.store_path(), dir.path().join("a_b.json"));
    }
}
