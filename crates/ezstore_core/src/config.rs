//! Store and logging configuration.
//!
//! # Responsibility
//! - Describe how a store is opened and how core logging is set up.
//! - Allow hosts to load both from JSON (or any serde format).
//!
//! # Invariants
//! - Every field has a usable default; partial documents deserialize.
//! - `StoreConfig::path == None` selects a private in-memory store.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_LOG_FILES: usize = 5;

/// Connection settings used by `open_db` and `Context::open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file. `None` opens an in-memory store.
    pub path: Option<PathBuf>,
    /// How long a connection waits on a locked database.
    pub busy_timeout_ms: u64,
    /// Switch file stores to WAL journaling so readers on other contexts
    /// keep a consistent snapshot while one context writes.
    pub wal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            wal: true,
        }
    }
}

impl StoreConfig {
    /// In-memory store with default settings.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed store with default settings.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.is_none()
    }
}

/// Settings for `init_logging`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of `trace|debug|info|warn|error` (case-insensitive).
    pub level: String,
    /// Absolute directory for rolling log files.
    pub log_dir: String,
    pub max_file_size_bytes: u64,
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: crate::logging::default_log_level().to_string(),
            log_dir: String::new(),
            max_file_size_bytes: DEFAULT_MAX_LOG_FILE_SIZE_BYTES,
            max_files: DEFAULT_MAX_LOG_FILES,
        }
    }
}

impl LoggingConfig {
    /// Default rotation settings with the given level and directory.
    pub fn new(level: impl Into<String>, log_dir: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            log_dir: log_dir.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LoggingConfig, StoreConfig};
    use std::path::PathBuf;

    #[test]
    fn store_config_defaults_to_memory() {
        let config = StoreConfig::default();
        assert!(config.is_in_memory());
        assert_eq!(config.busy_timeout().as_millis(), 5_000);
    }

    #[test]
    fn partial_store_config_document_keeps_defaults() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"path": "/tmp/ezstore.db"}"#).unwrap();
        assert_eq!(config.path, Some(PathBuf::from("/tmp/ezstore.db")));
        assert!(config.wal);
        assert_eq!(config.busy_timeout_ms, 5_000);
    }

    #[test]
    fn logging_config_reads_rotation_overrides() {
        let config: LoggingConfig = serde_json::from_str(
            r#"{"level": "warn", "log_dir": "/var/log/ezstore", "max_files": 2}"#,
        )
        .unwrap();
        assert_eq!(config.level, "warn");
        assert_eq!(config.max_files, 2);
        assert_eq!(config.max_file_size_bytes, 10 * 1024 * 1024);
    }
}
