//! Policy configuration and filesystem layout
//!
//! Policy values are read through [`ConfigReader`] at the start of every
//! authentication so that edits take effect without a restart. The file
//! format is `key = value` lines with `#` comments (TOML syntax).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::warn;

use crate::error::{CardlockError, Result};

/// Key holding the number of failed attempts before a timed lockout
pub const MAX_FAILED_ATTEMPTS_KEY: &str = "max_failed_attempts";

/// Key holding the timed lockout length in seconds
pub const LOCKOUT_DURATION_SECONDS_KEY: &str = "lockout_duration_seconds";

/// Data directory name under the platform data dir
const DATA_DIR_NAME: &str = "cardlock";

/// Source of configuration values
pub trait ConfigReader: Send + Sync {
    /// Integer value for `key`, or `None` if absent or not an integer.
    /// Callers supply their own default.
    fn get_int(&self, key: &str) -> Option<i64>;

    /// Consistent view of the policy keys, so values resolved together
    /// cannot straddle an edit
    fn snapshot(&self) -> ConfigSnapshot {
        let mut table = toml::Table::new();
        for key in [MAX_FAILED_ATTEMPTS_KEY, LOCKOUT_DURATION_SECONDS_KEY] {
            if let Some(value) = self.get_int(key) {
                table.insert(key.to_string(), toml::Value::Integer(value));
            }
        }
        ConfigSnapshot::new(table)
    }
}

/// Configuration values captured at one point in time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSnapshot {
    table: toml::Table,
}

impl ConfigSnapshot {
    /// Wrap a parsed table
    pub fn new(table: toml::Table) -> Self {
        Self { table }
    }
}

impl ConfigReader for ConfigSnapshot {
    fn get_int(&self, key: &str) -> Option<i64> {
        self.table.get(key)?.as_integer()
    }

    fn snapshot(&self) -> ConfigSnapshot {
        self.clone()
    }
}

/// In-memory configuration, mutable at runtime
#[derive(Debug, Default)]
pub struct StaticConfig {
    values: RwLock<HashMap<String, i64>>,
}

impl StaticConfig {
    /// Create an empty configuration (every key falls back to its default)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration holding both policy keys
    pub fn with_policy(max_failed_attempts: i64, lockout_duration_seconds: i64) -> Self {
        let config = Self::new();
        config.set(MAX_FAILED_ATTEMPTS_KEY, max_failed_attempts);
        config.set(LOCKOUT_DURATION_SECONDS_KEY, lockout_duration_seconds);
        config
    }

    /// Set or replace a value
    pub fn set(&self, key: &str, value: i64) {
        let mut values = self
            .values
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        values.insert(key.to_string(), value);
    }

    /// Remove a value
    pub fn unset(&self, key: &str) {
        let mut values = self
            .values
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        values.remove(key);
    }
}

impl ConfigReader for StaticConfig {
    fn get_int(&self, key: &str) -> Option<i64> {
        let values = self
            .values
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        values.get(key).copied()
    }

    fn snapshot(&self) -> ConfigSnapshot {
        let values = self
            .values
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let table = values
            .iter()
            .map(|(key, value)| (key.clone(), toml::Value::Integer(*value)))
            .collect();
        ConfigSnapshot::new(table)
    }
}

/// Configuration file re-read on every lookup
#[derive(Debug, Clone)]
pub struct FileConfig {
    path: PathBuf,
}

impl FileConfig {
    /// Read configuration from `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the configuration file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse configuration text into a table
    pub fn parse(contents: &str) -> Result<toml::Table> {
        contents
            .parse::<toml::Table>()
            .map_err(|e| CardlockError::Config(e.to_string()))
    }

    fn read_table(&self) -> Option<toml::Table> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read config file {:?}: {}", self.path, e);
                return None;
            }
        };

        match Self::parse(&contents) {
            Ok(table) => Some(table),
            Err(e) => {
                warn!("Ignoring malformed config file {:?}: {}", self.path, e);
                None
            }
        }
    }
}

impl ConfigReader for FileConfig {
    fn get_int(&self, key: &str) -> Option<i64> {
        self.read_table()?.get(key)?.as_integer()
    }

    fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot::new(self.read_table().unwrap_or_default())
    }
}

/// Filesystem layout used by the CLI and embedding processes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardlockPaths {
    /// Lockout store file
    pub lockouts: PathBuf,
    /// Audit log (JSON lines)
    pub audit_log: PathBuf,
    /// Card table
    pub cards: PathBuf,
    /// Policy configuration
    pub config: PathBuf,
}

impl CardlockPaths {
    /// Platform default data directory
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DATA_DIR_NAME)
    }

    /// Standard file names under `data_dir`
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            lockouts: data_dir.join("card_lockouts.txt"),
            audit_log: data_dir.join("audit.log"),
            cards: data_dir.join("cards.txt"),
            config: data_dir.join("config.toml"),
        }
    }
}

impl Default for CardlockPaths {
    fn default() -> Self {
        Self::in_dir(&Self::default_data_dir())
    }
}
