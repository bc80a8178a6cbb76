//! Server options and optional file configuration
//!
//! Everything engram owns lives under `<project_root>/.engram/`. Runtime
//! tunables are stored in the database `config` table; a `config.toml` next
//! to the database may seed those values and set the log level, and its
//! absence simply means defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Directory name under the project root.
pub const ENGRAM_DIR: &str = ".engram";

/// Startup options, typically parsed from CLI flags.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Project root the memory belongs to.
    pub project_root: PathBuf,
    /// Optional IDE key; shards the database file to avoid write-lock
    /// contention between IDEs on one project.
    pub ide: Option<String>,
    /// Accepted for compatibility; no behavioral effect.
    pub mode: Option<String>,
}

impl ServerOptions {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            ide: None,
            mode: None,
        }
    }

    /// `<root>/.engram`
    pub fn engram_dir(&self) -> PathBuf {
        self.project_root.join(ENGRAM_DIR)
    }

    /// Database file, sharded per IDE when a key is set.
    pub fn database_path(&self) -> PathBuf {
        let name = match &self.ide {
            Some(key) => format!("memory-{}.db", key),
            None => "memory.db".to_string(),
        };
        self.engram_dir().join(name)
    }

    /// `<root>/.engram/backups`
    pub fn backups_dir(&self) -> PathBuf {
        self.engram_dir().join("backups")
    }

    /// `<root>/.engram/logs`
    pub fn logs_dir(&self) -> PathBuf {
        self.engram_dir().join("logs")
    }

    /// `<root>/.engram/export.json`
    pub fn export_path(&self) -> PathBuf {
        self.engram_dir().join("export.json")
    }

    /// `<root>/.engram/config.toml`
    pub fn config_file_path(&self) -> PathBuf {
        self.engram_dir().join("config.toml")
    }
}

/// Optional on-disk configuration.
#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Seed values for the database config table. Existing keys win.
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl FileConfig {
    /// Load from the given path, using defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(FileConfig::default());
        }
        Self::load_from(path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config file {:?}: {}", path, e))
        })?;

        let config: FileConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }
}
