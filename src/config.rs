//! Configuration management for sqlcursor.
//!
//! Handles loading engine limits, cursor and diagnostic settings and named
//! data sources from a TOML file, with environment variable overrides.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure for the engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Handle table capacities and buffer bounds.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Cursor behavior.
    #[serde(default)]
    pub cursor: CursorConfig,

    /// Diagnostic reporting.
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Which call-level service the engine drives.
    #[serde(default)]
    pub driver: DriverConfig,

    /// Named data sources, resolved by the sqlx backend.
    #[serde(default)]
    pub data_sources: HashMap<String, DataSourceConfig>,
}

/// Capacity limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LimitsConfig {
    /// Connection table capacity.
    #[serde(default = "default_capacity")]
    pub connections: usize,

    /// Cursor table capacity.
    #[serde(default = "default_capacity")]
    pub cursors: usize,

    /// Upper bound for one column display buffer, in bytes.
    #[serde(default = "default_column_buffer")]
    pub column_buffer: usize,
}

fn default_capacity() -> usize {
    100
}

fn default_column_buffer() -> usize {
    65536
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connections: default_capacity(),
            cursors: default_capacity(),
            column_buffer: default_column_buffer(),
        }
    }
}

/// Cursor settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CursorConfig {
    /// Request scrollable cursors. Ignored by sources that cannot scroll.
    #[serde(default = "default_true")]
    pub scrollable: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            scrollable: default_true(),
        }
    }
}

/// Diagnostic reporter settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    /// Surface diagnostic records at warn level instead of debug.
    #[serde(default)]
    pub echo: bool,

    /// Initial message buffer for diagnostic records, in bytes.
    #[serde(default = "default_message_buffer")]
    pub message_buffer: usize,

    /// SQLSTATEs that are never reported.
    #[serde(default = "default_suppressed_states")]
    pub suppressed_states: Vec<String>,
}

fn default_message_buffer() -> usize {
    1000
}

fn default_suppressed_states() -> Vec<String> {
    vec!["01004".to_string(), "02000".to_string()]
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            echo: false,
            message_buffer: default_message_buffer(),
            suppressed_states: default_suppressed_states(),
        }
    }
}

/// Call-level service backing the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DriverBackend {
    /// Built-in driver manager over sqlx (SQLite and PostgreSQL URLs).
    #[default]
    Sqlx,
    /// The system ODBC driver manager. Needs the `odbc` build feature.
    Odbc,
}

impl std::str::FromStr for DriverBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlx" => Ok(Self::Sqlx),
            "odbc" => Ok(Self::Odbc),
            _ => Err(format!("Invalid driver: {s}. Expected: sqlx or odbc")),
        }
    }
}

/// Driver selection.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DriverConfig {
    #[serde(default)]
    pub backend: DriverBackend,
}

/// A named data source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataSourceConfig {
    /// Connection URL, e.g. `sqlite://data.db` or `postgres://host/db`.
    pub url: String,

    /// Default user when `connect` is called with an empty one.
    pub user: Option<String>,

    /// Default password (not recommended to store in config).
    pub password: Option<String>,
}

impl EngineConfig {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sqlcursor")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file. A missing file yields defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::config(format!("Failed to read config file: {e}")))?;

        Self::parse_toml(&content, path)
    }

    /// Parses and validates configuration from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| {
            EngineError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.limits.connections == 0 {
            return Err(EngineError::config("limits.connections must be at least 1"));
        }
        if self.limits.cursors == 0 {
            return Err(EngineError::config("limits.cursors must be at least 1"));
        }
        if self.limits.column_buffer < 2 {
            return Err(EngineError::config("limits.column_buffer must be at least 2"));
        }
        if self.diagnostics.message_buffer == 0 {
            return Err(EngineError::config(
                "diagnostics.message_buffer must be at least 1",
            ));
        }
        Ok(())
    }

    /// Applies `SQLCURSOR_*` environment variables on top of the file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides read through `lookup`.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("SQLCURSOR_DEBUG") {
            if is_truthy(&value) {
                self.diagnostics.echo = true;
            }
        }
        if let Some(value) = lookup("SQLCURSOR_MAX_CONNECTIONS") {
            self.limits.connections = parse_capacity("SQLCURSOR_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = lookup("SQLCURSOR_MAX_CURSORS") {
            self.limits.cursors = parse_capacity("SQLCURSOR_MAX_CURSORS", &value)?;
        }
        if let Some(value) = lookup("SQLCURSOR_DRIVER") {
            self.driver.backend = value.parse().map_err(EngineError::config)?;
        }
        self.validate()
    }

    /// Gets a named data source.
    pub fn get_data_source(&self, name: &str) -> Option<&DataSourceConfig> {
        self.data_sources.get(name)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_capacity(name: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::config(format!("{name} must be a positive integer, got '{value}'")))
}
