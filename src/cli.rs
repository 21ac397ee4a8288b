//! Command-line argument parsing for sqlcursor.

use clap::Parser;
use std::path::PathBuf;

use crate::config::DriverBackend;

/// How fetched rows are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// One line per row, columns separated by tabs.
    #[default]
    Flat,
    /// One JSON object per row.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "flat" => Ok(Self::Flat),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid output format: {s}. Expected: flat or json")),
        }
    }
}

/// Runs SQL against a data source and prints the rows.
#[derive(Parser, Debug)]
#[command(name = "sqlcursor")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Data source name from the config file, or a database URL
    #[arg(value_name = "DATA_SOURCE")]
    pub data_source: String,

    /// Statements to run; read one per line from stdin when omitted
    #[arg(value_name = "SQL")]
    pub sql: Vec<String>,

    /// Config file path
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Database user
    #[arg(short = 'u', long, value_name = "USER", default_value = "")]
    pub user: String,

    /// Database password
    #[arg(
        short = 'p',
        long,
        value_name = "PASSWORD",
        env = "SQLCURSOR_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    pub password: String,

    /// Call-level service to use (sqlx or odbc); overrides the config file
    #[arg(long, value_name = "DRIVER")]
    pub driver: Option<String>,

    /// Row output format (flat or json)
    #[arg(long, value_name = "FORMAT", default_value = "flat")]
    pub format: String,

    /// Print each result set a second time after rewinding the cursor
    #[arg(long)]
    pub rewind: bool,

    /// Show diagnostic records from the database
    #[arg(long)]
    pub debug: bool,

    /// Log to the state directory instead of stderr
    #[arg(long)]
    pub log_file: bool,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::EngineConfig::default_path)
    }

    pub fn parse_output_format(&self) -> std::result::Result<OutputFormat, String> {
        self.format.parse()
    }

    /// The `--driver` choice, if given.
    pub fn parse_driver(&self) -> std::result::Result<Option<DriverBackend>, String> {
        self.driver.as_deref().map(str::parse).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_args(args: &[&str]) -> Cli {
        Cli::parse_from(args)
    }

    #[test]
    fn test_parse_data_source_and_statements() {
        let cli = parse_args(&["sqlcursor", "testdb", "select 1", "select 2"]);
        assert_eq!(cli.data_source, "testdb");
        assert_eq!(cli.sql, vec!["select 1".to_string(), "select 2".to_string()]);
        assert!(!cli.rewind);
        assert!(!cli.debug);
    }

    #[test]
    fn test_statements_optional() {
        let cli = parse_args(&["sqlcursor", "sqlite::memory:"]);
        assert!(cli.sql.is_empty());
    }

    #[test]
    fn test_parse_credentials() {
        let cli = parse_args(&["sqlcursor", "-u", "scott", "-p", "tiger", "testdb"]);
        assert_eq!(cli.user, "scott");
        assert_eq!(cli.password, "tiger");
    }

    #[test]
    fn test_parse_config_path() {
        let cli = parse_args(&["sqlcursor", "--config", "/path/to/config.toml", "testdb"]);
        assert_eq!(cli.config_path(), PathBuf::from("/path/to/config.toml"));
    }

    #[test]
    fn test_default_config_path() {
        let cli = parse_args(&["sqlcursor", "testdb"]);
        assert!(cli.config_path().ends_with("config.toml"));
    }

    #[test]
    fn test_parse_output_format() {
        let cli = parse_args(&["sqlcursor", "--format", "json", "testdb"]);
        assert_eq!(cli.parse_output_format().unwrap(), OutputFormat::Json);

        let cli = parse_args(&["sqlcursor", "--format", "FLAT", "testdb"]);
        assert_eq!(cli.parse_output_format().unwrap(), OutputFormat::Flat);

        let cli = parse_args(&["sqlcursor", "--format", "csv", "testdb"]);
        assert!(cli.parse_output_format().is_err());
    }

    #[test]
    fn test_parse_driver() {
        let cli = parse_args(&["sqlcursor", "testdb"]);
        assert_eq!(cli.parse_driver().unwrap(), None);

        let cli = parse_args(&["sqlcursor", "--driver", "odbc", "DSN=hr"]);
        assert_eq!(cli.parse_driver().unwrap(), Some(DriverBackend::Odbc));

        let cli = parse_args(&["sqlcursor", "--driver", "oci", "testdb"]);
        assert!(cli.parse_driver().is_err());
    }

    #[test]
    fn test_parse_flags() {
        let cli = parse_args(&["sqlcursor", "--rewind", "--debug", "--log-file", "testdb"]);
        assert!(cli.rewind);
        assert!(cli.debug);
        assert!(cli.log_file);
    }

    #[test]
    fn test_missing_data_source_is_an_error() {
        assert!(Cli::try_parse_from(["sqlcursor"]).is_err());
    }
}
