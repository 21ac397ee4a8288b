//! Logging configuration for sqlcursor.
//!
//! Embedding hosts that own stdout log to a file; the command-line tool logs
//! to stderr. Diagnostic records go through the `sqlcursor::diag` target.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Target used for diagnostic records reported by the call-level service.
pub const DIAG_TARGET: &str = "sqlcursor::diag";

/// `RUST_LOG` if set, else `info`. With `debug` the diagnostic target is
/// lowered to `debug` as well.
fn env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(debug)))
}

fn default_directives(debug: bool) -> String {
    if debug {
        format!("info,{DIAG_TARGET}=debug")
    } else {
        "info".to_string()
    }
}

/// Creates (or truncates) the log file, creating its directory first.
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    File::create(path)
}

/// Initializes logging to [`get_log_path`], for hosts that own stdout and
/// stderr. Returns the path written to, or `None` if the file could not be
/// opened or a subscriber was already installed.
pub fn init_file_logging(debug: bool) -> Option<PathBuf> {
    let log_path = get_log_path();
    let log_file = match open_log_file(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Warning: Could not open log file {}: {e}", log_path.display());
            return None;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .with_writer(log_file)
        .with_ansi(false)
        .try_init()
        .ok()
        .map(|()| log_path)
}

/// Initializes logging to stderr.
pub fn init_stderr_logging(debug: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .with_writer(io::stderr)
        .try_init();
}

/// Returns the path for the log file: `sqlcursor/sqlcursor.log` under the
/// XDG state directory, the config directory, or the temp directory.
pub fn get_log_path() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::config_dir)
        .map(|dir| dir.join("sqlcursor").join("sqlcursor.log"))
        .unwrap_or_else(|| std::env::temp_dir().join("sqlcursor.log"))
}
