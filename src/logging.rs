use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "SNAPFEED_LOG";
const LOG_FILE: &str = "snapfeed.log";
const DEFAULT_FILTER: &str = "info";

pub fn default_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("snapfeed"))
}

/// Installs a file-backed subscriber; the terminal belongs to the UI.
///
/// Returns `None` when a global subscriber is already installed. Keep the
/// guard alive for the whole run or buffered lines are lost.
pub fn init(log_dir: &Path) -> Result<Option<WorkerGuard>> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("logging: create directory {}", log_dir.display()))?;
    let log_path = log_dir.join(LOG_FILE);
    if log_path.exists() {
        let _ = fs::remove_file(&log_path);
    }

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    match tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(nb_writer)
        .with_ansi(false)
        .try_init()
    {
        Ok(()) => Ok(Some(guard)),
        Err(_) => Ok(None),
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
