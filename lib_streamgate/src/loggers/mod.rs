//! # Logging Setup
//!
//! Installs the process-wide `tracing` subscriber: an `EnvFilter` (from
//! `RUST_LOG`, else the configured level), a stdout layer, and optionally a
//! daily-rolling file layer written through a non-blocking appender.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("log directory error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid log filter '{0}'")]
    Filter(String),
    #[error("a global tracing subscriber is already installed: {0}")]
    Init(String),
}

/// # Log Settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    /// Directory for rolling log files. `None` logs to stdout only.
    pub dir: Option<PathBuf>,
    /// Filter directive used when `RUST_LOG` is not set, e.g. `info` or `lib_streamgate=debug`.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
    /// File name prefix; the appender adds a `.YYYY-MM-DD` suffix.
    pub file_prefix: String,
    /// Rolled files kept at startup, newest first.
    pub keep_files: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: None,
            level: "info".to_string(),
            json: false,
            file_prefix: "streamgate.log".to_string(),
            keep_files: 7,
        }
    }
}

/// Installs the global subscriber. The returned guard flushes the file writer
/// when dropped, so `main` must hold it for the life of the process.
pub fn setup_logging(settings: &LogSettings) -> Result<Option<WorkerGuard>, LoggerError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level)
            .map_err(|_| LoggerError::Filter(settings.level.clone()))?,
    };

    let stdout_layer = if settings.json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    };

    let (file_layer, guard) = match &settings.dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            cleanup_old_logs(dir, &settings.file_prefix, settings.keep_files)?;

            let appender = tracing_appender::rolling::daily(dir, &settings.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            let layer = if settings.json {
                layer.json().boxed()
            } else {
                layer.boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggerError::Init(e.to_string()))?;

    Ok(guard)
}

/// Deletes rolled files named `{prefix}*` in `dir`, keeping the newest `keep`.
/// Returns how many files were removed.
pub fn cleanup_old_logs(dir: &Path, prefix: &str, keep: usize) -> Result<usize, LoggerError> {
    let mut entries: Vec<(SystemTime, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|res| res.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, e.path()))
        })
        .collect();

    // Newest first; the date suffix breaks ties between equal mtimes.
    entries.sort_by(|a, b| b.cmp(a));

    let mut removed = 0;
    for (_, path) in entries.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn keeps_only_the_newest_rolled_files() {
        let dir = tempdir().unwrap();
        for day in ["2024-01-01", "2024-01-02", "2024-01-03"] {
            fs::write(dir.path().join(format!("gateway.log.{}", day)), day).unwrap();
        }
        fs::write(dir.path().join("unrelated.txt"), "keep me").unwrap();

        let removed = cleanup_old_logs(dir.path(), "gateway.log", 2).unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join("gateway.log.2024-01-01").exists());
        assert!(dir.path().join("gateway.log.2024-01-03").exists());
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn nothing_to_clean_in_an_empty_directory() {
        let dir = tempdir().unwrap();
        assert_eq!(cleanup_old_logs(dir.path(), "live.log", 0).unwrap(), 0);
    }
}
