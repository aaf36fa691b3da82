//! Logger construction - file sinks and verbosity mapping.
//!
//! Two append-mode sinks, the way the original tooling splits them:
//! everything at the configured level goes to the information log, and
//! warnings and above are copied to the error log.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Errors raised while standing the loggers up.
#[derive(Debug, Error)]
pub enum LogError {
    /// A log directory or file could not be created or removed.
    #[error("cannot prepare log file {path}: {source}")]
    Io {
        /// The path being prepared.
        path: PathBuf,
        /// Underlying failure.
        source: std::io::Error,
    },

    /// The requested verbosity name is unknown.
    #[error("unknown log level: {0}")]
    UnknownLevel(String),

    /// A global subscriber was already installed.
    #[error("logger already initialised: {0}")]
    AlreadyInitialised(String),
}

/// Where the logs go and how loud they are.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Verbosity name: trace, debug, info, warning, error, critical, off.
    pub level: String,
    /// Directory for both log files; created when missing.
    pub dir: PathBuf,
    /// Information log file name.
    pub info_name: String,
    /// Error log file name.
    pub error_name: String,
    /// Remove pre-existing log files first.
    pub remove_existing: bool,
}

/// Maps a verbosity name to a level filter, one-to-one.
pub fn parse_level(name: &str) -> Result<LevelFilter, LogError> {
    match name {
        "trace" => Ok(LevelFilter::TRACE),
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warning" => Ok(LevelFilter::WARN),
        // tracing has no level above error; critical clamps to it.
        "error" | "critical" => Ok(LevelFilter::ERROR),
        "off" => Ok(LevelFilter::OFF),
        other => Err(LogError::UnknownLevel(other.to_string())),
    }
}

/// Builds the two file sinks and installs the global subscriber.
pub fn init(settings: &LogSettings) -> Result<(), LogError> {
    let level = parse_level(&settings.level)?;

    std::fs::create_dir_all(&settings.dir).map_err(|source| LogError::Io {
        path: settings.dir.clone(),
        source,
    })?;

    let info_path = settings.dir.join(&settings.info_name);
    let error_path = settings.dir.join(&settings.error_name);

    if settings.remove_existing {
        remove_if_present(&info_path)?;
        remove_if_present(&error_path)?;
    }

    let info_file = open_append(&info_path)?;
    let error_file = open_append(&error_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(info_file)
                .with_ansi(false)
                .with_filter(level),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(error_file)
                .with_ansi(false)
                .with_filter(LevelFilter::WARN),
        )
        .try_init()
        .map_err(|e| LogError::AlreadyInitialised(e.to_string()))?;

    Ok(())
}

fn remove_if_present(path: &Path) -> Result<(), LogError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LogError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn open_append(path: &Path) -> Result<File, LogError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LogError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names_map_one_to_one() {
        assert_eq!(parse_level("trace").unwrap(), LevelFilter::TRACE);
        assert_eq!(parse_level("debug").unwrap(), LevelFilter::DEBUG);
        assert_eq!(parse_level("info").unwrap(), LevelFilter::INFO);
        assert_eq!(parse_level("warning").unwrap(), LevelFilter::WARN);
        assert_eq!(parse_level("error").unwrap(), LevelFilter::ERROR);
        assert_eq!(parse_level("critical").unwrap(), LevelFilter::ERROR);
        assert_eq!(parse_level("off").unwrap(), LevelFilter::OFF);
        assert!(parse_level("loud").is_err());
    }

    #[test]
    fn test_remove_if_present_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-created.log");
        assert!(remove_if_present(&path).is_ok());
    }
}
