//! Tracing initialization: env-filtered console output plus rolling JSON
//! file logs, with the appender guard parked in a process-wide static.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    pub log_dir: PathBuf,

    pub log_file_prefix: String,

    /// Default directive when `RUST_LOG` is unset.
    pub log_level: String,

    pub rotation: LogRotation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Never,
    Daily,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: String::from("bulkops"),
            log_level: String::from("info"),
            rotation: LogRotation::Daily,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Logger already initialized")]
    AlreadyInitialized,

    #[error("Failed to create log directory: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    #[error("Invalid log filter '{0}'")]
    InvalidFilter(String),
}

// Keeps the non-blocking writer flushing for the process lifetime.
static APPENDER_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

pub struct Logger;

impl Logger {
    /// Initialize with defaults; errors (e.g. double init in tests) are
    /// swallowed on purpose.
    pub fn init_tracing() {
        let _ = Self::init_with_config(&LoggerConfig::default());
    }

    pub fn init_with_config(config: &LoggerConfig) -> Result<(), LoggingError> {
        std::fs::create_dir_all(&config.log_dir)?;

        let appender = match config.rotation {
            LogRotation::Daily => rolling::daily(&config.log_dir, &config.log_file_prefix),
            LogRotation::Never => rolling::never(
                &config.log_dir,
                format!("{}.log", config.log_file_prefix),
            ),
        };
        let (file_writer, guard) = tracing_appender::non_blocking(appender);

        APPENDER_GUARD
            .set(guard)
            .map_err(|_| LoggingError::AlreadyInitialized)?;

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.log_level))
            .map_err(|_| LoggingError::InvalidFilter(config.log_level.clone()))?;

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(file_writer),
            )
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized)?;

        Ok(())
    }
}
