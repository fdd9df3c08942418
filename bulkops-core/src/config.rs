//! src/config.rs
//! ============================================================================
//! # Config: Engine Configuration Loader and Saver
//!
//! Manages all user-editable settings for the bulk operation engine. Loads
//! and saves settings as TOML from the proper cross-platform config path
//! using the [`directories`](https://docs.rs/directories) crate.
//!
//! ## Features
//! - XDG-compliant config discovery and writing (Linux, macOS, Windows)
//! - Robust defaulting if no config file exists
//! - Async load/save for smooth integration with Tokio
//!
//! ## Example
//! ```rust,ignore
//! let config = EngineConfig::load().await?;
//! config.save().await?;
//! ```

use crate::engine::executor::ExecutorOptions;
use crate::logging::LoggerConfig;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs as TokioFs;
use tracing::info;
use undor::UndoConfig;

/// Retention of the operation log, in memory and on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Cap on the in-memory operation log; oldest terminal records are
    /// evicted first, in-flight records never are.
    pub max_in_memory: usize,

    /// How many of the most recent terminal operations are mirrored to
    /// durable storage.
    pub persisted_slice: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_in_memory: 50,
            persisted_slice: 50,
        }
    }
}

/// Main configuration struct for the engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub executor: ExecutorOptions,

    pub undo: UndoConfig,

    pub history: HistoryConfig,

    #[serde(default)]
    pub logging: LoggerConfig,
}

impl EngineConfig {
    /// Loads config from the TOML file at the XDG-compliant app config dir,
    /// or returns (and writes) defaults.
    pub async fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            info!("Loading config from {}", path.display());
            let text = TokioFs::read_to_string(&path).await?;
            let cfg: Self = toml::from_str(&text)?;

            Ok(cfg)
        } else {
            info!(
                "No config file found at {}, using default configuration. Creating it now.",
                path.display()
            );

            let default_config = Self::default();
            default_config.save().await?;

            Ok(default_config)
        }
    }

    /// Saves config to the TOML file at the XDG-compliant app config dir.
    pub async fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path()?;

        info!("Saving config to {}", path.display());

        if let Some(parent) = path.parent() {
            TokioFs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        TokioFs::write(&path, toml_str).await?;

        Ok(())
    }

    /// Returns the canonical config file path using `directories::ProjectDirs`.
    pub fn config_path() -> anyhow::Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "bulkops", "BulkOps")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory."))?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Default root for the file-backed state store.
    pub fn data_dir() -> anyhow::Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "bulkops", "BulkOps")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory."))?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();

        assert_eq!(config.executor.batch_size, 10);
        assert_eq!(config.executor.inter_batch_delay, Duration::from_millis(100));
        assert_eq!(config.undo.max_depth, 50);
        assert_eq!(config.undo.persisted_slice, 20);
        assert_eq!(config.history.max_in_memory, 50);
        assert_eq!(config.history.persisted_slice, 50);
    }

    #[test]
    fn toml_round_trip() {
        let config = EngineConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&text).unwrap();

        assert_eq!(parsed.executor.batch_size, config.executor.batch_size);
        assert_eq!(
            parsed.executor.inter_batch_delay,
            config.executor.inter_batch_delay
        );
        assert_eq!(parsed.history.max_in_memory, config.history.max_in_memory);
    }

    #[test]
    fn missing_logging_section_defaults() {
        let text = r#"
            [executor]
            batch_size = 25
            inter_batch_delay = "250ms"

            [undo]
            max_depth = 10
            persisted_slice = 5

            [history]
            max_in_memory = 20
            persisted_slice = 20
        "#;

        let parsed: EngineConfig = toml::from_str(text).unwrap();
        assert_eq!(parsed.executor.batch_size, 25);
        assert_eq!(parsed.executor.inter_batch_delay, Duration::from_millis(250));
        assert_eq!(parsed.undo.max_depth, 10);
    }
}
