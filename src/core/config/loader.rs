#![allow(clippy::result_large_err)]

use super::{ConfigValidator, EngineConfig};
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use std::env;
use std::path::{Path, PathBuf};

/// File name looked up in the workspace root.
pub const CONFIG_FILE_NAME: &str = "dsrgraph.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load config from workspace root (workspace/dsrgraph.toml)
    /// Environment variables override config file values
    /// A missing file yields defaults + env vars
    pub fn load_from_workspace(workspace_path: &Path) -> Result<EngineConfig, AppError> {
        let config_path = workspace_path.join(CONFIG_FILE_NAME);
        let config_file = Self::load_from_file(&config_path)?;

        let mut config = config_file.unwrap_or_default();
        Self::apply_env_overrides(&mut config);
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load config from specific file path
    /// Returns Ok(None) if file doesn't exist
    pub fn load_from_file(path: &Path) -> Result<Option<EngineConfig>, AppError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to read config file {}: {}", path.display(), e),
            )
        })?;

        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("Failed to parse config file {}: {}", path.display(), e),
            )
            .with_code("DSR-CONFIG-001")
        })?;

        Ok(Some(config))
    }

    /// Environment variables take precedence over config file values.
    /// Unparseable values are ignored.
    fn apply_env_overrides(config: &mut EngineConfig) {
        if let Some(limit) = parse_env::<usize>("DSRGRAPH_PARALLEL_LIMIT") {
            config.execution.parallel_limit = limit;
        }

        if let Some(timeout) = parse_env::<u64>("DSRGRAPH_NODE_TIMEOUT_MS") {
            config.execution.node_timeout_ms = Some(timeout);
        }

        if let Some(attempts) = parse_env::<u32>("DSRGRAPH_RETRY_MAX_ATTEMPTS") {
            config.execution.retry.max_attempts = attempts;
        }

        if let Ok(state_dir) = env::var("DSRGRAPH_STATE_DIR") {
            if !state_dir.trim().is_empty() {
                config.storage.state_dir = PathBuf::from(state_dir);
            }
        }
    }

    /// Get documentation for supported environment variables
    pub fn env_var_documentation() -> &'static [&'static str] {
        &[
            "DSRGRAPH_PARALLEL_LIMIT - Override the number of concurrently executing nodes (default: 4)",
            "DSRGRAPH_NODE_TIMEOUT_MS - Override the per-attempt connector deadline",
            "DSRGRAPH_RETRY_MAX_ATTEMPTS - Override connector attempts per node (default: 1)",
            "DSRGRAPH_STATE_DIR - Override the task store directory (default: .dsrgraph/state)",
        ]
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| raw.trim().parse::<T>().ok())
}
