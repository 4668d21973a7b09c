#![allow(clippy::result_large_err)]

use super::EngineConfig;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate configuration rules
    pub fn validate(config: &EngineConfig) -> Result<(), AppError> {
        if config.execution.parallel_limit == 0 {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "execution.parallel_limit must be at least 1",
            )
            .with_code("DSR-CONFIG-002"));
        }

        if config.execution.retry.max_attempts == 0 {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "execution.retry.max_attempts must be at least 1",
            )
            .with_code("DSR-CONFIG-002"));
        }

        let multiplier = config.execution.retry.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "execution.retry.backoff_multiplier must be >= 1.0",
            )
            .with_code("DSR-CONFIG-002"));
        }

        if config.execution.node_timeout_ms == Some(0) {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "execution.node_timeout_ms must be positive when set",
            )
            .with_code("DSR-CONFIG-002"));
        }

        if config.storage.state_dir.as_os_str().is_empty() {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "storage.state_dir cannot be empty",
            )
            .with_code("DSR-CONFIG-002"));
        }

        Ok(())
    }
}
