use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Engine configuration loaded from dsrgraph.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub redaction: RedactionConfig,
}

/// Worker pool and per-node limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionConfig {
    /// Maximum number of nodes executing at once
    #[serde(default = "default_parallel_limit")]
    pub parallel_limit: usize,

    /// Per-attempt connector deadline; unset means no deadline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_timeout_ms: Option<u64>,

    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Retry policy applied to retryable connector failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f32,

    #[serde(default)]
    pub jitter_ms: u64,
}

/// Where the file-backed task store keeps request state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

/// Keys whose values are masked in persisted error summaries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedactionConfig {
    #[serde(default = "default_redact_keys")]
    pub redact_keys: Vec<String>,
}

fn default_parallel_limit() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff_multiplier() -> f32 {
    1.0
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".dsrgraph/state")
}

fn default_redact_keys() -> Vec<String> {
    vec![
        "token".to_string(),
        "password".to_string(),
        "secret".to_string(),
    ]
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            parallel_limit: default_parallel_limit(),
            node_timeout_ms: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: default_max_attempts(),
            backoff_ms: 0,
            backoff_multiplier: default_backoff_multiplier(),
            jitter_ms: 0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            state_dir: default_state_dir(),
        }
    }
}

impl Default for RedactionConfig {
    fn default() -> Self {
        RedactionConfig {
            redact_keys: default_redact_keys(),
        }
    }
}

impl EngineConfig {
    /// Resolve the state directory against a workspace root.
    pub fn state_dir(&self, workspace_root: &std::path::Path) -> PathBuf {
        if self.storage.state_dir.is_absolute() {
            self.storage.state_dir.clone()
        } else {
            workspace_root.join(&self.storage.state_dir)
        }
    }
}


pub mod loader;
pub mod validation;

pub use loader::ConfigLoader;
pub use validation::ConfigValidator;
