#![allow(clippy::result_large_err)] // Transition failures return AppError with the offending task id attached.

use crate::core::error::AppError;
use crate::core::graph::address::{CollectionAddress, FieldPath};
use crate::core::types::ErrorCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of work a request performs, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Access,
    Erasure,
    Consent,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Access => "access",
            ActionType::Erasure => "erasure",
            ActionType::Consent => "consent",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "access" => Ok(ActionType::Access),
            "erasure" => Ok(ActionType::Erasure),
            "consent" => Ok(ActionType::Consent),
            other => Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("unknown action type '{}'", other),
            )
            .with_code("DSR-EXEC-008")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Complete,
    Error,
    AwaitingProcessing,
    AwaitingAsyncTask,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Complete => "complete",
            TaskStatus::Error => "error",
            TaskStatus::AwaitingProcessing => "awaiting_processing",
            TaskStatus::AwaitingAsyncTask => "awaiting_async_task",
            TaskStatus::Skipped => "skipped",
        }
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Skipped)
                | (InProgress, Complete)
                | (InProgress, Error)
                | (InProgress, AwaitingProcessing)
                | (InProgress, AwaitingAsyncTask)
                | (InProgress, Skipped)
                | (AwaitingProcessing, InProgress)
                | (AwaitingAsyncTask, InProgress)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Error | TaskStatus::Skipped
        )
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(
            self,
            TaskStatus::AwaitingProcessing | TaskStatus::AwaitingAsyncTask
        )
    }

    /// Whether a downstream task may start once this one is reached.
    pub fn satisfies_upstream(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Skipped)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resolved edge feeding values into a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEdge {
    pub parent: CollectionAddress,
    pub parent_field: FieldPath,
    pub child_field: FieldPath,
}

/// Redacted error summary persisted on a failed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskErrorSummary {
    pub code: String,
    pub category: String,
    pub message: String,
}

/// Persisted state of one (action, collection) pair of a privacy request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTask {
    pub id: String,
    pub privacy_request_id: String,
    pub collection_address: CollectionAddress,
    pub action_type: ActionType,
    pub status: TaskStatus,
    /// Position in the execution plan, used for stable listing.
    pub sequence: u32,
    #[serde(default)]
    pub upstream_tasks: Vec<String>,
    #[serde(default)]
    pub downstream_tasks: Vec<String>,
    #[serde(default)]
    pub input_edges: Vec<InputEdge>,
    #[serde(default)]
    pub access_data: Vec<Value>,
    #[serde(default)]
    pub rows_masked: Option<u64>,
    #[serde(default)]
    pub consent_sent: Option<bool>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub error: Option<TaskErrorSummary>,
    #[serde(default)]
    pub awaiting_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl RequestTask {
    pub fn new(
        privacy_request_id: impl Into<String>,
        action_type: ActionType,
        collection_address: CollectionAddress,
        sequence: u32,
    ) -> Self {
        let now = Utc::now();
        RequestTask {
            id: Self::task_id(action_type, &collection_address),
            privacy_request_id: privacy_request_id.into(),
            collection_address,
            action_type,
            status: TaskStatus::Pending,
            sequence,
            upstream_tasks: Vec::new(),
            downstream_tasks: Vec::new(),
            input_edges: Vec::new(),
            access_data: Vec::new(),
            rows_masked: None,
            consent_sent: None,
            attempts: 0,
            error: None,
            awaiting_reason: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Task id, unique within one privacy request.
    pub fn task_id(action_type: ActionType, address: &CollectionAddress) -> String {
        format!("{}:{}", action_type, address)
    }

    pub fn is_root_task(&self) -> bool {
        self.collection_address.is_root()
    }

    pub fn is_terminator_task(&self) -> bool {
        self.collection_address.is_terminator()
    }

    /// Move to `next`, rejecting moves the state machine does not allow.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), AppError> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!(
                    "task {} cannot move from {} to {}",
                    self.id, self.status, next
                ),
            )
            .with_code("DSR-EXEC-005"));
        }
        self.status = next;
        self.updated_at = Utc::now();
        if next != TaskStatus::Error {
            self.error = None;
        }
        if !next.is_awaiting() {
            self.awaiting_reason = None;
        }
        Ok(())
    }
}
