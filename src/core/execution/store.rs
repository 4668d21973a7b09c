#![allow(clippy::result_large_err)] // Store operations return AppError so conflicts keep their ConflictError category.

//! Persistence seam for requests and tasks.
//!
//! Every save is an optimistic compare-and-swap on `version`: the caller
//! passes the record it loaded, the store accepts it only if the stored
//! version still matches, and hands back the record with the version bumped.
//! A record with version 0 may only be created, never overwrite.

use crate::core::error::AppError;
use crate::core::execution::request::PrivacyRequest;
use crate::core::execution::task::RequestTask;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn load_request(&self, request_id: &str) -> Result<PrivacyRequest, AppError>;

    async fn save_request(&self, request: &PrivacyRequest) -> Result<PrivacyRequest, AppError>;

    async fn load_task(&self, request_id: &str, task_id: &str) -> Result<RequestTask, AppError>;

    async fn save_task(&self, task: &RequestTask) -> Result<RequestTask, AppError>;

    /// Every task of the request, in plan order.
    async fn list_tasks(&self, request_id: &str) -> Result<Vec<RequestTask>, AppError>;

    async fn upstream_tasks(&self, task: &RequestTask) -> Result<Vec<RequestTask>, AppError> {
        let mut out = Vec::with_capacity(task.upstream_tasks.len());
        for id in &task.upstream_tasks {
            out.push(self.load_task(&task.privacy_request_id, id).await?);
        }
        Ok(out)
    }
}

pub(crate) fn not_found(kind: &str, id: &str) -> AppError {
    AppError::new(ErrorCategory::NotFoundError, format!("{} {} not found", kind, id))
        .with_code("DSR-STORE-001")
}

pub(crate) fn version_conflict(kind: &str, id: &str, expected: u64, found: Option<u64>) -> AppError {
    let found = found.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string());
    AppError::new(
        ErrorCategory::ConflictError,
        format!(
            "{} {} was modified concurrently (expected version {}, found {})",
            kind, id, expected, found
        ),
    )
    .with_code("DSR-STORE-002")
}

/// Compare-and-swap shared by every store implementation.
pub(crate) fn check_version(
    kind: &str,
    id: &str,
    incoming: u64,
    stored: Option<u64>,
) -> Result<u64, AppError> {
    match stored {
        None if incoming == 0 => Ok(1),
        Some(current) if current == incoming && incoming > 0 => Ok(current + 1),
        other => Err(version_conflict(kind, id, incoming, other)),
    }
}

/// Process-local store backed by concurrent maps.
#[derive(Default)]
pub struct InMemoryTaskStore {
    requests: DashMap<String, PrivacyRequest>,
    tasks: DashMap<String, BTreeMap<String, RequestTask>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn load_request(&self, request_id: &str) -> Result<PrivacyRequest, AppError> {
        self.requests
            .get(request_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found("request", request_id))
    }

    async fn save_request(&self, request: &PrivacyRequest) -> Result<PrivacyRequest, AppError> {
        let mut saved = request.clone();
        saved.updated_at = Utc::now();
        match self.requests.entry(request.id.clone()) {
            Entry::Occupied(mut entry) => {
                saved.version =
                    check_version("request", &request.id, request.version, Some(entry.get().version))?;
                entry.insert(saved.clone());
            }
            Entry::Vacant(entry) => {
                saved.version = check_version("request", &request.id, request.version, None)?;
                entry.insert(saved.clone());
            }
        }
        Ok(saved)
    }

    async fn load_task(&self, request_id: &str, task_id: &str) -> Result<RequestTask, AppError> {
        self.tasks
            .get(request_id)
            .and_then(|tasks| tasks.get(task_id).cloned())
            .ok_or_else(|| not_found("task", task_id))
    }

    async fn save_task(&self, task: &RequestTask) -> Result<RequestTask, AppError> {
        let mut tasks = self
            .tasks
            .entry(task.privacy_request_id.clone())
            .or_default();
        let stored = tasks.get(&task.id).map(|existing| existing.version);
        let next = check_version("task", &task.id, task.version, stored)?;
        let mut saved = task.clone();
        saved.version = next;
        saved.updated_at = Utc::now();
        tasks.insert(saved.id.clone(), saved.clone());
        Ok(saved)
    }

    async fn list_tasks(&self, request_id: &str) -> Result<Vec<RequestTask>, AppError> {
        let mut tasks: Vec<RequestTask> = self
            .tasks
            .get(request_id)
            .map(|tasks| tasks.values().cloned().collect())
            .unwrap_or_default();
        tasks.sort_by_key(|task| task.sequence);
        Ok(tasks)
    }
}
