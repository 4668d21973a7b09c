#![allow(clippy::result_large_err)] // Checkpoint module returns AppError to preserve structured diagnostic context.

//! File-backed [`TaskStore`] that survives process restarts.

use crate::core::error::AppError;
use crate::core::execution::request::PrivacyRequest;
use crate::core::execution::store::{check_version, not_found, TaskStore};
use crate::core::execution::task::RequestTask;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Paths under `<state_dir>/requests/<request_id>`.
pub struct RequestStatePaths {
    pub request_dir: PathBuf,
    pub request_file: PathBuf,
    pub tasks_dir: PathBuf,
}

impl RequestStatePaths {
    pub fn new(state_dir: &Path, request_id: &str) -> Self {
        let request_dir = Self::requests_root(state_dir).join(request_id);
        let request_file = request_dir.join("request.json");
        let tasks_dir = request_dir.join("tasks");
        Self {
            request_dir,
            request_file,
            tasks_dir,
        }
    }

    pub fn requests_root(state_dir: &Path) -> PathBuf {
        state_dir.join("requests")
    }

    /// Task ids contain `:` and `.`; file names use their hex encoding.
    pub fn task_file(&self, task_id: &str) -> PathBuf {
        self.tasks_dir.join(format!("{}.json", hex::encode(task_id)))
    }
}

fn validate_request_id(request_id: &str) -> Result<(), AppError> {
    if request_id.is_empty()
        || !request_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::new(
            ErrorCategory::ValidationError,
            format!("request id '{}' contains invalid characters for filesystem use", request_id),
        )
        .with_code("DSR-STORE-004"));
    }
    Ok(())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to create directory {}: {}", parent.display(), err),
            )
            .with_code("DSR-STORE-003")
        })?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, data).map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!("failed to write {}: {}", tmp_path.display(), err),
        )
        .with_code("DSR-STORE-003")
    })?;
    fs::rename(&tmp_path, path).map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!(
                "failed to rename {} -> {}: {}",
                tmp_path.display(),
                path.display(),
                err
            ),
        )
        .with_code("DSR-STORE-003")
    })?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    let content = serde_json::to_vec_pretty(value).map_err(|err| {
        AppError::new(
            ErrorCategory::SerializationError,
            format!("failed to serialize {}: {}", path.display(), err),
        )
    })?;
    atomic_write(path, &content)
}

/// `Ok(None)` when the file does not exist.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, AppError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path).map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!("failed to read {}: {}", path.display(), err),
        )
        .with_code("DSR-STORE-003")
    })?;
    serde_json::from_slice(&bytes).map(Some).map_err(|err| {
        AppError::new(
            ErrorCategory::SerializationError,
            format!("failed to deserialize {}: {}", path.display(), err),
        )
    })
}

/// JSON files under a state directory; one writer at a time per store.
pub struct FileTaskStore {
    state_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTaskStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Ids of every request with a persisted record, sorted.
    pub fn list_requests(&self) -> Result<Vec<String>, AppError> {
        let root = RequestStatePaths::requests_root(&self.state_dir);
        if !root.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&root).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to list request state: {}", err),
            )
            .with_code("DSR-STORE-003")
        })?;
        let mut ids: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.path().join("request.json").is_file())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn load_request(&self, request_id: &str) -> Result<PrivacyRequest, AppError> {
        validate_request_id(request_id)?;
        let paths = RequestStatePaths::new(&self.state_dir, request_id);
        read_json(&paths.request_file)?.ok_or_else(|| not_found("request", request_id))
    }

    async fn save_request(&self, request: &PrivacyRequest) -> Result<PrivacyRequest, AppError> {
        validate_request_id(&request.id)?;
        let _guard = self.write_lock.lock().await;
        let paths = RequestStatePaths::new(&self.state_dir, &request.id);
        let stored: Option<PrivacyRequest> = read_json(&paths.request_file)?;
        let mut saved = request.clone();
        saved.version = check_version(
            "request",
            &request.id,
            request.version,
            stored.map(|r| r.version),
        )?;
        saved.updated_at = Utc::now();
        write_json(&paths.request_file, &saved)?;
        Ok(saved)
    }

    async fn load_task(&self, request_id: &str, task_id: &str) -> Result<RequestTask, AppError> {
        validate_request_id(request_id)?;
        let paths = RequestStatePaths::new(&self.state_dir, request_id);
        read_json(&paths.task_file(task_id))?.ok_or_else(|| not_found("task", task_id))
    }

    async fn save_task(&self, task: &RequestTask) -> Result<RequestTask, AppError> {
        validate_request_id(&task.privacy_request_id)?;
        let _guard = self.write_lock.lock().await;
        let paths = RequestStatePaths::new(&self.state_dir, &task.privacy_request_id);
        let path = paths.task_file(&task.id);
        let stored: Option<RequestTask> = read_json(&path)?;
        let mut saved = task.clone();
        saved.version = check_version("task", &task.id, task.version, stored.map(|t| t.version))?;
        saved.updated_at = Utc::now();
        write_json(&path, &saved)?;
        Ok(saved)
    }

    async fn list_tasks(&self, request_id: &str) -> Result<Vec<RequestTask>, AppError> {
        validate_request_id(request_id)?;
        let paths = RequestStatePaths::new(&self.state_dir, request_id);
        if !paths.tasks_dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&paths.tasks_dir).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to list {}: {}", paths.tasks_dir.display(), err),
            )
            .with_code("DSR-STORE-003")
        })?;
        let mut tasks = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(task) = read_json::<RequestTask>(&path)? {
                tasks.push(task);
            }
        }
        tasks.sort_by_key(|task| task.sequence);
        Ok(tasks)
    }
}
