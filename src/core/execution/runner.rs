#![allow(clippy::result_large_err)] // Runner returns AppError to preserve full diagnostic context; boxing would discard run-time state.

//! Drives the tasks of one privacy request to completion.
//!
//! Every entry point is safe to call repeatedly: a task only leaves
//! `pending` (or an awaiting state) through an optimistic claim in the
//! store, so duplicate dispatch of the same node is a no-op.

use crate::core::config::EngineConfig;
use crate::core::error::AppError;
use crate::core::execution::connector::{
    AwaitMode, ConnectorError, ConnectorRegistry, NodeOutcome, RequestContext, Row,
};
use crate::core::execution::plan::ExecutionPlan;
use crate::core::execution::redaction::summarize_error;
use crate::core::execution::request::{
    PolicyWebhook, PrivacyRequest, RequestStatus, WebhookDirection,
};
use crate::core::execution::store::TaskStore;
use crate::core::execution::task::{ActionType, RequestTask, TaskErrorSummary, TaskStatus};
use crate::core::graph::address::CollectionAddress;
use crate::core::graph::traversal::Traversal;
use crate::core::graph::traversal_node::InputData;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{sleep, timeout};

const MAX_REQUEST_UPDATE_ATTEMPTS: usize = 16;

/// Hooks invoked as a request moves through its phases.
#[async_trait]
pub trait RequestLifecycle: Send + Sync {
    /// Called once per action, when its TERMINATOR task runs.
    async fn on_action_complete(
        &self,
        _request: &PrivacyRequest,
        _action: ActionType,
        _tasks: &[RequestTask],
    ) -> Result<(), AppError> {
        Ok(())
    }

    /// Pre webhooks fire from `start`, post webhooks once the request completes.
    async fn run_webhooks(
        &self,
        _request: &PrivacyRequest,
        _direction: WebhookDirection,
        _webhooks: &[PolicyWebhook],
    ) -> Result<(), AppError> {
        Ok(())
    }
}

pub struct NoopLifecycle;

impl RequestLifecycle for NoopLifecycle {}

/// Progress notifications emitted while a request runs.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnableEvent {
    Dispatched {
        task_id: String,
        address: CollectionAddress,
    },
    Finished {
        task_id: String,
        status: TaskStatus,
    },
    PhaseAdvanced {
        action: ActionType,
    },
    RequestFinished {
        status: RequestStatus,
    },
}

/// What a single dispatch of a task did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskDisposition {
    Ran(TaskStatus),
    AlreadyHandled(TaskStatus),
    UpstreamNotReady,
    Canceled,
    /// Another worker claimed the task first.
    LostClaim,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    pub action: ActionType,
    pub address: CollectionAddress,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskErrorSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awaiting_reason: Option<String>,
}

/// Snapshot of a request after a run.
#[derive(Debug, Clone, Serialize)]
pub struct RequestReport {
    pub request_id: String,
    pub status: RequestStatus,
    pub completed: Vec<TaskReport>,
    pub skipped: Vec<TaskReport>,
    pub failed: Vec<TaskReport>,
    pub awaiting: Vec<TaskReport>,
    pub running: Vec<TaskReport>,
    pub pending: Vec<TaskReport>,
}

impl RequestReport {
    pub fn new(request: &PrivacyRequest, tasks: &[RequestTask]) -> Self {
        let mut report = RequestReport {
            request_id: request.id.clone(),
            status: request.status,
            completed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            awaiting: Vec::new(),
            running: Vec::new(),
            pending: Vec::new(),
        };
        for task in tasks {
            let entry = TaskReport {
                task_id: task.id.clone(),
                action: task.action_type,
                address: task.collection_address.clone(),
                status: task.status,
                error: task.error.clone(),
                awaiting_reason: task.awaiting_reason.clone(),
            };
            match task.status {
                TaskStatus::Complete => report.completed.push(entry),
                TaskStatus::Skipped => report.skipped.push(entry),
                TaskStatus::Error => report.failed.push(entry),
                TaskStatus::AwaitingProcessing | TaskStatus::AwaitingAsyncTask => {
                    report.awaiting.push(entry)
                }
                TaskStatus::InProgress => report.running.push(entry),
                TaskStatus::Pending => report.pending.push(entry),
            }
        }
        report
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskReport> {
        [
            &self.completed,
            &self.skipped,
            &self.failed,
            &self.awaiting,
            &self.running,
            &self.pending,
        ]
        .into_iter()
        .flatten()
        .find(|task| task.task_id == task_id)
    }
}

/// Work produced by one task body, before it is recorded.
enum BodyResult {
    Rows(Vec<Value>),
    Masked(u64),
    Consent(bool),
    PhaseAdvanced,
    Skipped(String),
    Suspended { mode: AwaitMode, reason: String },
    Failed(AppError),
}

impl BodyResult {
    fn from_outcome<T>(outcome: NodeOutcome<T>, address: &CollectionAddress, wrap: impl FnOnce(T) -> BodyResult) -> Self {
        match outcome {
            NodeOutcome::Completed(value) => wrap(value),
            NodeOutcome::Suspended { mode, reason } => BodyResult::Suspended { mode, reason },
            NodeOutcome::Failed(ConnectorError::NotApplicable(reason)) => BodyResult::Skipped(reason),
            NodeOutcome::Failed(err) => BodyResult::Failed(connector_failure(address, err)),
        }
    }
}

fn connector_failure(address: &CollectionAddress, err: ConnectorError) -> AppError {
    let (category, code) = match err {
        ConnectorError::Timeout(_) => (ErrorCategory::TimeoutError, "DSR-EXEC-004"),
        _ => (ErrorCategory::NodeExecutionError, "DSR-EXEC-003"),
    };
    AppError::new(category, format!("{}: {}", address, err)).with_code(code)
}

fn jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=max_ms)
    }
}

/// Executes the task graph of privacy requests built from one traversal.
pub struct RequestRunner {
    traversal: Arc<Traversal>,
    store: Arc<dyn TaskStore>,
    connectors: ConnectorRegistry,
    lifecycle: Arc<dyn RequestLifecycle>,
    config: EngineConfig,
    events: Option<UnboundedSender<RunnableEvent>>,
}

impl RequestRunner {
    pub fn new(
        traversal: Arc<Traversal>,
        store: Arc<dyn TaskStore>,
        connectors: ConnectorRegistry,
        config: EngineConfig,
    ) -> Self {
        RequestRunner {
            traversal,
            store,
            connectors,
            lifecycle: Arc::new(NoopLifecycle),
            config,
            events: None,
        }
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn RequestLifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<RunnableEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn traversal(&self) -> &Traversal {
        &self.traversal
    }

    fn emit(&self, event: RunnableEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn check_graph(&self, request: &PrivacyRequest) -> Result<(), AppError> {
        let current = &self.traversal.graph().hash;
        match &request.graph_hash {
            Some(hash) if hash == current => Ok(()),
            other => Err(AppError::new(
                ErrorCategory::ValidationError,
                format!(
                    "request {} was planned against datasets {} but the runner holds {}",
                    request.id,
                    other.as_deref().unwrap_or("<none>"),
                    current
                ),
            )
            .with_code("DSR-EXEC-006")
            .with_suggestion("rebuild the plan from the current dataset definitions")),
        }
    }

    /// Persist the plan's request and tasks, firing pre webhooks first.
    pub async fn start(&self, plan: ExecutionPlan) -> Result<String, AppError> {
        let ExecutionPlan { mut request, tasks } = plan;
        self.check_graph(&request)?;
        let pre: Vec<PolicyWebhook> = request
            .webhooks(WebhookDirection::Pre)
            .into_iter()
            .cloned()
            .collect();
        if !pre.is_empty() {
            self.lifecycle
                .run_webhooks(&request, WebhookDirection::Pre, &pre)
                .await?;
        }
        request.status = RequestStatus::InProcessing;
        let saved = self.store.save_request(&request).await?;
        for task in &tasks {
            self.store.save_task(task).await?;
        }
        tracing::info!(
            request_id = %saved.id,
            tasks = tasks.len(),
            actions = ?saved.actions,
            "privacy request started"
        );
        Ok(saved.id)
    }

    /// Dispatch ready tasks until nothing more can run, then settle the request status.
    pub async fn run(&self, request_id: &str) -> Result<RequestReport, AppError> {
        let request = self.store.load_request(request_id).await?;
        self.check_graph(&request)?;
        let parallel_limit = self.config.execution.parallel_limit.max(1);

        loop {
            if self.store.load_request(request_id).await?.is_canceled() {
                break;
            }
            let tasks = self.store.list_tasks(request_id).await?;
            let statuses: HashMap<&str, TaskStatus> =
                tasks.iter().map(|t| (t.id.as_str(), t.status)).collect();
            let ready: Vec<String> = tasks
                .iter()
                .filter(|task| task.status == TaskStatus::Pending)
                .filter(|task| {
                    task.upstream_tasks.iter().all(|id| {
                        statuses
                            .get(id.as_str())
                            .map(|status| status.satisfies_upstream())
                            .unwrap_or(false)
                    })
                })
                .map(|task| task.id.clone())
                .collect();
            if ready.is_empty() {
                break;
            }

            let mut progressed = false;
            for batch in ready.chunks(parallel_limit) {
                let results =
                    join_all(batch.iter().map(|id| self.execute_task(request_id, id))).await;
                for result in results {
                    if let TaskDisposition::Ran(_) = result? {
                        progressed = true;
                    }
                }
            }
            if !progressed {
                break;
            }
        }

        self.finalize(request_id).await
    }

    /// Run one task's body if, and only if, it is pending with every upstream task settled.
    pub async fn execute_task(
        &self,
        request_id: &str,
        task_id: &str,
    ) -> Result<TaskDisposition, AppError> {
        let task = self.store.load_task(request_id, task_id).await?;
        if task.status != TaskStatus::Pending {
            tracing::debug!(task_id, status = %task.status, "task already handled; ignoring dispatch");
            return Ok(TaskDisposition::AlreadyHandled(task.status));
        }

        let request = self.store.load_request(request_id).await?;
        if request.is_canceled() {
            tracing::info!(request_id, task_id, "request canceled; task not started");
            return Ok(TaskDisposition::Canceled);
        }

        let upstream = self.store.upstream_tasks(&task).await?;
        if let Some(blocking) = upstream.iter().find(|u| !u.status.satisfies_upstream()) {
            let err = AppError::new(
                ErrorCategory::UpstreamNotReady,
                format!("{} waits on {} ({})", task.id, blocking.id, blocking.status),
            )
            .with_code("DSR-EXEC-001");
            tracing::debug!(task_id, error = %err, "upstream not ready");
            return Ok(TaskDisposition::UpstreamNotReady);
        }

        let Some(task) = self.claim(task).await? else {
            return Ok(TaskDisposition::LostClaim);
        };
        tracing::info!(
            request_id,
            task_id,
            action = %task.action_type,
            address = %task.collection_address,
            "dispatching node"
        );
        self.emit(RunnableEvent::Dispatched {
            task_id: task.id.clone(),
            address: task.collection_address.clone(),
        });

        let (result, attempts) = self.run_body(&request, &task, &upstream).await;
        let status = self.record(task, result, attempts).await?;
        Ok(TaskDisposition::Ran(status))
    }

    /// Re-enter an awaiting node. A payload completes it directly; without
    /// one the connector is called again. No-op unless the node is awaiting.
    pub async fn resume_node(
        &self,
        request_id: &str,
        action: ActionType,
        address: &CollectionAddress,
        payload: Option<Value>,
    ) -> Result<RequestReport, AppError> {
        let task_id = RequestTask::task_id(action, address);
        let task = self.store.load_task(request_id, &task_id).await?;
        if !task.status.is_awaiting() {
            tracing::debug!(task_id = %task_id, status = %task.status, "resume ignored; task is not awaiting");
            return self.finalize(request_id).await;
        }

        let request = self.store.load_request(request_id).await?;
        self.check_graph(&request)?;
        if request.is_canceled() {
            return self.finalize(request_id).await;
        }

        let Some(task) = self.claim(task).await? else {
            return self.finalize(request_id).await;
        };
        tracing::info!(request_id, task_id = %task.id, callback = payload.is_some(), "resuming node");

        let (result, attempts) = match payload {
            Some(payload) => (result_from_payload(&task, payload), 0),
            None => {
                let upstream = self.store.upstream_tasks(&task).await?;
                self.run_body(&request, &task, &upstream).await
            }
        };
        self.record(task, result, attempts).await?;
        self.run(request_id).await
    }

    /// Mark the request canceled; tasks still pending will not start.
    pub async fn cancel(&self, request_id: &str) -> Result<(), AppError> {
        let mut changed = false;
        self.update_request(request_id, |request| {
            if matches!(
                request.status,
                RequestStatus::Complete | RequestStatus::Canceled
            ) {
                return false;
            }
            request.status = RequestStatus::Canceled;
            request.finished_at = Some(Utc::now());
            changed = true;
            true
        })
        .await?;
        if changed {
            tracing::info!(request_id, "privacy request canceled");
            self.emit(RunnableEvent::RequestFinished {
                status: RequestStatus::Canceled,
            });
        }
        Ok(())
    }

    /// Derive the request status from its tasks and persist it.
    pub async fn finalize(&self, request_id: &str) -> Result<RequestReport, AppError> {
        let tasks = self.store.list_tasks(request_id).await?;
        let status = derive_status(&tasks);
        let mut changed = false;
        let request = self
            .update_request(request_id, |request| {
                if request.is_canceled() || request.status == status {
                    return false;
                }
                request.status = status;
                if matches!(
                    status,
                    RequestStatus::Complete | RequestStatus::RequiresManualReview
                ) {
                    request.finished_at = Some(Utc::now());
                }
                changed = true;
                true
            })
            .await?;

        if changed {
            tracing::info!(request_id, status = request.status.as_str(), "privacy request status updated");
            if request.status == RequestStatus::Complete {
                let post: Vec<PolicyWebhook> = request
                    .webhooks(WebhookDirection::Post)
                    .into_iter()
                    .cloned()
                    .collect();
                if !post.is_empty() {
                    self.lifecycle
                        .run_webhooks(&request, WebhookDirection::Post, &post)
                        .await?;
                }
            }
            self.emit(RunnableEvent::RequestFinished {
                status: request.status,
            });
        }
        Ok(RequestReport::new(&request, &tasks))
    }

    async fn claim(&self, mut task: RequestTask) -> Result<Option<RequestTask>, AppError> {
        task.transition(TaskStatus::InProgress)?;
        match self.store.save_task(&task).await {
            Ok(saved) => Ok(Some(saved)),
            Err(err) if err.category == ErrorCategory::ConflictError => {
                tracing::debug!(task_id = %task.id, "task claimed by another worker");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn run_body(
        &self,
        request: &PrivacyRequest,
        task: &RequestTask,
        upstream: &[RequestTask],
    ) -> (BodyResult, u32) {
        if task.is_root_task() {
            return (BodyResult::Rows(vec![Value::Object(request.identity.clone())]), 0);
        }
        if task.is_terminator_task() {
            return (self.advance_phase(&request.id, task.action_type).await, 0);
        }

        let address = &task.collection_address;
        let Some(node) = self.traversal.node(address) else {
            return (
                BodyResult::Failed(
                    AppError::new(
                        ErrorCategory::NotFoundError,
                        format!("{} is not part of the traversal", address),
                    )
                    .with_code("DSR-EXEC-007"),
                ),
                0,
            );
        };
        if node.node.collection.skip_processing {
            return (
                BodyResult::Skipped("collection is marked skip_processing".to_string()),
                0,
            );
        }
        let Some(connector) = self.connectors.get(&node.node.connection_key) else {
            return (
                BodyResult::Failed(
                    AppError::new(
                        ErrorCategory::ValidationError,
                        format!(
                            "no connector registered for connection key '{}'",
                            node.node.connection_key
                        ),
                    )
                    .with_code("DSR-EXEC-002"),
                ),
                0,
            );
        };
        let connector = connector.as_ref();
        let policy = &request.policy;

        match task.action_type {
            ActionType::Access => {
                let input = self.build_input(task, upstream);
                if !task.input_edges.is_empty() && input.is_empty() {
                    tracing::debug!(task_id = %task.id, "no input values reached node; returning no rows");
                    return (BodyResult::Rows(Vec::new()), 0);
                }
                let input = &input;
                let (outcome, attempts) = self
                    .invoke(request, task, move |ctx| async move {
                        connector.retrieve_data(node, policy, &ctx, input).await
                    })
                    .await;
                let result = BodyResult::from_outcome(outcome, address, |rows| {
                    BodyResult::Rows(rows.into_iter().map(Value::Object).collect())
                });
                (result, attempts)
            }
            ActionType::Erasure => {
                let access_id = RequestTask::task_id(ActionType::Access, address);
                let access = match self.store.load_task(&request.id, &access_id).await {
                    Ok(access) => access,
                    Err(err) if err.category == ErrorCategory::NotFoundError => {
                        return (
                            BodyResult::Skipped("no access task for collection".to_string()),
                            0,
                        )
                    }
                    Err(err) => return (BodyResult::Failed(err), 0),
                };
                let rows: Vec<Row> = access
                    .access_data
                    .iter()
                    .filter_map(|row| row.as_object().cloned())
                    .collect();
                if rows.is_empty() {
                    return (
                        BodyResult::Skipped("access found no rows to mask".to_string()),
                        0,
                    );
                }
                let access_upstream = match self.store.upstream_tasks(&access).await {
                    Ok(tasks) => tasks,
                    Err(err) => return (BodyResult::Failed(err), 0),
                };
                let input = self.build_input(&access, &access_upstream);
                let input = &input;
                let rows = &rows;
                let (outcome, attempts) = self
                    .invoke(request, task, move |ctx| async move {
                        connector.mask_data(node, policy, &ctx, rows, input).await
                    })
                    .await;
                (
                    BodyResult::from_outcome(outcome, address, BodyResult::Masked),
                    attempts,
                )
            }
            ActionType::Consent => {
                let (outcome, attempts) = self
                    .invoke(request, task, move |ctx| async move {
                        connector.run_consent_request(node, policy, &ctx).await
                    })
                    .await;
                (
                    BodyResult::from_outcome(outcome, address, BodyResult::Consent),
                    attempts,
                )
            }
        }
    }

    /// Gather values along the task's input edges from its upstream rows,
    /// then filter and cast them for the destination node.
    fn build_input(&self, task: &RequestTask, upstream: &[RequestTask]) -> InputData {
        let mut raw: Map<String, Value> = Map::new();
        for edge in &task.input_edges {
            let parent_id = RequestTask::task_id(task.action_type, &edge.parent);
            let Some(parent) = upstream.iter().find(|u| u.id == parent_id) else {
                continue;
            };
            let slot = raw
                .entry(edge.child_field.string_path())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(values) = slot {
                for row in &parent.access_data {
                    for value in edge.parent_field.retrieve_values(row) {
                        if !values.contains(&value) {
                            values.push(value);
                        }
                    }
                }
            }
        }
        self.traversal
            .typed_filtered_values(&task.collection_address, &raw)
    }

    /// Call a connector with the configured deadline and retry policy.
    async fn invoke<T, F, Fut>(
        &self,
        request: &PrivacyRequest,
        task: &RequestTask,
        mut call: F,
    ) -> (NodeOutcome<T>, u32)
    where
        F: FnMut(RequestContext) -> Fut,
        Fut: Future<Output = NodeOutcome<T>>,
    {
        let retry = &self.config.execution.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut backoff_ms = retry.backoff_ms;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let ctx = RequestContext {
                request_id: request.id.clone(),
                action: task.action_type,
                attempt,
                identity: request.identity.clone(),
            };
            let call_future = call(ctx);
            let outcome = match self.config.execution.node_timeout_ms {
                Some(timeout_ms) => match timeout(Duration::from_millis(timeout_ms), call_future).await {
                    Ok(outcome) => outcome,
                    Err(_) => NodeOutcome::Failed(ConnectorError::Timeout(format!(
                        "no response within {}ms",
                        timeout_ms
                    ))),
                },
                None => call_future.await,
            };

            match outcome {
                NodeOutcome::Failed(err) if err.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(
                        task_id = %task.id,
                        attempt,
                        max_attempts,
                        error = %err,
                        "connector call failed; retrying"
                    );
                    let sleep_ms = backoff_ms.saturating_add(jitter(retry.jitter_ms));
                    if sleep_ms > 0 {
                        sleep(Duration::from_millis(sleep_ms)).await;
                    }
                    backoff_ms = ((backoff_ms as f32) * retry.backoff_multiplier) as u64;
                }
                other => return (other, attempt),
            }
        }
    }

    /// Terminator body: hand the finished action to the lifecycle hook and
    /// record the phase on the request, once.
    async fn advance_phase(&self, request_id: &str, action: ActionType) -> BodyResult {
        let request = match self.store.load_request(request_id).await {
            Ok(request) => request,
            Err(err) => return BodyResult::Failed(err),
        };
        if request.completed_actions.contains(&action) {
            tracing::debug!(request_id, action = %action, "phase already advanced");
            return BodyResult::PhaseAdvanced;
        }
        let tasks: Vec<RequestTask> = match self.store.list_tasks(request_id).await {
            Ok(tasks) => tasks
                .into_iter()
                .filter(|task| task.action_type == action)
                .collect(),
            Err(err) => return BodyResult::Failed(err),
        };
        if let Err(err) = self
            .lifecycle
            .on_action_complete(&request, action, &tasks)
            .await
        {
            return BodyResult::Failed(err);
        }
        let updated = self
            .update_request(request_id, |request| {
                if request.completed_actions.contains(&action) {
                    return false;
                }
                request.completed_actions.push(action);
                true
            })
            .await;
        match updated {
            Ok(_) => {
                tracing::info!(request_id, action = %action, "action phase complete");
                self.emit(RunnableEvent::PhaseAdvanced { action });
                BodyResult::PhaseAdvanced
            }
            Err(err) => BodyResult::Failed(err),
        }
    }

    /// Persist a body's result on the claimed task.
    async fn record(
        &self,
        mut task: RequestTask,
        result: BodyResult,
        attempts: u32,
    ) -> Result<TaskStatus, AppError> {
        task.attempts += attempts;
        let request = self.store.load_request(&task.privacy_request_id).await?;
        if request.is_canceled() {
            tracing::info!(task_id = %task.id, "request canceled while node ran; discarding result");
            task.transition(TaskStatus::Skipped)?;
        } else {
            match result {
                BodyResult::Rows(rows) => {
                    task.access_data = rows;
                    task.transition(TaskStatus::Complete)?;
                }
                BodyResult::Masked(count) => {
                    task.rows_masked = Some(count);
                    task.transition(TaskStatus::Complete)?;
                }
                BodyResult::Consent(sent) => {
                    task.consent_sent = Some(sent);
                    task.transition(TaskStatus::Complete)?;
                }
                BodyResult::PhaseAdvanced => task.transition(TaskStatus::Complete)?,
                BodyResult::Skipped(reason) => {
                    tracing::info!(task_id = %task.id, reason = %reason, "node skipped");
                    task.transition(TaskStatus::Skipped)?;
                }
                BodyResult::Suspended { mode, reason } => {
                    let status = match mode {
                        AwaitMode::Polling => TaskStatus::AwaitingProcessing,
                        AwaitMode::Callback => TaskStatus::AwaitingAsyncTask,
                    };
                    tracing::info!(task_id = %task.id, status = %status, reason = %reason, "node suspended");
                    task.transition(status)?;
                    task.awaiting_reason = Some(reason);
                }
                BodyResult::Failed(err) => {
                    tracing::warn!(task_id = %task.id, code = %err.code, error = %err.message, "node failed");
                    task.transition(TaskStatus::Error)?;
                    task.error = Some(summarize_error(&err, &self.config.redaction.redact_keys));
                }
            }
        }

        let saved = self.store.save_task(&task).await?;
        self.emit(RunnableEvent::Finished {
            task_id: saved.id.clone(),
            status: saved.status,
        });
        Ok(saved.status)
    }

    async fn update_request<F>(
        &self,
        request_id: &str,
        mut mutate: F,
    ) -> Result<PrivacyRequest, AppError>
    where
        F: FnMut(&mut PrivacyRequest) -> bool,
    {
        for _ in 0..MAX_REQUEST_UPDATE_ATTEMPTS {
            let mut request = self.store.load_request(request_id).await?;
            if !mutate(&mut request) {
                return Ok(request);
            }
            match self.store.save_request(&request).await {
                Ok(saved) => return Ok(saved),
                Err(err) if err.category == ErrorCategory::ConflictError => continue,
                Err(err) => return Err(err),
            }
        }
        Err(AppError::new(
            ErrorCategory::ConflictError,
            format!(
                "request {} kept changing; gave up after {} attempts",
                request_id, MAX_REQUEST_UPDATE_ATTEMPTS
            ),
        )
        .with_code("DSR-STORE-002"))
    }
}

fn derive_status(tasks: &[RequestTask]) -> RequestStatus {
    let mut terminators = tasks.iter().filter(|task| task.is_terminator_task()).peekable();
    if terminators.peek().is_some() && terminators.all(|task| task.status == TaskStatus::Complete) {
        return RequestStatus::Complete;
    }
    if tasks.iter().any(|task| task.status == TaskStatus::Error) {
        return RequestStatus::RequiresManualReview;
    }
    if tasks.iter().any(|task| task.status.is_awaiting()) {
        return RequestStatus::AwaitingAsync;
    }
    RequestStatus::InProcessing
}

/// Turn a callback payload into the result the connector would have produced.
fn result_from_payload(task: &RequestTask, payload: Value) -> BodyResult {
    let invalid = |expected: &str| {
        BodyResult::Failed(
            AppError::new(
                ErrorCategory::ValidationError,
                format!("callback payload for {} must be {}", task.id, expected),
            )
            .with_code("DSR-EXEC-009"),
        )
    };
    match task.action_type {
        ActionType::Access => match payload {
            Value::Array(items) => {
                BodyResult::Rows(items.into_iter().filter(|item| item.is_object()).collect())
            }
            Value::Object(_) => BodyResult::Rows(vec![payload]),
            Value::Null => BodyResult::Rows(Vec::new()),
            _ => invalid("a row or a list of rows"),
        },
        ActionType::Erasure => match payload {
            Value::Number(n) => match n.as_u64() {
                Some(count) => BodyResult::Masked(count),
                None => invalid("a non-negative row count"),
            },
            Value::Array(items) => BodyResult::Masked(items.len() as u64),
            _ => invalid("a row count"),
        },
        ActionType::Consent => match payload {
            Value::Bool(sent) => BodyResult::Consent(sent),
            _ => invalid("a boolean"),
        },
    }
}
