//! Request planning, task state and the runner that drives connectors.

pub mod checkpoint;
pub mod connector;
pub mod plan;
pub mod redaction;
pub mod request;
pub mod runner;
pub mod store;
pub mod task;

pub use checkpoint::FileTaskStore;
pub use connector::{
    AwaitMode, Connector, ConnectorError, ConnectorRegistry, ConnectorRegistryBuilder,
    NodeOutcome, RequestContext, Row,
};
pub use plan::ExecutionPlan;
pub use request::{Policy, PolicyWebhook, PrivacyRequest, RequestStatus, WebhookDirection};
pub use runner::{
    NoopLifecycle, RequestLifecycle, RequestReport, RequestRunner, RunnableEvent,
    TaskDisposition, TaskReport,
};
pub use store::{InMemoryTaskStore, TaskStore};
pub use task::{ActionType, InputEdge, RequestTask, TaskErrorSummary, TaskStatus};
