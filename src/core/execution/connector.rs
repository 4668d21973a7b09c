//! Seam between the engine and the systems that actually hold data.

use crate::core::execution::request::Policy;
use crate::core::execution::task::ActionType;
use crate::core::graph::traversal_node::{InputData, TraversalNode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub type Row = Map<String, Value>;

/// How a suspended node is expected to be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwaitMode {
    /// Something outside the engine polls and re-triggers the node.
    Polling,
    /// The remote system calls back with the result.
    Callback,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("not applicable: {0}")]
    NotApplicable(String),
}

impl ConnectorError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectorError::Connection(_) | ConnectorError::Timeout(_) | ConnectorError::RateLimited(_)
        )
    }
}

/// Result of one connector call.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome<T> {
    Completed(T),
    Suspended { mode: AwaitMode, reason: String },
    Failed(ConnectorError),
}

impl<T> NodeOutcome<T> {
    pub fn suspended(mode: AwaitMode, reason: impl Into<String>) -> Self {
        NodeOutcome::Suspended {
            mode,
            reason: reason.into(),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> NodeOutcome<U> {
        match self {
            NodeOutcome::Completed(value) => NodeOutcome::Completed(f(value)),
            NodeOutcome::Suspended { mode, reason } => NodeOutcome::Suspended { mode, reason },
            NodeOutcome::Failed(err) => NodeOutcome::Failed(err),
        }
    }
}

/// Per-call context provided to connectors.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub action: ActionType,
    pub attempt: u32,
    pub identity: Map<String, Value>,
}

/// Trait implemented by data connectors, keyed by dataset `connection_key`.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection key this connector serves.
    fn key(&self) -> &str;

    async fn retrieve_data(
        &self,
        node: &TraversalNode,
        policy: &Policy,
        ctx: &RequestContext,
        input: &InputData,
    ) -> NodeOutcome<Vec<Row>>;

    /// Returns the number of rows masked.
    async fn mask_data(
        &self,
        node: &TraversalNode,
        policy: &Policy,
        ctx: &RequestContext,
        rows: &[Row],
        input: &InputData,
    ) -> NodeOutcome<u64>;

    async fn run_consent_request(
        &self,
        node: &TraversalNode,
        _policy: &Policy,
        _ctx: &RequestContext,
    ) -> NodeOutcome<bool> {
        NodeOutcome::Failed(ConnectorError::NotApplicable(format!(
            "{} does not propagate consent",
            node.address
        )))
    }
}

/// Builder used to register connectors before execution.
pub struct ConnectorRegistryBuilder {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl Default for ConnectorRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorRegistryBuilder {
    pub fn new() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    pub fn register<T: Connector>(&mut self, connector: T) -> &mut Self {
        self.register_arc(Arc::new(connector))
    }

    pub fn register_arc(&mut self, connector: Arc<dyn Connector>) -> &mut Self {
        let key = connector.key().to_string();
        if self.connectors.contains_key(&key) {
            panic!("duplicate connector registered: {}", key);
        }
        self.connectors.insert(key, connector);
        self
    }

    pub fn build(self) -> ConnectorRegistry {
        ConnectorRegistry {
            inner: Arc::new(self.connectors),
        }
    }
}

/// Immutable registry shared by every worker of a request.
#[derive(Clone)]
pub struct ConnectorRegistry {
    inner: Arc<HashMap<String, Arc<dyn Connector>>>,
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        ConnectorRegistryBuilder::new().build()
    }

    pub fn builder() -> ConnectorRegistryBuilder {
        ConnectorRegistryBuilder::new()
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Connector>> {
        self.inner.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.keys().cloned().collect();
        keys.sort();
        keys
    }
}
