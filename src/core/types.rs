use serde::{Deserialize, Serialize};

/// Error category enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Declared datasets or edges are structurally invalid.
    GraphConstructionError,
    /// The dry-run traversal found a deadlock, an unreachable node, or a dangling edge.
    TraversalError,
    /// A node was dispatched before its upstream tasks finished.
    UpstreamNotReady,
    /// A connector failed while retrieving or masking data.
    NodeExecutionError,
    TimeoutError,
    /// Optimistic concurrency check failed on save.
    ConflictError,
    NotFoundError,
    ValidationError,
    SerializationError,
    IoError,
    InternalError,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Error severity enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Error,
    Warning,
    Info,
    Debug,
}
