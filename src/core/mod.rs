pub mod config;
pub mod error;
pub mod execution;
pub mod graph;
pub mod types;

pub use error::{AppError, DefaultErrorReporter, ErrorReporter};
pub use types::*;
