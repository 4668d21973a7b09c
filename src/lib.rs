//! Traversal and execution engine for data subject request (DSR) graphs.
//!
//! Dataset definitions are loaded into a [`core::graph::DatasetGraph`], a
//! [`core::graph::Traversal`] orders its collections for one identity seed,
//! and a [`core::execution::RequestRunner`] drives the per-collection tasks of
//! a privacy request through registered connectors.

pub mod cli;
pub mod core;
pub mod logging;

/// Current crate version string exposed for CLI and tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub type Result<T> = std::result::Result<T, anyhow::Error>;
