//! Task graph orchestration.
//!
//! A run is a DAG of [`Node`]s over [`SharedState`](tribunal_core::SharedState).
//! Nodes whose predecessors have all completed are spawned together; each
//! receives a snapshot of the merged state at spawn time and returns a
//! partial [`StateUpdate`](tribunal_core::StateUpdate) that is merged when it
//! completes. Evidence, opinions and errors merge by reducer, so the
//! completion order of siblings never changes the result.
//!
//! Structural problems (cycles, unknown predecessors, two unordered writers
//! of a plain field) are rejected by [`GraphBuilder::build`] before anything
//! runs.

mod builder;
mod executor;
mod node;

pub use builder::{GraphBuilder, TaskGraph, ENTRY_NODE};
pub use node::{Node, NodeError, SafeNode};

use thiserror::Error;
use tribunal_core::StateField;

use crate::facts::SecurityError;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("node '{node}' depends on unknown node '{predecessor}'")]
    UnknownNode { node: String, predecessor: String },

    #[error("node '{0}' registered twice")]
    DuplicateNode(String),

    #[error("cycle detected among nodes: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("invalid entry point: {0}")]
    InvalidEntry(String),

    #[error("node '{node}' writes undeclared field '{field}'")]
    UndeclaredWrite { node: String, field: StateField },

    #[error("nodes '{first}' and '{second}' may both write '{field}' concurrently")]
    ConflictingWriters {
        field: StateField,
        first: String,
        second: String,
    },

    #[error("node '{node}' failed: {message}")]
    NodeFailed { node: String, message: String },

    #[error("security violation in node '{node}': {source}")]
    Fatal {
        node: String,
        #[source]
        source: SecurityError,
    },

    #[error("node task aborted: {0}")]
    Join(String),
}

impl GraphError {
    /// Security violations abort the run regardless of failure policy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GraphError::Fatal { .. })
    }
}
