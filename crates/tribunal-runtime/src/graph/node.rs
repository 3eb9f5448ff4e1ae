use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tracing::{error, info};
use tribunal_core::{SharedState, StateField, StateUpdate};

use super::GraphError;
use crate::config::FailurePolicy;
use crate::facts::{FactError, SecurityError};

/// Errors a node body may return.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Always aborts the run
    #[error(transparent)]
    Fatal(#[from] SecurityError),

    #[error("{0}")]
    Failed(String),
}

impl From<FactError> for NodeError {
    fn from(err: FactError) -> Self {
        match err {
            FactError::Security(e) => NodeError::Fatal(e),
            other => NodeError::Failed(other.to_string()),
        }
    }
}

/// One unit of work in the task graph.
#[async_trait]
pub trait Node: Send + Sync {
    fn name(&self) -> &str;

    /// Every state field this node's updates may contain.
    fn writes(&self) -> Vec<StateField>;

    /// Update merged in place of the node's output when it fails under the
    /// resilient policy.
    fn empty_update(&self) -> StateUpdate {
        StateUpdate::default()
    }

    async fn run(&self, state: Arc<SharedState>) -> Result<StateUpdate, NodeError>;
}

/// Wraps a node with logging, panic capture, write checks and the failure
/// policy.
pub struct SafeNode {
    inner: Arc<dyn Node>,
    writes: BTreeSet<StateField>,
    policy: FailurePolicy,
}

impl SafeNode {
    pub fn new(inner: Arc<dyn Node>, policy: FailurePolicy) -> Self {
        let writes = inner.writes().into_iter().collect();
        Self { inner, writes, policy }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn writes(&self) -> &BTreeSet<StateField> {
        &self.writes
    }

    pub(super) fn inner(&self) -> &Arc<dyn Node> {
        &self.inner
    }

    /// First field in `update` that this node did not declare.
    pub(super) fn undeclared_field(&self, update: &StateUpdate) -> Option<StateField> {
        update.fields().into_iter().find(|f| !self.writes.contains(f))
    }

    pub async fn run(&self, state: Arc<SharedState>) -> Result<StateUpdate, GraphError> {
        let name = self.name().to_string();
        let start = Instant::now();
        info!(node = %name, "Node started");

        let outcome = AssertUnwindSafe(self.inner.run(state)).catch_unwind().await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let message = match outcome {
            Ok(Ok(update)) => {
                if let Some(field) = self.undeclared_field(&update) {
                    error!(node = %name, field = %field, "Node wrote an undeclared field");
                    return Err(GraphError::UndeclaredWrite { node: name, field });
                }
                info!(node = %name, elapsed_ms, fields = ?update.fields(), "Node completed");
                return Ok(update);
            }
            Ok(Err(NodeError::Fatal(source))) => {
                error!(node = %name, elapsed_ms, error = %source, "Node hit a security violation");
                return Err(GraphError::Fatal { node: name, source });
            }
            Ok(Err(NodeError::Failed(message))) => message,
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };

        error!(node = %name, elapsed_ms, error = %message, "Node failed");
        match self.policy {
            FailurePolicy::FailFast => Err(GraphError::NodeFailed { node: name, message }),
            FailurePolicy::Resilient => Ok(self.inner.empty_update().with_error(format!("{}: {}", name, message))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
