//! Fact-finding collaborators.
//!
//! Each finder investigates one artifact and returns evidence. A finder
//! that looks and finds nothing returns `found = false` evidence; it only
//! errors when its own prerequisite (a clone, say) cannot be met.

pub mod cross_reference;
pub mod document;
pub mod repo;
pub mod sandbox;
pub mod vision;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tribunal_core::{AuditInputs, Evidence, TargetArtifact};

pub use cross_reference::cross_reference;
pub use document::DocumentAnalyst;
pub use repo::RepoInvestigator;
pub use sandbox::{SandboxedExecutor, SecurityError};
pub use vision::VisionInspector;

/// Errors from fact finders.
#[derive(Error, Debug)]
pub enum FactError {
    #[error("cannot proceed: {0}")]
    CannotProceed(String),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// A leaf node that populates the evidence pool.
#[async_trait]
pub trait FactFinder: Send + Sync {
    /// Producer name; also the evidence key this finder writes.
    fn name(&self) -> &str;

    fn target_artifact(&self) -> TargetArtifact;

    /// Capability flag that must be enabled for the finder to be scheduled.
    fn required_capability(&self) -> Option<&str> {
        None
    }

    async fn investigate(&self, inputs: &AuditInputs) -> Result<Vec<Evidence>, FactError>;
}
