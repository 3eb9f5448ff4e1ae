//! Evidence handling on the evaluator side.
//!
//! - [`context`]: select and render the evidence an evaluator sees
//! - [`grounding`]: strip claims and citations the evidence does not support
//! - [`patterns`]: shared regexes

pub mod context;
pub mod grounding;
pub mod patterns;

pub use context::{artifact_for_producer, build_context, EvidenceContext};
pub use grounding::{
    ground_opinion, ContradictionCheck, Grounder, GroundingPolicy, GroundingReport, REDACTION_MARKER,
};

/// Producer names of the built-in fact finders.
pub mod producers {
    pub const REPO_INVESTIGATOR: &str = "RepoInvestigator";
    pub const DOCUMENT_ANALYST: &str = "DocumentAnalyst";
    pub const VISION_INSPECTOR: &str = "VisionInspector";
    pub const CROSS_REFERENCE: &str = "CrossReference";
}
