//! # tribunal-core
//!
//! Deterministic building blocks of a Tribunal audit.
//!
//! This crate holds everything that does not touch the network or the
//! filesystem beyond rubric loading:
//! - the evidence and opinion data model
//! - rubric parsing, schema validation and policy toggles
//! - the shared state record and its merge reducers
//! - the synthesizer that turns opinions into final scores
//! - Markdown report rendering
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: same opinions and rules always produce the same scores
//! 2. **No LLM calls**: synthesis is rule-based
//! 3. **Traceable**: every final score carries a note naming the rule that fired
//! 4. **Merge-safe**: reducers are commutative for concurrent sibling writes
//!
//! ## Example
//!
//! ```rust,ignore
//! use tribunal_core::{RubricConfig, Synthesizer};
//!
//! let rubric = RubricConfig::from_file("rubric.json")?;
//! let synthesis = Synthesizer::for_rubric(&rubric)
//!     .synthesize(&rubric, &opinions, &Default::default());
//! println!("{}", synthesis.summary);
//! ```

pub mod evidence;
pub mod report;
pub mod rubric;
pub mod state;
pub mod synthesizer;
pub mod types;

// Re-export main types at crate root
pub use evidence::{normalize_location, Evidence, EvidenceBuilder};
pub use report::render_markdown;
pub use rubric::{PolicyRules, RubricConfig, RubricDimension, RubricError, RubricMetadata};
pub use state::{AuditInputs, EvidenceMap, SharedState, StateField, StateUpdate};
pub use synthesizer::{resolve, Resolution, ResolutionRule, Synthesis, Synthesizer};
pub use types::{
    EvaluatorRole, Opinion, TargetArtifact, ERROR_CITATION, INSUFFICIENT_EVIDENCE_CITATION,
    MALFORMED_OUTPUT_CITATION, MAX_SCORE, MIN_ARGUMENT_CHARS, MIN_SCORE, NEUTRAL_SCORE,
};
