//! # tribunal-runtime
//!
//! Task graph orchestration and the LLM evaluator pipeline for Tribunal.
//!
//! `tribunal-core` holds the deterministic parts (types, rubric loading,
//! synthesis, report rendering). This crate runs everything with side
//! effects: sandboxed fact finding, provider calls, retries, budgets and the
//! parallel task graph tying them together.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tribunal_core::{AuditInputs, RubricConfig};
//! use tribunal_runtime::{RuntimeConfig, RuntimeOrchestrator};
//!
//! let rubric = RubricConfig::from_file("rubric.json")?;
//! let orchestrator = RuntimeOrchestrator::new(RuntimeConfig::load(None)?)?;
//!
//! let result = orchestrator
//!     .run(AuditInputs::new("https://github.com/org/repo", "report.md", rubric))
//!     .await?;
//! println!("{}", result.state.final_report.unwrap_or_default());
//! ```

pub mod cache;
pub mod config;
pub mod evaluator;
pub mod evidence;
pub mod facts;
pub mod graph;
pub mod nodes;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod resilience;

pub use config::{Capabilities, ConfigError, FailurePolicy, RuntimeConfig, SandboxConfig};
pub use evaluator::{Evaluator, EvaluatorPersona, EvaluatorResources};
pub use evidence::{GroundingPolicy, GroundingReport};
pub use facts::{FactError, FactFinder, SecurityError};
pub use graph::{GraphBuilder, GraphError, Node, NodeError, TaskGraph};
pub use orchestrator::{RunResult, RuntimeError, RuntimeOrchestrator, RuntimeOrchestratorBuilder};
pub use providers::{LlmProvider, OfflineProvider, ProviderError, ProviderRegistry};
pub use resilience::LlmUsage;
