//! Runtime orchestrator for a full audit.
//!
//! Assembles the task graph from the configured fact finders and the three
//! evaluator personas, then executes it:
//! - Parallel fan-out to the fact finders, fan-in at `aggregate`
//! - Parallel fan-out to the evaluators, fan-in at `collect_errors`
//! - Deterministic synthesis and report rendering
//!
//! Optional fact finders whose capability is disabled are left out of the
//! topology entirely.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};
use tribunal_core::{AuditInputs, EvaluatorRole, SharedState};

use crate::config::{ConfigError, RuntimeConfig};
use crate::evaluator::{Evaluator, EvaluatorResources};
use crate::evidence::GroundingPolicy;
use crate::facts::{DocumentAnalyst, FactFinder, RepoInvestigator, VisionInspector};
use crate::graph::{GraphBuilder, GraphError, TaskGraph, ENTRY_NODE};
use crate::nodes::{
    AggregateNode, CollectErrorsNode, EvaluatorNode, FactFinderNode, FinalizeNode, InitializeNode, SynthesizeNode,
    AGGREGATE_NODE, COLLECT_ERRORS_NODE, SYNTHESIZE_NODE,
};
use crate::providers::{LlmProvider, ProviderRegistry};
use crate::resilience::LlmUsage;

/// Errors from the runtime orchestrator.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl RuntimeError {
    /// True when the run was aborted by a security violation.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, RuntimeError::Graph(e) if e.is_fatal())
    }
}

/// Result of one audit run.
#[derive(Debug)]
pub struct RunResult {
    /// Final merged state, including the rendered report
    pub state: SharedState,

    /// LLM usage metrics
    pub usage: LlmUsage,

    pub elapsed: Duration,
}

/// Runs audits over a validated task graph.
pub struct RuntimeOrchestrator {
    config: RuntimeConfig,
    provider: Arc<dyn LlmProvider>,
    resources: EvaluatorResources,
    graph: TaskGraph,
}

impl RuntimeOrchestrator {
    /// Orchestrator with the default finders and the configured provider.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        RuntimeOrchestratorBuilder::new().config(config).build()
    }

    pub fn builder() -> RuntimeOrchestratorBuilder {
        RuntimeOrchestratorBuilder::new()
    }

    /// Execute one audit. Fails only under the fail-fast policy or on a
    /// security violation.
    pub async fn run(&self, inputs: AuditInputs) -> Result<RunResult, RuntimeError> {
        let start = Instant::now();
        self.begin_run();
        info!(
            provider = %self.provider.name(),
            policy = ?self.config.failure_policy,
            nodes = self.graph.len(),
            "Starting audit run"
        );

        let state = self.graph.execute(SharedState::new(inputs)).await?;

        let usage = self.resources.budget.usage();
        let elapsed = start.elapsed();
        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            llm_calls = usage.llm_calls,
            errors = state.errors.len(),
            "Audit run complete"
        );
        Ok(RunResult { state, usage, elapsed })
    }

    /// Budgets and circuits start fresh for every run. The opinion cache is
    /// keyed by evidence context and model, so it is kept across runs.
    fn begin_run(&self) {
        self.resources.budget.reset();
        self.resources.circuit_breaker.reset();
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Current LLM usage.
    pub fn usage(&self) -> LlmUsage {
        self.resources.budget.usage()
    }
}

/// Builder for RuntimeOrchestrator.
pub struct RuntimeOrchestratorBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    config: RuntimeConfig,
    finders: Vec<Arc<dyn FactFinder>>,
    grounding: Option<GroundingPolicy>,
}

impl RuntimeOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            config: RuntimeConfig::default(),
            finders: Vec::new(),
            grounding: None,
        }
    }

    /// Set the LLM provider. Without one, the configured provider type is
    /// created from the registry, falling back to the offline provider.
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a fact finder. Registering any replaces the default set.
    pub fn finder(mut self, finder: Arc<dyn FactFinder>) -> Self {
        self.finders.push(finder);
        self
    }

    /// Replace the grounding phrase tables.
    pub fn grounding_policy(mut self, policy: GroundingPolicy) -> Self {
        self.grounding = Some(policy);
        self
    }

    pub fn build(self) -> Result<RuntimeOrchestrator, RuntimeError> {
        self.config.validate()?;
        let config = self.config;

        let provider = self.provider.unwrap_or_else(|| {
            ProviderRegistry::with_defaults().build_or_offline(&config.provider)
        });

        let finders = if self.finders.is_empty() {
            default_finders(&config)
        } else {
            self.finders
        };

        let mut resources = EvaluatorResources::from_config(&config);
        if let Some(policy) = self.grounding {
            resources.grounding = Arc::new(policy);
        }

        let graph = build_graph(&config, &provider, finders, &resources)?;
        debug!(order = ?graph.topological_order(), "Task graph built");

        Ok(RuntimeOrchestrator {
            config,
            provider,
            resources,
            graph,
        })
    }
}

impl Default for RuntimeOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_finders(config: &RuntimeConfig) -> Vec<Arc<dyn FactFinder>> {
    vec![
        Arc::new(RepoInvestigator::new(config.sandbox.clone())),
        Arc::new(DocumentAnalyst::new(config.sandbox.max_file_bytes())),
        Arc::new(VisionInspector::new()),
    ]
}

fn build_graph(
    config: &RuntimeConfig,
    provider: &Arc<dyn LlmProvider>,
    finders: Vec<Arc<dyn FactFinder>>,
    resources: &EvaluatorResources,
) -> Result<TaskGraph, GraphError> {
    let mut builder = GraphBuilder::new(config.failure_policy).add_node(Arc::new(InitializeNode), &[]);

    let mut finder_names: Vec<String> = Vec::new();
    for finder in finders {
        if let Some(capability) = finder.required_capability() {
            if !config.capabilities.has(capability) {
                info!(finder = %finder.name(), capability, "Capability disabled; finder excluded");
                continue;
            }
        }
        finder_names.push(finder.name().to_string());
        builder = builder.add_node(Arc::new(FactFinderNode::new(finder)), &[ENTRY_NODE]);
    }

    let aggregate_preds: Vec<&str> = if finder_names.is_empty() {
        vec![ENTRY_NODE]
    } else {
        finder_names.iter().map(String::as_str).collect()
    };
    builder = builder.add_node(Arc::new(AggregateNode), &aggregate_preds);

    for role in EvaluatorRole::ALL {
        let evaluator = Evaluator::new(role, Arc::clone(provider), config, resources.clone());
        builder = builder.add_node(Arc::new(EvaluatorNode::new(Arc::new(evaluator))), &[AGGREGATE_NODE]);
    }

    let evaluator_names: Vec<&str> = EvaluatorRole::ALL.iter().map(|r| r.key()).collect();
    builder
        .add_node(Arc::new(CollectErrorsNode), &evaluator_names)
        .add_node(Arc::new(SynthesizeNode), &[COLLECT_ERRORS_NODE])
        .add_node(Arc::new(FinalizeNode), &[SYNTHESIZE_NODE])
        .build()
}
