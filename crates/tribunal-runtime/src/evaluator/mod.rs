//! Evaluator response pipeline.
//!
//! One [`Evaluator`] per persona. For each criterion it runs:
//!
//! 1. context: filter, rank and truncate the evidence pool
//! 2. provider call with per-attempt timeout and jittered retry
//! 3. coercion cascade over whatever shape came back
//! 4. guard rails (score range, argument length, citations)
//! 5. grounding against the evidence pool
//!
//! `evaluate` never fails. Open circuits, exhausted budgets, quota errors
//! and permanent provider errors all degrade to a neutral opinion.

pub mod coercion;
pub mod persona;

use std::sync::Arc;

use tracing::{debug, info, warn};
use tribunal_core::{EvaluatorRole, EvidenceMap, Opinion, RubricConfig, RubricDimension};

use crate::cache::{OpinionCache, OpinionKey};
use crate::config::{ContextConfig, RetryConfig, RuntimeConfig};
use crate::evidence::{build_context, ground_opinion, GroundingPolicy};
use crate::prompts::{build_user_message, opinion_schema};
use crate::providers::{ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError};
use crate::resilience::{retry_transient, BudgetTracker, CircuitBreaker};

pub use coercion::{apply_guard_rails, coerce, CoercionStage, Coerced, ProviderResponse, RawOpinion};
pub use persona::EvaluatorPersona;

/// State shared by every evaluator in a run.
#[derive(Clone)]
pub struct EvaluatorResources {
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub budget: Arc<BudgetTracker>,
    pub cache: Option<Arc<OpinionCache>>,
    pub grounding: Arc<GroundingPolicy>,
}

impl EvaluatorResources {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            circuit_breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            budget: Arc::new(BudgetTracker::new(
                config.budgets.global_max_tokens,
                config.budgets.per_evaluator_max_tokens,
            )),
            cache: OpinionCache::from_config(&config.cache).map(Arc::new),
            grounding: Arc::new(GroundingPolicy::default()),
        }
    }
}

pub struct Evaluator {
    persona: EvaluatorPersona,
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
    retry: RetryConfig,
    context_limits: ContextConfig,
    resources: EvaluatorResources,
}

impl Evaluator {
    pub fn new(
        role: EvaluatorRole,
        provider: Arc<dyn LlmProvider>,
        config: &RuntimeConfig,
        resources: EvaluatorResources,
    ) -> Self {
        let completion = CompletionConfig {
            response_schema: Some(opinion_schema()),
            ..config.completion_config()
        };

        Self {
            persona: EvaluatorPersona::for_role(role),
            provider,
            completion,
            retry: config.retry.clone(),
            context_limits: config.context.clone(),
            resources,
        }
    }

    pub fn role(&self) -> EvaluatorRole {
        self.persona.role
    }

    pub fn persona(&self) -> &EvaluatorPersona {
        &self.persona
    }

    /// Produce a grounded opinion on one criterion.
    pub async fn evaluate(&self, dimension: &RubricDimension, evidences: &EvidenceMap) -> Opinion {
        let role = self.role();
        let context = build_context(evidences, dimension.target_artifact, &self.context_limits);
        let key = OpinionKey::new(role, &dimension.id, context.fingerprint(), &self.completion.model);

        if let Some(cache) = &self.resources.cache {
            if let Some(opinion) = cache.get(&key).await {
                debug!(evaluator = %role, criterion = %dimension.id, "Opinion served from cache");
                self.resources.budget.record_cache_hit();
                return opinion;
            }
        }

        if self.resources.circuit_breaker.is_open(role) {
            warn!(evaluator = %role, criterion = %dimension.id, "Circuit open, emitting neutral opinion");
            return Opinion::neutral(role, &dimension.id, "provider circuit is open for this evaluator");
        }

        let user_message = build_user_message(dimension, role, &context.text);
        let estimated_tokens = self.provider.estimate_tokens(&self.persona.system_prompt)
            + self.provider.estimate_tokens(&user_message)
            + self.completion.max_tokens;
        if !self.resources.budget.can_afford(role, estimated_tokens) {
            warn!(
                evaluator = %role,
                criterion = %dimension.id,
                estimated_tokens,
                "Token budget exhausted, emitting neutral opinion"
            );
            return Opinion::neutral(role, &dimension.id, "token budget exhausted");
        }

        let messages = vec![
            ChatMessage::system(self.persona.system_prompt.clone()),
            ChatMessage::user(user_message),
        ];
        let label = format!("{}:{}", role.key(), dimension.id);
        let outcome = retry_transient(&self.retry, &label, || self.call_provider(messages.clone())).await;
        self.resources.budget.record_retries(outcome.retries);

        match outcome.result {
            Ok(response) => {
                self.resources.circuit_breaker.record_success(role);
                self.resources
                    .budget
                    .record_usage(role, &response.usage, &response.model);

                let coerced = coerce(ProviderResponse::from(response));
                if coerced.stage != CoercionStage::Typed {
                    debug!(evaluator = %role, criterion = %dimension.id, stage = ?coerced.stage, "Provider output coerced");
                }
                let cacheable = coerced.stage != CoercionStage::Malformed;

                let opinion = apply_guard_rails(role, &dimension.id, coerced.payload);
                let (grounded, report) = ground_opinion(&opinion, evidences, &self.resources.grounding);
                if !report.is_clean() {
                    info!(
                        evaluator = %role,
                        criterion = %dimension.id,
                        redacted = report.redacted_references.len(),
                        dropped_sentences = report.dropped_sentences,
                        contradictions = report.contradictions.len(),
                        penalty = report.penalty,
                        reward = report.reward,
                        "Opinion grounded"
                    );
                }

                if cacheable {
                    if let Some(cache) = &self.resources.cache {
                        cache.insert(key, grounded.clone()).await;
                    }
                }
                grounded
            }
            Err(err) if err.is_exhausted() => {
                warn!(evaluator = %role, criterion = %dimension.id, error = %err, "Provider quota exhausted");
                Opinion::neutral(role, &dimension.id, "provider quota exhausted")
            }
            Err(err) => {
                self.resources.circuit_breaker.record_failure(role);
                warn!(evaluator = %role, criterion = %dimension.id, error = %err, "Provider call failed");
                Opinion::neutral(role, &dimension.id, &format!("provider error ({})", err))
            }
        }
    }

    /// Opinions on every criterion of the rubric, in rubric order.
    pub async fn evaluate_all(&self, rubric: &RubricConfig, evidences: &EvidenceMap) -> Vec<Opinion> {
        let mut opinions = Vec::with_capacity(rubric.dimensions.len());
        for dimension in &rubric.dimensions {
            opinions.push(self.evaluate(dimension, evidences).await);
        }
        opinions
    }

    async fn call_provider(&self, messages: Vec<ChatMessage>) -> Result<CompletionResponse, ProviderError> {
        let timeout = self.completion.timeout;
        match tokio::time::timeout(timeout, self.provider.complete(messages, &self.completion)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tribunal_core::{Evidence, TargetArtifact, ERROR_CITATION, MALFORMED_OUTPUT_CITATION};

    use crate::resilience::{CircuitBreakerConfig, CircuitState};

    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<CompletionResponse, ProviderError>>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<CompletionResponse, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::ParseError("script exhausted".into())))
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn good_response() -> CompletionResponse {
        CompletionResponse::structured(
            json!({
                "score": 4,
                "argument": "The graph module at src/graph.rs fans the evaluators out concurrently \
                             and merges their results through reducers as expected.",
                "cited_evidence": ["src/graph.rs"]
            }),
            "claude-sonnet",
        )
    }

    fn dimension() -> RubricDimension {
        RubricDimension {
            id: "graph_orchestration".into(),
            name: "Graph Orchestration".into(),
            target_artifact: TargetArtifact::Repo,
            forensic_instruction: "Look for fan-out.".into(),
            per_evaluator_instruction: BTreeMap::new(),
        }
    }

    fn evidences() -> EvidenceMap {
        let mut map = EvidenceMap::new();
        map.insert(
            "RepoInvestigator".into(),
            vec![Evidence::found("RepoInvestigator", "src/graph.rs", "parallel execution via fan-out", 0.9)],
        );
        map
    }

    fn runtime_config() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.retry.base_delay = Duration::from_millis(10);
        config.retry.max_delay = Duration::from_millis(40);
        config.circuit_breaker = CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        config
    }

    fn evaluator(provider: Arc<ScriptedProvider>, config: &RuntimeConfig) -> Evaluator {
        Evaluator::new(
            EvaluatorRole::Critic,
            provider,
            config,
            EvaluatorResources::from_config(config),
        )
    }

    #[tokio::test]
    async fn test_structured_response_becomes_opinion() {
        let provider = ScriptedProvider::new(vec![Ok(good_response())]);
        let config = runtime_config();
        let evaluator = evaluator(provider.clone(), &config);

        let opinion = evaluator.evaluate(&dimension(), &evidences()).await;
        assert_eq!(opinion.score, 4);
        assert_eq!(opinion.cited_evidence, vec!["src/graph.rs"]);
        assert!(opinion.is_well_formed());
        assert_eq!(evaluator.resources.budget.usage().llm_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Overloaded("busy".into())),
            Err(ProviderError::RateLimited { retry_after: None }),
            Ok(good_response()),
        ]);
        let config = runtime_config();
        let evaluator = evaluator(provider.clone(), &config);

        let opinion = evaluator.evaluate(&dimension(), &evidences()).await;
        assert_eq!(opinion.score, 4);
        assert_eq!(provider.calls(), 3);
        assert_eq!(evaluator.resources.budget.usage().retries, 2);
    }

    #[tokio::test]
    async fn test_permanent_error_degrades_and_trips_breaker() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::AuthError)]);
        let config = runtime_config();
        let evaluator = evaluator(provider.clone(), &config);

        let opinion = evaluator.evaluate(&dimension(), &evidences()).await;
        assert_eq!(opinion.score, 3);
        assert_eq!(opinion.cited_evidence, vec![ERROR_CITATION]);
        assert_eq!(provider.calls(), 1);
        assert!(matches!(
            evaluator.resources.circuit_breaker.state(EvaluatorRole::Critic),
            CircuitState::Open { .. }
        ));

        // Open circuit skips the provider entirely
        let again = evaluator.evaluate(&dimension(), &evidences()).await;
        assert_eq!(again.cited_evidence, vec![ERROR_CITATION]);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_quota_exhaustion_does_not_trip_breaker() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::QuotaExhausted("credit balance".into()))]);
        let config = runtime_config();
        let evaluator = evaluator(provider.clone(), &config);

        let opinion = evaluator.evaluate(&dimension(), &evidences()).await;
        assert_eq!(opinion.cited_evidence, vec![ERROR_CITATION]);
        assert!(matches!(
            evaluator.resources.circuit_breaker.state(EvaluatorRole::Critic),
            CircuitState::Closed { .. }
        ));
    }

    #[tokio::test]
    async fn test_second_identical_call_hits_cache() {
        let provider = ScriptedProvider::new(vec![Ok(good_response())]);
        let config = runtime_config();
        let evaluator = evaluator(provider.clone(), &config);

        let first = evaluator.evaluate(&dimension(), &evidences()).await;
        let second = evaluator.evaluate(&dimension(), &evidences()).await;
        assert_eq!(first, second);
        assert_eq!(provider.calls(), 1);
        assert_eq!(evaluator.resources.budget.usage().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_skips_provider() {
        let provider = ScriptedProvider::new(vec![Ok(good_response())]);
        let mut config = runtime_config();
        config.budgets.global_max_tokens = 10;
        let evaluator = evaluator(provider.clone(), &config);

        let opinion = evaluator.evaluate(&dimension(), &evidences()).await;
        assert_eq!(opinion.score, 3);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_output_is_neutral_and_marked() {
        let provider = ScriptedProvider::new(vec![
            Ok(CompletionResponse::text("", "claude-sonnet")),
            Ok(CompletionResponse::text("", "claude-sonnet")),
        ]);
        let config = runtime_config();
        let evaluator = evaluator(provider.clone(), &config);

        let opinion = evaluator.evaluate(&dimension(), &evidences()).await;
        assert_eq!(opinion.score, 3);
        assert_eq!(opinion.cited_evidence, vec![MALFORMED_OUTPUT_CITATION]);

        // Malformed output is not cached
        evaluator.evaluate(&dimension(), &evidences()).await;
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_ghost_path_is_redacted_and_penalized() {
        let provider = ScriptedProvider::new(vec![Ok(CompletionResponse::structured(
            json!({
                "score": 5,
                "argument": "Everything lives in src/imaginary/engine.rs which wires the evaluators together \
                             and handles retries gracefully for every provider.",
                "cited_evidence": ["src/imaginary/engine.rs"]
            }),
            "claude-sonnet",
        ))]);
        let config = runtime_config();
        let evaluator = evaluator(provider, &config);

        let opinion = evaluator.evaluate(&dimension(), &evidences()).await;
        assert!(opinion.score < 5);
        assert!(!opinion.argument.contains("src/imaginary/engine.rs"));
        assert!(!opinion.cited_evidence.contains(&"src/imaginary/engine.rs".to_string()));
    }

    #[tokio::test]
    async fn test_evaluate_all_follows_rubric_order() {
        let provider = ScriptedProvider::new(vec![Ok(good_response()), Ok(good_response())]);
        let config = runtime_config();
        let evaluator = evaluator(provider, &config);

        let mut second = dimension();
        second.id = "state_management".into();
        let rubric = RubricConfig {
            metadata: Default::default(),
            dimensions: vec![dimension(), second],
            synthesis_rules: BTreeMap::new(),
        };

        let opinions = evaluator.evaluate_all(&rubric, &evidences()).await;
        let ids: Vec<&str> = opinions.iter().map(|o| o.criterion_id.as_str()).collect();
        assert_eq!(ids, vec!["graph_orchestration", "state_management"]);
    }
}
