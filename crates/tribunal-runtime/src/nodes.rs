//! The nodes of an audit run.
//!
//! ```text
//! initialize ─┬─ fact finders ─┬─ aggregate ─┬─ critic     ─┬─ collect_errors ─ synthesize ─ finalize
//!             │  (parallel)    │             ├─ advocate   ─┤
//!             └─ ...          ─┘             └─ pragmatist ─┘
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};
use tribunal_core::{
    render_markdown, EvaluatorRole, EvidenceMap, SharedState, StateField, StateUpdate, Synthesizer, TargetArtifact,
};

use crate::evaluator::Evaluator;
use crate::evidence::artifact_for_producer;
use crate::evidence::producers::CROSS_REFERENCE;
use crate::facts::{cross_reference, FactFinder};
use crate::graph::{Node, NodeError, ENTRY_NODE};

pub const AGGREGATE_NODE: &str = "aggregate";
pub const COLLECT_ERRORS_NODE: &str = "collect_errors";
pub const SYNTHESIZE_NODE: &str = "synthesize";
pub const FINALIZE_NODE: &str = "finalize";

/// Stamps the run start.
pub struct InitializeNode;

#[async_trait]
impl Node for InitializeNode {
    fn name(&self) -> &str {
        ENTRY_NODE
    }

    fn writes(&self) -> Vec<StateField> {
        vec![StateField::StartedAt]
    }

    async fn run(&self, state: Arc<SharedState>) -> Result<StateUpdate, NodeError> {
        info!(
            repo = %state.inputs.repo_url,
            report = %state.inputs.report_path.display(),
            criteria = state.inputs.rubric.dimensions.len(),
            "Audit started"
        );
        Ok(StateUpdate {
            started_at: Some(Utc::now()),
            ..Default::default()
        })
    }
}

/// Runs one fact finder and files its evidence under the finder's name.
pub struct FactFinderNode {
    finder: Arc<dyn FactFinder>,
}

impl FactFinderNode {
    pub fn new(finder: Arc<dyn FactFinder>) -> Self {
        Self { finder }
    }
}

#[async_trait]
impl Node for FactFinderNode {
    fn name(&self) -> &str {
        self.finder.name()
    }

    fn writes(&self) -> Vec<StateField> {
        vec![StateField::Evidences]
    }

    fn empty_update(&self) -> StateUpdate {
        StateUpdate::new().with_evidence(self.finder.name(), Vec::new())
    }

    async fn run(&self, state: Arc<SharedState>) -> Result<StateUpdate, NodeError> {
        let evidences = self.finder.investigate(&state.inputs).await?;
        info!(
            finder = %self.finder.name(),
            items = evidences.len(),
            found = evidences.iter().filter(|e| e.found).count(),
            "Evidence collected"
        );
        let stamped = evidences.into_iter().map(|e| e.stamped()).collect();
        Ok(StateUpdate::new().with_evidence(self.finder.name(), stamped))
    }
}

/// Fan-in after the fact finders: cross-checks report claims against the
/// repository and summarizes what each producer found.
pub struct AggregateNode;

#[async_trait]
impl Node for AggregateNode {
    fn name(&self) -> &str {
        AGGREGATE_NODE
    }

    fn writes(&self) -> Vec<StateField> {
        vec![StateField::Evidences, StateField::AggregatedSummary]
    }

    async fn run(&self, state: Arc<SharedState>) -> Result<StateUpdate, NodeError> {
        let checks: Vec<_> = cross_reference(&state.evidences)
            .into_iter()
            .map(|e| e.stamped())
            .collect();

        let mut update = StateUpdate {
            aggregated_summary: Some(summarize(&state.evidences, &checks)),
            ..Default::default()
        };
        if !checks.is_empty() {
            update = update.with_evidence(CROSS_REFERENCE, checks);
        }
        Ok(update)
    }
}

fn summarize(evidences: &EvidenceMap, checks: &[tribunal_core::Evidence]) -> String {
    let mut parts: Vec<String> = evidences
        .iter()
        .map(|(producer, items)| {
            format!("{}: {}/{} found", producer, items.iter().filter(|e| e.found).count(), items.len())
        })
        .collect();
    if !checks.is_empty() {
        parts.push(format!(
            "{}: {}/{} found",
            CROSS_REFERENCE,
            checks.iter().filter(|e| e.found).count(),
            checks.len()
        ));
    }
    if parts.is_empty() {
        "no evidence collected".to_string()
    } else {
        parts.join("; ")
    }
}

/// One persona judging every rubric criterion.
pub struct EvaluatorNode {
    evaluator: Arc<Evaluator>,
}

impl EvaluatorNode {
    pub fn new(evaluator: Arc<Evaluator>) -> Self {
        Self { evaluator }
    }
}

#[async_trait]
impl Node for EvaluatorNode {
    fn name(&self) -> &str {
        self.evaluator.role().key()
    }

    fn writes(&self) -> Vec<StateField> {
        vec![StateField::Opinions]
    }

    fn empty_update(&self) -> StateUpdate {
        StateUpdate::new().with_opinions(Vec::new())
    }

    async fn run(&self, state: Arc<SharedState>) -> Result<StateUpdate, NodeError> {
        let opinions = self
            .evaluator
            .evaluate_all(&state.inputs.rubric, &state.evidences)
            .await;
        Ok(StateUpdate::new().with_opinions(opinions))
    }
}

/// Notes every criterion a persona left without an opinion.
pub struct CollectErrorsNode;

#[async_trait]
impl Node for CollectErrorsNode {
    fn name(&self) -> &str {
        COLLECT_ERRORS_NODE
    }

    fn writes(&self) -> Vec<StateField> {
        vec![StateField::Errors]
    }

    async fn run(&self, state: Arc<SharedState>) -> Result<StateUpdate, NodeError> {
        let mut update = StateUpdate::new();
        for dimension in &state.inputs.rubric.dimensions {
            for role in EvaluatorRole::ALL {
                let present = state
                    .opinions_for(&dimension.id)
                    .any(|o| o.evaluator == role);
                if !present {
                    update = update.with_error(format!(
                        "{}: no {} opinion for '{}'",
                        COLLECT_ERRORS_NODE,
                        role.key(),
                        dimension.id
                    ));
                }
            }
        }
        if let Some(errors) = &update.errors {
            warn!(missing = errors.len(), "Opinions missing before synthesis");
        }
        Ok(update)
    }
}

/// Deterministic resolution of every criterion.
pub struct SynthesizeNode;

#[async_trait]
impl Node for SynthesizeNode {
    fn name(&self) -> &str {
        SYNTHESIZE_NODE
    }

    fn writes(&self) -> Vec<StateField> {
        vec![StateField::FinalScores, StateField::SynthesisSummary]
    }

    async fn run(&self, state: Arc<SharedState>) -> Result<StateUpdate, NodeError> {
        let rubric = &state.inputs.rubric;
        let missing = missing_artifacts(&state.evidences);
        if !missing.is_empty() {
            info!(missing = ?missing, "Artifacts without evidence");
        }

        let synthesis = Synthesizer::for_rubric(rubric).synthesize(rubric, &state.opinions, &missing);
        for resolution in &synthesis.resolutions {
            info!(
                criterion = %resolution.criterion_id,
                score = resolution.score,
                "Criterion resolved"
            );
        }

        Ok(StateUpdate {
            final_scores: Some(synthesis.final_scores),
            synthesis_summary: Some(synthesis.summary),
            ..Default::default()
        })
    }
}

/// An artifact is missing when no producer reporting on it found anything.
pub fn missing_artifacts(evidences: &EvidenceMap) -> BTreeSet<TargetArtifact> {
    [TargetArtifact::Repo, TargetArtifact::Document]
        .into_iter()
        .filter(|artifact| {
            !evidences.iter().any(|(producer, items)| {
                artifact_for_producer(producer) == Some(*artifact) && items.iter().any(|e| e.found)
            })
        })
        .collect()
}

/// Stamps the end of the run and renders the report.
pub struct FinalizeNode;

#[async_trait]
impl Node for FinalizeNode {
    fn name(&self) -> &str {
        FINALIZE_NODE
    }

    fn writes(&self) -> Vec<StateField> {
        vec![StateField::FinishedAt, StateField::FinalReport]
    }

    async fn run(&self, state: Arc<SharedState>) -> Result<StateUpdate, NodeError> {
        let finished_at = Utc::now();
        let mut finished = (*state).clone();
        finished.finished_at = Some(finished_at);

        let report = render_markdown(&finished);
        info!(
            criteria = finished.final_scores.len(),
            errors = finished.errors.len(),
            report_chars = report.len(),
            "Audit finished"
        );
        Ok(StateUpdate {
            finished_at: Some(finished_at),
            final_report: Some(report),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tribunal_core::{AuditInputs, Evidence, Opinion, RubricConfig, RubricDimension};

    use crate::evidence::producers::{DOCUMENT_ANALYST, REPO_INVESTIGATOR};

    fn rubric() -> RubricConfig {
        RubricConfig {
            metadata: Default::default(),
            dimensions: vec![RubricDimension {
                id: "graph_orchestration".into(),
                name: "Graph Orchestration".into(),
                target_artifact: TargetArtifact::Repo,
                forensic_instruction: "Check the graph".into(),
                per_evaluator_instruction: Default::default(),
            }],
            synthesis_rules: Default::default(),
        }
    }

    fn state() -> SharedState {
        SharedState::new(AuditInputs::new("https://github.com/org/repo", "report.md", rubric()))
    }

    #[test]
    fn test_missing_artifacts() {
        let mut evidences = EvidenceMap::new();
        assert_eq!(missing_artifacts(&evidences).len(), 2);

        evidences.insert(
            REPO_INVESTIGATOR.into(),
            vec![Evidence::found(REPO_INVESTIGATOR, "src/main.py", "entry point", 0.9)],
        );
        evidences.insert(
            DOCUMENT_ANALYST.into(),
            vec![Evidence::missing(DOCUMENT_ANALYST, "report.md", "Report file not found", 1.0)],
        );
        let missing = missing_artifacts(&evidences);
        assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec![TargetArtifact::Document]);
    }

    #[tokio::test]
    async fn test_collect_errors_names_missing_opinions() {
        let mut state = state();
        state.opinions.push(Opinion::neutral(EvaluatorRole::Critic, "graph_orchestration", "test"));

        let update = CollectErrorsNode.run(Arc::new(state)).await.unwrap();
        let errors = update.errors.unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("advocate"));
        assert!(errors[1].contains("pragmatist"));
    }

    #[tokio::test]
    async fn test_aggregate_summarizes_producers() {
        let mut state = state();
        state.evidences.insert(
            REPO_INVESTIGATOR.into(),
            vec![
                Evidence::found(REPO_INVESTIGATOR, "src/a.py", "x", 0.9),
                Evidence::missing(REPO_INVESTIGATOR, "repo:tests", "no tests", 0.8),
            ],
        );

        let update = AggregateNode.run(Arc::new(state)).await.unwrap();
        assert_eq!(update.aggregated_summary.as_deref(), Some("RepoInvestigator: 1/2 found"));
        assert!(update.evidences.is_none());
    }

    #[tokio::test]
    async fn test_finalize_renders_report() {
        let mut state = state();
        state.final_scores.insert("graph_orchestration".into(), 4);
        state.synthesis_summary = Some("All good".into());

        let update = FinalizeNode.run(Arc::new(state)).await.unwrap();
        assert!(update.finished_at.is_some());
        let report = update.final_report.unwrap();
        assert!(report.contains("graph_orchestration"));
        assert!(report.contains("All good"));
    }
}
