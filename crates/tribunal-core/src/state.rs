//! Shared state threaded through the audit graph.
//!
//! Nodes never mutate [`SharedState`] directly. They return a
//! [`StateUpdate`] holding only the fields they own, and the orchestrator
//! folds it in with the per-field reducers below:
//!
//! | Field | Reducer |
//! |-------|---------|
//! | `evidences` | union of keys, per-key concatenation |
//! | `opinions`, `errors` | append |
//! | everything else | overwrite (single writer) |
//!
//! Both reducers are commutative for the writes the graph can produce:
//! concurrent fact finders own disjoint producer keys, and list order is
//! only significant within one branch's contribution.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::evidence::Evidence;
use crate::rubric::RubricConfig;
use crate::types::Opinion;

/// Evidence grouped by producer name.
pub type EvidenceMap = BTreeMap<String, Vec<Evidence>>;

/// Immutable inputs of one audit run.
#[derive(Debug, Clone)]
pub struct AuditInputs {
    /// Repository to clone and inspect
    pub repo_url: String,

    /// Path of the accompanying written report
    pub report_path: PathBuf,

    /// Rubric driving the evaluators and the synthesizer
    pub rubric: Arc<RubricConfig>,
}

impl AuditInputs {
    pub fn new(repo_url: impl Into<String>, report_path: impl Into<PathBuf>, rubric: RubricConfig) -> Self {
        Self {
            repo_url: repo_url.into(),
            report_path: report_path.into(),
            rubric: Arc::new(rubric),
        }
    }
}

/// The record every node reads from.
#[derive(Debug, Clone)]
pub struct SharedState {
    pub inputs: AuditInputs,
    pub evidences: EvidenceMap,
    pub aggregated_summary: Option<String>,
    pub opinions: Vec<Opinion>,
    pub errors: Vec<String>,
    pub final_scores: BTreeMap<String, u8>,
    pub synthesis_summary: Option<String>,
    pub final_report: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Names of the writable fields, used to declare node ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateField {
    Evidences,
    AggregatedSummary,
    Opinions,
    Errors,
    FinalScores,
    SynthesisSummary,
    FinalReport,
    StartedAt,
    FinishedAt,
}

impl StateField {
    /// Fields merged by a reducer rather than overwritten.
    pub fn is_reduced(&self) -> bool {
        matches!(self, StateField::Evidences | StateField::Opinions | StateField::Errors)
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateField::Evidences => "evidences",
            StateField::AggregatedSummary => "aggregated_summary",
            StateField::Opinions => "opinions",
            StateField::Errors => "errors",
            StateField::FinalScores => "final_scores",
            StateField::SynthesisSummary => "synthesis_summary",
            StateField::FinalReport => "final_report",
            StateField::StartedAt => "started_at",
            StateField::FinishedAt => "finished_at",
        };
        f.write_str(name)
    }
}

/// A node's partial write. `None` means "not touched".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub evidences: Option<EvidenceMap>,
    pub aggregated_summary: Option<String>,
    pub opinions: Option<Vec<Opinion>>,
    pub errors: Option<Vec<String>>,
    pub final_scores: Option<BTreeMap<String, u8>>,
    pub synthesis_summary: Option<String>,
    pub final_report: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evidence under one producer key.
    pub fn with_evidence(mut self, producer: impl Into<String>, items: Vec<Evidence>) -> Self {
        self.evidences
            .get_or_insert_with(BTreeMap::new)
            .entry(producer.into())
            .or_default()
            .extend(items);
        self
    }

    pub fn with_opinions(mut self, opinions: Vec<Opinion>) -> Self {
        self.opinions.get_or_insert_with(Vec::new).extend(opinions);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.get_or_insert_with(Vec::new).push(error.into());
        self
    }

    /// Fields this update writes.
    pub fn fields(&self) -> Vec<StateField> {
        let mut fields = Vec::new();
        if self.evidences.is_some() {
            fields.push(StateField::Evidences);
        }
        if self.aggregated_summary.is_some() {
            fields.push(StateField::AggregatedSummary);
        }
        if self.opinions.is_some() {
            fields.push(StateField::Opinions);
        }
        if self.errors.is_some() {
            fields.push(StateField::Errors);
        }
        if self.final_scores.is_some() {
            fields.push(StateField::FinalScores);
        }
        if self.synthesis_summary.is_some() {
            fields.push(StateField::SynthesisSummary);
        }
        if self.final_report.is_some() {
            fields.push(StateField::FinalReport);
        }
        if self.started_at.is_some() {
            fields.push(StateField::StartedAt);
        }
        if self.finished_at.is_some() {
            fields.push(StateField::FinishedAt);
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }
}

impl SharedState {
    pub fn new(inputs: AuditInputs) -> Self {
        Self {
            inputs,
            evidences: BTreeMap::new(),
            aggregated_summary: None,
            opinions: Vec::new(),
            errors: Vec::new(),
            final_scores: BTreeMap::new(),
            synthesis_summary: None,
            final_report: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Fold a node's update into the state using the per-field reducers.
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(evidences) = update.evidences {
            merge_evidences(&mut self.evidences, evidences);
        }
        if let Some(opinions) = update.opinions {
            append(&mut self.opinions, opinions);
        }
        if let Some(errors) = update.errors {
            append(&mut self.errors, errors);
        }
        if let Some(summary) = update.aggregated_summary {
            self.aggregated_summary = Some(summary);
        }
        if let Some(scores) = update.final_scores {
            self.final_scores = scores;
        }
        if let Some(summary) = update.synthesis_summary {
            self.synthesis_summary = Some(summary);
        }
        if let Some(report) = update.final_report {
            self.final_report = Some(report);
        }
        if let Some(at) = update.started_at {
            self.started_at = Some(at);
        }
        if let Some(at) = update.finished_at {
            self.finished_at = Some(at);
        }
    }

    /// Opinions for one criterion, in arrival order.
    pub fn opinions_for<'a>(&'a self, criterion_id: &'a str) -> impl Iterator<Item = &'a Opinion> + 'a {
        self.opinions.iter().filter(move |o| o.criterion_id == criterion_id)
    }

    /// Every evidence location known to the run.
    pub fn evidence_locations(&self) -> impl Iterator<Item = &str> {
        self.evidences.values().flatten().map(|e| e.location.as_str())
    }
}

/// Union of keys, per-key concatenation.
pub fn merge_evidences(target: &mut EvidenceMap, incoming: EvidenceMap) {
    for (producer, items) in incoming {
        target.entry(producer).or_default().extend(items);
    }
}

/// Append reducer.
pub fn append<T>(target: &mut Vec<T>, incoming: Vec<T>) {
    target.extend(incoming);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EvaluatorRole;
    use proptest::prelude::*;

    fn empty_state() -> SharedState {
        let rubric = RubricConfig::from_json(
            r#"{"dimensions": [{"id": "c1", "name": "C1", "target_artifact": "repo"}]}"#,
        )
        .unwrap();
        SharedState::new(AuditInputs::new("https://github.com/o/r", "report.md", rubric))
    }

    fn opinion(role: EvaluatorRole, criterion: &str) -> Opinion {
        Opinion::new(role, criterion, 3, "x", vec!["src/x.py".into()])
    }

    #[test]
    fn test_update_fields() {
        let update = StateUpdate::new()
            .with_evidence("RepoInvestigator", vec![])
            .with_error("boom");
        assert_eq!(update.fields(), vec![StateField::Evidences, StateField::Errors]);
        assert!(StateUpdate::new().is_empty());
    }

    #[test]
    fn test_same_producer_concatenates() {
        let mut state = empty_state();
        let a = Evidence::found("P", "a.rs", "a", 0.5);
        let b = Evidence::found("P", "b.rs", "b", 0.5);
        state.apply(StateUpdate::new().with_evidence("P", vec![a.clone()]));
        state.apply(StateUpdate::new().with_evidence("P", vec![b.clone()]));
        assert_eq!(state.evidences["P"], vec![a, b]);
    }

    #[test]
    fn test_overwrite_fields() {
        let mut state = empty_state();
        let mut update = StateUpdate::new();
        update.final_scores = Some(BTreeMap::from([("c1".to_string(), 4)]));
        update.final_report = Some("# Report".into());
        state.apply(update);
        assert_eq!(state.final_scores["c1"], 4);
        assert_eq!(state.final_report.as_deref(), Some("# Report"));
    }

    #[test]
    fn test_opinions_for_criterion() {
        let mut state = empty_state();
        state.apply(StateUpdate::new().with_opinions(vec![
            opinion(EvaluatorRole::Critic, "c1"),
            opinion(EvaluatorRole::Critic, "c2"),
            opinion(EvaluatorRole::Advocate, "c1"),
        ]));
        assert_eq!(state.opinions_for("c1").count(), 2);
    }

    fn evidence_map(prefix: &'static str) -> impl Strategy<Value = EvidenceMap> {
        prop::collection::btree_map(
            "[a-z]{1,6}".prop_map(move |k| format!("{}{}", prefix, k)),
            prop::collection::vec(("[a-z/]{1,10}", 0.0f64..1.0), 0..4),
            0..5,
        )
        .prop_map(|map| {
            map.into_iter()
                .map(|(producer, items)| {
                    let items = items
                        .into_iter()
                        .map(|(loc, conf)| Evidence::found(producer.clone(), loc, "c", conf))
                        .collect();
                    (producer, items)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_disjoint_evidence_merge_commutes(left in evidence_map("l_"), right in evidence_map("r_")) {
            let mut ab = empty_state();
            ab.apply(StateUpdate { evidences: Some(left.clone()), ..Default::default() });
            ab.apply(StateUpdate { evidences: Some(right.clone()), ..Default::default() });

            let mut ba = empty_state();
            ba.apply(StateUpdate { evidences: Some(right), ..Default::default() });
            ba.apply(StateUpdate { evidences: Some(left), ..Default::default() });

            prop_assert_eq!(ab.evidences, ba.evidences);
        }

        #[test]
        fn prop_opinion_append_preserves_count(counts in prop::collection::vec(0usize..5, 1..6)) {
            let branches: Vec<Vec<Opinion>> = counts
                .iter()
                .enumerate()
                .map(|(i, n)| (0..*n).map(|_| opinion(EvaluatorRole::ALL[i % 3], "c1")).collect())
                .collect();

            let mut forward = empty_state();
            for branch in branches.iter().cloned() {
                forward.apply(StateUpdate::new().with_opinions(branch));
            }
            let mut reverse = empty_state();
            for branch in branches.iter().rev().cloned() {
                reverse.apply(StateUpdate::new().with_opinions(branch));
            }

            let total: usize = counts.iter().sum();
            prop_assert_eq!(forward.opinions.len(), total);
            prop_assert_eq!(reverse.opinions.len(), total);
            for role in EvaluatorRole::ALL {
                prop_assert_eq!(
                    forward.opinions.iter().filter(|o| o.evaluator == role).count(),
                    reverse.opinions.iter().filter(|o| o.evaluator == role).count()
                );
            }
        }
    }
}
