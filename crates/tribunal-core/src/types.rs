//! Core types shared by every layer of Tribunal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum number of characters an opinion argument must carry.
pub const MIN_ARGUMENT_CHARS: usize = 100;

/// Lowest score on the rubric scale.
pub const MIN_SCORE: u8 = 1;

/// Highest score on the rubric scale.
pub const MAX_SCORE: u8 = 5;

/// Score used whenever there is nothing to judge.
pub const NEUTRAL_SCORE: u8 = 3;

/// Citation substituted when no citation survives grounding.
pub const INSUFFICIENT_EVIDENCE_CITATION: &str = "insufficient_verified_evidence";

/// Citation attached to the payload built when every coercion stage failed.
pub const MALFORMED_OUTPUT_CITATION: &str = "malformed_output";

/// Citation attached to the neutral opinion returned on unrecoverable failure.
pub const ERROR_CITATION: &str = "error";

const ARGUMENT_PADDING: &str =
    " No further verified detail was available to extend this assessment.";

/// The three evaluator personas.
///
/// Each persona reads the same evidence with a different disposition. The
/// synthesizer relies on the role, not the display name, when weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorRole {
    /// Harsh reader: looks for gaps, flaws and security problems.
    #[serde(alias = "prosecutor")]
    Critic,

    /// Lenient reader: credits effort and intent.
    #[serde(alias = "defense")]
    Advocate,

    /// Pragmatic tie-breaker: does it work, is it maintainable.
    #[serde(alias = "tech_lead", alias = "techlead")]
    Pragmatist,
}

impl EvaluatorRole {
    /// All roles in evaluation order.
    pub const ALL: [EvaluatorRole; 3] = [
        EvaluatorRole::Critic,
        EvaluatorRole::Advocate,
        EvaluatorRole::Pragmatist,
    ];

    /// Key used in rubric instruction maps and configuration.
    pub fn key(&self) -> &'static str {
        match self {
            EvaluatorRole::Critic => "critic",
            EvaluatorRole::Advocate => "advocate",
            EvaluatorRole::Pragmatist => "pragmatist",
        }
    }

    /// Older rubric files name the personas after courtroom roles.
    pub fn legacy_key(&self) -> &'static str {
        match self {
            EvaluatorRole::Critic => "prosecutor",
            EvaluatorRole::Advocate => "defense",
            EvaluatorRole::Pragmatist => "tech_lead",
        }
    }

    /// Parse a role from either its key or its legacy key (case-insensitive).
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|role| role.key() == key || role.legacy_key() == key || role.legacy_key().replace('_', "") == key)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            EvaluatorRole::Critic => "Critic",
            EvaluatorRole::Advocate => "Advocate",
            EvaluatorRole::Pragmatist => "Pragmatist",
        }
    }
}

impl fmt::Display for EvaluatorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// The artifact a rubric criterion is judged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetArtifact {
    /// The source repository.
    #[serde(alias = "github_repo")]
    Repo,

    /// The accompanying written report.
    #[serde(alias = "pdf_report")]
    Document,
}

impl fmt::Display for TargetArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetArtifact::Repo => f.write_str("repo"),
            TargetArtifact::Document => f.write_str("document"),
        }
    }
}

/// One evaluator's verdict on one rubric criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opinion {
    /// Which persona produced this opinion
    pub evaluator: EvaluatorRole,

    /// The rubric criterion being judged
    pub criterion_id: String,

    /// Score on the 1-5 scale
    pub score: u8,

    /// Justification, at least [`MIN_ARGUMENT_CHARS`] characters
    pub argument: String,

    /// Evidence locations backing the argument (never empty)
    pub cited_evidence: Vec<String>,
}

impl Opinion {
    /// Build an opinion with every invariant enforced.
    pub fn new(
        evaluator: EvaluatorRole,
        criterion_id: impl Into<String>,
        score: i64,
        argument: impl Into<String>,
        cited_evidence: Vec<String>,
    ) -> Self {
        let mut cited_evidence: Vec<String> = cited_evidence
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if cited_evidence.is_empty() {
            cited_evidence.push(INSUFFICIENT_EVIDENCE_CITATION.to_string());
        }

        Self {
            evaluator,
            criterion_id: criterion_id.into(),
            score: clamp_score(score),
            argument: pad_argument(&argument.into()),
            cited_evidence,
        }
    }

    /// Neutral opinion returned when evaluation cannot complete.
    pub fn neutral(evaluator: EvaluatorRole, criterion_id: impl Into<String>, reason: &str) -> Self {
        Self::new(
            evaluator,
            criterion_id,
            i64::from(NEUTRAL_SCORE),
            format!("Evaluation could not be completed: {}. Defaulting to a neutral score.", reason),
            vec![ERROR_CITATION.to_string()],
        )
    }

    /// Whether every invariant holds.
    pub fn is_well_formed(&self) -> bool {
        (MIN_SCORE..=MAX_SCORE).contains(&self.score)
            && self.argument.chars().count() >= MIN_ARGUMENT_CHARS
            && !self.cited_evidence.is_empty()
    }
}

/// Force any integer into the 1-5 score range.
pub fn clamp_score(score: i64) -> u8 {
    score.clamp(i64::from(MIN_SCORE), i64::from(MAX_SCORE)) as u8
}

/// Pad an argument with a fixed sentence until it meets the minimum length.
pub fn pad_argument(argument: &str) -> String {
    let mut padded = argument.trim().to_string();
    while padded.chars().count() < MIN_ARGUMENT_CHARS {
        if padded.is_empty() {
            padded.push_str(ARGUMENT_PADDING.trim_start());
        } else {
            padded.push_str(ARGUMENT_PADDING);
        }
    }
    padded
}
