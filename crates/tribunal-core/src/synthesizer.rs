//! Synthesizer: reconciles evaluator opinions into one score per criterion.
//!
//! The procedure is fixed and auditable. For each criterion:
//! 1. No opinions → neutral score 3
//! 2. Critic scored 1 and names a security concern → 3, stop
//! 3. Spread > 2 → conservative blend (40/20/40), capped at 3 if the
//!    critic scored ≤ 2
//! 4. Otherwise → pragmatist-weighted average (25/25/50)
//! 5. Target artifact produced no evidence → cap at 4 (3 under high spread)
//! 6. Clamp to 1..=5
//!
//! Every branch leaves a one-line note naming the rule and its inputs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::rubric::{PolicyRules, RubricConfig};
use crate::types::{clamp_score, EvaluatorRole, Opinion, TargetArtifact, NEUTRAL_SCORE};

/// Spread above which opinions are treated as sharply divided.
pub const HIGH_VARIANCE_THRESHOLD: u8 = 2;

/// Number of notes surfaced in the executive summary.
pub const SUMMARY_NOTE_LIMIT: usize = 3;

const SECURITY_CAP: u8 = 3;
const SEVERE_CONCERN_CAP: u8 = 3;
const MISSING_ARTIFACT_CAP: u8 = 4;
const MISSING_ARTIFACT_HIGH_VARIANCE_CAP: u8 = 3;

/// Weights as (critic, advocate, pragmatist) over a common denominator.
const CONSERVATIVE_WEIGHTS: (u32, u32, u32, u32) = (2, 1, 2, 5);
const PRAGMATIC_WEIGHTS: (u32, u32, u32, u32) = (1, 1, 2, 4);

/// Which rule decided a criterion's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionRule {
    NoData,
    SecurityOverride,
    ConservativeBlend,
    SevereConcernCap,
    PragmaticAverage,
}

/// Outcome for one criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub criterion_id: String,
    pub score: u8,
    pub rule: ResolutionRule,
    /// Whether the missing-artifact ceiling lowered the score
    pub artifact_capped: bool,
    pub note: String,
}

/// Outcome for a whole rubric.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Synthesis {
    pub final_scores: BTreeMap<String, u8>,
    /// Resolutions in rubric order
    pub resolutions: Vec<Resolution>,
    pub summary: String,
}

/// Resolve one criterion.
///
/// `target_missing` is true when the criterion's target artifact produced no
/// evidence at all.
pub fn resolve(
    criterion_id: &str,
    opinions: &[&Opinion],
    rules: &PolicyRules,
    target_missing: bool,
) -> Resolution {
    if opinions.is_empty() {
        return Resolution {
            criterion_id: criterion_id.to_string(),
            score: NEUTRAL_SCORE,
            rule: ResolutionRule::NoData,
            artifact_capped: false,
            note: format!("{}: no opinions provided, defaulting to {}", criterion_id, NEUTRAL_SCORE),
        };
    }

    let critic = opinion_of(opinions, EvaluatorRole::Critic);
    let critic_score = critic.map(|o| o.score).unwrap_or(NEUTRAL_SCORE);
    let advocate_score = score_of(opinions, EvaluatorRole::Advocate);
    let pragmatist_score = score_of(opinions, EvaluatorRole::Pragmatist);

    debug!(
        criterion = %criterion_id,
        critic = critic_score,
        advocate = advocate_score,
        pragmatist = pragmatist_score,
        "Resolving criterion"
    );

    if rules.security_override && critic_score == 1 {
        if let Some(critic) = critic {
            if mentions_security(&critic.argument) {
                warn!(criterion = %criterion_id, "Security override applied");
                return Resolution {
                    criterion_id: criterion_id.to_string(),
                    score: SECURITY_CAP,
                    rule: ResolutionRule::SecurityOverride,
                    artifact_capped: false,
                    note: format!(
                        "{}: security override, critic scored 1 citing a security concern; score capped at {}",
                        criterion_id, SECURITY_CAP
                    ),
                };
            }
        }
    }

    let scores = [critic_score, advocate_score, pragmatist_score];
    let (low, high) = (min_of(&scores), max_of(&scores));
    let spread = high - low;
    let high_variance = spread > HIGH_VARIANCE_THRESHOLD;

    let (mut score, rule, mut note) = if high_variance {
        let blend = weighted_round(critic_score, advocate_score, pragmatist_score, CONSERVATIVE_WEIGHTS);
        if critic_score <= 2 {
            let capped = blend.min(SEVERE_CONCERN_CAP);
            (
                capped,
                ResolutionRule::SevereConcernCap,
                format!(
                    "{}: high variance ({}-{}), conservative blend {} capped at {} because the critic scored {}",
                    criterion_id, low, high, blend, capped, critic_score
                ),
            )
        } else {
            (
                blend,
                ResolutionRule::ConservativeBlend,
                format!(
                    "{}: high variance ({}-{}), conservative blend (critic 40%, advocate 20%, pragmatist 40%) = {}",
                    criterion_id, low, high, blend
                ),
            )
        }
    } else {
        let average = weighted_round(critic_score, advocate_score, pragmatist_score, PRAGMATIC_WEIGHTS);
        (
            average,
            ResolutionRule::PragmaticAverage,
            format!(
                "{}: moderate agreement ({}-{}), weighted synthesis (pragmatist 50%, others 25%) = {}",
                criterion_id, low, high, average
            ),
        )
    };

    let mut artifact_capped = false;
    if target_missing && rules.missing_artifact_cap {
        let cap = if high_variance && rules.high_variance_missing_evidence {
            MISSING_ARTIFACT_HIGH_VARIANCE_CAP
        } else {
            MISSING_ARTIFACT_CAP
        };
        if score > cap {
            score = cap;
            artifact_capped = true;
            note.push_str(&format!("; target artifact produced no evidence, capped at {}", cap));
        }
    }

    Resolution {
        criterion_id: criterion_id.to_string(),
        score: clamp_score(i64::from(score)),
        rule,
        artifact_capped,
        note,
    }
}

/// Resolves every criterion of a rubric.
pub struct Synthesizer {
    rules: PolicyRules,
}

impl Synthesizer {
    pub fn new(rules: PolicyRules) -> Self {
        Self { rules }
    }

    pub fn for_rubric(rubric: &RubricConfig) -> Self {
        Self::new(rubric.policy())
    }

    pub fn rules(&self) -> &PolicyRules {
        &self.rules
    }

    /// Resolve every rubric criterion plus any criterion that only appears
    /// in the opinions. Criteria are processed in rubric order.
    pub fn synthesize(
        &self,
        rubric: &RubricConfig,
        opinions: &[Opinion],
        missing_artifacts: &BTreeSet<TargetArtifact>,
    ) -> Synthesis {
        let mut criteria: Vec<(&str, bool)> = rubric
            .dimensions
            .iter()
            .map(|d| (d.id.as_str(), missing_artifacts.contains(&d.target_artifact)))
            .collect();
        for opinion in opinions {
            if !criteria.iter().any(|(id, _)| *id == opinion.criterion_id) {
                criteria.push((opinion.criterion_id.as_str(), false));
            }
        }

        let resolutions: Vec<Resolution> = criteria
            .into_iter()
            .map(|(id, missing)| {
                let for_criterion: Vec<&Opinion> =
                    opinions.iter().filter(|o| o.criterion_id == id).collect();
                resolve(id, &for_criterion, &self.rules, missing)
            })
            .collect();

        let final_scores = resolutions
            .iter()
            .map(|r| (r.criterion_id.clone(), r.score))
            .collect();
        let summary = build_summary(&resolutions);

        Synthesis {
            final_scores,
            resolutions,
            summary,
        }
    }
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new(PolicyRules::default())
    }
}

/// Executive summary: overall total plus the first few notes.
fn build_summary(resolutions: &[Resolution]) -> String {
    let total: u32 = resolutions.iter().map(|r| u32::from(r.score)).sum();
    let max = resolutions.len() as u32 * 5;
    let percentage = if max > 0 {
        f64::from(total) / f64::from(max) * 100.0
    } else {
        0.0
    };

    let mut summary = format!(
        "**Overall Assessment:** {}/{} ({:.1}%)\n\n### Key Resolutions\n\n",
        total, max, percentage
    );
    for resolution in resolutions.iter().take(SUMMARY_NOTE_LIMIT) {
        summary.push_str(&format!("- {}\n", resolution.note));
    }
    summary.trim_end().to_string()
}

fn opinion_of<'a>(opinions: &[&'a Opinion], role: EvaluatorRole) -> Option<&'a Opinion> {
    opinions.iter().copied().find(|o| o.evaluator == role)
}

fn score_of(opinions: &[&Opinion], role: EvaluatorRole) -> u8 {
    opinion_of(opinions, role).map(|o| o.score).unwrap_or(NEUTRAL_SCORE)
}

fn mentions_security(argument: &str) -> bool {
    argument.to_lowercase().contains("security")
}

fn min_of(scores: &[u8; 3]) -> u8 {
    scores.iter().copied().min().unwrap_or(NEUTRAL_SCORE)
}

fn max_of(scores: &[u8; 3]) -> u8 {
    scores.iter().copied().max().unwrap_or(NEUTRAL_SCORE)
}

/// Weighted mean rounded half up, in integer arithmetic.
///
/// Only the pragmatic weights (denominator 4) can land exactly on a half;
/// those ties go up, so 1, 3, 3 averages 2.5 and resolves to 3.
fn weighted_round(critic: u8, advocate: u8, pragmatist: u8, weights: (u32, u32, u32, u32)) -> u8 {
    let (wc, wa, wp, denom) = weights;
    let sum = u32::from(critic) * wc + u32::from(advocate) * wa + u32::from(pragmatist) * wp;
    ((2 * sum + denom) / (2 * denom)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn op(role: EvaluatorRole, score: i64, argument: &str) -> Opinion {
        Opinion::new(role, "c1", score, argument, vec!["src/x.py".into()])
    }

    fn trio(c: i64, a: i64, p: i64) -> Vec<Opinion> {
        vec![
            op(EvaluatorRole::Critic, c, "plain critique"),
            op(EvaluatorRole::Advocate, a, "plain defense"),
            op(EvaluatorRole::Pragmatist, p, "plain review"),
        ]
    }

    fn refs(opinions: &[Opinion]) -> Vec<&Opinion> {
        opinions.iter().collect()
    }

    #[test]
    fn test_no_opinions_defaults_to_neutral() {
        let r = resolve("c1", &[], &PolicyRules::default(), false);
        assert_eq!(r.score, 3);
        assert_eq!(r.rule, ResolutionRule::NoData);
    }

    #[test]
    fn test_security_override() {
        let opinions = vec![
            op(EvaluatorRole::Critic, 1, "Shell injection is a Security flaw in the clone tool"),
            op(EvaluatorRole::Advocate, 5, "great"),
            op(EvaluatorRole::Pragmatist, 3, "ok"),
        ];
        let r = resolve("c1", &refs(&opinions), &PolicyRules::default(), false);
        assert_eq!(r.score, 3);
        assert_eq!(r.rule, ResolutionRule::SecurityOverride);
        assert!(r.note.contains("security override"));
    }

    #[test]
    fn test_security_override_disabled() {
        let opinions = vec![
            op(EvaluatorRole::Critic, 1, "security problem"),
            op(EvaluatorRole::Advocate, 5, "great"),
            op(EvaluatorRole::Pragmatist, 5, "ok"),
        ];
        let rules = PolicyRules {
            security_override: false,
            ..PolicyRules::default()
        };
        let r = resolve("c1", &refs(&opinions), &rules, false);
        assert_ne!(r.rule, ResolutionRule::SecurityOverride);
    }

    #[test]
    fn test_high_variance_triggers_blend() {
        let opinions = trio(1, 5, 3);
        let r = resolve("c1", &refs(&opinions), &PolicyRules::default(), false);
        // 0.4*1 + 0.2*5 + 0.4*3 = 2.6 → 3, critic ≤ 2 caps at 3
        assert_eq!(r.rule, ResolutionRule::SevereConcernCap);
        assert_eq!(r.score, 3);
    }

    #[test]
    fn test_high_variance_without_severe_concern() {
        let opinions = trio(5, 5, 2);
        let r = resolve("c1", &refs(&opinions), &PolicyRules::default(), false);
        // 2.0 + 1.0 + 0.8 = 3.8 → 4
        assert_eq!(r.rule, ResolutionRule::ConservativeBlend);
        assert_eq!(r.score, 4);
    }

    #[test]
    fn test_low_variance_triggers_pragmatic_average() {
        let opinions = trio(3, 4, 4);
        let r = resolve("c1", &refs(&opinions), &PolicyRules::default(), false);
        // 0.5*4 + 0.25*3 + 0.25*4 = 3.75 → 4
        assert_eq!(r.rule, ResolutionRule::PragmaticAverage);
        assert_eq!(r.score, 4);
    }

    #[test]
    fn test_pragmatic_ties_round_half_up() {
        // (1 + 3 + 2*3) / 4 = 2.5
        let opinions = trio(1, 3, 3);
        let r = resolve("c1", &refs(&opinions), &PolicyRules::default(), false);
        assert_eq!(r.rule, ResolutionRule::PragmaticAverage);
        assert_eq!(r.score, 3);

        // (4 + 4 + 2*3) / 4 = 3.5
        let opinions = trio(4, 4, 3);
        let r = resolve("c1", &refs(&opinions), &PolicyRules::default(), false);
        assert_eq!(r.score, 4);

        assert_eq!(weighted_round(2, 2, 2, PRAGMATIC_WEIGHTS), 2);
        assert_eq!(weighted_round(1, 1, 1, CONSERVATIVE_WEIGHTS), 1);
    }

    #[test]
    fn test_missing_evaluator_defaults_to_three() {
        let opinions = vec![op(EvaluatorRole::Pragmatist, 5, "solid")];
        let r = resolve("c1", &refs(&opinions), &PolicyRules::default(), false);
        // 0.5*5 + 0.25*3 + 0.25*3 = 4.0
        assert_eq!(r.score, 4);
    }

    #[test]
    fn test_missing_artifact_caps() {
        let rules = PolicyRules {
            missing_artifact_cap: true,
            high_variance_missing_evidence: true,
            ..PolicyRules::default()
        };
        let opinions = trio(5, 5, 5);
        let r = resolve("c1", &refs(&opinions), &rules, true);
        assert_eq!(r.score, 4);
        assert!(r.artifact_capped);

        let opinions = trio(5, 5, 2);
        let r = resolve("c1", &refs(&opinions), &rules, true);
        assert_eq!(r.score, 3);

        let r = resolve("c1", &refs(&trio(5, 5, 5)), &PolicyRules::default(), true);
        assert_eq!(r.score, 5);
    }

    #[test]
    fn test_synthesize_orders_by_rubric_and_summarizes() {
        let rubric = RubricConfig::from_json(
            r#"{"dimensions": [
                {"id": "b", "name": "B", "target_artifact": "repo"},
                {"id": "a", "name": "A", "target_artifact": "document"}
            ]}"#,
        )
        .unwrap();
        let opinions = vec![Opinion::new(EvaluatorRole::Pragmatist, "a", 5, "x", vec![])];
        let synthesis = Synthesizer::for_rubric(&rubric).synthesize(&rubric, &opinions, &BTreeSet::new());

        assert_eq!(synthesis.resolutions[0].criterion_id, "b");
        assert_eq!(synthesis.final_scores["b"], 3);
        assert_eq!(synthesis.final_scores["a"], 4);
        assert!(synthesis.summary.contains("7/10"));
        assert!(synthesis.summary.starts_with("**Overall Assessment:**"));
    }

    proptest! {
        #[test]
        fn prop_security_override_never_exceeds_three(a in 1i64..=5, p in 1i64..=5) {
            let opinions = vec![
                op(EvaluatorRole::Critic, 1, "a security hole in input handling"),
                op(EvaluatorRole::Advocate, a, "fine"),
                op(EvaluatorRole::Pragmatist, p, "fine"),
            ];
            let r = resolve("c1", &refs(&opinions), &PolicyRules::default(), false);
            prop_assert!(r.score <= 3);
        }

        #[test]
        fn prop_score_in_range(c in 1i64..=5, a in 1i64..=5, p in 1i64..=5, missing in any::<bool>()) {
            let rules = PolicyRules { missing_artifact_cap: true, high_variance_missing_evidence: true, ..PolicyRules::default() };
            let r = resolve("c1", &refs(&trio(c, a, p)), &rules, missing);
            prop_assert!((1..=5).contains(&r.score));
        }
    }
}
