//! Grounding: the anti-hallucination filter applied to every opinion.
//!
//! An opinion may only lean on what the fact finders actually saw:
//!
//! 1. Path-like references that match no known evidence location are
//!    redacted inline (one penalty point).
//! 2. Sentences contradicting strong positive evidence are removed and the
//!    score is raised by one.
//! 3. High-risk sentences (percentages, multipliers, absolutes) with no
//!    support in the evidence are dropped (one penalty point).
//! 4. Each penalty point lowers the score by one and adds a disclosure.
//! 5. Citations that match no known location are dropped; if none remain,
//!    the top-confidence locations are cited instead.
//!
//! Running the filter on its own output changes nothing.

use regex::Regex;
use std::collections::{BTreeSet, HashSet};

use tribunal_core::types::{clamp_score, pad_argument};
use tribunal_core::{
    normalize_location, Evidence, EvidenceMap, Opinion, ERROR_CITATION,
    INSUFFICIENT_EVIDENCE_CITATION, MALFORMED_OUTPUT_CITATION, MAX_SCORE,
};

use super::patterns::{is_high_risk, significant_tokens, split_sentences, PATH_REFERENCE};
use crate::facts::cross_reference::{path_matches, verified_paths};

/// Inline replacement for an unverifiable path.
pub const REDACTION_MARKER: &str = "[unverified-reference]";

const FALLBACK_CITATIONS: usize = 3;
const MIN_SHARED_TOKENS: usize = 2;

/// A claim that some capability is absent, refuted when any found evidence
/// item mentions `evidence_marker`.
#[derive(Debug, Clone)]
pub struct ContradictionCheck {
    pub name: String,
    pub claim: Regex,
    pub evidence_marker: String,
}

impl ContradictionCheck {
    pub fn new(name: &str, claim: &str, evidence_marker: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.to_string(),
            claim: Regex::new(claim)?,
            evidence_marker: evidence_marker.to_ascii_lowercase(),
        })
    }
}

/// Swappable phrase tables used by the filter.
#[derive(Debug, Clone)]
pub struct GroundingPolicy {
    /// Legacy path prefixes and their current equivalents
    pub aliases: Vec<(String, String)>,
    pub contradictions: Vec<ContradictionCheck>,
}

impl GroundingPolicy {
    pub fn empty() -> Self {
        Self {
            aliases: Vec::new(),
            contradictions: Vec::new(),
        }
    }
}

impl Default for GroundingPolicy {
    fn default() -> Self {
        const NEGATION: &str = r"(?i)\b(?:no|not|lacks?|lacking|without|missing|absent|fails? to)\b[^.!?]*";
        let table = [
            ("parallel_execution", r"\b(?:parallel|concurren|fan-out|fan out)", "parallel execution"),
            ("structured_output", r"\b(?:structured output|typed output|schema validation)", "structured output"),
            ("sandboxing", r"\bsandbox", "sandbox"),
            ("state_reducers", r"\breducers?\b", "reducer"),
            ("test_suite", r"\btests?\b", "test suite"),
        ];

        let contradictions = table
            .iter()
            .filter_map(|(name, subject, marker)| {
                ContradictionCheck::new(name, &format!("{}{}", NEGATION, subject), marker).ok()
            })
            .collect();

        let aliases = [
            ("src/nodes/judges", "src/agents/judges"),
            ("src/nodes/detectives", "src/agents/detectives"),
            ("src/graph.py", "src/core/graph.py"),
            ("src/state.py", "src/core/state.py"),
        ]
        .iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();

        Self { aliases, contradictions }
    }
}

/// What grounding changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundingReport {
    pub redacted_references: Vec<String>,
    pub dropped_sentences: usize,
    pub contradictions: Vec<String>,
    pub dropped_citations: Vec<String>,
    pub penalty: u8,
    pub reward: u8,
}

impl GroundingReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Filter bound to one evidence pool.
pub struct Grounder<'a> {
    policy: &'a GroundingPolicy,
    known: BTreeSet<String>,
    corpus_tokens: HashSet<String>,
    positive_corpus: Vec<String>,
    ranked_locations: Vec<String>,
}

impl<'a> Grounder<'a> {
    pub fn new(evidences: &EvidenceMap, policy: &'a GroundingPolicy) -> Self {
        let all: Vec<&Evidence> = evidences.values().flatten().collect();

        // files listed in the repository manifest count as seen
        let mut known: BTreeSet<String> = all.iter().map(|e| normalize_location(&e.location)).collect();
        known.extend(verified_paths(all.iter().copied()));

        let mut corpus_tokens = HashSet::new();
        for e in &all {
            corpus_tokens.extend(significant_tokens(&e.location));
            if let Some(content) = &e.content {
                corpus_tokens.extend(significant_tokens(content));
            }
        }

        let positive_corpus = all
            .iter()
            .filter(|e| e.found)
            .map(|e| {
                format!("{} {}", e.location, e.content.as_deref().unwrap_or_default()).to_ascii_lowercase()
            })
            .collect();

        let mut ranked = all.clone();
        ranked.sort_by(|a, b| b.found.cmp(&a.found).then(b.confidence.total_cmp(&a.confidence)));
        let mut ranked_locations: Vec<String> = Vec::new();
        for e in ranked {
            if !ranked_locations.contains(&e.location) {
                ranked_locations.push(e.location.clone());
            }
        }

        Self {
            policy,
            known,
            corpus_tokens,
            positive_corpus,
            ranked_locations,
        }
    }

    /// Whether a reference matches a known location exactly, by whole
    /// trailing path segments in either direction, or through an alias.
    pub fn is_known(&self, reference: &str) -> bool {
        let candidate = normalize_location(reference);
        if candidate.is_empty() {
            return false;
        }
        if self.known.contains(&candidate) {
            return true;
        }
        if self
            .known
            .iter()
            .any(|k| path_matches(k, &candidate) || path_matches(&candidate, k))
        {
            return true;
        }
        self.policy.aliases.iter().any(|(from, to)| {
            let (from, to) = (normalize_location(from), normalize_location(to));
            let swapped = if candidate.starts_with(&from) {
                Some(candidate.replacen(&from, &to, 1))
            } else if candidate.starts_with(&to) {
                Some(candidate.replacen(&to, &from, 1))
            } else {
                None
            };
            swapped.map_or(false, |alt| self.known.contains(&alt))
        })
    }

    /// Ground one opinion.
    pub fn ground(&self, opinion: &Opinion) -> (Opinion, GroundingReport) {
        let mut report = GroundingReport::default();

        // (a) redact unknown path references
        let redacted = PATH_REFERENCE
            .replace_all(&opinion.argument, |caps: &regex::Captures| {
                let reference = &caps[0];
                if self.is_known(reference) {
                    reference.to_string()
                } else {
                    report.redacted_references.push(reference.to_string());
                    REDACTION_MARKER.to_string()
                }
            })
            .into_owned();

        // (b, c) contradictions and unsupported high-risk sentences
        let mut kept = Vec::new();
        for sentence in split_sentences(&redacted) {
            if let Some(check) = self.contradicted_by(&sentence) {
                report.contradictions.push(check.to_string());
            } else if is_high_risk(&sentence) && !self.is_supported(&sentence) {
                report.dropped_sentences += 1;
            } else {
                kept.push(sentence);
            }
        }

        if !report.redacted_references.is_empty() {
            report.penalty += 1;
        }
        if report.dropped_sentences > 0 {
            report.penalty += 1;
        }
        if !report.contradictions.is_empty() {
            report.reward = 1;
        }

        // (d) disclosure
        if report.penalty > 0 {
            kept.push(disclosure(&report));
        }

        let argument = if kept.len() == split_sentences(&opinion.argument).len() && report.penalty == 0 {
            opinion.argument.clone()
        } else {
            let terminated: Vec<String> = kept.into_iter().map(terminate).collect();
            pad_argument(&terminated.join(" "))
        };

        // (e) citations
        let mut cited_evidence = Vec::new();
        for citation in &opinion.cited_evidence {
            if self.is_known(citation) || is_preserved_marker(citation) {
                if !cited_evidence.contains(citation) {
                    cited_evidence.push(citation.clone());
                }
            } else {
                report.dropped_citations.push(citation.clone());
            }
        }
        if cited_evidence.is_empty() {
            cited_evidence = self
                .ranked_locations
                .iter()
                .take(FALLBACK_CITATIONS)
                .cloned()
                .collect();
        }
        if cited_evidence.is_empty() {
            cited_evidence.push(INSUFFICIENT_EVIDENCE_CITATION.to_string());
        }
        // the sentinel is replaced, not reported, once real locations exist
        report
            .dropped_citations
            .retain(|c| c != INSUFFICIENT_EVIDENCE_CITATION || cited_evidence.iter().any(|k| k == c));

        let score = i64::from(opinion.score) + i64::from(report.reward) - i64::from(report.penalty);
        let grounded = Opinion {
            evaluator: opinion.evaluator,
            criterion_id: opinion.criterion_id.clone(),
            score: clamp_score(score.min(i64::from(MAX_SCORE))),
            argument,
            cited_evidence,
        };

        (grounded, report)
    }

    fn contradicted_by(&self, sentence: &str) -> Option<&str> {
        self.policy
            .contradictions
            .iter()
            .find(|check| {
                check.claim.is_match(sentence)
                    && self.positive_corpus.iter().any(|text| text.contains(&check.evidence_marker))
            })
            .map(|check| check.name.as_str())
    }

    fn is_supported(&self, sentence: &str) -> bool {
        let names_location = PATH_REFERENCE
            .find_iter(sentence)
            .any(|m| self.is_known(m.as_str()));
        if names_location {
            return true;
        }
        let shared: HashSet<String> = significant_tokens(sentence)
            .filter(|t| self.corpus_tokens.contains(t))
            .collect();
        shared.len() >= MIN_SHARED_TOKENS
    }
}

/// Rejoined sentences must split back the same way.
fn terminate(sentence: String) -> String {
    if sentence.ends_with(|c: char| matches!(c, '.' | '!' | '?')) {
        sentence
    } else {
        format!("{}.", sentence)
    }
}

fn is_preserved_marker(citation: &str) -> bool {
    citation == MALFORMED_OUTPUT_CITATION || citation == ERROR_CITATION
}

fn disclosure(report: &GroundingReport) -> String {
    let mut parts = Vec::new();
    if !report.redacted_references.is_empty() {
        parts.push(format!(
            "{} unverified file reference(s) redacted",
            report.redacted_references.len()
        ));
    }
    if report.dropped_sentences > 0 {
        parts.push(format!(
            "{} unsupported claim(s) removed",
            report.dropped_sentences
        ));
    }
    format!(
        "[Grounding] Score lowered by {} because {}.",
        report.penalty,
        parts.join(" and ")
    )
}

/// Convenience wrapper for a one-off grounding pass.
pub fn ground_opinion(opinion: &Opinion, evidences: &EvidenceMap, policy: &GroundingPolicy) -> (Opinion, GroundingReport) {
    Grounder::new(evidences, policy).ground(opinion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tribunal_core::EvaluatorRole;

    fn pool() -> EvidenceMap {
        let mut map = EvidenceMap::new();
        map.insert(
            "RepoInvestigator".to_string(),
            vec![
                Evidence::found("RepoInvestigator", "src/x.py", "parallel execution primitives detected in graph builder", 0.9),
                Evidence::found("RepoInvestigator", "src/core/state.py", "state reducer annotations", 0.7),
                Evidence::missing("RepoInvestigator", "tests", "no tests directory", 0.5),
            ],
        );
        map
    }

    fn opinion(score: i64, argument: &str, cites: &[&str]) -> Opinion {
        Opinion::new(
            EvaluatorRole::Critic,
            "graph",
            score,
            argument,
            cites.iter().map(|c| c.to_string()).collect(),
        )
    }

    #[test]
    fn test_ghost_path_is_redacted_and_citation_replaced() {
        let policy = GroundingPolicy::default();
        let input = opinion(
            4,
            "The orchestration in src/ghost.py wires the fan-in correctly and the graph builder in src/x.py is tidy.",
            &["src/ghost.py"],
        );
        let (grounded, report) = ground_opinion(&input, &pool(), &policy);

        assert!(grounded.argument.contains(REDACTION_MARKER));
        assert!(!grounded.argument.contains("src/ghost.py"));
        assert!(grounded.argument.contains("src/x.py"));
        assert_eq!(report.redacted_references, vec!["src/ghost.py"]);
        assert_eq!(report.dropped_citations, vec!["src/ghost.py"]);
        assert_eq!(grounded.cited_evidence[0], "src/x.py");
        assert!(grounded.cited_evidence.len() <= 3);
        assert_eq!(grounded.score, 3);
        assert!(grounded.is_well_formed());
    }

    #[test]
    fn test_unsupported_high_risk_sentence_dropped() {
        let policy = GroundingPolicy::default();
        let input = opinion(
            3,
            "The graph builder is readable. Coverage sits at 95% with flawless benchmarks.",
            &["src/x.py"],
        );
        let (grounded, report) = ground_opinion(&input, &pool(), &policy);
        assert_eq!(report.dropped_sentences, 1);
        assert!(!grounded.argument.contains("95%"));
        assert_eq!(grounded.score, 2);
        assert!(grounded.argument.contains("[Grounding]"));
    }

    #[test]
    fn test_supported_high_risk_sentence_kept() {
        let policy = GroundingPolicy::default();
        let input = opinion(
            3,
            "Parallel execution primitives always appear in the graph builder module, which is a good sign for throughput.",
            &["src/x.py"],
        );
        let (grounded, report) = ground_opinion(&input, &pool(), &policy);
        assert!(report.is_clean());
        assert_eq!(grounded, input);
    }

    #[test]
    fn test_contradiction_removed_and_rewarded() {
        let policy = GroundingPolicy::default();
        let input = opinion(
            2,
            "There is no parallel execution anywhere in this project. The state handling is simple.",
            &["src/x.py"],
        );
        let (grounded, report) = ground_opinion(&input, &pool(), &policy);
        assert_eq!(report.contradictions, vec!["parallel_execution"]);
        assert_eq!(grounded.score, 3);
        assert!(!grounded.argument.contains("no parallel"));
    }

    #[test]
    fn test_alias_and_segment_matching() {
        let policy = GroundingPolicy::default();
        let grounder = Grounder::new(&pool(), &policy);
        assert!(grounder.is_known("src/state.py"));
        assert!(grounder.is_known("./SRC/X.PY"));
        assert!(grounder.is_known("x.py"));
        assert!(grounder.is_known("/tmp/clone/src/core/state.py"));
        assert!(!grounder.is_known("src/ghost.py"));
    }

    #[test]
    fn test_path_containing_known_location_is_not_known() {
        let policy = GroundingPolicy::default();
        let grounder = Grounder::new(&pool(), &policy);
        assert!(!grounder.is_known("src/x.pyc"));
        assert!(!grounder.is_known("lib/src/x.py.bak"));
        assert!(!grounder.is_known("vendor/tests_fake/run.py"));
        assert!(!grounder.is_known("e.py"));

        let input = opinion(3, "The helper in src/x.py.bak/util.py does the wiring.", &["src/x.py.bak/util.py"]);
        let (grounded, report) = ground_opinion(&input, &pool(), &policy);
        assert_eq!(report.redacted_references, vec!["src/x.py.bak/util.py"]);
        assert_eq!(grounded.score, 2);
    }

    #[test]
    fn test_manifest_files_are_known() {
        let policy = GroundingPolicy::default();
        let mut evidences = pool();
        evidences.get_mut("RepoInvestigator").unwrap().push(Evidence::found(
            "RepoInvestigator",
            "repo:manifest",
            "src/utils/logger.py\nsrc/x.py",
            1.0,
        ));
        let input = opinion(
            4,
            "Structured logging lives in src/utils/logger.py and every node writes through it.",
            &["src/utils/logger.py"],
        );
        let (grounded, report) = ground_opinion(&input, &evidences, &policy);

        assert!(report.is_clean());
        assert_eq!(grounded.score, 4);
        assert_eq!(grounded.cited_evidence, vec!["src/utils/logger.py"]);
        assert!(grounded.argument.contains("src/utils/logger.py"));
        assert!(!grounded.argument.contains(REDACTION_MARKER));
    }

    #[test]
    fn test_empty_pool_uses_sentinel() {
        let policy = GroundingPolicy::default();
        let input = opinion(3, "Nothing in particular to cite for this criterion.", &["src/ghost.py"]);
        let (grounded, _) = ground_opinion(&input, &EvidenceMap::new(), &policy);
        assert_eq!(grounded.cited_evidence, vec![INSUFFICIENT_EVIDENCE_CITATION]);
    }

    #[test]
    fn test_malformed_marker_survives() {
        let policy = GroundingPolicy::default();
        let input = opinion(3, "Provider output could not be parsed.", &[MALFORMED_OUTPUT_CITATION]);
        let (grounded, _) = ground_opinion(&input, &pool(), &policy);
        assert_eq!(grounded.cited_evidence, vec![MALFORMED_OUTPUT_CITATION]);
    }

    proptest! {
        #[test]
        fn prop_grounding_is_idempotent(
            score in 1i64..=5,
            sentences in proptest::collection::vec(
                prop_oneof![
                    Just("The graph builder in src/x.py is tidy.".to_string()),
                    Just("See src/ghost.py for the magic.".to_string()),
                    Just("Coverage is 99% everywhere.".to_string()),
                    Just("There is no parallel execution here.".to_string()),
                    Just("Errors are never handled in lib/none.rs!".to_string()),
                    Just("State reducer annotations look right.".to_string()),
                    "[a-z ]{0,40}",
                ],
                0..6,
            ),
            cites in proptest::collection::vec(
                prop_oneof![Just("src/x.py"), Just("src/ghost.py"), Just("tests"), Just("insufficient_verified_evidence")],
                0..4,
            ),
        ) {
            let policy = GroundingPolicy::default();
            let input = opinion(score, &sentences.join(" "), &cites);
            let grounder = Grounder::new(&pool(), &policy);

            let (once, _) = grounder.ground(&input);
            let (twice, report) = grounder.ground(&once);

            prop_assert!(once.is_well_formed());
            prop_assert_eq!(&twice, &once);
            prop_assert!(report.is_clean());
        }
    }
}
