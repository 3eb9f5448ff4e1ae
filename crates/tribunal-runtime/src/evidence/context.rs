//! Evidence context handed to an evaluator.
//!
//! The pool is filtered to producers relevant to the criterion's target
//! artifact, ranked by confidence, deduplicated and truncated so the prompt
//! stays inside a fixed character budget.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use tribunal_core::{normalize_location, Evidence, EvidenceMap, TargetArtifact};

use super::producers;
use crate::config::ContextConfig;

/// Characters of content compared when deciding two items are duplicates.
const DEDUP_PREFIX_CHARS: usize = 48;

/// The artifact a producer reports on. Unknown producers feed every criterion.
pub fn artifact_for_producer(producer: &str) -> Option<TargetArtifact> {
    match producer {
        producers::REPO_INVESTIGATOR => Some(TargetArtifact::Repo),
        producers::DOCUMENT_ANALYST | producers::VISION_INSPECTOR | producers::CROSS_REFERENCE => {
            Some(TargetArtifact::Document)
        }
        _ => None,
    }
}

/// Rendered context plus the items it was built from.
#[derive(Debug, Clone)]
pub struct EvidenceContext {
    pub text: String,
    pub items: Vec<Evidence>,
}

impl EvidenceContext {
    /// Stable hash of the rendered text, used in cache keys.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.text.hash(&mut hasher);
        hasher.finish()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Build the context for one criterion.
pub fn build_context(evidences: &EvidenceMap, target: TargetArtifact, limits: &ContextConfig) -> EvidenceContext {
    let mut text = String::new();
    let mut items = Vec::new();

    'producers: for (producer, pool) in evidences {
        if artifact_for_producer(producer).map_or(false, |artifact| artifact != target) {
            continue;
        }

        let selected = rank_and_dedup(pool, limits.max_items_per_producer);
        if selected.is_empty() {
            continue;
        }

        let header = format!("## {}\n", producer);
        if !push_bounded(&mut text, &header, limits.max_context_chars) {
            break;
        }

        for evidence in selected {
            let line = render_item(evidence, limits.max_content_chars);
            if !push_bounded(&mut text, &line, limits.max_context_chars) {
                items.push(evidence.clone());
                break 'producers;
            }
            items.push(evidence.clone());
        }
    }

    EvidenceContext { text, items }
}

/// Highest confidence first, near-duplicates dropped, at most `limit` items.
fn rank_and_dedup(pool: &[Evidence], limit: usize) -> Vec<&Evidence> {
    let mut ranked: Vec<&Evidence> = pool.iter().collect();
    // Stable sort keeps producer order among equal confidences
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut seen = HashSet::new();
    ranked
        .into_iter()
        .filter(|e| seen.insert(dedup_key(e)))
        .take(limit)
        .collect()
}

fn dedup_key(evidence: &Evidence) -> (String, String) {
    let prefix: String = evidence
        .content
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .chars()
        .take(DEDUP_PREFIX_CHARS)
        .collect();
    (normalize_location(&evidence.location), prefix)
}

fn render_item(evidence: &Evidence, max_content_chars: usize) -> String {
    let status = if evidence.found { "FOUND" } else { "NOT FOUND" };
    let mut line = format!(
        "- [{}] {} (confidence {:.2})",
        status, evidence.location, evidence.confidence
    );
    if let Some(content) = evidence.content.as_deref().filter(|c| !c.trim().is_empty()) {
        line.push_str(": ");
        line.push_str(&truncate_chars(content.trim(), max_content_chars));
    }
    line.push('\n');
    line
}

/// Truncate to `max` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push_str("...");
    cut
}

/// Append as much of `chunk` as fits; false once the budget is spent.
fn push_bounded(text: &mut String, chunk: &str, budget: usize) -> bool {
    let used = text.chars().count();
    let remaining = budget.saturating_sub(used);
    if remaining == 0 {
        return false;
    }
    if chunk.chars().count() <= remaining {
        text.push_str(chunk);
        true
    } else {
        text.extend(chunk.chars().take(remaining));
        false
    }
}
