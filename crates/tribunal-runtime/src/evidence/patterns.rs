//! Shared text patterns for context building, coercion and grounding.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // =========================================================================
    // REFERENCES
    // =========================================================================

    /// Path-like substring with at least one directory and a file extension:
    /// `src/graph.rs`, `crates/core/lib.rs`, `tests/test_state.py`.
    pub static ref PATH_REFERENCE: Regex = Regex::new(
        r"(?:[A-Za-z0-9_.-]+/)+[A-Za-z0-9_-]+\.[A-Za-z0-9]{1,8}\b"
    ).unwrap();

    /// Source paths a report might claim exist in the repository.
    pub static ref CLAIMED_SOURCE_PATH: Regex = Regex::new(
        r"(?:src|lib|app|tools|agents|crates|tests)/[A-Za-z0-9_./-]*\.[A-Za-z0-9]{1,10}"
    ).unwrap();

    // =========================================================================
    // HIGH-RISK CLAIMS
    // =========================================================================

    /// Explicit percentages: `80%`, `12.5 percent`.
    pub static ref PERCENTAGE_CLAIM: Regex = Regex::new(
        r"(?i)\b\d+(?:\.\d+)?\s?(?:%|percent\b)"
    ).unwrap();

    /// Multiplicative claims: `3x faster`, `10-fold`, `twice as`.
    pub static ref MULTIPLIER_CLAIM: Regex = Regex::new(
        r"(?i)\b\d+(?:\.\d+)?\s?(?:x\b|-fold\b|times\s+(?:faster|slower|more|less|better|worse))|\b(?:twice|tenfold)\b"
    ).unwrap();

    /// Absolute qualifiers.
    pub static ref ABSOLUTE_CLAIM: Regex = Regex::new(
        r"(?i)\b(?:always|never|none)\b"
    ).unwrap();

    // =========================================================================
    // PROVIDER OUTPUT
    // =========================================================================

    /// Fenced JSON block in free text.
    pub static ref FENCED_JSON: Regex = Regex::new(
        r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```"
    ).unwrap();

    /// A score written in prose: `score: 4`, `Score = 2`, `4/5`.
    pub static ref PROSE_SCORE: Regex = Regex::new(
        r"(?i)(?:\bscore\b\s*[:=]?\s*(\d+)|\b(\d)\s*/\s*5\b)"
    ).unwrap();

    /// Word token for overlap checks.
    pub static ref WORD: Regex = Regex::new(r"[A-Za-z0-9_]+").unwrap();
}

const STOPWORDS: &[&str] = &[
    "about", "also", "because", "been", "being", "code", "does", "from", "have", "into",
    "more", "most", "only", "other", "some", "such", "than", "that", "their", "there",
    "these", "they", "this", "those", "very", "were", "what", "when", "where", "which",
    "while", "with", "would", "your", "always", "never", "none",
];

/// True if the sentence carries a percentage, multiplier or absolute claim.
pub fn is_high_risk(sentence: &str) -> bool {
    PERCENTAGE_CLAIM.is_match(sentence)
        || MULTIPLIER_CLAIM.is_match(sentence)
        || ABSOLUTE_CLAIM.is_match(sentence)
}

/// Lowercased tokens of four or more characters that are not stopwords.
pub fn significant_tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_ascii_lowercase())
        .filter(|t| t.len() >= 4 && !STOPWORDS.contains(&t.as_str()))
}

/// Split prose into sentences at `.`, `!` or `?` followed by whitespace.
///
/// Punctuation inside tokens (`src/graph.rs`, `v1.2`) does not split.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().map_or(true, |n| n.is_whitespace()) {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_reference() {
        let found: Vec<&str> = PATH_REFERENCE
            .find_iter("See src/graph.rs and crates/core/lib.rs, not and/or.")
            .map(|m| m.as_str())
            .collect();
        assert_eq!(found, vec!["src/graph.rs", "crates/core/lib.rs"]);
        assert!(!PATH_REFERENCE.is_match("https://github.com/org/repo"));
        assert!(!PATH_REFERENCE.is_match("[unverified-reference]"));
    }

    #[test]
    fn test_high_risk_patterns() {
        assert!(is_high_risk("Coverage is 95% across modules."));
        assert!(is_high_risk("It runs 3x faster than before."));
        assert!(is_high_risk("Errors are never handled."));
        assert!(!is_high_risk("The graph fans out to three evaluators."));
    }

    #[test]
    fn test_split_sentences_keeps_paths_whole() {
        let sentences = split_sentences("Look at src/x.py. It is fine! Really?  Yes");
        assert_eq!(sentences, vec!["Look at src/x.py.", "It is fine!", "Really?", "Yes"]);
    }

    #[test]
    fn test_significant_tokens_skip_short_and_stopwords() {
        let tokens: Vec<String> = significant_tokens("The parallel graph uses this reducer").collect();
        assert_eq!(tokens, vec!["parallel", "graph", "uses", "reducer"]);
    }

    #[test]
    fn test_prose_score() {
        let caps = PROSE_SCORE.captures("Final Score: 4 overall").unwrap();
        assert_eq!(caps.get(1).unwrap().as_str(), "4");
        let caps = PROSE_SCORE.captures("I'd give it 2/5").unwrap();
        assert_eq!(caps.get(2).unwrap().as_str(), "2");
    }
}
