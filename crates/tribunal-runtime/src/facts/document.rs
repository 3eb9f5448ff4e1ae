//! Report analysis.
//!
//! Reads the accompanying report and records which source files it claims
//! exist and which architectural concepts it discusses. Text and Markdown
//! are read as-is; PDF reports have their text layer extracted first.

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use tribunal_core::{AuditInputs, Evidence, TargetArtifact};

use super::sandbox::validate_file_size;
use super::{FactError, FactFinder};
use crate::evidence::context::truncate_chars;
use crate::evidence::patterns::CLAIMED_SOURCE_PATH;
use crate::evidence::producers::DOCUMENT_ANALYST;

/// Location of the evidence item listing report-claimed source paths.
pub const FILE_REFERENCES_LOCATION: &str = "report:file-references";

const FILE_REFERENCES_PREFIX: &str = "File references: ";

const SNIPPET_RADIUS: usize = 80;

/// Concept id and the phrases that count as discussing it.
const CONCEPTS: &[(&str, &[&str])] = &[
    ("dialectical_synthesis", &["dialectical synthesis", "thesis", "antithesis", "synthesis"]),
    (
        "metacognition",
        &["metacognition", "thinking about thinking", "meta-cognitive", "feedback loop", "reflection", "self-audit"],
    ),
    ("fan_out_fan_in", &["fan-out", "fan-in", "fan out", "parallel judges", "parallelism"]),
    (
        "state_synchronization",
        &["state synchronization", "state reducer", "operator.add", "operator.ior", "aggregate"],
    ),
];

pub struct DocumentAnalyst {
    max_file_bytes: u64,
}

impl DocumentAnalyst {
    pub fn new(max_file_bytes: u64) -> Self {
        Self { max_file_bytes }
    }

    fn analyze_text(&self, text: &str, location: &str) -> Vec<Evidence> {
        let words = text.split_whitespace().count();
        let mut evidences = vec![Evidence::found(
            DOCUMENT_ANALYST,
            location,
            format!("Report present with {} words", words),
            1.0,
        )];

        let claimed = claimed_paths(text);
        evidences.push(if claimed.is_empty() {
            Evidence::missing(DOCUMENT_ANALYST, FILE_REFERENCES_LOCATION, "No file references found", 0.5)
        } else {
            Evidence::found(
                DOCUMENT_ANALYST,
                FILE_REFERENCES_LOCATION,
                format!(
                    "{}{}",
                    FILE_REFERENCES_PREFIX,
                    claimed.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
                ),
                0.9,
            )
        });

        let lowered = text.to_lowercase();
        for (concept, phrases) in CONCEPTS {
            let location = format!("report:concept/{}", concept);
            let hits: Vec<&str> = phrases.iter().copied().filter(|p| lowered.contains(p)).collect();
            evidences.push(match hits.first() {
                Some(first) => Evidence::found(
                    DOCUMENT_ANALYST,
                    location,
                    format!("Mentions {}: {}", hits.join(", "), snippet(text, &lowered, first)),
                    0.8,
                ),
                None => Evidence::missing(DOCUMENT_ANALYST, location, "Concept not mentioned in report", 0.6),
            });
        }
        evidences
    }
}

#[async_trait]
impl FactFinder for DocumentAnalyst {
    fn name(&self) -> &str {
        DOCUMENT_ANALYST
    }

    fn target_artifact(&self) -> TargetArtifact {
        TargetArtifact::Document
    }

    async fn investigate(&self, inputs: &AuditInputs) -> Result<Vec<Evidence>, FactError> {
        let path = inputs.report_path.as_path();
        let location = path.display().to_string();

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            info!(report = %location, "Report not found");
            return Ok(vec![Evidence::missing(DOCUMENT_ANALYST, location, "Report file not found", 1.0)]);
        }

        let size = validate_file_size(path, self.max_file_bytes)?;
        let bytes = tokio::fs::read(path).await?;
        debug!(report = %location, size_bytes = size, "Report read");

        if !is_pdf(path) {
            return Ok(self.analyze_text(&String::from_utf8_lossy(&bytes), &location));
        }

        match extract_pdf_text(bytes).await {
            Ok(text) if !text.trim().is_empty() => Ok(self.analyze_text(&text, &location)),
            Ok(_) => Ok(vec![Evidence::missing(
                DOCUMENT_ANALYST,
                location,
                "PDF report has no extractable text layer",
                0.7,
            )]),
            Err(reason) => {
                warn!(report = %location, error = %reason, "PDF text extraction failed");
                Ok(vec![Evidence::missing(
                    DOCUMENT_ANALYST,
                    location,
                    format!("PDF report could not be parsed: {}", reason),
                    0.7,
                )])
            }
        }
    }
}

/// Source paths the report claims exist, deduplicated and sorted.
pub fn claimed_paths(text: &str) -> BTreeSet<String> {
    CLAIMED_SOURCE_PATH
        .find_iter(text)
        .map(|m| {
            m.as_str()
                .replace('\\', "/")
                .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')' | '"' | '\''))
                .to_string()
        })
        .collect()
}

/// Claimed paths recorded in a file-references evidence item.
pub fn references_in(evidence: &Evidence) -> Vec<String> {
    if !evidence.found || evidence.location != FILE_REFERENCES_LOCATION {
        return Vec::new();
    }
    evidence
        .content
        .as_deref()
        .and_then(|c| c.strip_prefix(FILE_REFERENCES_PREFIX))
        .map(|list| list.split(", ").map(str::to_string).filter(|p| !p.is_empty()).collect())
        .unwrap_or_default()
}

/// Text layer of a PDF. Extraction is CPU-bound and can panic on malformed
/// input, so it runs on the blocking pool.
async fn extract_pdf_text(bytes: Vec<u8>) -> Result<String, String> {
    tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("pdf"))
}

fn snippet(text: &str, lowered: &str, phrase: &str) -> String {
    // Lowercasing can change byte offsets for non-ASCII text; fall back to the phrase
    let Some(byte_idx) = lowered.find(phrase).filter(|_| lowered.len() == text.len()) else {
        return phrase.to_string();
    };
    let start = text[..byte_idx].chars().rev().take(SNIPPET_RADIUS).map(char::len_utf8).sum::<usize>();
    let context: String = text[byte_idx - start..].split_whitespace().collect::<Vec<_>>().join(" ");
    format!("...{}", truncate_chars(&context, SNIPPET_RADIUS * 2 + phrase.len()))
}
