//! Evidence produced by fact-finding nodes.
//!
//! Every item is an atomic, confidence-scored fact that points at a concrete
//! location (file path, URL or document locator). Evaluators may only cite
//! locations that appear here.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Location used when a producer supplies an empty descriptor.
pub const UNSPECIFIED_LOCATION: &str = "unspecified";

/// One atomic fact emitted by a fact-finding node.
///
/// Invariants: `confidence` lies in `[0.0, 1.0]` and `location` is never
/// empty. Both hold for values built through the constructors and for values
/// deserialized from JSON/YAML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "EvidenceRecord")]
pub struct Evidence {
    /// Whether the thing looked for was found
    pub found: bool,

    /// Supporting excerpt or description
    pub content: Option<String>,

    /// Where the fact lives (never empty)
    pub location: String,

    /// Confidence in `[0.0, 1.0]`
    pub confidence: f64,

    /// Name of the node that emitted this item
    pub producer: String,

    /// RFC 3339 timestamp of collection
    pub timestamp: Option<String>,
}

#[derive(Deserialize)]
struct EvidenceRecord {
    found: bool,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    location: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    producer: String,
    #[serde(default)]
    timestamp: Option<String>,
}

impl From<EvidenceRecord> for Evidence {
    fn from(record: EvidenceRecord) -> Self {
        let mut evidence = Evidence::new(record.producer, record.location, record.found, record.confidence);
        evidence.content = record.content;
        evidence.timestamp = record.timestamp;
        evidence
    }
}

impl Evidence {
    /// Create evidence with the invariants enforced.
    pub fn new(
        producer: impl Into<String>,
        location: impl Into<String>,
        found: bool,
        confidence: f64,
    ) -> Self {
        let location = location.into();
        let location = if location.trim().is_empty() {
            UNSPECIFIED_LOCATION.to_string()
        } else {
            location.trim().to_string()
        };

        Self {
            found,
            content: None,
            location,
            confidence: clamp_confidence(confidence),
            producer: producer.into(),
            timestamp: None,
        }
    }

    /// Evidence that something was found.
    pub fn found(
        producer: impl Into<String>,
        location: impl Into<String>,
        content: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self::new(producer, location, true, confidence).with_content(content)
    }

    /// Evidence that something was looked for and not found.
    ///
    /// This is a successful result, not a failure.
    pub fn missing(
        producer: impl Into<String>,
        location: impl Into<String>,
        content: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self::new(producer, location, false, confidence).with_content(content)
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        self.content = if content.is_empty() { None } else { Some(content) };
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Stamp with the current UTC time.
    pub fn stamped(self) -> Self {
        self.with_timestamp(Utc::now().to_rfc3339())
    }

    /// Location normalized for citation matching.
    pub fn normalized_location(&self) -> String {
        normalize_location(&self.location)
    }
}

/// Clamp a confidence into `[0.0, 1.0]`. NaN becomes 0.
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Normalize a location or citation for matching.
///
/// Lowercases, converts backslashes, strips surrounding quotes and trailing
/// punctuation, and drops a leading `./`.
pub fn normalize_location(location: &str) -> String {
    let lowered = location.trim().replace('\\', "/").to_lowercase();
    let trimmed = lowered
        .trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | '(' | ')' | '[' | ']' | '<' | '>'))
        .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?'));
    trimmed.strip_prefix("./").unwrap_or(trimmed).to_string()
}

/// Builder for creating evidence with a fluent API.
pub struct EvidenceBuilder {
    producer: String,
    location: String,
    found: bool,
    content: Option<String>,
    confidence: f64,
    timestamp: Option<String>,
}

impl EvidenceBuilder {
    /// Start building evidence for a producer and location.
    pub fn new(producer: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            producer: producer.into(),
            location: location.into(),
            found: true,
            content: None,
            confidence: 1.0,
            timestamp: None,
        }
    }

    pub fn found(mut self, found: bool) -> Self {
        self.found = found;
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Build the evidence.
    pub fn build(self) -> Evidence {
        let mut evidence = Evidence::new(self.producer, self.location, self.found, self.confidence);
        if let Some(content) = self.content {
            evidence = evidence.with_content(content);
        }
        evidence.timestamp = self.timestamp;
        evidence
    }
}
