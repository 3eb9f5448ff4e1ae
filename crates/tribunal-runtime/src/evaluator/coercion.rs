//! Turning provider output into an opinion payload.
//!
//! Providers answer in one of three shapes; the cascade tries each stage in
//! order and never fails:
//!
//! 1. typed payload (already matches the schema)
//! 2. mapping with every required key, fields coerced
//! 3. free text holding a fenced or bare JSON object
//! 4. payload synthesized from the raw text
//! 5. deterministic neutral payload tagged `malformed_output`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tribunal_core::{EvaluatorRole, Opinion, MALFORMED_OUTPUT_CITATION, NEUTRAL_SCORE};

use crate::evidence::patterns::{FENCED_JSON, PATH_REFERENCE, PROSE_SCORE};
use crate::providers::CompletionResponse;

const REQUIRED_KEYS: [&str; 3] = ["score", "argument", "cited_evidence"];

const MALFORMED_ARGUMENT: &str = "The provider response could not be interpreted as an opinion \
after every parsing stage was tried, so a neutral score is recorded in its place.";

/// Opinion fields as returned by a provider, before guard rails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawOpinion {
    pub score: i64,
    pub argument: String,
    pub cited_evidence: Vec<String>,
}

/// A provider response, tagged by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResponse {
    Structured(RawOpinion),
    Mapping(Map<String, JsonValue>),
    Text(String),
}

impl From<CompletionResponse> for ProviderResponse {
    fn from(response: CompletionResponse) -> Self {
        match response.structured {
            Some(JsonValue::Object(map)) => {
                match serde_json::from_value::<RawOpinion>(JsonValue::Object(map.clone())) {
                    Ok(raw) => ProviderResponse::Structured(raw),
                    Err(_) => ProviderResponse::Mapping(map),
                }
            }
            Some(other) if response.content.trim().is_empty() => ProviderResponse::Text(other.to_string()),
            _ => ProviderResponse::Text(response.content),
        }
    }
}

/// Which cascade stage produced the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoercionStage {
    Typed,
    Mapping,
    ExtractedJson,
    RawText,
    Malformed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Coerced {
    pub payload: RawOpinion,
    pub stage: CoercionStage,
}

/// Run the cascade.
pub fn coerce(response: ProviderResponse) -> Coerced {
    match response {
        ProviderResponse::Structured(payload) => Coerced {
            payload,
            stage: CoercionStage::Typed,
        },
        ProviderResponse::Mapping(map) => match coerce_mapping(&map) {
            Some(payload) => Coerced {
                payload,
                stage: CoercionStage::Mapping,
            },
            None => coerce_text(&mapping_text(&map)),
        },
        ProviderResponse::Text(text) => coerce_text(&text),
    }
}

fn coerce_text(text: &str) -> Coerced {
    if let Some(payload) = extract_json_object(text).and_then(|map| coerce_mapping(&map)) {
        return Coerced {
            payload,
            stage: CoercionStage::ExtractedJson,
        };
    }
    if let Some(payload) = from_raw_text(text) {
        return Coerced {
            payload,
            stage: CoercionStage::RawText,
        };
    }
    Coerced {
        payload: malformed_payload(),
        stage: CoercionStage::Malformed,
    }
}

/// Accept a mapping holding every required key, coercing field types.
pub fn coerce_mapping(map: &Map<String, JsonValue>) -> Option<RawOpinion> {
    if !REQUIRED_KEYS.iter().all(|k| map.contains_key(*k)) {
        return None;
    }
    Some(RawOpinion {
        score: coerce_score(&map["score"])?,
        argument: coerce_argument(&map["argument"])?,
        cited_evidence: coerce_citations(&map["cited_evidence"])?,
    })
}

/// `4`, `4.0`, `"4"`, `"4/5"` all become 4.
pub fn coerce_score(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        JsonValue::String(s) => leading_number(s),
        _ => None,
    }
}

fn leading_number(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    let end = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(trimmed.len());
    trimmed[..end].parse::<f64>().ok().map(|f| f.round() as i64)
}

fn coerce_argument(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}

/// A list, a single string, or a string-encoded list.
pub fn coerce_citations(value: &JsonValue) -> Option<Vec<String>> {
    match value {
        JsonValue::Array(items) => Some(
            items
                .iter()
                .map(|item| match item {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        ),
        JsonValue::String(s) => {
            let trimmed = s.trim();
            if trimmed.starts_with('[') {
                if let Ok(JsonValue::Array(items)) = serde_json::from_str::<JsonValue>(trimmed) {
                    return coerce_citations(&JsonValue::Array(items));
                }
            }
            Some(
                trimmed
                    .split(|c| c == ',' || c == '\n')
                    .map(|part| part.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
                    .filter(|part| !part.is_empty())
                    .collect(),
            )
        }
        JsonValue::Null => Some(Vec::new()),
        _ => None,
    }
}

/// A fenced ```json block, or the first balanced `{...}` that parses.
pub fn extract_json_object(text: &str) -> Option<Map<String, JsonValue>> {
    if let Some(caps) = FENCED_JSON.captures(text) {
        if let Ok(JsonValue::Object(map)) = serde_json::from_str(&caps[1]) {
            return Some(map);
        }
    }

    for (start, _) in text.match_indices('{') {
        if let Some(end) = balanced_end(&text[start..]) {
            if let Ok(JsonValue::Object(map)) = serde_json::from_str(&text[start..start + end]) {
                return Some(map);
            }
        }
    }
    None
}

/// Byte length of the balanced object starting at `text[0] == '{'`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Best-effort payload from prose: a score if one is written down, the
/// text as argument, path-like references as citations.
fn from_raw_text(text: &str) -> Option<RawOpinion> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let score = PROSE_SCORE
        .captures(text)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .unwrap_or(i64::from(NEUTRAL_SCORE));

    let mut cited_evidence: Vec<String> = Vec::new();
    for m in PATH_REFERENCE.find_iter(text) {
        if !cited_evidence.iter().any(|c| c == m.as_str()) {
            cited_evidence.push(m.as_str().to_string());
        }
    }

    Some(RawOpinion {
        score,
        argument: text.to_string(),
        cited_evidence,
    })
}

fn malformed_payload() -> RawOpinion {
    RawOpinion {
        score: i64::from(NEUTRAL_SCORE),
        argument: MALFORMED_ARGUMENT.to_string(),
        cited_evidence: vec![MALFORMED_OUTPUT_CITATION.to_string()],
    }
}

/// Text to fall back on when a mapping lacks required keys.
fn mapping_text(map: &Map<String, JsonValue>) -> String {
    ["argument", "reasoning", "content", "text"]
        .iter()
        .find_map(|key| map.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        .unwrap_or_else(|| JsonValue::Object(map.clone()).to_string())
}

/// Guard rails: score in range, argument long enough, citations non-empty.
pub fn apply_guard_rails(role: EvaluatorRole, criterion_id: &str, payload: RawOpinion) -> Opinion {
    Opinion::new(
        role,
        criterion_id,
        payload.score,
        payload.argument,
        payload.cited_evidence,
    )
}
