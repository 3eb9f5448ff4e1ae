//! Synthesis policy toggles.
//!
//! `synthesis_rules` is a flat map of named toggles. Unknown keys are ignored.
//! Values may be booleans or free-text rule descriptions; a description
//! counts as enabling the rule.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

const SECURITY_OVERRIDE: &str = "security_override";
const MISSING_ARTIFACT_CAP: &[&str] = &["missing_artifact_cap", "missing_vision_cap"];
const HIGH_VARIANCE_MISSING_EVIDENCE: &str = "high_variance_missing_evidence";

/// Resolved policy toggles consumed by the synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRules {
    /// Critic score 1 with a security concern caps the criterion at 3.
    ///
    /// On unless the rubric explicitly disables it.
    pub security_override: bool,

    /// A criterion whose target artifact produced no evidence is capped at 4.
    pub missing_artifact_cap: bool,

    /// With the cap above, high variance lowers the cap to 3.
    pub high_variance_missing_evidence: bool,
}

impl Default for PolicyRules {
    fn default() -> Self {
        Self {
            security_override: true,
            missing_artifact_cap: false,
            high_variance_missing_evidence: false,
        }
    }
}

impl PolicyRules {
    /// Resolve toggles from a rubric's `synthesis_rules` map.
    pub fn from_rules(rules: &BTreeMap<String, JsonValue>) -> Self {
        let security_override = match rules.get(SECURITY_OVERRIDE) {
            Some(value) => is_active(value),
            None => true,
        };

        Self {
            security_override,
            missing_artifact_cap: MISSING_ARTIFACT_CAP
                .iter()
                .any(|key| rules.get(*key).map(is_active).unwrap_or(false)),
            high_variance_missing_evidence: rules
                .get(HIGH_VARIANCE_MISSING_EVIDENCE)
                .map(is_active)
                .unwrap_or(false),
        }
    }
}

fn is_active(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(flag) => *flag,
        JsonValue::String(text) => {
            let text = text.trim().to_ascii_lowercase();
            !text.is_empty() && !matches!(text.as_str(), "false" | "off" | "disabled" | "0" | "no")
        }
        _ => false,
    }
}
