//! Rubric parsing from YAML/JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::policy::PolicyRules;
use super::schema::validate_rubric_schema;
use crate::types::{EvaluatorRole, TargetArtifact};

/// Errors that can occur when loading rubrics.
#[derive(Error, Debug)]
pub enum RubricError {
    #[error("Failed to read rubric file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Rubric does not match schema: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),

    #[error("Rubric validation failed: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unsupported rubric format: {0}")]
    UnsupportedFormat(String),
}

/// Descriptive metadata for a rubric.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RubricMetadata {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

/// One rubric criterion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RubricDimension {
    /// Stable identifier, used as the key in final scores
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Which artifact the criterion is judged against
    pub target_artifact: TargetArtifact,

    /// What the fact finders should look for
    #[serde(default)]
    pub forensic_instruction: String,

    /// Per-persona guidance, keyed by evaluator role
    #[serde(default, alias = "judicial_logic")]
    pub per_evaluator_instruction: BTreeMap<String, String>,
}

impl RubricDimension {
    /// Instruction for one persona, accepting both current and legacy keys.
    pub fn instruction_for(&self, role: EvaluatorRole) -> Option<&str> {
        self.per_evaluator_instruction
            .iter()
            .find(|(key, _)| EvaluatorRole::from_key(key) == Some(role))
            .map(|(_, text)| text.as_str())
    }
}

/// A complete rubric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RubricConfig {
    #[serde(default, alias = "rubric_metadata")]
    pub metadata: RubricMetadata,

    /// Criteria in evaluation order
    pub dimensions: Vec<RubricDimension>,

    /// Named policy toggles for the synthesizer
    #[serde(default)]
    pub synthesis_rules: BTreeMap<String, JsonValue>,
}

impl RubricConfig {
    /// Parse a rubric from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, RubricError> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a rubric from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, RubricError> {
        let value: JsonValue = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a rubric from a file, dispatching on its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RubricError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
            Some("json") => Self::from_json(&contents),
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            other => Err(RubricError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    /// Schema-check, deserialize and semantically validate a JSON value.
    pub fn from_value(value: JsonValue) -> Result<Self, RubricError> {
        validate_rubric_schema(&value).map_err(RubricError::SchemaViolation)?;
        let rubric: RubricConfig = serde_json::from_value(value)?;
        rubric.validate()?;
        Ok(rubric)
    }

    /// Policy toggles parsed from `synthesis_rules`.
    pub fn policy(&self) -> PolicyRules {
        PolicyRules::from_rules(&self.synthesis_rules)
    }

    /// Look up a dimension by id.
    pub fn dimension(&self, id: &str) -> Option<&RubricDimension> {
        self.dimensions.iter().find(|d| d.id == id)
    }

    /// Display name of the rubric, if any.
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("Unnamed rubric")
    }

    fn validate(&self) -> Result<(), RubricError> {
        if self.dimensions.is_empty() {
            return Err(RubricError::MissingField("dimensions".to_string()));
        }

        let mut seen = HashSet::new();
        for dimension in &self.dimensions {
            if dimension.id.trim().is_empty() {
                return Err(RubricError::MissingField("dimensions[].id".to_string()));
            }
            if dimension.name.trim().is_empty() {
                return Err(RubricError::MissingField(format!(
                    "dimensions[{}].name",
                    dimension.id
                )));
            }
            if !seen.insert(dimension.id.as_str()) {
                return Err(RubricError::ValidationError(format!(
                    "Duplicate dimension ID: {}",
                    dimension.id
                )));
            }
        }

        Ok(())
    }
}
