//! Structural validation of rubric documents against the bundled JSON Schema.
//!
//! Runs before deserialization so a malformed rubric reports every problem
//! at once, each with its JSON pointer.

use jsonschema::Validator;
use serde_json::Value;
use std::sync::OnceLock;

const RUBRIC_SCHEMA: &str = include_str!("../../../../schema/rubric.schema.json");

fn validator() -> Result<&'static Validator, String> {
    static VALIDATOR: OnceLock<Result<Validator, String>> = OnceLock::new();
    VALIDATOR
        .get_or_init(|| {
            let schema: Value =
                serde_json::from_str(RUBRIC_SCHEMA).map_err(|e| format!("bundled rubric schema is not JSON: {}", e))?;
            jsonschema::validator_for(&schema).map_err(|e| format!("bundled rubric schema does not compile: {}", e))
        })
        .as_ref()
        .map_err(Clone::clone)
}

/// Every violation, formatted as `"<message> at <pointer>"`.
pub fn validate_rubric_schema(rubric: &Value) -> Result<(), Vec<String>> {
    let validator = validator().map_err(|e| vec![e])?;
    let violations: Vec<String> = validator
        .iter_errors(rubric)
        .map(|err| {
            let pointer = err.instance_path.to_string();
            let at = if pointer.is_empty() { "/".to_string() } else { pointer };
            format!("{} at {}", err, at)
        })
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

pub fn is_valid_rubric(rubric: &Value) -> bool {
    validator().is_ok_and(|v| v.is_valid(rubric))
}
