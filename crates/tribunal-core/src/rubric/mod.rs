//! Rubric loading and validation.
//!
//! Rubrics are structured data validated against `schema/rubric.schema.json`
//! before they are deserialized into typed configuration.

mod parser;
mod policy;
mod schema;

pub use parser::{RubricConfig, RubricDimension, RubricError, RubricMetadata};
pub use policy::PolicyRules;
pub use schema::{is_valid_rubric, validate_rubric_schema};
