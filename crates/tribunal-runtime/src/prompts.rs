//! System prompts and message templates for evaluator personas.
//!
//! Prompts are laid out for cache efficiency:
//! 1. Base prompt (shared by every persona)
//! 2. Persona prompt
//! 3. Dynamic content (criterion, evidence) in the user message

use serde_json::{json, Value as JsonValue};
use tribunal_core::{EvaluatorRole, RubricDimension, MIN_ARGUMENT_CHARS};

use crate::providers::ResponseSchema;

/// Name of the tool the provider is asked to call with the opinion.
pub const OPINION_TOOL_NAME: &str = "submit_opinion";

/// Base system prompt shared by all personas.
pub const BASE_SYSTEM_PROMPT: &str = r#"
You are one member of a three-person panel auditing a software project
against a rubric. Other panel members read the same evidence with different
dispositions; you cannot see their opinions.

## Ground Rules
1. Judge ONLY the criterion you are given
2. Cite evidence by the exact location strings listed under AVAILABLE EVIDENCE
3. Never mention files, numbers or percentages that the evidence does not show
4. If the evidence is thin, say so and score conservatively
5. Submit your opinion through the submit_opinion tool

## Output Format (JSON)
{
  "score": 1-5,
  "argument": "at least 100 characters of reasoning",
  "cited_evidence": ["location", "..."]
}
"#;

/// Harsh persona.
pub const CRITIC_PROMPT: &str = r#"
## Persona: Critic

Disposition: trust nothing that the evidence does not prove.

- Look for security problems first: shell execution of untrusted input,
  path traversal, unvalidated URLs, secrets in code
- Treat claims in the report that the repository does not back up as
  liabilities
- Parallelism that is only asserted, free-text outputs where typed outputs
  were promised, and buzzwords without implementation all count against
- Scores of 4 or 5 need strong, specific evidence

If you find a security flaw, say the word "security" and name the location.
"#;

/// Lenient persona.
pub const ADVOCATE_PROMPT: &str = r#"
## Persona: Advocate

Disposition: credit intent, effort and sound ideas.

- Start with what the author got right
- Iterative commit history and honest write-ups are signs of real
  engineering
- Meeting the intent of a criterion counts even where the letter is missed
- Reserve a score of 1 for work that is absent, not merely imperfect

Stay honest: generosity does not extend to inventing strengths.
"#;

/// Pragmatic tie-breaker persona.
pub const PRAGMATIST_PROMPT: &str = r#"
## Persona: Pragmatist

Disposition: does it work, and could a team maintain it?

- Focus on artifacts, not effort or rhetoric
- Weigh architecture, state handling, error handling and test coverage
- Name concrete technical debt and the smallest fix for it
- A confirmed security flaw outweighs good intentions; a solid design
  outweighs cosmetic gaps

Be realistic: neither harsh for its own sake nor lenient by default.
"#;

/// Persona prompt for a role.
pub fn persona_prompt(role: EvaluatorRole) -> &'static str {
    match role {
        EvaluatorRole::Critic => CRITIC_PROMPT,
        EvaluatorRole::Advocate => ADVOCATE_PROMPT,
        EvaluatorRole::Pragmatist => PRAGMATIST_PROMPT,
    }
}

/// Full system prompt (base + persona).
pub fn system_prompt(role: EvaluatorRole) -> String {
    format!("{}\n{}", BASE_SYSTEM_PROMPT.trim(), persona_prompt(role).trim_end())
}

/// User message for one criterion.
pub fn build_user_message(dimension: &RubricDimension, role: EvaluatorRole, evidence_context: &str) -> String {
    let instruction = dimension
        .instruction_for(role)
        .unwrap_or("Apply your persona's disposition to this criterion.");
    let forensic = if dimension.forensic_instruction.trim().is_empty() {
        "(none given)"
    } else {
        dimension.forensic_instruction.trim()
    };
    let evidence = if evidence_context.trim().is_empty() {
        "(no evidence was collected for this artifact)"
    } else {
        evidence_context
    };

    format!(
        "**CRITERION TO EVALUATE:** {name} (`{id}`)\n\n\
         **FORENSIC INSTRUCTION:**\n{forensic}\n\n\
         **YOUR INSTRUCTION ({persona}):**\n{instruction}\n\n\
         **AVAILABLE EVIDENCE:**\n{evidence}\n\n\
         **YOUR TASK:**\n\
         As the {persona}, score this criterion from 1 to 5 and justify the score \
         with at least {min} characters citing evidence locations.\n\n\
         Score 1: Critical failure, security violation or missing entirely\n\
         Score 2: Major gaps or significant issues\n\
         Score 3: Functional but flawed, technical debt present\n\
         Score 4: Good implementation, minor issues only\n\
         Score 5: Excellent, exceeds expectations\n",
        name = dimension.name,
        id = dimension.id,
        persona = role.display_name(),
        min = MIN_ARGUMENT_CHARS,
    )
}

/// JSON schema the provider's structured output must follow.
pub fn opinion_schema() -> ResponseSchema {
    ResponseSchema {
        name: OPINION_TOOL_NAME.to_string(),
        description: "Submit your scored opinion on the criterion".to_string(),
        schema: opinion_json_schema(),
    }
}

fn opinion_json_schema() -> JsonValue {
    json!({
        "type": "object",
        "properties": {
            "score": { "type": "integer", "minimum": 1, "maximum": 5 },
            "argument": { "type": "string", "minLength": MIN_ARGUMENT_CHARS },
            "cited_evidence": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["score", "argument", "cited_evidence"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tribunal_core::TargetArtifact;

    fn dimension() -> RubricDimension {
        let mut per_evaluator_instruction = BTreeMap::new();
        per_evaluator_instruction.insert("prosecutor".to_string(), "Hunt for shell injection.".to_string());
        RubricDimension {
            id: "safe_tooling".into(),
            name: "Safe Tool Engineering".into(),
            target_artifact: TargetArtifact::Repo,
            forensic_instruction: "Check how git is invoked.".into(),
            per_evaluator_instruction,
        }
    }

    #[test]
    fn test_every_role_has_a_distinct_prompt() {
        let prompts: Vec<String> = EvaluatorRole::ALL.iter().map(|r| system_prompt(*r)).collect();
        assert!(prompts.iter().all(|p| p.contains("## Ground Rules")));
        assert_ne!(prompts[0], prompts[1]);
        assert_ne!(prompts[1], prompts[2]);
        assert!(prompts[0].contains("security"));
    }

    #[test]
    fn test_user_message_uses_legacy_instruction_key() {
        let message = build_user_message(&dimension(), EvaluatorRole::Critic, "- src/a.rs: found");
        assert!(message.contains("Safe Tool Engineering"));
        assert!(message.contains("Hunt for shell injection."));
        assert!(message.contains("Check how git is invoked."));
        assert!(message.contains("- src/a.rs: found"));
        assert!(message.contains("Score 5"));
    }

    #[test]
    fn test_user_message_defaults() {
        let message = build_user_message(&dimension(), EvaluatorRole::Advocate, "");
        assert!(message.contains("Apply your persona's disposition"));
        assert!(message.contains("no evidence was collected"));
    }

    #[test]
    fn test_schema_requires_all_fields() {
        let schema = opinion_schema();
        assert_eq!(schema.name, OPINION_TOOL_NAME);
        assert_eq!(schema.schema["required"].as_array().unwrap().len(), 3);
    }
}
