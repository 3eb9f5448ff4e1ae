//! Evaluator personas.

use tribunal_core::EvaluatorRole;

use crate::prompts;

/// A role bound to its system prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatorPersona {
    pub role: EvaluatorRole,
    pub display_name: &'static str,
    pub system_prompt: String,
}

impl EvaluatorPersona {
    pub fn for_role(role: EvaluatorRole) -> Self {
        Self {
            role,
            display_name: role.display_name(),
            system_prompt: prompts::system_prompt(role),
        }
    }

    /// The three built-in personas, in fixed order.
    pub fn all() -> Vec<Self> {
        EvaluatorRole::ALL.into_iter().map(Self::for_role).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_personas_have_distinct_prompts() {
        let personas = EvaluatorPersona::all();
        assert_eq!(personas.len(), 3);
        assert_ne!(personas[0].system_prompt, personas[1].system_prompt);
        assert_ne!(personas[1].system_prompt, personas[2].system_prompt);
        assert!(personas
            .iter()
            .all(|p| p.system_prompt.contains(prompts::OPINION_TOOL_NAME)));
    }
}
