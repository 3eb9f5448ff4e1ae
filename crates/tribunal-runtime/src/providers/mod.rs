//! Model backends.
//!
//! Evaluators talk to a model only through [`LlmProvider`]. A response may
//! carry a structured JSON payload (tool/function output) as well as free
//! text; the evaluator pipeline tolerates either. Keys are held as
//! [`ApiCredential`] and never logged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;

mod factory;
mod offline;
pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use offline::{OfflineProvider, OfflineProviderFactory};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    HttpError(String),
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("provider overloaded: {0}")]
    Overloaded(String),
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),
    #[error("provider returned {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("unreadable provider response: {0}")]
    ParseError(String),
    #[error("credential rejected by provider")]
    AuthError,
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("provider unavailable: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Worth retrying with backoff: rate limits, overload, timeouts and
    /// dropped connections.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. }
            | ProviderError::Overloaded(_)
            | ProviderError::Timeout(_)
            | ProviderError::HttpError(_) => true,
            ProviderError::ApiError { status, message } => {
                *status >= 500 || looks_like_try_again(message)
            }
            _ => false,
        }
    }

    /// Quota or spend limits: no retry, degrade immediately.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, ProviderError::QuotaExhausted(_))
    }
}

fn looks_like_try_again(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("try again") || message.contains("rate limit") || message.contains("temporarily")
}

/// Per-call settings, derived from the `provider` config section.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub model: String,
    pub max_tokens: u32,
    /// Evaluators run at 0.0
    pub temperature: f32,
    /// Applies to each attempt, not the whole retry sequence
    pub timeout: Duration,
    /// Mark the persona prompt cacheable where the backend supports it
    pub prompt_caching: bool,
    /// Request a structured payload matching this schema
    pub response_schema: Option<ResponseSchema>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250514".to_string(),
            max_tokens: 1024,
            temperature: 0.0,
            timeout: Duration::from_secs(60),
            prompt_caching: true,
            response_schema: None,
        }
    }
}

/// A named JSON schema for structured output.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    pub name: String,
    pub description: String,
    pub schema: JsonValue,
}

/// One turn of an evaluator conversation. Evaluators send a persona
/// system turn followed by a single user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content)
    }

    fn with_role(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// What a provider returned: free text, a structured payload, or both.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    /// Tool-call input or JSON-mode output
    pub structured: Option<JsonValue>,
    pub usage: TokenUsage,
    pub model: String,
    pub stop_reason: Option<String>,
}

impl CompletionResponse {
    /// Plain-text response.
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            structured: None,
            usage: TokenUsage::default(),
            model: model.into(),
            stop_reason: Some("end_turn".to_string()),
        }
    }

    /// Structured response.
    pub fn structured(payload: JsonValue, model: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            structured: Some(payload),
            usage: TokenUsage::default(),
            model: model.into(),
            stop_reason: Some("tool_use".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Prompt-cache reads and writes, where the backend reports them
    pub cache_read_tokens: u32,
    pub cache_creation_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A model backend. Only evaluators call it; fact finders and the
/// synthesizer never do.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    async fn health_check(&self) -> bool;

    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Rough token count used for budget checks before a call.
    fn estimate_tokens(&self, text: &str) -> u32 {
        (text.chars().count() / 4) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_creation() {
        assert_eq!(ChatMessage::system("You are an auditor.").role, "system");
        assert_eq!(ChatMessage::user("Hello!").role, "user");
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
            ..Default::default()
        };
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn test_error_classification() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_transient());
        assert!(ProviderError::Overloaded("busy".into()).is_transient());
        assert!(ProviderError::ApiError { status: 503, message: "down".into() }.is_transient());
        assert!(ProviderError::ApiError {
            status: 400,
            message: "Please try again later".into()
        }
        .is_transient());

        assert!(!ProviderError::ParseError("bad json".into()).is_transient());
        assert!(!ProviderError::AuthError.is_transient());

        let quota = ProviderError::QuotaExhausted("credit balance too low".into());
        assert!(!quota.is_transient());
        assert!(quota.is_exhausted());
    }
}
