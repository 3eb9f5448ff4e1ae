//! Anthropic Messages API backend.
//!
//! When the completion config carries a [`ResponseSchema`](super::ResponseSchema)
//! the request forces a single tool call whose input is the structured
//! opinion, so callers get a JSON payload instead of prose.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;

use super::{
    factory::ProviderFactory,
    secrets::{ApiCredential, CredentialSource},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
use crate::config::ProviderSettings;

pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const KEY_LABEL: &str = "Anthropic API key";

pub struct AnthropicProvider {
    credential: ApiCredential,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            credential: ApiCredential::new(api_key, CredentialSource::Programmatic, KEY_LABEL),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// `options.api_key` (or `ANTHROPIC_API_KEY`) and optional `options.base_url`.
    pub fn from_config(options: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(options, "api_key", ANTHROPIC_API_KEY_ENV, KEY_LABEL)?;
        let base_url = options
            .get("base_url")
            .and_then(JsonValue::as_str)
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::HttpError(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            credential,
            base_url,
            client,
        })
    }

    /// Messages API body. System turns move to the top-level `system` field.
    fn request_body(&self, messages: Vec<ChatMessage>, config: &CompletionConfig) -> JsonValue {
        let (system, turns): (Vec<_>, Vec<_>) = messages.into_iter().partition(|m| m.role == "system");

        let turns: Vec<JsonValue> = turns
            .into_iter()
            .map(|turn| {
                let mut block = json!({ "type": "text", "text": turn.content });
                if config.prompt_caching {
                    block["cache_control"] = json!({ "type": "ephemeral" });
                }
                json!({ "role": turn.role, "content": [block] })
            })
            .collect();

        let mut body = Map::new();
        body.insert("model".into(), json!(config.model));
        body.insert("max_tokens".into(), json!(config.max_tokens));
        body.insert("messages".into(), JsonValue::Array(turns));
        if let Some(last) = system.into_iter().last() {
            body.insert("system".into(), json!(last.content));
        }
        if config.temperature != 0.0 {
            body.insert("temperature".into(), json!(config.temperature));
        }
        if let Some(schema) = &config.response_schema {
            body.insert(
                "tools".into(),
                json!([{
                    "name": schema.name,
                    "description": schema.description,
                    "input_schema": schema.schema,
                }]),
            );
            body.insert("tool_choice".into(), json!({ "type": "tool", "name": schema.name }));
        }
        JsonValue::Object(body)
    }
}

/// Overload (529) is transient; exhausted credit or quota is not.
fn classify_error(status: u16, message: String, retry_after: Option<Duration>) -> ProviderError {
    let lower = message.to_ascii_lowercase();
    if status == 402 || lower.contains("credit balance") || lower.contains("quota") {
        return ProviderError::QuotaExhausted(message);
    }
    match status {
        401 | 403 => ProviderError::AuthError,
        429 => ProviderError::RateLimited { retry_after },
        529 => ProviderError::Overloaded(message),
        _ if lower.contains("overloaded") => ProviderError::Overloaded(message),
        _ => ProviderError::ApiError { status, message },
    }
}

#[derive(Debug, Deserialize)]
struct Reply {
    content: Vec<ReplyBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: ReplyUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplyBlock {
    Text { text: String },
    ToolUse { input: JsonValue },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ReplyUsage {
    input_tokens: u32,
    output_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl From<Reply> for CompletionResponse {
    fn from(reply: Reply) -> Self {
        let mut content = String::new();
        let mut structured = None;
        for block in reply.content {
            match block {
                ReplyBlock::Text { text } => content.push_str(&text),
                ReplyBlock::ToolUse { input } => {
                    structured.get_or_insert(input);
                }
                ReplyBlock::Other => {}
            }
        }

        CompletionResponse {
            content,
            structured,
            usage: TokenUsage {
                prompt_tokens: reply.usage.input_tokens,
                completion_tokens: reply.usage.output_tokens,
                cache_read_tokens: reply.usage.cache_read_input_tokens,
                cache_creation_tokens: reply.usage.cache_creation_input_tokens,
            },
            model: reply.model,
            stop_reason: reply.stop_reason,
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = self.request_body(messages, config);

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", API_VERSION)
            .timeout(config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(config.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()?.parse::<u64>().ok())
                .map(Duration::from_secs);
            let message = match response.json::<ErrorEnvelope>().await {
                Ok(envelope) => envelope.error.message,
                Err(_) => status.canonical_reason().unwrap_or("unknown").to_string(),
            };
            return Err(classify_error(status.as_u16(), message, retry_after));
        }

        let reply: Reply = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;
        Ok(reply.into())
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

pub struct AnthropicProviderFactory;

impl ProviderFactory for AnthropicProviderFactory {
    fn kind(&self) -> &'static str {
        "anthropic"
    }

    fn check(&self, settings: &ProviderSettings) -> Result<(), ProviderError> {
        let options = &settings.options;
        if !ApiCredential::is_available(options, "api_key", ANTHROPIC_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "no Anthropic API key in provider.options.api_key or {}",
                ANTHROPIC_API_KEY_ENV
            )));
        }
        match options.get("base_url").and_then(JsonValue::as_str) {
            Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => Err(
                ProviderError::NotConfigured(format!("provider.options.base_url '{}' is not an HTTP URL", url)),
            ),
            _ => Ok(()),
        }
    }

    fn build(&self, settings: &ProviderSettings) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(AnthropicProvider::from_config(&settings.options)?))
    }
}
