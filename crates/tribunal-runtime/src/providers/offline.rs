//! Deterministic offline provider.
//!
//! Used when no credentials are configured so tool-only runs still execute
//! end to end. Every call returns the same neutral structured opinion.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

use crate::config::ProviderSettings;

use super::{
    factory::ProviderFactory, ChatMessage, CompletionConfig, CompletionResponse, LlmProvider,
    ProviderError,
};

pub const OFFLINE_CITATION: &str = "offline_fallback";

const OFFLINE_ARGUMENT: &str = "No LLM API key configured. Returning a deterministic neutral \
opinion so that evidence collection, synthesis and reporting still run without network access.";

#[derive(Debug, Default, Clone)]
pub struct OfflineProvider;

impl OfflineProvider {
    pub fn new() -> Self {
        Self
    }

    fn payload() -> JsonValue {
        json!({
            "score": 3,
            "argument": OFFLINE_ARGUMENT,
            "cited_evidence": [OFFLINE_CITATION],
        })
    }
}

#[async_trait]
impl LlmProvider for OfflineProvider {
    async fn complete(
        &self,
        _messages: Vec<ChatMessage>,
        _config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        Ok(CompletionResponse::structured(Self::payload(), "offline"))
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "offline"
    }

    fn estimate_tokens(&self, _text: &str) -> u32 {
        0
    }
}

pub struct OfflineProviderFactory;

impl ProviderFactory for OfflineProviderFactory {
    fn kind(&self) -> &'static str {
        "offline"
    }

    fn build(&self, _settings: &ProviderSettings) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(OfflineProvider::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_returns_structured_neutral_payload() {
        let provider = OfflineProvider::new();
        let response = provider
            .complete(vec![ChatMessage::user("anything")], &CompletionConfig::default())
            .await
            .unwrap();

        let payload = response.structured.unwrap();
        assert_eq!(payload["score"], 3);
        assert_eq!(payload["cited_evidence"][0], OFFLINE_CITATION);
        assert!(payload["argument"].as_str().unwrap().len() >= 100);
        assert_eq!(provider.estimate_tokens("long prompt"), 0);
    }
}
