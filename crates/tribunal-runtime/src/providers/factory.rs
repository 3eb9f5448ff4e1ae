//! Provider selection by name.
//!
//! Each backend registers a factory under a kind ("anthropic", "offline");
//! `provider.kind` in the runtime configuration picks one. A backend that
//! cannot be built (usually a missing credential) degrades to the offline
//! provider so tool-only runs still complete.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::offline::{OfflineProvider, OfflineProviderFactory};
use super::{LlmProvider, ProviderError};
use crate::config::ProviderSettings;

/// Builds one provider backend from the `provider` config section.
pub trait ProviderFactory: Send + Sync {
    /// Name matched against `provider.kind`.
    fn kind(&self) -> &'static str;

    /// Fail early when the settings cannot produce a working provider.
    fn check(&self, _settings: &ProviderSettings) -> Result<(), ProviderError> {
        Ok(())
    }

    fn build(&self, settings: &ProviderSettings) -> Result<Arc<dyn LlmProvider>, ProviderError>;
}

#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<&'static str, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every compiled-in backend.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OfflineProviderFactory));
        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::AnthropicProviderFactory));
        registry
    }

    /// A later registration under the same kind replaces the earlier one.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn build(&self, settings: &ProviderSettings) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let factory = self.factories.get(settings.kind.as_str()).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "unknown provider kind '{}' (compiled in: {})",
                settings.kind,
                self.kinds().join(", ")
            ))
        })?;
        factory.check(settings)?;
        let provider = factory.build(settings)?;
        debug!(kind = %settings.kind, model = %settings.model, "Provider ready");
        Ok(provider)
    }

    /// [`build`](Self::build), or the offline provider if that fails.
    pub fn build_or_offline(&self, settings: &ProviderSettings) -> Arc<dyn LlmProvider> {
        self.build(settings).unwrap_or_else(|e| {
            warn!(
                kind = %settings.kind,
                error = %e,
                "Provider unavailable; evaluators will return neutral offline opinions"
            );
            Arc::new(OfflineProvider::new())
        })
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry").field("kinds", &self.kinds()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::providers::{ChatMessage, CompletionConfig, CompletionResponse};

    struct EchoProvider {
        model: String,
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse::text("echo", self.model.clone()))
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    /// Requires `options.token` to be set.
    struct EchoFactory;

    impl ProviderFactory for EchoFactory {
        fn kind(&self) -> &'static str {
            "echo"
        }

        fn check(&self, settings: &ProviderSettings) -> Result<(), ProviderError> {
            settings.options["token"]
                .as_str()
                .map(|_| ())
                .ok_or_else(|| ProviderError::NotConfigured("token missing".into()))
        }

        fn build(&self, settings: &ProviderSettings) -> Result<Arc<dyn LlmProvider>, ProviderError> {
            Ok(Arc::new(EchoProvider {
                model: settings.model.clone(),
            }))
        }
    }

    fn settings(kind: &str, options: serde_json::Value) -> ProviderSettings {
        ProviderSettings {
            kind: kind.to_string(),
            options,
            ..Default::default()
        }
    }

    #[test]
    fn test_builds_registered_kind() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoFactory));
        assert!(registry.contains("echo"));

        let provider = registry
            .build(&settings("echo", serde_json::json!({ "token": "t" })))
            .unwrap();
        assert_eq!(provider.name(), "echo");
    }

    #[test]
    fn test_unknown_kind_lists_alternatives() {
        let registry = ProviderRegistry::with_defaults();
        match registry.build(&settings("mystery", serde_json::json!({}))) {
            Err(ProviderError::NotConfigured(msg)) => {
                assert!(msg.contains("mystery"));
                assert!(msg.contains("offline"));
            }
            _ => panic!("expected NotConfigured"),
        }
    }

    #[test]
    fn test_failed_check_degrades_to_offline() {
        let mut registry = ProviderRegistry::with_defaults();
        registry.register(Arc::new(EchoFactory));

        let provider = registry.build_or_offline(&settings("echo", serde_json::json!({})));
        assert_eq!(provider.name(), "offline");

        let provider = registry.build_or_offline(&settings("echo", serde_json::json!({ "token": "t" })));
        assert_eq!(provider.name(), "echo");
    }

    #[test]
    fn test_defaults() {
        let registry = ProviderRegistry::with_defaults();
        assert!(registry.contains("offline"));
        assert_eq!(registry.kinds().contains(&"anthropic"), cfg!(feature = "anthropic"));
    }
}
