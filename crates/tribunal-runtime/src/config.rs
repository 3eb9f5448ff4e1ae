//! Runtime configuration.
//!
//! Loaded once at process start (YAML file, then `TRIBUNAL_*` environment
//! overrides, then validation) and passed by reference into every component.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::providers::CompletionConfig;
use crate::resilience::CircuitBreakerConfig;

pub const ENV_RESILIENT: &str = "TRIBUNAL_RESILIENT";
pub const ENV_MODEL: &str = "TRIBUNAL_MODEL";
pub const ENV_MAX_RETRIES: &str = "TRIBUNAL_MAX_RETRIES";
pub const ENV_ALLOWED_DOMAINS: &str = "TRIBUNAL_ALLOWED_DOMAINS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidOverride { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What a node failure does to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any node failure aborts the run
    #[default]
    FailFast,

    /// Node failures are recorded in `errors` and neutralized
    Resilient,
}

/// LLM provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Registered provider type ("anthropic", "offline")
    pub kind: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
    /// Provider-specific options handed to its factory
    pub options: JsonValue,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: "anthropic".to_string(),
            model: "claude-sonnet-4-5-20250514".to_string(),
            max_tokens: 1024,
            temperature: 0.0,
            request_timeout: Duration::from_secs(60),
            options: JsonValue::Object(Default::default()),
        }
    }
}

/// Retry schedule for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    #[serde(with = "duration_str")]
    pub base_delay: Duration,
    #[serde(with = "duration_str")]
    pub max_delay: Duration,
    /// Upper bound of the uniform jitter, as a fraction of the delay
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            jitter_ratio: 0.25,
        }
    }
}

/// Evidence context budget handed to evaluators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_items_per_producer: usize,
    pub max_content_chars: usize,
    pub max_context_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_items_per_producer: 4,
            max_content_chars: 160,
            max_context_chars: 2400,
        }
    }
}

/// Token budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub global_max_tokens: u32,
    pub per_evaluator_max_tokens: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            global_max_tokens: 400_000,
            per_evaluator_max_tokens: 150_000,
        }
    }
}

/// Limits for sandboxed fact finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub allowed_domains: Vec<String>,
    #[serde(with = "duration_str")]
    pub clone_timeout: Duration,
    pub max_repo_size_mb: u64,
    pub max_file_size_mb: u64,
    pub git_binary: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allowed_domains: vec![
                "github.com".to_string(),
                "gitlab.com".to_string(),
                "bitbucket.org".to_string(),
            ],
            clone_timeout: Duration::from_secs(60),
            max_repo_size_mb: 500,
            max_file_size_mb: 10,
            git_binary: "git".to_string(),
        }
    }
}

impl SandboxConfig {
    pub fn max_repo_bytes(&self) -> u64 {
        self.max_repo_size_mb * 1024 * 1024
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

/// Optional node switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Include image-based fact finders
    pub vision: bool,
}

impl Capabilities {
    pub fn has(&self, capability: &str) -> bool {
        match capability {
            "vision" => self.vision,
            _ => false,
        }
    }
}

/// Opinion cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: u64,
    #[serde(with = "duration_str")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub provider: ProviderSettings,
    pub retry: RetryConfig,
    pub context: ContextConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub budgets: BudgetConfig,
    pub sandbox: SandboxConfig,
    pub capabilities: Capabilities,
    pub failure_policy: FailurePolicy,
    pub cache: CacheConfig,
}

impl RuntimeConfig {
    /// Parse from YAML without overrides or validation.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load the process configuration: file (or defaults), environment
    /// overrides, validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_yaml(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TRIBUNAL_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_RESILIENT) {
            self.failure_policy = if parse_bool(ENV_RESILIENT, &value)? {
                FailurePolicy::Resilient
            } else {
                FailurePolicy::FailFast
            };
        }

        if let Some(model) = lookup(ENV_MODEL).filter(|m| !m.trim().is_empty()) {
            self.provider.model = model.trim().to_string();
        }

        if let Some(value) = lookup(ENV_MAX_RETRIES) {
            self.retry.max_retries =
                value.trim().parse().map_err(|_| ConfigError::InvalidOverride {
                    key: ENV_MAX_RETRIES.to_string(),
                    value: value.clone(),
                })?;
        }

        if let Some(value) = lookup(ENV_ALLOWED_DOMAINS) {
            let domains: Vec<String> = value
                .split(',')
                .map(|d| d.trim().to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect();
            if !domains.is_empty() {
                self.sandbox.allowed_domains = domains;
            }
        }

        Ok(())
    }

    /// Reject limits that would make the run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.base_delay.is_zero() {
            return Err(ConfigError::Invalid("retry.base_delay must be positive".into()));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(ConfigError::Invalid(
                "retry.max_delay must not be shorter than retry.base_delay".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return Err(ConfigError::Invalid("retry.jitter_ratio must lie in [0, 1]".into()));
        }
        if self.context.max_items_per_producer == 0
            || self.context.max_content_chars == 0
            || self.context.max_context_chars == 0
        {
            return Err(ConfigError::Invalid("context limits must be positive".into()));
        }
        if self.provider.max_tokens == 0 {
            return Err(ConfigError::Invalid("provider.max_tokens must be positive".into()));
        }
        if self.provider.request_timeout.is_zero() || self.sandbox.clone_timeout.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        if self.sandbox.max_repo_size_mb == 0 || self.sandbox.max_file_size_mb == 0 {
            return Err(ConfigError::Invalid("sandbox size limits must be positive".into()));
        }
        if self.sandbox.allowed_domains.is_empty() {
            return Err(ConfigError::Invalid("sandbox.allowed_domains must not be empty".into()));
        }
        if self.circuit_breaker.failure_threshold == 0 || self.circuit_breaker.success_threshold == 0 {
            return Err(ConfigError::Invalid("circuit breaker thresholds must be positive".into()));
        }
        Ok(())
    }

    /// Completion settings for evaluator calls.
    pub fn completion_config(&self) -> CompletionConfig {
        CompletionConfig {
            model: self.provider.model.clone(),
            max_tokens: self.provider.max_tokens,
            temperature: self.provider.temperature,
            timeout: self.provider.request_timeout,
            ..CompletionConfig::default()
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidOverride {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Durations as humantime strings ("1s", "500ms", "2m") or bare seconds.
pub(crate) mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Secs(u64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Repr::deserialize(deserializer)? {
            Repr::Secs(secs) => Ok(Duration::from_secs(secs)),
            Repr::Text(text) => humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.retry.max_delay, Duration::from_secs(8));
        assert_eq!(config.context.max_context_chars, 2400);
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
    }

    #[test]
    fn test_yaml_with_human_durations() {
        let config = RuntimeConfig::from_yaml(
            r#"
retry:
  base_delay: 250ms
  max_delay: 2s
sandbox:
  clone_timeout: 90
failure_policy: resilient
capabilities:
  vision: true
"#,
        )
        .unwrap();
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.sandbox.clone_timeout, Duration::from_secs(90));
        assert_eq!(config.failure_policy, FailurePolicy::Resilient);
        assert!(config.capabilities.has("vision"));
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RuntimeConfig::default();
        config
            .apply_overrides(lookup(&[
                (ENV_RESILIENT, "true"),
                (ENV_MODEL, "claude-haiku-4-5"),
                (ENV_MAX_RETRIES, "5"),
                (ENV_ALLOWED_DOMAINS, "github.com, Example.org"),
            ]))
            .unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::Resilient);
        assert_eq!(config.provider.model, "claude-haiku-4-5");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.sandbox.allowed_domains, vec!["github.com", "example.org"]);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let mut config = RuntimeConfig::default();
        let result = config.apply_overrides(lookup(&[(ENV_RESILIENT, "maybe")]));
        assert!(matches!(result, Err(ConfigError::InvalidOverride { .. })));
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let mut config = RuntimeConfig::default();
        config.retry.max_delay = Duration::from_millis(10);
        assert!(config.validate().is_err());
    }
}
