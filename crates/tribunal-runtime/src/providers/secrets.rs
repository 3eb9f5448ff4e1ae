//! Provider credentials.
//!
//! A key is wrapped in a [`SecretString`] the moment it is read and only
//! exposed when a request header is built. Template values such as `""` or
//! `NA` count as absent, so a copied `.env.example` never looks configured.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// `provider.options` in the runtime configuration
    Config,
    Environment,
    /// Handed to a constructor directly
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialSource::Config => "config",
            CredentialSource::Environment => "environment",
            CredentialSource::Programmatic => "programmatic",
        })
    }
}

pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    label: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, label: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            label,
        }
    }

    /// `options[key]` if set, otherwise the environment variable.
    pub fn from_config_or_env(
        options: &JsonValue,
        key: &str,
        env_var: &str,
        label: &'static str,
    ) -> Result<Self, ProviderError> {
        Self::resolve(options, key, env_var, label, env_lookup)
    }

    /// Resolution with an injectable environment lookup.
    pub fn resolve<F>(
        options: &JsonValue,
        key: &str,
        env_var: &str,
        label: &'static str,
        lookup: F,
    ) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = configured(options, key) {
            return Ok(Self::new(value, CredentialSource::Config, label));
        }
        match lookup(env_var).filter(|v| !is_placeholder(v)) {
            Some(value) => Ok(Self::new(value, CredentialSource::Environment, label)),
            None => Err(ProviderError::NotConfigured(format!(
                "{} missing: set provider.options.{} or {}",
                label, key, env_var
            ))),
        }
    }

    pub fn is_available(options: &JsonValue, key: &str, env_var: &str) -> bool {
        configured(options, key).is_some() || env_lookup(env_var).filter(|v| !is_placeholder(v)).is_some()
    }

    /// The raw key. Call only while building a request.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("label", &self.label)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, redacted)", self.label, self.source)
    }
}

/// Values that mean "not configured".
pub fn is_placeholder(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "na" | "n/a" | "none" | "null" | "changeme"
    )
}

fn configured<'a>(options: &'a JsonValue, key: &str) -> Option<&'a str> {
    options.get(key)?.as_str().filter(|v| !is_placeholder(v))
}

fn env_lookup(env_var: &str) -> Option<String> {
    std::env::var(env_var).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(value: Option<&'static str>) -> impl Fn(&str) -> Option<String> {
        move |_| value.map(str::to_string)
    }

    #[test]
    fn test_never_formats_the_secret() {
        let secret = "sk-ant-very-secret";
        let credential = ApiCredential::new(secret, CredentialSource::Config, "Anthropic API key");

        for rendered in [format!("{:?}", credential), credential.to_string()] {
            assert!(!rendered.contains(secret));
            assert!(rendered.contains("Anthropic API key"));
        }
        assert_eq!(credential.expose(), secret);
    }

    #[test]
    fn test_config_wins_over_environment() {
        let credential =
            ApiCredential::resolve(&json!({ "api_key": "from-config" }), "api_key", "KEY", "key", env(Some("from-env")))
                .unwrap();
        assert_eq!(credential.expose(), "from-config");
        assert_eq!(credential.source(), CredentialSource::Config);
    }

    #[test]
    fn test_placeholder_falls_through_to_environment() {
        let credential =
            ApiCredential::resolve(&json!({ "api_key": " NA " }), "api_key", "KEY", "key", env(Some("from-env")))
                .unwrap();
        assert_eq!(credential.expose(), "from-env");
        assert_eq!(credential.source(), CredentialSource::Environment);
    }

    #[test]
    fn test_missing_everywhere_names_both_sources() {
        let err = ApiCredential::resolve(&json!({}), "api_key", "ANTHROPIC_API_KEY", "Anthropic API key", env(Some("")))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("provider.options.api_key"));
        assert!(message.contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_is_available_ignores_placeholders() {
        assert!(ApiCredential::is_available(&json!({ "api_key": "sk-1" }), "api_key", "TRIBUNAL_TEST_UNSET_7781"));
        assert!(!ApiCredential::is_available(&json!({ "api_key": "changeme" }), "api_key", "TRIBUNAL_TEST_UNSET_7781"));
    }
}
