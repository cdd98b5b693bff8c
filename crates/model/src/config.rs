use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Model-call configuration attached to an agent.
///
/// The runtime treats everything except `provider` as opaque: it only uses
/// `provider` to pick a registered model provider, and forwards the whole
/// configuration with every request.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Name of the registered provider that serves this model.
    pub provider: String,
    /// Model name understood by the provider.
    pub model: String,
    /// Provider credentials. Never serialized.
    #[serde(default, skip_serializing)]
    pub credentials: Option<String>,
    /// Extra provider-specific parameters.
    #[serde(default)]
    pub parameters: Value,
}

impl ModelConfig {
    /// Creates a configuration for `model` served by `provider`.
    #[inline]
    pub fn new<P: Into<String>, M: Into<String>>(provider: P, model: M) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            credentials: None,
            parameters: Value::Null,
        }
    }

    /// Attaches credentials.
    #[inline]
    pub fn with_credentials<S: Into<String>>(mut self, credentials: S) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    /// Attaches provider-specific parameters.
    #[inline]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

impl Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field(
                "credentials",
                &self.credentials.as_ref().map(|_| "<deducted>"),
            )
            .field("parameters", &self.parameters)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_are_hidden() {
        let config = ModelConfig::new("openai", "gpt").with_credentials("sk-1");
        assert!(!format!("{config:?}").contains("sk-1"));

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-1"));
        let back: ModelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.credentials, None);
        assert_eq!(back.model, "gpt");
    }
}
