//! podcast-cmo text-generation backends.
//!
//! Implements the [`pipeline::TextBackend`] port for Anthropic's Messages API
//! and OpenRouter's OpenAI-compatible chat completions. New providers are
//! added as new modules in this crate without any changes to `pipeline` or
//! `stages`.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** All HTTP transport, request formatting, response
//! parsing and status classification live here. Each call makes exactly one
//! request; retries, timeouts and failover belong to `stages::ModelRouter`,
//! which sees only [`pipeline::TextBackend`].
//!
//! ## Error classification
//!
//! | Condition | [`pipeline::BackendError`] |
//! |-----------|----------------------------|
//! | 408, 429, 5xx | `Transient`, with `Retry-After` when sent |
//! | other 4xx | `Permanent` |
//! | client-side timeout | `Timeout` |
//! | connection or body failure | `Transient` |
//! | 2xx without usable text | `Transient` |

mod anthropic;
mod error;
mod http;
mod openrouter;

pub use anthropic::AnthropicBackend;
pub use error::LlmError;
pub use openrouter::OpenRouterBackend;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pipeline::{BackendName, Pricing, TextBackend};

/// Which API a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Anthropic Messages API.
    Anthropic,
    /// OpenRouter chat completions.
    OpenRouter,
}

/// Declarative description of one backend, as read from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSpec {
    /// Name used in routes and usage records.
    pub name: String,
    /// API flavour.
    pub provider: Provider,
    /// Provider model identifier.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// USD per million prompt tokens.
    #[serde(default)]
    pub input_per_million: f64,
    /// USD per million completion tokens.
    #[serde(default)]
    pub output_per_million: f64,
    /// Overrides the provider's default endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl BackendSpec {
    /// Builds the backend this spec describes, authenticating with `api_key`.
    ///
    /// `timeout` bounds the whole HTTP exchange.
    pub fn build(&self, api_key: String, timeout: Duration) -> Result<Arc<dyn TextBackend>, LlmError> {
        let name = BackendName::new(self.name.clone()).ok_or(LlmError::EmptyName)?;
        let pricing = Pricing::new(self.input_per_million, self.output_per_million).ok_or_else(|| {
            LlmError::InvalidPricing {
                backend: self.name.clone(),
            }
        })?;
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey {
                backend: self.name.clone(),
                variable: self.api_key_env.clone(),
            });
        }

        let backend: Arc<dyn TextBackend> = match self.provider {
            Provider::Anthropic => {
                let mut backend = AnthropicBackend::new(name, &self.model, api_key, pricing, timeout)?;
                if let Some(endpoint) = &self.endpoint {
                    backend = backend.with_endpoint(endpoint);
                }
                Arc::new(backend)
            }
            Provider::OpenRouter => {
                let mut backend = OpenRouterBackend::new(name, &self.model, api_key, pricing, timeout)?;
                if let Some(endpoint) = &self.endpoint {
                    backend = backend.with_endpoint(endpoint);
                }
                Arc::new(backend)
            }
        };
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(provider: Provider) -> BackendSpec {
        BackendSpec {
            name: "primary".into(),
            provider,
            model: "some-model".into(),
            api_key_env: "PRIMARY_KEY".into(),
            input_per_million: 3.0,
            output_per_million: 15.0,
            endpoint: None,
        }
    }

    #[test]
    fn build_names_the_backend_and_keeps_its_pricing() {
        let backend = spec(Provider::OpenRouter)
            .build("sk-test".into(), Duration::from_secs(5))
            .unwrap();
        assert_eq!(backend.name().as_str(), "primary");
        assert_eq!(backend.pricing(), Pricing::new(3.0, 15.0).unwrap());
    }

    #[test]
    fn build_refuses_a_blank_key() {
        let err = spec(Provider::Anthropic)
            .build("  ".into(), Duration::from_secs(5))
            .err()
            .unwrap();
        assert!(matches!(err, LlmError::MissingApiKey { ref variable, .. } if variable == "PRIMARY_KEY"));
    }

    #[test]
    fn build_refuses_negative_pricing() {
        let mut spec = spec(Provider::Anthropic);
        spec.output_per_million = -1.0;
        let err = spec.build("sk".into(), Duration::from_secs(5)).err().unwrap();
        assert!(matches!(err, LlmError::InvalidPricing { .. }));
    }

    #[test]
    fn provider_labels_are_snake_case() {
        let parsed: BackendSpec = serde_json::from_str(
            r#"{"name": "b", "provider": "open_router", "model": "m", "api_key_env": "K"}"#,
        )
        .unwrap();
        assert_eq!(parsed.provider, Provider::OpenRouter);
        assert_eq!(parsed.input_per_million, 0.0);
    }
}
