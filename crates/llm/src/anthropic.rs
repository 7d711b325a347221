//! Anthropic Messages API backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pipeline::{BackendError, BackendName, Generation, Pricing, Prompt, TextBackend, TokenCount};

use crate::{http, LlmError};

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// A model served by Anthropic.
pub struct AnthropicBackend {
    name: BackendName,
    model: String,
    api_key: String,
    pricing: Pricing,
    endpoint: String,
    timeout: Duration,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u64,
    system: &'a str,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

impl AnthropicBackend {
    /// Creates a backend for `model`.
    pub fn new(
        name: BackendName,
        model: impl Into<String>,
        api_key: String,
        pricing: Pricing,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            name,
            model: model.into(),
            api_key,
            pricing,
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            timeout,
            http: http::client(timeout)?,
        })
    }

    /// Sends requests to `endpoint` instead of the public API.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl TextBackend for AnthropicBackend {
    fn name(&self) -> &BackendName {
        &self.name
    }

    fn pricing(&self) -> Pricing {
        self.pricing
    }

    async fn generate(&self, prompt: &Prompt) -> Result<Generation, BackendError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: prompt.max_tokens,
            system: &prompt.system,
            messages: [Message {
                role: "user",
                content: &prompt.user,
            }],
        };
        debug!(backend = %self.name, model = %self.model, "Calling Anthropic");

        let request = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body);
        let response: MessagesResponse = http::send_json(request, self.timeout).await?;

        let text: String = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect();
        if text.trim().is_empty() {
            return Err(BackendError::transient("response contained no text"));
        }
        let (input, output) = response
            .usage
            .map_or((0, 0), |u| (u.input_tokens, u.output_tokens));
        Ok(Generation {
            text,
            input_tokens: TokenCount::new(input),
            output_tokens: TokenCount::new(output),
        })
    }
}
