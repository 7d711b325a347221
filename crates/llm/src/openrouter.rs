//! OpenRouter backend (OpenAI-compatible chat completions).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pipeline::{BackendError, BackendName, Generation, Pricing, Prompt, TextBackend, TokenCount};

use crate::{http, LlmError};

const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

/// A model reached through OpenRouter.
pub struct OpenRouterBackend {
    name: BackendName,
    model: String,
    api_key: String,
    pricing: Pricing,
    endpoint: String,
    timeout: Duration,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u64,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl OpenRouterBackend {
    /// Creates a backend for `model` (e.g. `anthropic/claude-3-haiku`).
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
impl TextBackend for OpenRouterBackend {
    fn name(&self) -> &BackendName {
        &self.name
    }

    fn pricing(&self) -> Pricing {
        self.pricing
    }

    async fn generate(&self, prompt: &Prompt) -> Result<Generation, BackendError> {
        let body = ChatRequest {
            model: &self.model,
            max_tokens: prompt.max_tokens,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
        };
        debug!(backend = %self.name, model = %self.model, "Calling OpenRouter");

        let request = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body);
        let response: ChatResponse = http::send_json(request, self.timeout).await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| BackendError::transient("response contained no text"))?;
        let (input, output) = response
            .usage
            .map_or((0, 0), |u| (u.prompt_tokens, u.completion_tokens));
        Ok(Generation {
            text,
            input_tokens: TokenCount::new(input),
            output_tokens: TokenCount::new(output),
        })
    }
}
