use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{GenerationDefaults, LlmProvider, LlmRequest, LlmResponse, UsageMetadata};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Any OpenAI-compatible `chat/completions` endpoint, called with a bearer key
pub struct RemoteLlmProvider {
    endpoint: String,
    api_key: String,
    model: String,
    defaults: GenerationDefaults,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            defaults: GenerationDefaults::default(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_defaults(mut self, defaults: GenerationDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    async fn complete(&self, body: &ChatRequest<'_>) -> Result<ChatResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .context("LLM HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            // prefer the provider's own message when the body is a JSON error object
            let detail = serde_json::from_str::<ErrorEnvelope>(&raw)
                .map(|e| e.error.message)
                .unwrap_or(raw);
            anyhow::bail!("LLM API error {}: {}", status, detail);
        }

        response
            .json::<ChatResponse>()
            .await
            .context("Failed to parse LLM response")
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let (timeout, max_tokens, temperature) = self.defaults.resolve(&request);

        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens,
            temperature,
        };

        let reply = tokio::time::timeout(timeout, self.complete(&body))
            .await
            .context("LLM request timed out")??;

        let choice = reply
            .choices
            .into_iter()
            .next()
            .context("LLM response has no choices")?;

        let content = choice.message.content.unwrap_or_default();
        if content.trim().is_empty() {
            anyhow::bail!(
                "LLM returned an empty completion (finish reason: {})",
                choice.finish_reason.as_deref().unwrap_or("unknown")
            );
        }

        Ok(LlmResponse {
            content,
            usage: reply.usage.map(UsageMetadata::from).unwrap_or_default(),
            model: reply.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ReplyMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

// some compatible servers omit individual counters
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

impl From<ChatUsage> for UsageMetadata {
    fn from(u: ChatUsage) -> Self {
        UsageMetadata {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}
