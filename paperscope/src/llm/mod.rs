use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Core trait for text-generation providers
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate completion for a given prompt
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Model identifier, for logs and reports
    fn model(&self) -> &str;
}

/// Request structure for LLM generation
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: None,
            temperature: None,
            timeout_seconds: None,
        }
    }
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Token usage metadata as reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl UsageMetadata {
    pub fn add(&mut self, other: &UsageMetadata) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Fallbacks for the generation settings an [`LlmRequest`] leaves unset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationDefaults {
    pub timeout: Duration,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

impl GenerationDefaults {
    pub fn from_config(config: &common::LlmConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_seconds),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Effective (timeout, max_tokens, temperature) for one request.
    pub fn resolve(&self, request: &LlmRequest) -> (Duration, usize, f32) {
        (
            request.timeout_seconds.map(Duration::from_secs).unwrap_or(self.timeout),
            request.max_tokens.unwrap_or(self.max_tokens),
            request.temperature.unwrap_or(self.temperature),
        )
    }
}

pub mod gemini;
pub mod remote;
pub mod summarizer;

/// Build the provider selected by `llm.adapter`.
pub fn provider_from_config(
    config: &common::LlmConfig,
    api_key: impl Into<String>,
) -> Result<Arc<dyn LlmProvider>> {
    let api_key = api_key.into();
    let defaults = GenerationDefaults::from_config(config);
    match config.adapter.as_str() {
        "gemini" => {
            let base_url = config
                .api_url
                .clone()
                .unwrap_or_else(|| gemini::DEFAULT_BASE_URL.to_string());
            let provider = gemini::GeminiProvider::new(base_url, api_key, config.model.clone())
                .with_defaults(defaults);
            Ok(Arc::new(provider))
        }
        "remote" => {
            let endpoint = config
                .api_url
                .clone()
                .unwrap_or_else(|| remote::DEFAULT_ENDPOINT.to_string());
            let provider = remote::RemoteLlmProvider::new(endpoint, api_key, config.model.clone())
                .with_defaults(defaults);
            Ok(Arc::new(provider))
        }
        other => anyhow::bail!("Unknown LLM adapter type: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_picks_adapter_by_name() {
        let mut config = common::LlmConfig::default();
        let provider = provider_from_config(&config, "key").expect("gemini provider");
        assert_eq!(provider.model(), "gemini-1.5-flash");

        config.adapter = "remote".to_string();
        config.model = "gpt-4o-mini".to_string();
        let provider = provider_from_config(&config, "key").expect("remote provider");
        assert_eq!(provider.model(), "gpt-4o-mini");

        config.adapter = "local".to_string();
        assert!(provider_from_config(&config, "key").is_err());
    }

    #[test]
    fn request_fields_override_defaults() {
        let defaults = GenerationDefaults::from_config(&common::LlmConfig::default());
        let mut request = LlmRequest::new("p");
        assert_eq!(defaults.resolve(&request), (Duration::from_secs(60), 500, 0.7));

        request.max_tokens = Some(64);
        request.timeout_seconds = Some(5);
        assert_eq!(defaults.resolve(&request), (Duration::from_secs(5), 64, 0.7));
    }

    #[test]
    fn usage_adds_up() {
        let mut total = UsageMetadata::default();
        total.add(&UsageMetadata { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 });
        total.add(&UsageMetadata { prompt_tokens: 1, completion_tokens: 2, total_tokens: 3 });
        assert_eq!(total.total_tokens, 18);
        assert_eq!(total.prompt_tokens, 11);
    }
}
