/*!
common/src/lib.rs

Shared configuration types for paperscope.

This file provides:
- Config data structures (deserialized from TOML, every section optional)
- An async loader for a TOML config file, with default/override merging
- Resolution of API secrets from the environment variables named in the config
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// arXiv API access and default result window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArxivConfig {
    /// Query endpoint, e.g. "http://export.arxiv.org/api/query"
    pub api_url: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    /// Category used when the CLI is given no subject (e.g. "astro-ph.GA")
    pub default_subject: String,
    pub default_start: usize,
    pub default_max_results: usize,
    /// Total attempts per query, first try included
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            api_url: "http://export.arxiv.org/api/query".to_string(),
            user_agent: "paperscope/0.1.0".to_string(),
            timeout_seconds: 30,
            default_subject: "astro-ph.GA".to_string(),
            default_start: 0,
            default_max_results: 10,
            max_retries: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

/// Text-generation provider config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub adapter: String, // "gemini", "remote"
    /// Endpoint override. Gemini: API root; remote: full chat/completions URL.
    pub api_url: Option<String>,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub temperature: f32,
    /// Hard cap on abstract characters embedded in each prompt
    pub max_abstract_chars: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            adapter: "gemini".to_string(),
            api_url: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
            model: "gemini-1.5-flash".to_string(),
            timeout_seconds: 60,
            max_tokens: 500,
            temperature: 0.7,
            max_abstract_chars: 200,
            max_retries: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

/// Slack delivery config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub api_url: String,
    pub bot_token_env: String,
    /// Channel id; falls back to the `channel_id_env` variable when absent
    pub channel_id: Option<String>,
    pub channel_id_env: String,
    /// Maximum characters per posted message
    pub message_length_limit: usize,
    pub timeout_seconds: u64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_url: "https://slack.com/api".to_string(),
            bot_token_env: "SLACK_BOT_TOKEN".to_string(),
            channel_id: None,
            channel_id_env: "SLACK_CHANNEL_ID".to_string(),
            message_length_limit: 3000,
            timeout_seconds: 30,
        }
    }
}

/// Where digests are written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: String,
    /// Append a `_YYYY-mm-dd_HH-MM-SS` suffix to written file names
    pub timestamped: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "output".to_string(),
            timestamped: true,
        }
    }
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub arxiv: ArxivConfig,
    pub llm: LlmConfig,
    pub slack: SlackConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence). Missing keys
    /// fall back to the built-in defaults.
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Secrets resolved once at startup from the environment variables the config names.
#[derive(Clone, Default)]
pub struct Credentials {
    pub llm_api_key: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_channel_id: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "***"))
            .field("slack_bot_token", &self.slack_bot_token.as_ref().map(|_| "***"))
            .field("slack_channel_id", &self.slack_channel_id)
            .finish()
    }
}

impl Credentials {
    pub fn from_env(config: &Config) -> Self {
        Self::from_lookup(config, |name| std::env::var(name).ok())
    }

    /// Resolve with an arbitrary lookup; empty values count as unset.
    pub fn from_lookup<F>(config: &Config, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            llm_api_key: get(&config.llm.api_key_env),
            slack_bot_token: get(&config.slack.bot_token_env),
            slack_channel_id: config
                .slack
                .channel_id
                .clone()
                .filter(|c| !c.trim().is_empty())
                .or_else(|| get(&config.slack.channel_id_env)),
        }
    }

    /// Names of the settings that are required but missing.
    pub fn missing(&self, config: &Config, needs_slack: bool) -> Vec<String> {
        let mut missing = Vec::new();
        if self.llm_api_key.is_none() {
            missing.push(config.llm.api_key_env.clone());
        }
        if needs_slack {
            if self.slack_bot_token.is_none() {
                missing.push(config.slack.bot_token_env.clone());
            }
            if self.slack_channel_id.is_none() {
                missing.push(config.slack.channel_id_env.clone());
            }
        }
        missing
    }
}
