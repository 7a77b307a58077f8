use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use super::format::error_notice;
use crate::types::DeliveryError;

/// Destination for delivered text.
#[async_trait::async_trait]
pub trait MessageSink: Send + Sync {
    /// Post one message. Link and media previews stay collapsed.
    async fn post_message(&self, text: &str) -> Result<(), DeliveryError>;

    /// Verify credentials; returns the identity the sink posts as.
    async fn check_auth(&self) -> Result<String, DeliveryError>;
}

/// Slack Web API client bound to one channel.
pub struct SlackClient {
    client: Client,
    api_url: String,
    token: String,
    channel: String,
}

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
    unfurl_links: bool,
    unfurl_media: bool,
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user: Option<String>,
}

impl SlackClient {
    pub fn new(
        config: &common::SlackConfig,
        token: impl Into<String>,
        channel: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("failed to build Slack HTTP client")?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: token.into(),
            channel: channel.into(),
        })
    }

    async fn call<T: Serialize + ?Sized>(
        &self,
        method: &str,
        body: &T,
    ) -> Result<SlackResponse, DeliveryError> {
        let response = self
            .client
            .post(format!("{}/{}", self.api_url, method))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Status { status, body });
        }

        let parsed: SlackResponse = response.json().await?;
        if !parsed.ok {
            return Err(DeliveryError::Api(
                parsed.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }
        Ok(parsed)
    }
}

#[async_trait::async_trait]
impl MessageSink for SlackClient {
    async fn post_message(&self, text: &str) -> Result<(), DeliveryError> {
        let body = PostMessage {
            channel: &self.channel,
            text,
            unfurl_links: false,
            unfurl_media: false,
        };
        self.call("chat.postMessage", &body).await.map(|_| ())
    }

    async fn check_auth(&self) -> Result<String, DeliveryError> {
        let response = self.call("auth.test", &serde_json::json!({})).await?;
        Ok(response.user.unwrap_or_default())
    }
}

/// What happened to the segments of one digest.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryReport {
    pub segments_total: usize,
    pub delivered_segments: usize,
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.delivered_segments == self.segments_total
    }
}

/// Post segments in order, stopping at the first one that fails.
pub async fn deliver_segments(sink: &dyn MessageSink, segments: &[String]) -> DeliveryReport {
    let mut report = DeliveryReport {
        segments_total: segments.len(),
        ..Default::default()
    };

    for (i, segment) in segments.iter().enumerate() {
        match sink.post_message(segment).await {
            Ok(()) => {
                report.delivered_segments += 1;
                info!("Sent message chunk {}/{} to Slack", i + 1, segments.len());
            }
            Err(e) => {
                warn!(segment = i + 1, total = segments.len(), "stopping delivery: {}", e);
                report.error = Some(e.to_string());
                break;
            }
        }
    }

    report
}

/// Best-effort failure notice. Returns whether it was posted.
pub async fn send_error_notification(sink: &dyn MessageSink, message: &str) -> bool {
    match sink.post_message(&error_notice(message)).await {
        Ok(()) => true,
        Err(e) => {
            warn!("failed to send error notification: {}", e);
            false
        }
    }
}
