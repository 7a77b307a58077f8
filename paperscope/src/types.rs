use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::UsageMetadata;

/// Summary body used when every summarization attempt for a paper failed.
pub const PLACEHOLDER_SUMMARY: &str = "Error processing paper.";

/// One paper as parsed from the arXiv feed.
///
/// `title` and `abstract_text` are whitespace-normalized; `link` is the entry id,
/// an absolute URL such as `http://arxiv.org/abs/2401.01234v1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub title: String,
    pub abstract_text: String,
    pub link: String,
    pub subject: String,
}

/// Whether a fragment carries a generated summary or the placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FragmentStatus {
    Summarized,
    Placeholder { reason: String },
}

/// Markdown summary of one paper: a `## [title](link)` heading and bullet text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryFragment {
    pub paper_ref: String,
    pub title: String,
    pub body: String,
    pub status: FragmentStatus,
    pub usage: UsageMetadata,
    /// chars / 4 estimate of the prompt sent for this paper
    pub estimated_prompt_tokens: usize,
}

impl SummaryFragment {
    pub fn is_placeholder(&self) -> bool {
        matches!(self.status, FragmentStatus::Placeholder { .. })
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("arXiv returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed feed: {0}")]
    Parse(String),
}

impl FetchError {
    /// Network failures and non-2xx responses are worth another attempt; a feed
    /// that does not parse will not parse the next time either.
    pub fn is_transient(&self) -> bool {
        !matches!(self, FetchError::Parse(_))
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("slack request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("slack returned HTTP {status}: {body}")]
    Status { status: reqwest::StatusCode, body: String },

    #[error("slack API error: {0}")]
    Api(String),

    #[error("delivery is not configured")]
    NotConfigured,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no papers found")]
    NoPapers,

    #[error("no subjects requested")]
    NoSubjects,
}
