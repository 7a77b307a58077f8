// Per-paper summarization
use std::sync::Arc;
use tracing::{info, warn};

use super::{LlmProvider, LlmRequest, UsageMetadata};
use crate::retry::RetryPolicy;
use crate::types::{FragmentStatus, PaperRecord, SummaryFragment, PLACEHOLDER_SUMMARY};

/// Rough token count used for reporting only: one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// The first `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// `## [title](link)`, the heading line every fragment starts with.
pub fn fragment_heading(paper: &PaperRecord) -> String {
    format!("## [{}]({})", paper.title, paper.link)
}

/// Summarizes papers one at a time through an [`LlmProvider`].
pub struct Summarizer {
    provider: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    max_abstract_chars: usize,
    max_tokens: usize,
    temperature: f32,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &common::LlmConfig) -> Self {
        Self {
            provider,
            retry: RetryPolicy::from_millis(config.max_retries, config.retry_base_delay_ms),
            max_abstract_chars: config.max_abstract_chars,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Prompt for one paper. The abstract is cut to `max_abstract_chars` characters.
    pub fn build_prompt(&self, paper: &PaperRecord) -> String {
        let abstract_text = truncate_chars(&paper.abstract_text, self.max_abstract_chars);
        format!(
            "Summarize this arXiv paper in 2-3 bullet points:\n\
             Title: {}\n\
             Abstract: {}\n\
             Link: {}\n\
             \n\
             Focus on key findings and contributions. Be concise.",
            paper.title, abstract_text, paper.link
        )
    }

    /// Summarize one paper. Never fails: once retries are exhausted the fragment
    /// body carries the placeholder text and the status records why.
    pub async fn summarize(&self, paper: &PaperRecord) -> SummaryFragment {
        let prompt = self.build_prompt(paper);
        let estimated_prompt_tokens = estimate_tokens(&prompt);
        let heading = fragment_heading(paper);

        let result = self
            .retry
            .run("summarization", || {
                let request = LlmRequest {
                    prompt: prompt.clone(),
                    max_tokens: Some(self.max_tokens),
                    temperature: Some(self.temperature),
                    timeout_seconds: None,
                };
                async move {
                    let response = self.provider.generate(request).await?;
                    if response.content.trim().is_empty() {
                        anyhow::bail!("empty summary from {}", response.model);
                    }
                    Ok::<_, anyhow::Error>(response)
                }
            })
            .await;

        match result {
            Ok(response) => SummaryFragment {
                paper_ref: paper.link.clone(),
                title: paper.title.clone(),
                body: format!("{}\n{}", heading, response.content.trim()),
                status: FragmentStatus::Summarized,
                usage: response.usage,
                estimated_prompt_tokens,
            },
            Err(e) => {
                warn!(link = %paper.link, attempts = e.attempts, "summarization failed, using placeholder: {:#}", e.last);
                SummaryFragment {
                    paper_ref: paper.link.clone(),
                    title: paper.title.clone(),
                    body: format!("{}\n{}", heading, PLACEHOLDER_SUMMARY),
                    status: FragmentStatus::Placeholder {
                        reason: format!("{:#}", e.last),
                    },
                    usage: UsageMetadata::default(),
                    estimated_prompt_tokens,
                }
            }
        }
    }

    /// One fragment per paper, same order, one request in flight at a time.
    pub async fn summarize_all(&self, papers: &[PaperRecord]) -> Vec<SummaryFragment> {
        let mut fragments = Vec::with_capacity(papers.len());
        for (i, paper) in papers.iter().enumerate() {
            info!(
                "Processing paper {}/{}: {}",
                i + 1,
                papers.len(),
                truncate_chars(&paper.title, 50)
            );
            fragments.push(self.summarize(paper).await);
        }
        fragments
    }
}
