use anyhow::{Context, Result};
use chrono::Local;
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::digest::{AggregatedDocument, SubjectSection};
use crate::ingestion::{ArxivClient, FeedQuery, FetchOutcome, SubjectBatch};
use crate::llm::summarizer::Summarizer;
use crate::llm::{provider_from_config, LlmRequest, UsageMetadata};
use crate::slack::{
    compose_message, deliver_segments, send_error_notification, split_message, DeliveryReport,
    MessageSink, SlackClient,
};
use crate::storage::{FileStats, MarkdownStore};
use crate::types::{DeliveryError, PipelineError};
use common::{Config, Credentials};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Idle,
    Fetching,
    Summarizing,
    Formatting,
    Persisting,
    Delivering,
    Done,
    Failed,
}

/// One invocation of the pipeline.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub subjects: Vec<String>,
    pub keywords: Vec<String>,
    pub start: usize,
    pub max_results: usize,
    pub deliver: bool,
    pub persist: bool,
    pub save_report: bool,
}

impl RunRequest {
    pub fn new(subjects: Vec<String>) -> Self {
        Self {
            subjects,
            keywords: Vec::new(),
            start: 0,
            max_results: 10,
            deliver: true,
            persist: true,
            save_report: false,
        }
    }

    /// Banner scope: "arXiv {subject}" or "arXiv Papers (N subjects)".
    pub fn scope(&self) -> String {
        match self.subjects.as_slice() {
            [single] => format!("arXiv {}", single),
            many => format!("arXiv Papers ({} subjects)", many.len()),
        }
    }

    /// Base name for persisted files.
    pub fn file_stem(&self) -> String {
        match self.subjects.as_slice() {
            [single] => single.replace('.', "_"),
            _ => "multi_subject_arxiv".to_string(),
        }
    }
}

/// Final account of a run, written at either terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeReport {
    pub scope: String,
    pub subjects_requested: Vec<String>,
    pub subjects_processed: Vec<String>,
    pub empty_subjects: Vec<String>,
    pub papers_fetched: usize,
    pub placeholder_fragments: usize,
    pub estimated_prompt_tokens: usize,
    pub total_tokens: usize,
    pub success: bool,
    pub error: Option<String>,
    #[serde(rename = "elapsed_seconds", serialize_with = "as_secs_f64")]
    pub elapsed: Duration,
    pub persisted_path: Option<String>,
    pub persistence_error: Option<String>,
    pub delivery: Option<DeliveryReport>,
}

fn as_secs_f64<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl OutcomeReport {
    fn new(request: &RunRequest) -> Self {
        Self {
            scope: request.scope(),
            subjects_requested: request.subjects.clone(),
            subjects_processed: Vec::new(),
            empty_subjects: Vec::new(),
            papers_fetched: 0,
            placeholder_fragments: 0,
            estimated_prompt_tokens: 0,
            total_tokens: 0,
            success: false,
            error: None,
            elapsed: Duration::ZERO,
            persisted_path: None,
            persistence_error: None,
            delivery: None,
        }
    }

    pub fn delivered(&self) -> bool {
        self.delivery.as_ref().map(DeliveryReport::is_complete).unwrap_or(false)
    }
}

/// Report plus the document it describes (absent when the run failed before formatting).
#[derive(Debug)]
pub struct RunOutput {
    pub report: OutcomeReport,
    pub document: Option<AggregatedDocument>,
}

/// Result of probing each external service.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionReport {
    pub slack: bool,
    pub llm: bool,
    pub arxiv: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub file_stats: Option<FileStats>,
    pub latest_digest: Option<PathBuf>,
    pub default_subject: String,
    pub model: String,
    pub max_abstract_chars: usize,
    pub message_length_limit: usize,
    pub max_retries: u32,
}

impl PipelineStats {
    /// Output-directory statistics plus the settings that shape a run. Needs no credentials.
    pub async fn collect(config: &Config) -> Self {
        let store = MarkdownStore::from_config(&config.output);
        let file_stats = match store.file_stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("failed to read file stats: {:#}", e);
                None
            }
        };
        let latest_digest = match store.latest_file("", "md").await {
            Ok(path) => path,
            Err(e) => {
                warn!("failed to look up the latest digest: {:#}", e);
                None
            }
        };

        Self {
            file_stats,
            latest_digest,
            default_subject: config.arxiv.default_subject.clone(),
            model: config.llm.model.clone(),
            max_abstract_chars: config.llm.max_abstract_chars,
            message_length_limit: config.slack.message_length_limit,
            max_retries: config.llm.max_retries,
        }
    }
}

/// Fetch → summarize → format → persist/deliver.
pub struct Pipeline {
    feed: ArxivClient,
    summarizer: Summarizer,
    sink: Option<Arc<dyn MessageSink>>,
    store: Option<MarkdownStore>,
    config: Config,
}

impl Pipeline {
    pub fn new(feed: ArxivClient, summarizer: Summarizer, config: &Config) -> Self {
        Self {
            feed,
            summarizer,
            sink: None,
            store: None,
            config: config.clone(),
        }
    }

    /// Wire every component from configuration. Slack is attached only when both
    /// token and channel are known.
    pub fn from_config(config: &Config, credentials: &Credentials) -> Result<Self> {
        let feed = ArxivClient::new(&config.arxiv)?;

        let api_key = credentials
            .llm_api_key
            .clone()
            .with_context(|| format!("{} is not set", config.llm.api_key_env))?;
        let provider = provider_from_config(&config.llm, api_key)?;
        let summarizer = Summarizer::new(provider, &config.llm);

        let mut pipeline = Self::new(feed, summarizer, config)
            .with_store(MarkdownStore::from_config(&config.output));

        if let (Some(token), Some(channel)) = (&credentials.slack_bot_token, &credentials.slack_channel_id) {
            let slack = SlackClient::new(&config.slack, token.as_str(), channel.as_str())?;
            pipeline = pipeline.with_sink(Arc::new(slack));
        }

        Ok(pipeline)
    }

    pub fn with_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_store(mut self, store: MarkdownStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Run once. Never fails outward: the report says what happened.
    pub async fn run(&self, request: &RunRequest) -> RunOutput {
        let started = Instant::now();
        let mut report = OutcomeReport::new(request);
        let mut stage = RunStage::Idle;

        let document = match self.execute(request, &mut report, &mut stage).await {
            Ok(document) => {
                advance(&mut stage, RunStage::Done);
                report.success = true;
                Some(document)
            }
            Err(e) => {
                advance(&mut stage, RunStage::Failed);
                warn!(scope = %report.scope, "run failed: {}", e);
                report.error = Some(e.to_string());
                if request.deliver && !matches!(e, PipelineError::NoPapers) {
                    self.notify(&format!("Error processing {}: {}", report.scope, e)).await;
                }
                None
            }
        };

        report.elapsed = started.elapsed();
        info!(
            scope = %report.scope,
            success = report.success,
            papers = report.papers_fetched,
            "run finished in {:.2}s",
            report.elapsed.as_secs_f64()
        );

        if request.save_report {
            self.save_report(request, &report).await;
        }

        RunOutput { report, document }
    }

    async fn execute(
        &self,
        request: &RunRequest,
        report: &mut OutcomeReport,
        stage: &mut RunStage,
    ) -> Result<AggregatedDocument, PipelineError> {
        if request.subjects.is_empty() {
            return Err(PipelineError::NoSubjects);
        }

        advance(stage, RunStage::Fetching);
        let batches = self.fetch(request, report).await;
        report.papers_fetched = batches.iter().map(|b| b.papers.len()).sum();
        if report.papers_fetched == 0 {
            return Err(PipelineError::NoPapers);
        }
        report.subjects_processed = batches.iter().map(|b| b.subject.clone()).collect();

        advance(stage, RunStage::Summarizing);
        let mut usage = UsageMetadata::default();
        let mut sections = Vec::with_capacity(batches.len());
        for batch in batches {
            let fragments = self.summarizer.summarize_all(&batch.papers).await;
            for fragment in &fragments {
                usage.add(&fragment.usage);
                report.estimated_prompt_tokens += fragment.estimated_prompt_tokens;
                if fragment.is_placeholder() {
                    report.placeholder_fragments += 1;
                }
            }
            sections.push(SubjectSection {
                subject: batch.subject,
                fragments,
            });
        }
        report.total_tokens = usage.total_tokens;

        advance(stage, RunStage::Formatting);
        let document = AggregatedDocument::new(report.scope.clone(), sections);
        let markdown = document.to_markdown();

        if request.persist {
            advance(stage, RunStage::Persisting);
            self.persist(&markdown, &request.file_stem(), report).await;
        }

        if request.deliver {
            advance(stage, RunStage::Delivering);
            let delivery = self.deliver(&markdown, &report.scope).await;
            if let Some(error) = &delivery.error {
                self.notify(&format!("Error processing {}: {}", report.scope, error)).await;
            }
            report.delivery = Some(delivery);
        }

        Ok(document)
    }

    async fn fetch(&self, request: &RunRequest, report: &mut OutcomeReport) -> Vec<SubjectBatch> {
        if let [subject] = request.subjects.as_slice() {
            let query = FeedQuery::new(subject.as_str(), request.start, request.max_results)
                .with_keywords(&request.keywords);
            let papers = match self.feed.search(&query).await {
                FetchOutcome::Fetched(papers) => papers,
                FetchOutcome::Degraded { attempts, error } => {
                    warn!(subject = %subject, attempts, "fetch degraded to empty: {}", error);
                    Vec::new()
                }
            };
            if papers.is_empty() {
                report.empty_subjects.push(subject.clone());
                return Vec::new();
            }
            return vec![SubjectBatch {
                subject: subject.clone(),
                papers,
            }];
        }

        let result = self
            .feed
            .fetch_many(&request.subjects, request.start, request.max_results, &request.keywords)
            .await;
        if !result.empty_subjects.is_empty() {
            info!(subjects = ?result.empty_subjects, "subjects without papers left out of the digest");
        }
        report.empty_subjects = result.empty_subjects;
        result.batches
    }

    async fn persist(&self, markdown: &str, name: &str, report: &mut OutcomeReport) {
        let Some(store) = &self.store else {
            report.persistence_error = Some("persistence is not configured".to_string());
            return;
        };
        match store.save_markdown(markdown, name).await {
            Ok(path) => report.persisted_path = Some(path.display().to_string()),
            Err(e) => {
                warn!("failed to persist digest: {:#}", e);
                report.persistence_error = Some(format!("{:#}", e));
            }
        }
    }

    async fn deliver(&self, markdown: &str, scope: &str) -> DeliveryReport {
        let Some(sink) = &self.sink else {
            return DeliveryReport {
                error: Some(DeliveryError::NotConfigured.to_string()),
                ..Default::default()
            };
        };
        let message = compose_message(markdown, scope, Local::now().naive_local());
        let segments = split_message(&message, self.config.slack.message_length_limit);
        info!(segments = segments.len(), "delivering digest");
        deliver_segments(sink.as_ref(), &segments).await
    }

    async fn notify(&self, message: &str) {
        if let Some(sink) = &self.sink {
            send_error_notification(sink.as_ref(), message).await;
        }
    }

    async fn save_report(&self, request: &RunRequest, report: &OutcomeReport) {
        if let Some(store) = &self.store {
            let name = format!("{}_report", request.file_stem());
            if let Err(e) = store.save_json(report, &name).await {
                warn!("failed to save run report: {:#}", e);
            }
        }
    }

    /// Probe Slack (`auth.test`), the text-generation provider and arXiv.
    pub async fn test_connections(&self) -> ConnectionReport {
        let mut result = ConnectionReport::default();

        match &self.sink {
            Some(sink) => match sink.check_auth().await {
                Ok(user) => {
                    info!("Connected to Slack as: {}", user);
                    result.slack = true;
                }
                Err(e) => warn!("Slack connection test failed: {}", e),
            },
            None => warn!("Slack connection test skipped: {}", DeliveryError::NotConfigured),
        }

        match self.summarizer.provider().generate(LlmRequest::new("Hello")).await {
            Ok(response) => result.llm = !response.content.trim().is_empty(),
            Err(e) => warn!("LLM connection test failed: {:#}", e),
        }

        let outcome = self.feed.fetch(&self.config.arxiv.default_subject, 0, 1).await;
        result.arxiv = !outcome.is_degraded() && !outcome.papers().is_empty();

        result
    }
}

fn advance(stage: &mut RunStage, next: RunStage) {
    info!(from = ?*stage, to = ?next, "pipeline stage");
    *stage = next;
}
