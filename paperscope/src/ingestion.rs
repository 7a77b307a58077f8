use anyhow::{Context, Result};
use common::ArxivConfig;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::retry::RetryPolicy;
use crate::types::{FetchError, PaperRecord};

/// One window of the arXiv search API, newest submissions first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub subject: String,
    /// Extra terms, each ANDed as `all:{term}`
    pub keywords: Vec<String>,
    pub start: usize,
    pub max_results: usize,
}

impl FeedQuery {
    pub fn new(subject: impl Into<String>, start: usize, max_results: usize) -> Self {
        Self {
            subject: subject.into(),
            keywords: Vec::new(),
            start,
            max_results,
        }
    }

    pub fn with_keywords(mut self, keywords: &[String]) -> Self {
        self.keywords = keywords
            .iter()
            .flat_map(|k| k.split_whitespace())
            .map(str::to_string)
            .collect();
        self
    }

    /// Value of the `search_query` parameter, e.g. `cat:astro-ph.GA AND all:dwarf`.
    pub fn search_query(&self) -> String {
        std::iter::once(format!("cat:{}", self.subject))
            .chain(self.keywords.iter().map(|k| format!("all:{}", k)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

/// Result of a fetch after retries. `Degraded` means the feed could not be read
/// and no papers are available; callers decide whether that is fatal.
#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(Vec<PaperRecord>),
    Degraded { attempts: u32, error: FetchError },
}

impl FetchOutcome {
    pub fn papers(&self) -> &[PaperRecord] {
        match self {
            FetchOutcome::Fetched(papers) => papers,
            FetchOutcome::Degraded { .. } => &[],
        }
    }

    pub fn into_papers(self) -> Vec<PaperRecord> {
        match self {
            FetchOutcome::Fetched(papers) => papers,
            FetchOutcome::Degraded { .. } => Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, FetchOutcome::Degraded { .. })
    }
}

/// Papers for several subjects, in request order.
///
/// Subjects that produced no papers are not part of `batches`; they are listed in
/// `empty_subjects` instead.
#[derive(Debug, Default)]
pub struct SubjectPapers {
    pub batches: Vec<SubjectBatch>,
    pub empty_subjects: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SubjectBatch {
    pub subject: String,
    pub papers: Vec<PaperRecord>,
}

impl SubjectPapers {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn total_papers(&self) -> usize {
        self.batches.iter().map(|b| b.papers.len()).sum()
    }

    pub fn get(&self, subject: &str) -> Option<&[PaperRecord]> {
        self.batches
            .iter()
            .find(|b| b.subject == subject)
            .map(|b| b.papers.as_slice())
    }
}

/// Client for the arXiv Atom query API.
pub struct ArxivClient {
    client: Client,
    api_url: String,
    retry: RetryPolicy,
}

impl ArxivClient {
    pub fn new(config: &ArxivConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.as_str())
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            retry: RetryPolicy::from_millis(config.max_retries, config.retry_base_delay_ms),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Latest papers in `subject`, window `[start, start + max_results)`.
    pub async fn fetch(&self, subject: &str, start: usize, max_results: usize) -> FetchOutcome {
        self.search(&FeedQuery::new(subject, start, max_results)).await
    }

    pub async fn search(&self, query: &FeedQuery) -> FetchOutcome {
        let label = format!("arXiv fetch for {}", query.subject);
        let result = self
            .retry
            .run_if(&label, || self.request(query), FetchError::is_transient)
            .await;

        match result {
            Ok(papers) => {
                info!(subject = %query.subject, count = papers.len(), "fetched papers from arXiv");
                FetchOutcome::Fetched(papers)
            }
            Err(e) => {
                warn!(subject = %query.subject, attempts = e.attempts, "giving up on arXiv fetch: {}", e.last);
                FetchOutcome::Degraded {
                    attempts: e.attempts,
                    error: e.last,
                }
            }
        }
    }

    /// Query every subject on its own. Subjects without papers (including ones whose
    /// fetch degraded) are left out of the batches and reported in `empty_subjects`.
    pub async fn fetch_many(
        &self,
        subjects: &[String],
        start: usize,
        max_results: usize,
        keywords: &[String],
    ) -> SubjectPapers {
        let mut result = SubjectPapers::default();

        for subject in subjects {
            let query = FeedQuery::new(subject.as_str(), start, max_results).with_keywords(keywords);
            let papers = self.search(&query).await.into_papers();
            if papers.is_empty() {
                info!(subject = %subject, "no papers for subject, omitting it");
                result.empty_subjects.push(subject.clone());
            } else {
                result.batches.push(SubjectBatch {
                    subject: subject.clone(),
                    papers,
                });
            }
        }

        result
    }

    async fn request(&self, query: &FeedQuery) -> Result<Vec<PaperRecord>, FetchError> {
        let params = [
            ("search_query", query.search_query()),
            ("sortBy", "submittedDate".to_string()),
            ("sortOrder", "descending".to_string()),
            ("start", query.start.to_string()),
            ("max_results", query.max_results.to_string()),
        ];

        let response = self.client.get(&self.api_url).query(&params).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.text().await?;
        parse_feed(&body, &query.subject)
    }
}

/// Collapse every whitespace run (newlines included) to a single space and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Title,
    Summary,
    Id,
}

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"title" => Some(Field::Title),
            b"summary" => Some(Field::Summary),
            b"id" => Some(Field::Id),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct RawEntry {
    title: Option<String>,
    summary: Option<String>,
    id: Option<String>,
}

impl RawEntry {
    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Title => &mut self.title,
            Field::Summary => &mut self.summary,
            Field::Id => &mut self.id,
        }
    }

    fn into_record(self, subject: &str) -> Option<PaperRecord> {
        let title = normalize_whitespace(self.title.as_deref()?);
        let abstract_text = normalize_whitespace(self.summary.as_deref()?);
        let link = self.id?.trim().to_string();

        if title.is_empty() || abstract_text.is_empty() {
            return None;
        }
        if url::Url::parse(&link).is_err() {
            debug!("dropping entry with non-absolute id: {:?}", link);
            return None;
        }

        Some(PaperRecord {
            title,
            abstract_text,
            link,
            subject: subject.to_string(),
        })
    }
}

/// Parse an arXiv Atom response. Entries lacking a title, summary or id are dropped.
pub fn parse_feed(xml: &str, subject: &str) -> Result<Vec<PaperRecord>, FetchError> {
    // text pieces are joined as-is; whitespace is normalized per record
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut records = Vec::new();
    let mut dropped = 0usize;
    let mut entry: Option<RawEntry> = None;
    // element depth below the current <entry>
    let mut depth = 0usize;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if let Some(raw) = entry.as_mut() {
                    depth += 1;
                    if depth == 1 {
                        field = Field::from_tag(e.local_name().as_ref());
                        if let Some(f) = field {
                            raw.slot(f).get_or_insert_with(String::new);
                        }
                    }
                } else if e.local_name().as_ref() == b"entry" {
                    entry = Some(RawEntry::default());
                    depth = 0;
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(raw), Some(f)) = (entry.as_mut(), field) {
                    let text = t
                        .unescape()
                        .map_err(|e| FetchError::Parse(format!("bad text in entry: {}", e)))?;
                    raw.slot(f).get_or_insert_with(String::new).push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let (Some(raw), Some(f)) = (entry.as_mut(), field) {
                    raw.slot(f)
                        .get_or_insert_with(String::new)
                        .push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if entry.is_some() {
                    if depth == 0 {
                        if let Some(raw) = entry.take() {
                            match raw.into_record(subject) {
                                Some(record) => records.push(record),
                                None => dropped += 1,
                            }
                        }
                    } else {
                        if depth == 1 {
                            field = None;
                        }
                        depth -= 1;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(FetchError::Parse(format!(
                    "error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if dropped > 0 {
        debug!(subject, dropped, "dropped feed entries missing title, summary or id");
    }

    Ok(records)
}
