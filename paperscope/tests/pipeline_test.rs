use mockito::Matcher;
use paperscope::ingestion::ArxivClient;
use paperscope::llm::summarizer::Summarizer;
use paperscope::llm::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};
use paperscope::pipeline::{Pipeline, PipelineStats, RunRequest};
use paperscope::retry::RetryPolicy;
use paperscope::slack::MessageSink;
use paperscope::storage::MarkdownStore;
use paperscope::types::DeliveryError;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn atom_feed(count: usize) -> String {
    let entries: String = (1..=count)
        .map(|n| {
            format!(
                "<entry><id>http://arxiv.org/abs/2401.0000{n}v1</id><title>Paper {n}</title>\
                 <summary>Abstract of paper {n}.</summary></entry>"
            )
        })
        .collect();
    format!(r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>ArXiv Query</title>{}</feed>"#, entries)
}

/// Two-bullet summary for every prompt, except those containing `fail_on`.
struct EchoProvider {
    fail_on: Option<&'static str>,
}

#[async_trait::async_trait]
impl LlmProvider for EchoProvider {
    async fn generate(&self, request: LlmRequest) -> anyhow::Result<LlmResponse> {
        if let Some(marker) = self.fail_on {
            if request.prompt.contains(marker) {
                anyhow::bail!("LLM API error 500: internal");
            }
        }
        Ok(LlmResponse {
            content: "- finding one\n- finding two".to_string(),
            usage: UsageMetadata { prompt_tokens: 30, completion_tokens: 10, total_tokens: 40 },
            model: "echo".to_string(),
        })
    }

    fn model(&self) -> &str {
        "echo"
    }
}

/// Keeps every message it is asked to post; the 1-based post `fail_at` fails.
struct RecordingSink {
    fail_at: Option<usize>,
    posts: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn new(fail_at: Option<usize>) -> Arc<Self> {
        Arc::new(Self { fail_at, posts: Mutex::new(Vec::new()) })
    }

    fn posts(&self) -> Vec<String> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl MessageSink for RecordingSink {
    async fn post_message(&self, text: &str) -> Result<(), DeliveryError> {
        let mut posts = self.posts.lock().unwrap();
        posts.push(text.to_string());
        if Some(posts.len()) == self.fail_at {
            return Err(DeliveryError::Api("rate_limited".to_string()));
        }
        Ok(())
    }

    async fn check_auth(&self) -> Result<String, DeliveryError> {
        Ok("recorder".to_string())
    }
}

fn pipeline(
    server: &mockito::ServerGuard,
    provider: EchoProvider,
    sink: &Arc<RecordingSink>,
    output: &Path,
    message_limit: usize,
) -> Pipeline {
    let mut config = common::Config::default();
    config.arxiv.api_url = format!("{}/api/query", server.url());
    config.slack.message_length_limit = message_limit;

    let instant = RetryPolicy::new(3, Duration::ZERO);
    let feed = ArxivClient::new(&config.arxiv).expect("feed client").with_retry(instant);
    let summarizer = Summarizer::new(Arc::new(provider), &config.llm).with_retry(instant);

    Pipeline::new(feed, summarizer, &config)
        .with_sink(sink.clone() as Arc<dyn MessageSink>)
        .with_store(MarkdownStore::new(output, false))
}

async fn serve_feed(server: &mut mockito::ServerGuard, subject: &str, count: usize) -> mockito::Mock {
    server
        .mock("GET", "/api/query")
        .match_query(Matcher::UrlEncoded("search_query".into(), format!("cat:{}", subject)))
        .with_status(200)
        .with_body(atom_feed(count))
        .create_async()
        .await
}

fn single(subject: &str) -> RunRequest {
    RunRequest::new(vec![subject.to_string()])
}

#[tokio::test]
async fn test_empty_feed_fails_without_notification() {
    let mut server = mockito::Server::new_async().await;
    let _feed = serve_feed(&mut server, "astro-ph.GA", 0).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = RecordingSink::new(None);

    let output = pipeline(&server, EchoProvider { fail_on: None }, &sink, dir.path(), 3000)
        .run(&single("astro-ph.GA"))
        .await;

    let report = output.report;
    assert!(!report.success);
    assert_eq!(report.error.as_deref(), Some("no papers found"));
    assert_eq!(report.papers_fetched, 0);
    assert!(report.persisted_path.is_none());
    assert!(output.document.is_none());
    assert!(sink.posts().is_empty());
}

#[tokio::test]
async fn test_five_papers_are_summarized_in_order_and_delivered() {
    let mut server = mockito::Server::new_async().await;
    let _feed = serve_feed(&mut server, "astro-ph.GA", 5).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = RecordingSink::new(None);

    let output = pipeline(&server, EchoProvider { fail_on: None }, &sink, dir.path(), 3000)
        .run(&single("astro-ph.GA"))
        .await;

    let report = output.report;
    assert!(report.success, "run failed: {:?}", report.error);
    assert_eq!(report.papers_fetched, 5);
    assert_eq!(report.placeholder_fragments, 0);
    assert_eq!(report.total_tokens, 200);
    assert!(report.estimated_prompt_tokens > 0);

    let document = output.document.expect("document");
    let titles: Vec<_> = document.fragments().map(|f| f.title.as_str()).collect();
    assert_eq!(titles, vec!["Paper 1", "Paper 2", "Paper 3", "Paper 4", "Paper 5"]);

    let saved = std::fs::read_to_string(dir.path().join("astro-ph_GA.md")).expect("digest file");
    assert!(saved.starts_with(
        "# Latest arXiv Papers for astro-ph.GA\n\n## [Paper 1](http://arxiv.org/abs/2401.00001v1)\n- finding one"
    ));

    let posts = sink.posts();
    assert_eq!(posts.len(), 1);
    assert!(posts[0].starts_with(":rocket: *arXiv astro-ph.GA Summary* - "));
    assert!(posts[0].contains("*:page_facing_up: <http://arxiv.org/abs/2401.00005v1|Paper 5>*\n• finding one"));
    assert!(report.delivered());
}

#[tokio::test]
async fn test_one_failed_summary_becomes_a_placeholder() {
    let mut server = mockito::Server::new_async().await;
    let _feed = serve_feed(&mut server, "quant-ph", 3).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = RecordingSink::new(None);
    let provider = EchoProvider { fail_on: Some("Title: Paper 2\n") };

    let output = pipeline(&server, provider, &sink, dir.path(), 3000)
        .run(&single("quant-ph"))
        .await;

    assert!(output.report.success);
    assert_eq!(output.report.placeholder_fragments, 1);

    let document = output.document.expect("document");
    let fragments: Vec<_> = document.fragments().collect();
    assert_eq!(fragments.len(), 3);
    assert!(fragments[0].body.ends_with("- finding two"));
    assert_eq!(
        fragments[1].body,
        "## [Paper 2](http://arxiv.org/abs/2401.00002v1)\nError processing paper."
    );
    assert!(fragments[2].body.ends_with("- finding two"));
}

#[tokio::test]
async fn test_failed_segment_stops_delivery_and_sends_notice() {
    let mut server = mockito::Server::new_async().await;
    let _feed = serve_feed(&mut server, "astro-ph.GA", 3).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = RecordingSink::new(Some(2));

    let output = pipeline(&server, EchoProvider { fail_on: None }, &sink, dir.path(), 120)
        .run(&single("astro-ph.GA"))
        .await;

    let report = output.report;
    let delivery = report.delivery.clone().expect("delivery report");
    assert!(delivery.segments_total >= 3);
    assert_eq!(delivery.delivered_segments, 1);
    assert!(delivery.error.as_deref().unwrap_or("").contains("rate_limited"));
    assert!(!report.delivered());

    // segment 1, failed segment 2, then the notice; segment 3 is never posted
    let posts = sink.posts();
    assert_eq!(posts.len(), 3);
    assert!(posts[2].starts_with(":warning: *arXiv Paper Processor Error*\nError processing arXiv astro-ph.GA"));

    // delivery trouble is reported on its own and does not touch the saved digest
    assert!(report.success);
    assert!(report.persisted_path.is_some());
}

#[tokio::test]
async fn test_persistence_failure_does_not_block_delivery() {
    let mut server = mockito::Server::new_async().await;
    let _feed = serve_feed(&mut server, "astro-ph.GA", 2).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").expect("write blocker");
    let sink = RecordingSink::new(None);

    let output = pipeline(&server, EchoProvider { fail_on: None }, &sink, &blocker.join("out"), 3000)
        .run(&single("astro-ph.GA"))
        .await;

    let report = output.report;
    assert!(report.success);
    assert!(report.persisted_path.is_none());
    assert!(report.persistence_error.is_some());
    assert!(report.delivered());
    assert_eq!(sink.posts().len(), 1);
}

#[tokio::test]
async fn test_multi_subject_run_omits_empty_subjects() {
    let mut server = mockito::Server::new_async().await;
    let _cl = serve_feed(&mut server, "cs.CL", 2).await;
    let _th = serve_feed(&mut server, "hep-th", 0).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = RecordingSink::new(None);

    let mut request = RunRequest::new(vec!["cs.CL".to_string(), "hep-th".to_string()]);
    request.save_report = true;

    let output = pipeline(&server, EchoProvider { fail_on: None }, &sink, dir.path(), 3000)
        .run(&request)
        .await;

    let report = output.report;
    assert!(report.success);
    assert_eq!(report.scope, "arXiv Papers (2 subjects)");
    assert_eq!(report.subjects_processed, vec!["cs.CL".to_string()]);
    assert_eq!(report.empty_subjects, vec!["hep-th".to_string()]);

    let document = output.document.expect("document");
    assert_eq!(document.sections.len(), 1);

    assert!(dir.path().join("multi_subject_arxiv.md").exists());
    let saved_report = std::fs::read_to_string(dir.path().join("multi_subject_arxiv_report.json"))
        .expect("report file");
    let json: serde_json::Value = serde_json::from_str(&saved_report).expect("report json");
    assert_eq!(json["papers_fetched"], 2);
    assert_eq!(json["success"], true);

    assert!(sink.posts()[0].starts_with(":rocket: *arXiv Papers (2 subjects) Summary* - "));
}

#[tokio::test]
async fn test_no_subjects_fails_and_notifies() {
    let server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = RecordingSink::new(None);

    let output = pipeline(&server, EchoProvider { fail_on: None }, &sink, dir.path(), 3000)
        .run(&RunRequest::new(Vec::new()))
        .await;

    assert!(!output.report.success);
    assert_eq!(output.report.error.as_deref(), Some("no subjects requested"));
    assert_eq!(
        sink.posts(),
        vec![":warning: *arXiv Paper Processor Error*\nError processing arXiv Papers (0 subjects): no subjects requested".to_string()]
    );
}

#[tokio::test]
async fn test_connection_probe_reports_each_service() {
    let mut server = mockito::Server::new_async().await;
    let _feed = serve_feed(&mut server, "astro-ph.GA", 1).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = RecordingSink::new(None);

    let report = pipeline(&server, EchoProvider { fail_on: Some("Hello") }, &sink, dir.path(), 3000)
        .test_connections()
        .await;

    assert!(report.slack);
    assert!(!report.llm);
    assert!(report.arxiv);
}

#[tokio::test]
async fn test_stats_point_at_the_latest_digest() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = common::Config::default();
    config.output.dir = dir.path().to_string_lossy().into_owned();
    config.output.timestamped = false;

    let empty = PipelineStats::collect(&config).await;
    assert!(empty.latest_digest.is_none());

    let store = MarkdownStore::from_config(&config.output);
    let saved = store.save_markdown("# digest\n", "astro-ph_GA").await.expect("save");
    store.save_json(&serde_json::json!({"ok": true}), "astro-ph_GA_report").await.expect("save json");

    let stats = PipelineStats::collect(&config).await;
    assert_eq!(stats.latest_digest, Some(saved));
    assert_eq!(stats.file_stats.expect("file stats").markdown_files, 1);
}
