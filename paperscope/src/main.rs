/*
paperscope - main.rs
Fetches recent arXiv papers, summarizes each one with an LLM, saves the digest
as markdown and posts it to a Slack channel.
*/

use anyhow::Result;
use clap::Parser;
use common::{Config, Credentials};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use paperscope::pipeline::{Pipeline, PipelineStats, RunRequest};
use paperscope::storage::MarkdownStore;

#[derive(Parser, Debug)]
#[command(name = "paperscope", about = "Summarize recent arXiv papers and post them to Slack")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// arXiv categories to process (e.g. astro-ph.GA quant-ph)
    #[arg(long, num_args = 1..)]
    subjects: Vec<String>,

    /// Extra search terms, ANDed with the category
    #[arg(long, num_args = 1..)]
    keywords: Vec<String>,

    /// Offset of the first result
    #[arg(long)]
    start: Option<usize>,

    /// Maximum number of papers per subject
    #[arg(long)]
    max_results: Option<usize>,

    /// Don't send results to Slack
    #[arg(long)]
    no_slack: bool,

    /// Don't save results to file
    #[arg(long)]
    no_file: bool,

    /// Also write the run report as JSON next to the digest
    #[arg(long)]
    save_report: bool,

    /// Test Slack, LLM and arXiv connections, then exit
    #[arg(long)]
    test_connections: bool,

    /// Show output-directory statistics, then exit
    #[arg(long)]
    stats: bool,

    /// Delete output files older than N days, then exit
    #[arg(long, value_name = "DAYS")]
    cleanup_days: Option<u64>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Resolve config paths
    let default_path = PathBuf::from("config.default.toml");
    let override_path = match args.config.clone() {
        Some(p) => {
            if !p.exists() {
                error!(path = ?p, "specified config file not found");
                return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
            }
            Some(p)
        }
        None => Some(PathBuf::from("config.toml")).filter(|p| p.exists()),
    };

    let config = Config::load_with_defaults(
        Some(default_path.as_path()).filter(|p| p.exists()),
        override_path.as_deref(),
    )
    .await?;
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    let credentials = Credentials::from_env(&config);
    let needs_slack = !args.no_slack || args.test_connections;
    let missing = credentials.missing(&config, needs_slack);
    if !missing.is_empty() && args.cleanup_days.is_none() && !args.stats {
        error!("missing settings: {}", missing.join(", "));
        eprintln!("Missing or invalid API keys. Set the following environment variables (or add them to .env):");
        for key in &missing {
            eprintln!("  - {}", key);
        }
        return Ok(ExitCode::from(1));
    }

    if let Some(days) = args.cleanup_days {
        let store = MarkdownStore::from_config(&config.output);
        let removed = store.cleanup_older_than(days).await?;
        println!("Removed {} file(s) older than {} days from {}", removed, days, store.output_dir().display());
        return Ok(ExitCode::SUCCESS);
    }

    if args.stats {
        let stats = PipelineStats::collect(&config).await;
        println!("Processing Statistics:");
        match &stats.file_stats {
            Some(files) => {
                println!("  Files: {}", files.total_files);
                println!("  Markdown files: {}", files.markdown_files);
                println!("  JSON files: {}", files.json_files);
                println!("  Total size: {:.2} MB", files.total_size_mb);
            }
            None => println!("  Files: unavailable"),
        }
        if let Some(path) = &stats.latest_digest {
            println!("  Latest digest: {}", path.display());
        }
        println!("  Default subject: {}", stats.default_subject);
        println!("  Model: {}", stats.model);
        println!("  Max abstract chars: {}", stats.max_abstract_chars);
        println!("  Slack message limit: {}", stats.message_length_limit);
        println!("  Max retries: {}", stats.max_retries);
        return Ok(ExitCode::SUCCESS);
    }

    let pipeline = Pipeline::from_config(&config, &credentials)?;

    if args.test_connections {
        println!("Testing connections...");
        let report = pipeline.test_connections().await;
        let mark = |ok: bool| if ok { "✓" } else { "✗" };
        println!("Slack: {}", mark(report.slack));
        println!("LLM: {}", mark(report.llm));
        println!("arXiv: {}", mark(report.arxiv));
        let all_ok = report.slack && report.llm && report.arxiv;
        return Ok(if all_ok { ExitCode::SUCCESS } else { ExitCode::from(1) });
    }

    let subjects = if args.subjects.is_empty() {
        vec![config.arxiv.default_subject.clone()]
    } else {
        args.subjects
    };
    let request = RunRequest {
        subjects,
        keywords: args.keywords,
        start: args.start.unwrap_or(config.arxiv.default_start),
        max_results: args.max_results.unwrap_or(config.arxiv.default_max_results),
        deliver: !args.no_slack,
        persist: !args.no_file,
        save_report: args.save_report,
    };

    info!(
        subjects = ?request.subjects,
        max_results = request.max_results,
        deliver = request.deliver,
        persist = request.persist,
        "starting arXiv paper processing"
    );

    let report = pipeline.run(&request).await.report;

    println!("{}", "-".repeat(50));
    println!("Processing Results:");
    if report.success {
        println!("  Papers fetched: {}", report.papers_fetched);
        if !report.empty_subjects.is_empty() {
            println!("  Subjects without papers: {}", report.empty_subjects.join(", "));
        }
        if report.placeholder_fragments > 0 {
            println!("  Papers without summary: {}", report.placeholder_fragments);
        }
        println!("  Estimated prompt tokens: {}", report.estimated_prompt_tokens);
        println!("  Processing time: {:.2} seconds", report.elapsed.as_secs_f64());
        if let Some(path) = &report.persisted_path {
            println!("  File saved: {}", path);
        }
        if let Some(e) = &report.persistence_error {
            println!("  File not saved: {}", e);
        }
        if request.deliver {
            println!("  Slack sent: {}", if report.delivered() { "✓" } else { "✗" });
        }
    } else {
        println!("  Error: {}", report.error.as_deref().unwrap_or("unknown error"));
    }

    Ok(if report.success { ExitCode::SUCCESS } else { ExitCode::from(1) })
}
