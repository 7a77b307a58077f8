// Quick look at what the arXiv query returns, without summarizing or posting.
//
//   search_arxiv astro-ph.GA dwarf galaxies
use paperscope::ingestion::{ArxivClient, FeedQuery, FetchOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut args = std::env::args().skip(1);
    let config = common::ArxivConfig::default();
    let subject = args.next().unwrap_or_else(|| config.default_subject.clone());
    let keywords: Vec<String> = args.collect();

    let query = FeedQuery::new(subject, 0, 3).with_keywords(&keywords);
    let client = ArxivClient::new(&config)?;

    println!("\n{}", "=".repeat(60));
    println!("Query: {}", query.search_query());
    println!("{}", "=".repeat(60));

    match client.search(&query).await {
        FetchOutcome::Fetched(papers) => {
            println!("✓ {} paper(s)", papers.len());
            for (i, paper) in papers.iter().enumerate() {
                println!("\n  {}. {}", i + 1, paper.title);
                println!("     {}", paper.link);
                println!(
                    "     {}...",
                    paper.abstract_text.chars().take(120).collect::<String>()
                );
            }
        }
        FetchOutcome::Degraded { attempts, error } => {
            println!("✗ Failed after {} attempt(s): {}", attempts, error);
        }
    }

    Ok(())
}
