use anyhow::Context;
use common::Config;
use hnstories::aggregator::StoryAggregator;
use tokio_util::sync::CancellationToken;

/// Runs one aggregation against the upstream and prints the result.
/// Usage: fetch_stories [config.toml]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).await?,
        None => Config::default(),
    };
    config.validate()?;

    println!("\n{}", "=".repeat(60));
    println!("Upstream: {}", config.upstream_base_url());
    println!("{}", "=".repeat(60));

    let aggregator = StoryAggregator::from_config(&config)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let started = std::time::Instant::now();
    let stories = aggregator
        .get_new_stories(&cancel)
        .await
        .context("aggregation failed")?;

    println!("{}", serde_json::to_string_pretty(&stories)?);
    println!(
        "\n{} stories with links in {:.2?}",
        stories.len(),
        started.elapsed()
    );
    Ok(())
}
