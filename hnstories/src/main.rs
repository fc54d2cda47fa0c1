/*
hnstories - single-binary main.rs
This binary wires the upstream client, the story cache and the aggregator together
and serves them over HTTP with Rocket.
*/

use anyhow::Result;
use clap::Parser;
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use hnstories::aggregator::StoryAggregator;
use hnstories::server::launch_server;

#[derive(Parser, Debug)]
#[command(name = "hnstories", about = "Cached feed of new Hacker News stories with links")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = match load_config(args.config).await {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(
        upstream = %config.upstream_base_url(),
        cache_ttl_seconds = config.cache_ttl().as_secs(),
        max_concurrent_fetches = ?config.max_concurrent_fetches(),
        "configuration loaded"
    );

    let aggregator = Arc::new(StoryAggregator::from_config(&config)?);

    info!("Launching Rocket HTTP server");
    if let Err(e) = launch_server(aggregator, Arc::new(config)).await {
        error!(error = %e, "Rocket server failed");
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}

/// `config.default.toml` (if present) merged under either the `--config` file, which must
/// exist, or `config.toml` in the working directory.
async fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let default_path = PathBuf::from("config.default.toml");

    let override_path = match explicit {
        Some(p) if !p.exists() => {
            anyhow::bail!("Config file not found: {}", p.display());
        }
        Some(p) => Some(p),
        None => {
            let p = PathBuf::from("config.toml");
            if p.exists() {
                Some(p)
            } else {
                None
            }
        }
    };

    let config =
        Config::load_with_defaults(Some(default_path.as_path()), override_path.as_deref()).await?;
    config.validate()?;
    info!(
        default_path = ?default_path,
        override_path = ?override_path,
        "configuration resolved"
    );
    Ok(config)
}
