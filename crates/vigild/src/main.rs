//! Vigil Daemon - fleet knowledge base
//!
//! Collects service, metric and problem data on a timer and serves
//! structured queries against the latest snapshot.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vigild::config::Config;
use vigild::knowledge::KnowledgeBase;
use vigild::server::{self, AppState};
use vigild::source;

#[derive(Parser, Debug)]
#[command(name = "vigild", version, about = "Vigil fleet knowledge daemon")]
struct Cli {
    /// Config file (default: $VIGIL_CONFIG, then /etc/vigil/config.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Listen address, overrides [server] listen
    #[arg(long)]
    listen: Option<String>,

    /// Build one snapshot, print the report and statistics, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    info!("Vigil Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    let source = source::from_config(&config.source, config.collection.fetch_timeout())
        .context("Failed to set up data source")?;
    let kb = KnowledgeBase::from_config(&config, source);

    if cli.once {
        return run_once(&kb).await;
    }

    let refresher = kb.spawn_refresh_loop();
    let state = AppState::new(kb);

    tokio::select! {
        result = server::run(state, &config.server.listen) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down gracefully"),
    }

    refresher.abort();
    Ok(())
}

async fn run_once(kb: &KnowledgeBase) -> Result<()> {
    match kb.refresh().await {
        Ok(report) => {
            let stats = kb.current_snapshot().map(|s| s.stats().clone());
            let output = serde_json::json!({ "report": report, "stats": stats });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            error!("Build failed: {}", e);
            Err(e.into())
        }
    }
}
