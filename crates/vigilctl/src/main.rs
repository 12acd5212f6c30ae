//! Vigil Control - CLI client for the Vigil daemon
//!
//! Every command is one HTTP call against vigild.

mod client;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client::{VigilClient, DEFAULT_URL};
use owo_colors::OwoColorize;
use serde_json::Value;
use vigil_common::{Predicate, SortOrder, StructuredQuery};

#[derive(Parser)]
#[command(name = "vigilctl")]
#[command(about = "Vigil - fleet knowledge base client", long_about = None)]
#[command(version)]
struct Cli {
    /// Daemon address
    #[arg(long, global = true, default_value = DEFAULT_URL)]
    url: String,

    /// Print raw JSON instead of formatted output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show knowledge base status
    Status,

    /// Show aggregate fleet statistics
    Stats,

    /// Daemon liveness
    Health,

    /// Rebuild now, or wait for the build already running
    Refresh,

    /// Send a structured query given as JSON
    Query {
        /// e.g. '{"action":"rank","metric":"failure_rate","limit":5}'
        query: String,
    },

    /// Rank services by a metric
    Rank {
        metric: String,

        /// Lowest first
        #[arg(long)]
        asc: bool,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// List services matching a condition, e.g. "error_count > 100"
    Filter { condition: String },

    /// Count services, optionally matching a condition
    Count { condition: Option<String> },

    /// Compare services by identifier or display name
    Compare {
        #[arg(required = true)]
        services: Vec<String>,
    },

    /// Show one service by identifier or display name
    Describe { service: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = VigilClient::new(&cli.url)?;

    match cli.command {
        Commands::Status => {
            let status = client.status().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                output::display_status(&status);
            }
        }
        Commands::Stats => {
            let stats = client.stats().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                output::display_stats(&stats);
            }
        }
        Commands::Health => {
            let health = client.health().await?;
            if cli.json {
                println!("{}", output::pretty(&health));
            } else {
                let version = health.get("version").and_then(Value::as_str).unwrap_or("?");
                let ready = health.get("ready").and_then(Value::as_bool).unwrap_or(false);
                println!(
                    "{}  vigild v{}{}",
                    "[OK]".bright_green(),
                    version,
                    if ready { "" } else { " (no snapshot yet)" }
                );
            }
        }
        Commands::Refresh => {
            let report = client.refresh().await?;
            if cli.json {
                println!("{}", output::pretty(&report));
            } else {
                let generation = report.get("generation").and_then(Value::as_u64).unwrap_or(0);
                let services = report.get("service_count").and_then(Value::as_u64).unwrap_or(0);
                let degraded = report
                    .get("partial_failures")
                    .and_then(Value::as_array)
                    .map(|a| a.len())
                    .unwrap_or(0);
                println!(
                    "{}  Published generation {} ({} services)",
                    "[OK]".bright_green(),
                    generation,
                    services
                );
                if degraded > 0 {
                    println!("{}", format!("[NOTE] {} metric fetches failed", degraded).yellow());
                }
            }
        }
        command => {
            let query = build_query(command)?;
            let response = client.query(&query).await?;
            if cli.json {
                println!("{}", output::pretty(&response));
            } else {
                output::display_query(&response);
            }
        }
    }

    Ok(())
}

/// Map a query subcommand to the structured query it sends
fn build_query(command: Commands) -> Result<StructuredQuery> {
    let query = match command {
        Commands::Query { query } => {
            serde_json::from_str(&query).context("Query is not a valid structured query")?
        }
        Commands::Rank { metric, asc, limit } => {
            let order = if asc { SortOrder::Asc } else { SortOrder::Desc };
            StructuredQuery::rank(&metric, order, limit)
        }
        Commands::Filter { condition } => StructuredQuery::filter(Predicate::parse(&condition)?),
        Commands::Count { condition } => {
            let predicate = condition.as_deref().map(Predicate::parse).transpose()?;
            StructuredQuery::count(predicate)
        }
        Commands::Compare { services } => StructuredQuery::compare(&services),
        Commands::Describe { service } => StructuredQuery::describe(&service),
        Commands::Status | Commands::Stats | Commands::Health | Commands::Refresh => {
            anyhow::bail!("not a query command")
        }
    };
    Ok(query)
}
