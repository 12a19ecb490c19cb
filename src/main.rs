//! Points ledger from the command line
//!
//! Usage:
//! ```bash
//! points grant DANNON 300 --timestamp 2020-10-31T10:00:00Z
//! points grant DANNON -200
//! points spend 5000
//! points balances
//! points ledger
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tower::ServiceExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use points_ledger::{
    adapters::database::sqlite::SqliteLedger,
    commands::{
        balances::BalancesRequest, grant::GrantRequest, ledger_history::LedgerRequest,
        spend::SpendRequest, DomainLogic,
    },
    config::Config,
};

/// Spend partner points oldest-first from a shared ledger
#[derive(Parser)]
#[command(name = "points")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add points for a payer
    Grant {
        payer: String,
        /// Negative values record a correction
        #[arg(allow_negative_numbers = true)]
        points: i64,
        /// When the points were issued (RFC 3339), defaults to now
        #[arg(long)]
        timestamp: Option<DateTime<Utc>>,
    },

    /// Spend points, oldest grants first
    Spend {
        #[arg(allow_negative_numbers = true)]
        points: i64,
    },

    /// Show spendable points per payer
    Balances,

    /// List every grant record
    Ledger,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    cli.config.validate()?;
    info!(environment = %cli.config.environment, "starting points ledger");

    let config = Arc::new(cli.config);
    let ledger = SqliteLedger::connect(&config)
        .await
        .context("failed to open ledger database")?;
    let domain = DomainLogic::new(Arc::new(ledger), config);

    match cli.command {
        Commands::Grant {
            payer,
            points,
            timestamp,
        } => {
            let res = domain
                .oneshot(GrantRequest {
                    payer,
                    points,
                    timestamp,
                })
                .await?;
            print_json(&res.record)
        }
        Commands::Spend { points } => {
            let res = domain.oneshot(SpendRequest { points }).await?;
            print_json(&res.deductions)
        }
        Commands::Balances => print_json(&domain.oneshot(BalancesRequest).await?),
        Commands::Ledger => print_json(&domain.oneshot(LedgerRequest).await?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
