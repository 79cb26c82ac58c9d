//! tradesync: a standalone tool for syncing exchange and market data APIs
//! into an append-only tabular store.
//!
//! One invocation is one sync run: each configured source is fetched since
//! its last-synced timestamp, normalized, and appended, then the process
//! exits 0 if at least one source succeeded and 1 otherwise.

mod config;
mod cursor;
mod error;
mod fetch;
mod metrics;
mod pipeline;
mod record;
mod registry;
mod sink;
mod store;

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, NoSourceSucceededSnafu, SyncError};
use pipeline::run_sync;
use registry::default_lookback;

/// Market data to tabular store sync tool.
#[derive(Parser, Debug)]
#[command(name = "tradesync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "tradesync.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration and show the plan without fetching.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), SyncError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("tradesync starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    // Initialize metrics if enabled
    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Destination: {}", config.destination.path);
        let sources = config.select_sources().context(ConfigSnafu)?;
        for source in &sources {
            info!(
                "  - {} -> {} ({}, lookback {}h)",
                source.name,
                source.table,
                source.kind.as_str(),
                default_lookback(source.kind).num_hours()
            );
            if source.requires_credentials() && source.resolve_credentials().is_none() {
                info!(
                    "    would be skipped: missing {}",
                    source.credentials.referenced_vars().join(", ")
                );
            }
        }
        info!("Configuration is valid");
        return Ok(());
    }

    let stats = run_sync(&config).await?;

    // Exit contract: success iff at least one source succeeded.
    ensure!(
        stats.is_success(),
        NoSourceSucceededSnafu {
            failed: stats.failed,
            skipped: stats.skipped,
        }
    );

    Ok(())
}
