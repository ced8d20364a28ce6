//! # Warden DNS
//!
//! Network-wide DNS filtering server: blocks ads and trackers against
//! filter lists, rewrites local names, and records every transaction in a
//! searchable query log.

mod bootstrap;
mod di;
mod server;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use warden_dns_application::ports::QueryLogStore;
use warden_dns_jobs::{FilterRefreshJob, LogRotationJob};

#[derive(Parser)]
#[command(name = "warden-dns")]
#[command(version)]
#[command(about = "Network-wide DNS filtering server with query logging")]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long, default_value = "warden.toml")]
    config: PathBuf,

    /// Working directory for the query log and filter cache
    #[arg(short = 'w', long, default_value = ".")]
    work_dir: PathBuf,

    /// Override the bind address from the config file
    #[arg(short = 'b', long)]
    bind: Option<String>,

    /// Override the DNS port from the config file
    #[arg(short = 'p', long)]
    port: Option<u16>,
}

/// In-flight queries get this long to finish on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::logging::init();
    let cli = Cli::parse();

    let mut config = bootstrap::config::load(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.dns.bind_host = bind;
    }
    if let Some(port) = cli.port {
        config.dns.port = port;
    }

    // The working directory must exist before anything touches disk.
    std::fs::create_dir_all(&cli.work_dir)
        .map_err(|e| anyhow::anyhow!("cannot create working directory: {}", e))?;

    info!(
        config = %cli.config.display(),
        work_dir = %cli.work_dir.display(),
        "Warden DNS starting"
    );

    let app = di::build(config, &cli.work_dir).await?;
    let shutdown = CancellationToken::new();

    // Background jobs.
    Arc::new(
        FilterRefreshJob::new(Arc::clone(&app.manager))
            .with_cancellation(shutdown.child_token()),
    )
    .start()
    .await;
    Arc::new(
        LogRotationJob::new(app.querylog_store.clone())
            .with_cancellation(shutdown.child_token()),
    )
    .start()
    .await;

    // DNS listeners.
    let mut dns_server = server::dns::start(&app.config, app.handler).await?;
    info!("Warden DNS ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    shutdown.cancel();

    // Drain in-flight queries, then force.
    if tokio::time::timeout(SHUTDOWN_GRACE, dns_server.shutdown_gracefully())
        .await
        .is_err()
    {
        warn!("Graceful drain timed out; closing listeners");
    }

    // The final flush is synchronous: entries in memory must reach disk.
    if let Err(e) = app.querylog_store.flush().await {
        error!(error = %e, "Final query log flush failed");
    }

    info!("Warden DNS stopped");
    Ok(())
}
