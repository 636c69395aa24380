//! intel-refresh entry point.
//!
//! Seeds indicators that have never been looked up, then refreshes records
//! whose TTL has elapsed. Logging goes to stderr; the JSON run report is the
//! only thing written to stdout.

use std::sync::Arc;

use anyhow::Result;
use intelcache_client::{AdapterSet, ReqwestTransport, cancellation};
use intelcache_core::{AppConfig, CacheDb};
use tracing_subscriber::EnvFilter;

mod error;
mod inflight;
mod orchestrator;
mod source;
mod stats;

use orchestrator::Refresher;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(db_path = %config.db_path.display(), workers = config.worker_count, "starting intel-refresh");

    let db = CacheDb::open(&config.db_path).await?;
    let indicators = source::read_indicators(config.indicators_path.as_deref()).await?;

    let adapters = AdapterSet::from_config(&config);
    let transport = Arc::new(ReqwestTransport::new(&config.user_agent)?);

    let (handle, cancel) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing in-flight requests");
            handle.cancel();
        }
    });

    let refresher = Refresher::new(&config, Arc::new(db.clone()), adapters, transport, cancel);

    let mut report = refresher.seed_missing(&indicators).await?;
    report.merge(refresher.refresh_stale().await?);

    for (service, counts) in db.count_records().await? {
        tracing::info!(%service, total = counts.total, populated = counts.populated, failing = counts.failing, "cache contents");
    }

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.has_failures() {
        tracing::warn!(failures = report.failures(), "run finished with failures");
        std::process::exit(1);
    }

    Ok(())
}
