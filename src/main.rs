//! Skinfeed - marketplace price ingestion service
//!
//! Fetches item-price listings from the enabled marketplaces, normalizes and
//! aggregates them, and upserts canonical records into Supabase on a fixed
//! refresh cadence.

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use skinfeed::config::AppConfig;
use skinfeed::ingest::{self, IngestOptions};
use skinfeed::persistence::{MarketStore, SupabaseStore};
use skinfeed::sources::SourceSpec;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = AppConfig::load()?;
    cfg.validate_env()?;
    info!(config = %cfg.digest(), "starting skinfeed");

    #[cfg(feature = "health")]
    if cfg.health.enabled {
        let port = cfg.health.port;
        tokio::spawn(async move {
            if let Err(e) = skinfeed::health::serve(port).await {
                error!(error = %e, "health endpoint failed");
            }
        });
    }

    let client = reqwest::Client::builder()
        .timeout(cfg.fetch_timeout())
        .build()
        .context("failed to build HTTP client")?;
    let store = SupabaseStore::from_env(client.clone(), &cfg.store.table)?;

    let specs = cfg.enabled_sources();
    if specs.is_empty() {
        info!("no sources enabled, nothing to do");
        return Ok(());
    }
    let opts = cfg.ingest_options();

    loop {
        let total = refresh_all(&client, &specs, &store, &opts).await;
        info!(total, "refresh pass complete");

        if cfg.scheduler.run_once {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(cfg.refresh_interval()) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    Ok(())
}

/// Run every source sequentially; a failed source never blocks the others.
/// Returns the total rows committed across sources, including rows a failed
/// source committed before its fault.
async fn refresh_all(
    client: &reqwest::Client,
    specs: &[SourceSpec],
    store: &dyn MarketStore,
    opts: &IngestOptions,
) -> usize {
    let mut total = 0;
    for spec in specs {
        match ingest::run_source(client, spec, store, opts).await {
            Ok(report) => {
                info!(
                    source = report.source,
                    raw = report.raw_records,
                    skipped = report.skipped,
                    committed = report.committed,
                    flushes = report.flushes,
                    "source refreshed"
                );
                total += report.committed;
            }
            Err(e) => {
                error!(
                    source = e.feed(),
                    committed = e.committed(),
                    error = %e,
                    "source run failed"
                );
                total += e.committed();
            }
        }
    }
    total
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("SKINFEED_LOG_JSON").is_ok() {
        builder.json().init();
    } else {
        builder.init();
    }
}
