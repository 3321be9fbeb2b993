//! Configuration management for Skinfeed
//!
//! Loads from YAML/TOML files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::fetch::RetryPolicy;
use crate::ingest::IngestOptions;
use crate::sources::SourceSpec;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub ingest: IngestConfig,
    pub store: StoreConfig,
    pub sources: SourcesConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between refresh passes
    pub interval_secs: u64,
    /// Run a single pass and exit
    pub run_once: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Rows per upsert chunk
    pub upsert_batch: usize,
    /// Live identity-key bound before a mid-run flush; 0 disables flushing
    pub flush_max_keys: usize,
    /// HTTP timeout for source fetches in seconds
    pub fetch_timeout_secs: u64,
    /// Stream-open retry attempts
    pub retry_max_attempts: usize,
    /// Fixed backoff between retries in seconds
    pub retry_backoff_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Target table for canonical records
    pub table: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    pub csfloat: SourceToggle,
    pub buff163: SourceToggle,
    pub whitemarket: SourceToggle,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceToggle {
    pub enabled: bool,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    pub enabled: bool,
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Scheduler defaults (3h refresh, mirrors the upstream feeds' cadence)
            .set_default("scheduler.interval_secs", 3 * 60 * 60)?
            .set_default("scheduler.run_once", false)?
            // Ingest defaults
            .set_default("ingest.upsert_batch", 500)?
            .set_default("ingest.flush_max_keys", 0)?
            .set_default("ingest.fetch_timeout_secs", 180)?
            .set_default("ingest.retry_max_attempts", 3)?
            .set_default("ingest.retry_backoff_secs", 5)?
            // Store defaults
            .set_default("store.table", "market_data")?
            // Source defaults
            .set_default("sources.csfloat.enabled", true)?
            .set_default(
                "sources.csfloat.url",
                "https://csfloat.com/api/v1/listings/price-list",
            )?
            .set_default("sources.buff163.enabled", true)?
            .set_default(
                "sources.buff163.url",
                "https://prices.csgotrader.app/latest/buff163.json",
            )?
            .set_default("sources.whitemarket.enabled", true)?
            .set_default(
                "sources.whitemarket.url",
                "https://s3.white.market/export/v1/prices/730.csv",
            )?
            // Health defaults
            .set_default("health.enabled", false)?
            .set_default("health.port", 8080)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (SKINFEED_*)
            .add_source(Environment::with_prefix("SKINFEED").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Legacy environment names kept from the original deployment.
        if let Ok(table) = std::env::var("SUPABASE_MARKET_TABLE") {
            app_config.store.table = table;
        }
        if let Ok(batch) = std::env::var("SUPABASE_UPSERT_BATCH") {
            app_config.ingest.upsert_batch = batch
                .parse()
                .context("SUPABASE_UPSERT_BATCH must be an integer")?;
        }

        Ok(app_config)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "table={} batch={} flush={} interval={}s sources=[{}]",
            self.store.table,
            self.ingest.upsert_batch,
            self.ingest.flush_max_keys,
            self.scheduler.interval_secs,
            self.enabled_sources()
                .iter()
                .map(|s| s.name)
                .collect::<Vec<_>>()
                .join(",")
        )
    }

    /// Validate required environment variables
    pub fn validate_env(&self) -> Result<()> {
        if std::env::var("SUPABASE_URL").is_err() {
            bail!("Required environment variable SUPABASE_URL is not set");
        }
        if std::env::var("SUPABASE_SERVICE_ROLE").is_err()
            && std::env::var("SUPABASE_ANON_KEY").is_err()
        {
            bail!("Either SUPABASE_SERVICE_ROLE or SUPABASE_ANON_KEY must be set");
        }
        Ok(())
    }

    /// Source specs for every enabled marketplace, in refresh order
    pub fn enabled_sources(&self) -> Vec<SourceSpec> {
        let mut specs = Vec::new();
        if self.sources.whitemarket.enabled {
            specs.push(SourceSpec::whitemarket(self.sources.whitemarket.url.clone()));
        }
        if self.sources.csfloat.enabled {
            specs.push(SourceSpec::csfloat(self.sources.csfloat.url.clone()));
        }
        if self.sources.buff163.enabled {
            specs.push(SourceSpec::buff163(self.sources.buff163.url.clone()));
        }
        specs
    }

    /// Pipeline options derived from the ingest section
    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            retry: RetryPolicy {
                max_attempts: self.ingest.retry_max_attempts,
                backoff: Duration::from_secs(self.ingest.retry_backoff_secs),
            },
            chunk_size: self.ingest.upsert_batch,
            flush_bound: match self.ingest.flush_max_keys {
                0 => None,
                bound => Some(bound),
            },
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.ingest.fetch_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.interval_secs)
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
