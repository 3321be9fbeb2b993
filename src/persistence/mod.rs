//! Persistence collaborator
//!
//! One operation matters to the pipeline: idempotent batch upsert keyed by
//! `item_key` with full-record replace on conflict. The shipped
//! implementation targets a Supabase (PostgREST) table; atomicity and
//! conflict resolution live entirely on that side.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;

#[cfg(test)]
use mockall::automock;

/// Environment variable carrying the Supabase project URL
pub const SUPABASE_URL_VAR: &str = "SUPABASE_URL";
/// Service-role key, preferred for writes
pub const SUPABASE_SERVICE_ROLE_VAR: &str = "SUPABASE_SERVICE_ROLE";
/// Anon key fallback
pub const SUPABASE_ANON_KEY_VAR: &str = "SUPABASE_ANON_KEY";

/// Storage seam for canonical records.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Insert or fully replace rows sharing an `item_key`. Safe to repeat
    /// with the same input.
    async fn upsert_batch(&self, rows: Vec<Value>) -> Result<()>;
}

/// Supabase REST implementation of [`MarketStore`].
pub struct SupabaseStore {
    client: reqwest::Client,
    endpoint: String,
    key: String,
}

impl SupabaseStore {
    pub fn new(client: reqwest::Client, project_url: &str, key: String, table: &str) -> Self {
        let endpoint = format!("{}/rest/v1/{table}", project_url.trim_end_matches('/'));
        Self {
            client,
            endpoint,
            key,
        }
    }

    /// Build a store from `SUPABASE_URL` and the service-role (or anon) key.
    pub fn from_env(client: reqwest::Client, table: &str) -> Result<Self> {
        let url = std::env::var(SUPABASE_URL_VAR)
            .with_context(|| format!("{SUPABASE_URL_VAR} is not set"))?;
        let key = std::env::var(SUPABASE_SERVICE_ROLE_VAR)
            .or_else(|_| std::env::var(SUPABASE_ANON_KEY_VAR))
            .with_context(|| {
                format!("neither {SUPABASE_SERVICE_ROLE_VAR} nor {SUPABASE_ANON_KEY_VAR} is set")
            })?;
        Ok(Self::new(client, &url, key, table))
    }
}

#[async_trait]
impl MarketStore for SupabaseStore {
    async fn upsert_batch(&self, rows: Vec<Value>) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("on_conflict", "item_key")])
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&rows)
            .send()
            .await
            .context("upsert request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("upsert rejected with {status}: {body}");
        }
        Ok(())
    }
}
