//! Network stream opening
//!
//! One HTTP GET per source per run, with an injectable retry policy applied
//! only at this boundary. Timeouts, transport errors, and 5xx responses are
//! retried with a fixed backoff; client errors fail fast. Parsing and
//! persistence never retry here.

use anyhow::{anyhow, Result};
use reqwest::header::ACCEPT;
use std::time::Duration;
use tracing::warn;

/// Retry policy for opening a source stream
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

enum AttemptError {
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

/// Fetch one source payload, retrying transient faults per `policy`.
pub async fn fetch_payload(
    client: &reqwest::Client,
    url: &str,
    accept: &str,
    bearer: Option<&str>,
    policy: RetryPolicy,
) -> Result<Vec<u8>> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match try_fetch(client, url, accept, bearer).await {
            Ok(bytes) => return Ok(bytes),
            Err(AttemptError::Fatal(e)) => return Err(e),
            Err(AttemptError::Transient(e)) => {
                warn!(url, attempt, max = attempts, error = %e, "fetch attempt failed");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
        }
    }
    Err(last_error
        .unwrap_or_else(|| anyhow!("fetch failed with zero attempts"))
        .context(format!("retries exhausted after {attempts} attempt(s)")))
}

async fn try_fetch(
    client: &reqwest::Client,
    url: &str,
    accept: &str,
    bearer: Option<&str>,
) -> std::result::Result<Vec<u8>, AttemptError> {
    let mut request = client.get(url).header(ACCEPT, accept);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    let response = request
        .send()
        .await
        .map_err(|e| AttemptError::Transient(anyhow!(e).context("request failed")))?;

    let status = response.status();
    if status.is_server_error() {
        return Err(AttemptError::Transient(anyhow!(
            "server responded with {status}"
        )));
    }
    if !status.is_success() {
        return Err(AttemptError::Fatal(anyhow!(
            "request rejected with {status}"
        )));
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| AttemptError::Transient(anyhow!(e).context("body read failed")))?;
    Ok(body.to_vec())
}
