//! Ingestion pipeline
//!
//! Wires the stages together for one source: fetch, transparent decode,
//! shape-strategy extraction, name/price normalization, aggregation, and
//! chunked emission to the store. One call ingests one marketplace; the
//! aggregation table is exclusively owned by that run.

pub mod aggregate;
pub mod decode;
pub mod emit;
pub mod name;
pub mod price;
pub mod reader;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::fetch::{self, RetryPolicy};
use crate::persistence::MarketStore;
use crate::sources::SourceSpec;
use crate::types::CanonicalRecord;
use aggregate::{Aggregator, Observation};
use reader::RawRecord;

/// Knobs for one pipeline run
#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub retry: RetryPolicy,
    pub chunk_size: usize,
    /// Live identity-key bound; reaching it flushes the table mid-run
    pub flush_bound: Option<usize>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            chunk_size: emit::DEFAULT_CHUNK_SIZE,
            flush_bound: None,
        }
    }
}

/// Outcome of one completed source run. Record-level faults never fail a
/// run; they only show up in `skipped`.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub source: &'static str,
    /// Raw records extracted from the payload
    pub raw_records: usize,
    /// Records dropped for missing name, unusable price, or malformed rows
    pub skipped: usize,
    /// Canonical rows successfully upserted
    pub committed: usize,
    /// Mid-run flush partitions emitted before the final one
    pub flushes: usize,
}

/// Run-fatal pipeline faults. Partial progress is never hidden: persistence
/// faults carry the rows committed before the failure.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{feed}: failed to open stream after {attempts} attempt(s): {cause}")]
    Fetch {
        feed: &'static str,
        attempts: usize,
        cause: anyhow::Error,
    },
    #[error("{feed}: could not decode payload")]
    Decode {
        feed: &'static str,
        #[source]
        cause: std::io::Error,
    },
    #[error("{feed}: no shape strategy extracted any records")]
    NoRecords { feed: &'static str },
    #[error("{feed}: persistence failed with {committed} row(s) committed ({chunks_applied} chunk(s) applied): {cause}")]
    Persist {
        feed: &'static str,
        committed: usize,
        chunks_applied: usize,
        cause: anyhow::Error,
    },
}

impl IngestError {
    /// Rows known committed before the failure
    pub fn committed(&self) -> usize {
        match self {
            IngestError::Persist { committed, .. } => *committed,
            _ => 0,
        }
    }

    /// The marketplace whose run failed
    pub fn feed(&self) -> &'static str {
        match self {
            IngestError::Fetch { feed, .. }
            | IngestError::Decode { feed, .. }
            | IngestError::NoRecords { feed }
            | IngestError::Persist { feed, .. } => *feed,
        }
    }
}

/// Fetch and ingest one marketplace source.
pub async fn run_source(
    client: &reqwest::Client,
    spec: &SourceSpec,
    store: &dyn MarketStore,
    opts: &IngestOptions,
) -> Result<IngestReport, IngestError> {
    let body = fetch::fetch_payload(
        client,
        &spec.url,
        spec.accept,
        spec.bearer().as_deref(),
        opts.retry,
    )
    .await
    .map_err(|cause| IngestError::Fetch {
        feed: spec.name,
        attempts: opts.retry.max_attempts,
        cause,
    })?;
    ingest_payload(&body, spec, store, opts).await
}

/// Ingest an already-fetched payload. Split out from [`run_source`] so the
/// pipeline can be exercised without a network.
pub async fn ingest_payload(
    body: &[u8],
    spec: &SourceSpec,
    store: &dyn MarketStore,
    opts: &IngestOptions,
) -> Result<IngestReport, IngestError> {
    let payload = decode::decode_payload(body).map_err(|cause| IngestError::Decode {
        feed: spec.name,
        cause,
    })?;
    let mut records =
        reader::extract_records(&payload, spec.strategies).ok_or(IngestError::NoRecords {
            feed: spec.name,
        })?;
    debug!(source = spec.name, strategy = ?records.strategy(), "payload shape resolved");

    let mut aggregator = Aggregator::new(Utc::now(), opts.flush_bound);
    let mut raw_records = 0usize;
    let mut skipped = 0usize;
    let mut committed = 0usize;
    let mut flushes = 0usize;

    for record in records.by_ref() {
        raw_records += 1;
        let Some(observation) = observe_raw(&record, spec) else {
            skipped += 1;
            continue;
        };
        if let Some(partition) = aggregator.observe(observation) {
            flushes += 1;
            committed += emit_partition(store, spec, &partition, opts.chunk_size, committed).await?;
        }
    }
    skipped += records.skipped();

    let remaining = aggregator.into_records();
    if !remaining.is_empty() {
        committed += emit_partition(store, spec, &remaining, opts.chunk_size, committed).await?;
    }

    Ok(IngestReport {
        source: spec.name,
        raw_records,
        skipped,
        committed,
        flushes,
    })
}

/// Normalize one raw record, or `None` when it carries no usable name or no
/// parseable price on any configured channel.
fn observe_raw(record: &RawRecord, spec: &SourceSpec) -> Option<Observation> {
    let raw_name = spec
        .name_fields
        .iter()
        .find_map(|f| record.get(*f).and_then(Value::as_str))
        .map(str::trim)?;
    if raw_name.is_empty() {
        return None;
    }
    let identity = name::parse_listing_name(raw_name);
    if identity.base.is_empty() {
        return None;
    }
    let ask = price::probe_price(record, spec.ask_fields, spec.minor_unit_fields);
    let bid = price::probe_price(record, spec.bid_fields, spec.minor_unit_fields);
    if ask.is_none() && bid.is_none() {
        return None;
    }
    let qty = price::probe_qty(record, spec.qty_fields, spec.default_qty);
    Some(Observation {
        identity,
        ask,
        bid,
        qty,
    })
}

async fn emit_partition(
    store: &dyn MarketStore,
    spec: &SourceSpec,
    partition: &[CanonicalRecord],
    chunk_size: usize,
    committed_before: usize,
) -> Result<usize, IngestError> {
    emit::emit_in_chunks(store, &spec.columns, partition, chunk_size)
        .await
        .map_err(|failure| IngestError::Persist {
            feed: spec.name,
            committed: committed_before + failure.rows_applied,
            chunks_applied: failure.chunks_applied,
            cause: failure.cause,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Captures every upserted row for assertions.
    #[derive(Default)]
    struct RecordingStore {
        rows: Mutex<Vec<Value>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketStore for RecordingStore {
        async fn upsert_batch(&self, rows: Vec<Value>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.rows.lock().unwrap().extend(rows);
            Ok(())
        }
    }

    /// Fails every call after the first `succeed` ones.
    struct FlakyStore {
        succeed: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketStore for FlakyStore {
        async fn upsert_batch(&self, _rows: Vec<Value>) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.succeed {
                Ok(())
            } else {
                Err(anyhow!("store offline"))
            }
        }
    }

    #[tokio::test]
    async fn test_end_to_end_duplicate_listings_merge() {
        let payload = r#"[
            {"market_hash_name": "StatTrak™ AK-47 | Redline (Field-Tested)", "price": 12.5, "qty": 2},
            {"market_hash_name": "StatTrak™ AK-47 | Redline (Field-Tested)", "price": 9.99, "qty": 3}
        ]"#
        .as_bytes();
        let spec = SourceSpec::whitemarket("unused".into());
        let store = RecordingStore::default();
        let report = ingest_payload(payload, &spec, &store, &IngestOptions::default())
            .await
            .unwrap();

        assert_eq!(report.raw_records, 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.committed, 1);

        let rows = store.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(
            row["item_key"],
            serde_json::json!("AK-47 | Redline|StatTrak|Field-Tested")
        );
        assert_eq!(row["price_whitemarket"], serde_json::json!(9.99));
        assert_eq!(row["qty_whitemarket"], serde_json::json!(5));
        assert_eq!(row["stattrak"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_tabular_fallback_excludes_bad_rows() {
        let payload = b"market_hash_name,price,market_product_count\n\
                        AK-47 | Redline (Field-Tested),12.50,3\n\
                        Broken Row,not-a-price,9\n\
                        AWP | Asiimov (Field-Tested),60.25,1\n";
        let spec = SourceSpec::whitemarket("unused".into());
        let store = RecordingStore::default();
        let report = ingest_payload(payload, &spec, &store, &IngestOptions::default())
            .await
            .unwrap();

        assert_eq!(report.committed, 2);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_keyed_map_source_both_channels() {
        let payload = r#"{
            "AK-47 | Redline (Field-Tested)": {"starting_at": {"price": 12.5}, "highest_order": {"price": 10.0}},
            "★ Karambit | Doppler (Phase 2) (Factory New)": {"starting_at": {"price": 900.0}}
        }"#
        .as_bytes();
        let spec = SourceSpec::buff163("unused".into());
        let store = RecordingStore::default();
        let report = ingest_payload(payload, &spec, &store, &IngestOptions::default())
            .await
            .unwrap();

        assert_eq!(report.committed, 2);
        let rows = store.rows.lock().unwrap();
        let redline = rows
            .iter()
            .find(|r| r["item_key"] == serde_json::json!("AK-47 | Redline|Field-Tested"))
            .expect("redline row");
        assert_eq!(redline["price_buff163"], serde_json::json!(12.5));
        assert_eq!(redline["highest_offer_buff163"], serde_json::json!(10.0));
        let doppler = rows
            .iter()
            .find(|r| r["phase"] == serde_json::json!("Phase 2"))
            .expect("doppler row");
        assert_eq!(doppler["condition"], serde_json::json!("Factory New"));
    }

    #[tokio::test]
    async fn test_gzip_payload_decoded_transparently() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let plain = br#"[{"market_hash_name": "AK-47 | Redline (Field-Tested)", "min_price": 1250, "qty": 4}]"#;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(plain).unwrap();
        let payload = encoder.finish().unwrap();

        let spec = SourceSpec::csfloat("unused".into());
        let store = RecordingStore::default();
        let report = ingest_payload(&payload, &spec, &store, &IngestOptions::default())
            .await
            .unwrap();

        assert_eq!(report.committed, 1);
        let rows = store.rows.lock().unwrap();
        // min_price is declared minor-unit for csfloat.
        assert_eq!(rows[0]["price_csfloat"], serde_json::json!(12.5));
        assert_eq!(rows[0]["qty_csfloat"], serde_json::json!(4));
    }

    #[tokio::test]
    async fn test_records_without_usable_price_are_skipped() {
        let payload = br#"[
            {"market_hash_name": "AK-47 | Redline (Field-Tested)", "min_price": 1250},
            {"market_hash_name": "Priceless Thing", "min_price": null},
            {"min_price": 500}
        ]"#;
        let spec = SourceSpec::csfloat("unused".into());
        let store = RecordingStore::default();
        let report = ingest_payload(payload, &spec, &store, &IngestOptions::default())
            .await
            .unwrap();

        assert_eq!(report.raw_records, 3);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.committed, 1);
    }

    #[tokio::test]
    async fn test_flush_bound_emits_partitions() {
        let payload = br#"[
            {"market_hash_name": "A", "min_price": 100, "qty": 1},
            {"market_hash_name": "B", "min_price": 200, "qty": 1},
            {"market_hash_name": "C", "min_price": 300, "qty": 1}
        ]"#;
        let spec = SourceSpec::csfloat("unused".into());
        let store = RecordingStore::default();
        let opts = IngestOptions {
            flush_bound: Some(2),
            ..Default::default()
        };
        let report = ingest_payload(payload, &spec, &store, &opts).await.unwrap();

        assert_eq!(report.flushes, 1);
        assert_eq!(report.committed, 3);
    }

    #[tokio::test]
    async fn test_persist_failure_surfaces_committed_count() {
        let payload = br#"[
            {"market_hash_name": "A", "min_price": 100},
            {"market_hash_name": "B", "min_price": 200},
            {"market_hash_name": "C", "min_price": 300}
        ]"#;
        let spec = SourceSpec::csfloat("unused".into());
        let store = FlakyStore {
            succeed: 2,
            calls: AtomicUsize::new(0),
        };
        let opts = IngestOptions {
            chunk_size: 1,
            ..Default::default()
        };
        let err = ingest_payload(payload, &spec, &store, &opts)
            .await
            .unwrap_err();

        match err {
            IngestError::Persist {
                committed,
                chunks_applied,
                ..
            } => {
                assert_eq!(committed, 2);
                assert_eq!(chunks_applied, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unreadable_payload_is_fatal() {
        let spec = SourceSpec::csfloat("unused".into());
        let store = RecordingStore::default();
        let err = ingest_payload(b"plain text", &spec, &store, &IngestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::NoRecords { .. }));
        assert_eq!(err.committed(), 0);
    }
}
