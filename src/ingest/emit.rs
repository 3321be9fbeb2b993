//! Chunked batch emission
//!
//! Drains an aggregation table (or flush partition) to the persistence
//! collaborator in fixed-size chunks. A failed chunk stops the flush and
//! surfaces how much was applied; retry policy, if any, belongs to the
//! caller.

use thiserror::Error;

use crate::persistence::MarketStore;
use crate::types::{CanonicalRecord, StorageColumns};

/// Default upsert chunk size
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// A chunk upsert failed partway through a flush.
#[derive(Debug, Error)]
#[error("upsert failed after {chunks_applied} chunk(s), {rows_applied} row(s) applied: {cause}")]
pub struct EmitFailure {
    pub chunks_applied: usize,
    pub rows_applied: usize,
    pub cause: anyhow::Error,
}

/// Upsert `records` in chunks of `chunk_size`, serialized with the source's
/// column names. Returns the number of rows applied.
pub async fn emit_in_chunks(
    store: &dyn MarketStore,
    columns: &StorageColumns,
    records: &[CanonicalRecord],
    chunk_size: usize,
) -> Result<usize, EmitFailure> {
    let rows: Vec<serde_json::Value> = records.iter().map(|r| r.to_row(columns)).collect();
    let mut chunks_applied = 0;
    let mut rows_applied = 0;
    for chunk in rows.chunks(chunk_size.max(1)) {
        store
            .upsert_batch(chunk.to_vec())
            .await
            .map_err(|cause| EmitFailure {
                chunks_applied,
                rows_applied,
                cause,
            })?;
        chunks_applied += 1;
        rows_applied += chunk.len();
    }
    Ok(rows_applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MockMarketStore;
    use crate::types::ItemIdentity;
    use anyhow::anyhow;
    use chrono::Utc;

    fn records(n: usize) -> Vec<CanonicalRecord> {
        (0..n)
            .map(|i| {
                let identity = ItemIdentity {
                    base: format!("Item {i}"),
                    stattrak: false,
                    souvenir: false,
                    wear: None,
                    phase: None,
                };
                CanonicalRecord {
                    key: identity.item_key(),
                    identity,
                    ask: Some(1.0 + i as f64),
                    bid: None,
                    qty: 1,
                    fetched_at: Utc::now(),
                }
            })
            .collect()
    }

    const COLUMNS: StorageColumns = StorageColumns {
        ask: "price_test",
        bid: None,
        qty: Some("qty_test"),
    };

    #[tokio::test]
    async fn test_emits_in_fixed_size_chunks() {
        let mut store = MockMarketStore::new();
        store
            .expect_upsert_batch()
            .times(3)
            .withf(|rows| rows.len() <= 4)
            .returning(|_| Ok(()));
        let applied = emit_in_chunks(&store, &COLUMNS, &records(10), 4)
            .await
            .unwrap();
        assert_eq!(applied, 10);
    }

    #[tokio::test]
    async fn test_failure_reports_applied_counts() {
        let mut store = MockMarketStore::new();
        let mut calls = 0;
        store.expect_upsert_batch().returning(move |_| {
            calls += 1;
            if calls <= 2 {
                Ok(())
            } else {
                Err(anyhow!("persistence unavailable"))
            }
        });
        let err = emit_in_chunks(&store, &COLUMNS, &records(10), 4)
            .await
            .unwrap_err();
        assert_eq!(err.chunks_applied, 2);
        assert_eq!(err.rows_applied, 8);
    }

    #[tokio::test]
    async fn test_empty_table_emits_nothing() {
        let mut store = MockMarketStore::new();
        store.expect_upsert_batch().times(0);
        let applied = emit_in_chunks(&store, &COLUMNS, &[], 4).await.unwrap();
        assert_eq!(applied, 0);
    }
}
