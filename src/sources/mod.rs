//! Marketplace source registry
//!
//! One `SourceSpec` per marketplace collapses the per-source pipelines into
//! configuration: where to fetch, which payload shapes to try, where the
//! name/price/quantity live in a raw record, and which storage columns the
//! source owns. The pipeline itself is generic over the spec.

use crate::ingest::reader::ShapeStrategy;
use crate::types::StorageColumns;

/// Everything the generic pipeline needs to ingest one marketplace.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub name: &'static str,
    pub url: String,
    pub accept: &'static str,
    /// Environment variable holding an optional bearer token
    pub bearer_env: Option<&'static str>,
    /// Shape-extraction strategies, tried in order
    pub strategies: &'static [ShapeStrategy],
    /// Raw fields probed, in order, for the listing name
    pub name_fields: &'static [&'static str],
    /// Raw fields probed, in order, for the ask (lowest listing) price
    pub ask_fields: &'static [&'static str],
    /// Raw fields probed, in order, for the bid (highest order) price
    pub bid_fields: &'static [&'static str],
    /// Fields known to carry minor-unit (cent) prices without a suffix
    pub minor_unit_fields: &'static [&'static str],
    /// Raw fields probed for the listing count
    pub qty_fields: &'static [&'static str],
    /// Count assigned when a record carries no quantity field
    pub default_qty: u64,
    pub columns: StorageColumns,
}

impl SourceSpec {
    /// CSFloat price list: JSON array of `{market_hash_name, min_price, qty}`
    /// with `min_price` in cents.
    pub fn csfloat(url: String) -> Self {
        Self {
            name: "csfloat",
            url,
            accept: "application/json",
            bearer_env: None,
            strategies: &[
                ShapeStrategy::Document,
                ShapeStrategy::ArrayStream,
                ShapeStrategy::Lines,
            ],
            name_fields: &["market_hash_name"],
            ask_fields: &["min_price"],
            bid_fields: &[],
            minor_unit_fields: &["min_price"],
            qty_fields: &["qty"],
            default_qty: 0,
            columns: StorageColumns {
                ask: "price_csfloat",
                bid: None,
                qty: Some("qty_csfloat"),
            },
        }
    }

    /// Buff163 via the csgotrader export: a name-keyed map of
    /// `{starting_at: {price}, highest_order: {price}}` entries. Both
    /// channels are present; the export carries no listing counts. The
    /// misspelled `highets_offer` key has been observed in the wild.
    pub fn buff163(url: String) -> Self {
        Self {
            name: "buff163",
            url,
            accept: "application/json",
            bearer_env: None,
            strategies: &[ShapeStrategy::KeyedMap],
            name_fields: &["market_hash_name"],
            ask_fields: &["starting_at.price", "startingAt.price"],
            bid_fields: &[
                "highest_order.price",
                "highets_offer.price",
                "highestOrder.price",
            ],
            minor_unit_fields: &[],
            qty_fields: &[],
            default_qty: 0,
            columns: StorageColumns {
                ask: "price_buff163",
                bid: Some("highest_offer_buff163"),
                qty: None,
            },
        }
    }

    /// WhiteMarket price export: CSV of name/price/count (primary), with the
    /// JSON product-export shapes kept as fallbacks for when the URL points
    /// at the products endpoint instead.
    pub fn whitemarket(url: String) -> Self {
        Self {
            name: "whitemarket",
            url,
            accept: "text/csv",
            bearer_env: Some("WHITEMARKET_API_TOKEN"),
            strategies: &[
                ShapeStrategy::Table,
                ShapeStrategy::Document,
                ShapeStrategy::ArrayStream,
                ShapeStrategy::NestedArrayStream,
                ShapeStrategy::Lines,
            ],
            name_fields: &["name_hash", "market_hash_name", "hash_name", "name"],
            ask_fields: &["price", "price_usd", "price_cents", "amount", "value"],
            bid_fields: &[],
            minor_unit_fields: &[],
            qty_fields: &["market_product_count", "qty"],
            default_qty: 1,
            columns: StorageColumns {
                ask: "price_whitemarket",
                bid: None,
                qty: Some("qty_whitemarket"),
            },
        }
    }

    /// Bearer token resolved from the environment, if configured and set.
    pub fn bearer(&self) -> Option<String> {
        self.bearer_env.and_then(|var| std::env::var(var).ok())
    }
}
