//! Core types used throughout Skinfeed
//!
//! Defines the structured item identity and the canonical per-variant record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Delimiter used when joining identity-key components. Item names only
/// ever carry the spaced `" | "` form, so bare-delimiter component
/// boundaries stay unambiguous.
pub const KEY_DELIMITER: char = '|';

/// Wear condition tiers, encoded as a parenthetical suffix on item names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Wear {
    FactoryNew,
    MinimalWear,
    FieldTested,
    WellWorn,
    BattleScarred,
}

impl Wear {
    /// Suffix detection order. First match wins.
    pub const ALL: [Wear; 5] = [
        Wear::FactoryNew,
        Wear::MinimalWear,
        Wear::FieldTested,
        Wear::WellWorn,
        Wear::BattleScarred,
    ];

    /// The label as it appears in marketplace names
    pub fn label(&self) -> &'static str {
        match self {
            Wear::FactoryNew => "Factory New",
            Wear::MinimalWear => "Minimal Wear",
            Wear::FieldTested => "Field-Tested",
            Wear::WellWorn => "Well-Worn",
            Wear::BattleScarred => "Battle-Scarred",
        }
    }
}

impl fmt::Display for Wear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Named sub-variant tokens appended to certain items (Doppler gems/phases).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Ruby,
    Sapphire,
    BlackPearl,
    Emerald,
    Phase1,
    Phase2,
    Phase3,
    Phase4,
}

impl Phase {
    /// Substring detection order. This is a total order: a name containing
    /// several tokens resolves to the earliest entry here, so gem names take
    /// precedence over numbered phases.
    pub const ALL: [Phase; 8] = [
        Phase::Ruby,
        Phase::Sapphire,
        Phase::BlackPearl,
        Phase::Emerald,
        Phase::Phase1,
        Phase::Phase2,
        Phase::Phase3,
        Phase::Phase4,
    ];

    /// The token as it appears in marketplace names (case sensitive)
    pub fn token(&self) -> &'static str {
        match self {
            Phase::Ruby => "Ruby",
            Phase::Sapphire => "Sapphire",
            Phase::BlackPearl => "Black Pearl",
            Phase::Emerald => "Emerald",
            Phase::Phase1 => "Phase 1",
            Phase::Phase2 => "Phase 2",
            Phase::Phase3 => "Phase 3",
            Phase::Phase4 => "Phase 4",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Structured identity of one tradable item variant.
///
/// Equality over the five fields defines variant identity; the derived
/// [`item_key`](ItemIdentity::item_key) is the aggregation and storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemIdentity {
    pub base: String,
    pub stattrak: bool,
    pub souvenir: bool,
    pub wear: Option<Wear>,
    pub phase: Option<Phase>,
}

impl ItemIdentity {
    /// Derive the identity key: fixed field order, absent components omitted
    /// entirely rather than encoded as empty placeholders.
    pub fn item_key(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(5);
        if !self.base.is_empty() {
            parts.push(&self.base);
        }
        if self.stattrak {
            parts.push("StatTrak");
        }
        if self.souvenir {
            parts.push("Souvenir");
        }
        if let Some(wear) = self.wear {
            parts.push(wear.label());
        }
        if let Some(phase) = self.phase {
            parts.push(phase.token());
        }
        let mut key = String::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                key.push(KEY_DELIMITER);
            }
            key.push_str(part);
        }
        key
    }

    /// Rebuild a human-facing name from the structured identity.
    pub fn display_name(&self) -> String {
        let mut name = self.base.clone();
        if self.stattrak {
            name = match name.strip_prefix("★ ") {
                Some(rest) => format!("★ StatTrak™ {rest}"),
                None => format!("StatTrak™ {name}"),
            };
        }
        if self.souvenir && !self.stattrak {
            name = format!("Souvenir {name}");
        }
        if let Some(wear) = self.wear {
            name = format!("{name} ({})", wear.label());
        }
        if let Some(phase) = self.phase {
            name = format!("{name} – {}", phase.token());
        }
        name
    }
}

impl fmt::Display for ItemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.item_key())
    }
}

/// Storage column names for one source's price/quantity channels.
///
/// Each marketplace writes its own columns; rows from different sources
/// sharing an `item_key` merge only at the storage layer.
#[derive(Debug, Clone, Copy)]
pub struct StorageColumns {
    /// Lowest listing (ask) price column
    pub ask: &'static str,
    /// Highest buy-order (bid) price column, for sources that publish one
    pub bid: Option<&'static str>,
    /// Listing count column, for sources that publish one
    pub qty: Option<&'static str>,
}

/// One canonical, deduplicated record per item variant within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub key: String,
    pub identity: ItemIdentity,
    /// Lowest listing price seen for this variant (major units)
    pub ask: Option<f64>,
    /// Highest buy-order price seen for this variant (major units)
    pub bid: Option<f64>,
    /// Total listing count across merged duplicates
    pub qty: u64,
    /// Capture timestamp, fixed once per pipeline run
    pub fetched_at: DateTime<Utc>,
}

impl CanonicalRecord {
    /// Serialize to an upsert row using the source's column names.
    pub fn to_row(&self, columns: &StorageColumns) -> Value {
        let mut row = serde_json::Map::new();
        row.insert("item_key".into(), json!(self.key));
        row.insert("name_base".into(), json!(self.identity.base));
        row.insert("stattrak".into(), json!(self.identity.stattrak));
        row.insert("souvenir".into(), json!(self.identity.souvenir));
        row.insert(
            "condition".into(),
            json!(self.identity.wear.map(|w| w.label())),
        );
        row.insert("phase".into(), json!(self.identity.phase.map(|p| p.token())));
        row.insert(columns.ask.into(), json!(self.ask));
        if let Some(bid_col) = columns.bid {
            row.insert(bid_col.into(), json!(self.bid));
        }
        if let Some(qty_col) = columns.qty {
            row.insert(qty_col.into(), json!(self.qty));
        }
        row.insert("fetched_at".into(), json!(self.fetched_at.to_rfc3339()));
        Value::Object(row)
    }
}
