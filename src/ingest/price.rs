//! Price and quantity normalization
//!
//! Upstream prices arrive as text with either decimal separator, as floats,
//! or as minor-unit (cent) integers. Everything is normalized to a major-unit
//! amount before aggregation.

use serde_json::{Map, Value};

/// Field-name suffix marking a minor-unit (cent) encoded price
pub const MINOR_UNIT_SUFFIX: &str = "_cents";

/// Integers at or above this are assumed minor-unit encoded even without a
/// field marker. Known false positive: a legitimately high-value item priced
/// as a whole number of dollars.
pub const MINOR_UNIT_INT_THRESHOLD: i64 = 1000;

/// Convert a raw price value plus its originating field name into a
/// major-unit amount, or `None` when unparseable.
pub fn to_major_units(raw: &Value, field: &str, minor_unit_fields: &[&str]) -> Option<f64> {
    let minor_marked =
        field.ends_with(MINOR_UNIT_SUFFIX) || minor_unit_fields.contains(&field);
    match raw {
        Value::String(s) => {
            let parsed: f64 = s.trim().replace(',', ".").parse().ok()?;
            Some(if minor_marked { parsed / 100.0 } else { parsed })
        }
        Value::Number(n) => {
            if let Some(int) = n.as_i64() {
                let value = int as f64;
                if minor_marked || int >= MINOR_UNIT_INT_THRESHOLD {
                    Some(value / 100.0)
                } else {
                    Some(value)
                }
            } else {
                let value = n.as_f64()?;
                Some(if minor_marked { value / 100.0 } else { value })
            }
        }
        _ => None,
    }
}

/// Probe the candidate fields in priority order; the first one yielding a
/// valid, strictly positive amount wins and the rest are ignored.
///
/// Candidates may be dotted paths (`starting_at.price`) into nested channel
/// objects; the minor-unit field check applies to the leaf name.
pub fn probe_price(
    record: &Map<String, Value>,
    candidates: &[&str],
    minor_unit_fields: &[&str],
) -> Option<f64> {
    for path in candidates {
        let Some(raw) = lookup(record, path) else {
            continue;
        };
        if raw.is_null() {
            continue;
        }
        let leaf = path.rsplit('.').next().unwrap_or(path);
        if let Some(amount) = to_major_units(raw, leaf, minor_unit_fields) {
            if amount > 0.0 {
                return Some(amount);
            }
        }
    }
    None
}

/// Resolve a listing count: the first present candidate field parses to a
/// count (unparseable values resolve to zero); a record carrying none of the
/// fields gets the source's fallback.
pub fn probe_qty(record: &Map<String, Value>, candidates: &[&str], fallback: u64) -> u64 {
    for field in candidates {
        let Some(raw) = record.get(*field) else {
            continue;
        };
        return match raw {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .unwrap_or(0),
            Value::String(s) => s.trim().parse::<u64>().unwrap_or(0),
            _ => 0,
        };
    }
    fallback
}

fn lookup<'a>(record: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = record.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
