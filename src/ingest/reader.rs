//! Structured record extraction
//!
//! Turns a decoded payload into a lazy, single-pass sequence of raw record
//! objects. The upstream exports are loosely specified: the same endpoint has
//! been observed serving a root array, an array nested under a wrapper key, a
//! name-keyed map, newline-delimited objects, and a CSV table. Strategies are
//! tried in the source's configured order over a fresh cursor each, and the
//! first one producing a record wins.

use serde_json::{Deserializer, Map, Value};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One raw listing as extracted from the payload
pub type RawRecord = Map<String, Value>;

/// Wrapper keys checked, in priority order, when the document root is an
/// object instead of an array.
pub const CONTAINER_KEYS: [&str; 4] = ["products", "data", "items", "result"];

/// Field names that mark an object as a listing record
pub const NAME_FIELDS: [&str; 4] = ["name_hash", "market_hash_name", "hash_name", "name"];

/// Field the keyed-map strategy injects the map key under
pub const KEYED_NAME_FIELD: &str = "market_hash_name";

/// Header contract for the tabular fallback
pub const TABLE_NAME_COLUMN: &str = "market_hash_name";
pub const TABLE_PRICE_COLUMN: &str = "price";
pub const TABLE_COUNT_COLUMN: &str = "market_product_count";

/// Payload shape-extraction strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeStrategy {
    /// Whole-payload parse: root array, wrapper key, or single record
    Document,
    /// Incremental root-array walk, tolerant of a truncated tail
    ArrayStream,
    /// Incremental walk of an array under a known wrapper key
    NestedArrayStream,
    /// Root object as a name-to-entry mapping, one record per pair
    KeyedMap,
    /// One JSON object per line, malformed lines skipped
    Lines,
    /// CSV with the name/price/count header contract
    Table,
}

/// Default strategy order for JSON sources without a known quirk
pub const DEFAULT_STRATEGIES: [ShapeStrategy; 5] = [
    ShapeStrategy::Document,
    ShapeStrategy::ArrayStream,
    ShapeStrategy::NestedArrayStream,
    ShapeStrategy::Lines,
    ShapeStrategy::Table,
];

/// Lazy, finite, single-pass record sequence produced by one strategy.
pub struct RecordStream<'a> {
    records: Box<dyn Iterator<Item = RawRecord> + Send + 'a>,
    strategy: ShapeStrategy,
    skipped: Arc<AtomicUsize>,
}

impl<'a> Iterator for RecordStream<'a> {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        self.records.next()
    }
}

impl RecordStream<'_> {
    /// The strategy that produced this stream
    pub fn strategy(&self) -> ShapeStrategy {
        self.strategy
    }

    /// Malformed lines/rows skipped so far by the line and table strategies
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }
}

/// Try each strategy in order against a fresh cursor; the first one that
/// yields a record wins. Partial consumption by a failed strategy never
/// affects the next attempt.
pub fn extract_records<'a>(
    payload: &'a [u8],
    strategies: &[ShapeStrategy],
) -> Option<RecordStream<'a>> {
    for &strategy in strategies {
        if let Some(stream) = open_strategy(payload, strategy) {
            return Some(stream);
        }
    }
    None
}

fn open_strategy(payload: &[u8], strategy: ShapeStrategy) -> Option<RecordStream<'_>> {
    let skipped = Arc::new(AtomicUsize::new(0));
    let mut records: Box<dyn Iterator<Item = RawRecord> + Send + '_> = match strategy {
        ShapeStrategy::Document => document_records(payload)?,
        ShapeStrategy::ArrayStream => array_stream(payload, 0)?,
        ShapeStrategy::NestedArrayStream => nested_array_stream(payload)?,
        ShapeStrategy::KeyedMap => keyed_map_records(payload)?,
        ShapeStrategy::Lines => line_records(payload, skipped.clone()),
        ShapeStrategy::Table => table_records(payload, skipped.clone())?,
    };
    // Success means at least one record extracted.
    let first = records.next()?;
    Some(RecordStream {
        records: Box::new(std::iter::once(first).chain(records)),
        strategy,
        skipped,
    })
}

type BoxedRecords<'a> = Box<dyn Iterator<Item = RawRecord> + Send + 'a>;

/// Strategy 1: parse the whole payload as one document and search it in
/// priority order: root array, wrapper key, single record.
fn document_records(payload: &[u8]) -> Option<BoxedRecords<'static>> {
    let root: Value = serde_json::from_slice(payload).ok()?;
    match root {
        Value::Array(items) => Some(Box::new(items.into_iter().filter_map(|v| match v {
            Value::Object(m) => Some(m),
            _ => None,
        }))),
        Value::Object(mut map) => {
            for key in CONTAINER_KEYS {
                match map.remove(key) {
                    Some(Value::Array(items)) => {
                        return Some(Box::new(items.into_iter().filter_map(|v| match v {
                            Value::Object(m) => Some(m),
                            _ => None,
                        })));
                    }
                    // Present but not an array: restore and keep probing.
                    Some(other) => {
                        map.insert(key.to_string(), other);
                    }
                    None => {}
                }
            }
            let has_name = NAME_FIELDS
                .iter()
                .any(|f| map.get(*f).map_or(false, Value::is_string));
            if has_name {
                Some(Box::new(std::iter::once(map)))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Strategy 2: walk a root-level array incrementally without requiring the
/// full document to be valid. Elements completed before a malformed tail are
/// yielded; the tail ends the stream without discarding them.
fn array_stream(payload: &[u8], from: usize) -> Option<BoxedRecords<'_>> {
    let bytes = payload.get(from..)?;
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace())?;
    if bytes[start] != b'[' {
        return None;
    }
    Some(Box::new(IncrementalArray {
        rest: &bytes[start + 1..],
        done: false,
    }))
}

struct IncrementalArray<'a> {
    rest: &'a [u8],
    done: bool,
}

impl<'a> Iterator for IncrementalArray<'a> {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        loop {
            if self.done {
                return None;
            }
            let skip = self
                .rest
                .iter()
                .position(|&b| !b.is_ascii_whitespace() && b != b',')
                .unwrap_or(self.rest.len());
            self.rest = &self.rest[skip..];
            match self.rest.first() {
                None | Some(b']') => {
                    self.done = true;
                    return None;
                }
                _ => {}
            }
            let mut elements = Deserializer::from_slice(self.rest).into_iter::<Value>();
            match elements.next() {
                Some(Ok(value)) => {
                    let consumed = elements.byte_offset();
                    self.rest = &self.rest[consumed..];
                    if let Value::Object(record) = value {
                        return Some(record);
                    }
                    // Non-object element: not a record, keep walking.
                }
                // Truncated or malformed tail: stop here, earlier elements
                // were already yielded.
                _ => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

/// Strategy 3: locate a known wrapper key and walk its array incrementally
/// with the same truncation tolerance as the root-array walk.
fn nested_array_stream(payload: &[u8]) -> Option<BoxedRecords<'_>> {
    for key in CONTAINER_KEYS {
        if let Some(pos) = find_container_array(payload, key) {
            if let Some(records) = array_stream(payload, pos) {
                return Some(records);
            }
        }
    }
    None
}

/// Find the byte offset of the `[` that opens `"key": [...]`.
fn find_container_array(payload: &[u8], key: &str) -> Option<usize> {
    let needle = format!("\"{key}\"");
    let needle = needle.as_bytes();
    let mut from = 0;
    while let Some(rel) = find_bytes(&payload[from..], needle) {
        let mut i = from + rel + needle.len();
        while payload.get(i).map_or(false, |b| b.is_ascii_whitespace()) {
            i += 1;
        }
        if payload.get(i) == Some(&b':') {
            let mut j = i + 1;
            while payload.get(j).map_or(false, |b| b.is_ascii_whitespace()) {
                j += 1;
            }
            if payload.get(j) == Some(&b'[') {
                return Some(j);
            }
        }
        from += rel + needle.len();
    }
    None
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Strategy 4: root object as a name-to-entry mapping. Each pair yields the
/// entry's fields with the key injected as the name field. Tolerates a
/// truncated tail like the array walks.
fn keyed_map_records(payload: &[u8]) -> Option<BoxedRecords<'_>> {
    let start = payload.iter().position(|b| !b.is_ascii_whitespace())?;
    if payload[start] != b'{' {
        return None;
    }
    Some(Box::new(KeyedMapEntries {
        rest: &payload[start + 1..],
        done: false,
    }))
}

struct KeyedMapEntries<'a> {
    rest: &'a [u8],
    done: bool,
}

impl<'a> KeyedMapEntries<'a> {
    fn skip(&mut self, also_commas: bool) {
        let skip = self
            .rest
            .iter()
            .position(|&b| !b.is_ascii_whitespace() && (!also_commas || b != b','))
            .unwrap_or(self.rest.len());
        self.rest = &self.rest[skip..];
    }
}

impl<'a> Iterator for KeyedMapEntries<'a> {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        loop {
            if self.done {
                return None;
            }
            self.skip(true);
            match self.rest.first() {
                None | Some(b'}') => {
                    self.done = true;
                    return None;
                }
                Some(b'"') => {}
                _ => {
                    self.done = true;
                    return None;
                }
            }
            let mut keys = Deserializer::from_slice(self.rest).into_iter::<String>();
            let key = match keys.next() {
                Some(Ok(k)) => k,
                _ => {
                    self.done = true;
                    return None;
                }
            };
            let consumed = keys.byte_offset();
            self.rest = &self.rest[consumed..];
            self.skip(false);
            if self.rest.first() != Some(&b':') {
                self.done = true;
                return None;
            }
            self.rest = &self.rest[1..];
            let mut values = Deserializer::from_slice(self.rest).into_iter::<Value>();
            match values.next() {
                Some(Ok(Value::Object(mut entry))) => {
                    let consumed = values.byte_offset();
                    self.rest = &self.rest[consumed..];
                    entry.insert(KEYED_NAME_FIELD.to_string(), Value::String(key));
                    return Some(entry);
                }
                Some(Ok(_)) => {
                    let consumed = values.byte_offset();
                    self.rest = &self.rest[consumed..];
                    // Non-object entry: not a record, keep walking.
                }
                _ => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

/// Strategy 5: one JSON object per line. Malformed lines are skipped and
/// counted, never fatal.
fn line_records(payload: &[u8], skipped: Arc<AtomicUsize>) -> BoxedRecords<'_> {
    Box::new(payload.split(|&b| b == b'\n').filter_map(move |line| {
        let line = trim_ascii(line);
        if line.is_empty() {
            return None;
        }
        match serde_json::from_slice::<Value>(line) {
            Ok(Value::Object(record)) => Some(record),
            _ => {
                skipped.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }))
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let Some((first, rest)) = bytes.split_first() {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let Some((last, rest)) = bytes.split_last() {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

/// Strategy 6: CSV with the three-column header contract. Rows with a
/// missing name or a non-numeric price are skipped and counted; the count
/// column passes through raw and unparseable counts resolve to zero later.
fn table_records(payload: &[u8], skipped: Arc<AtomicUsize>) -> Option<BoxedRecords<'_>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(Cursor::new(payload));
    let headers = reader.headers().ok()?.clone();
    let name_idx = headers.iter().position(|h| h == TABLE_NAME_COLUMN)?;
    let price_idx = headers.iter().position(|h| h == TABLE_PRICE_COLUMN)?;
    let count_idx = headers.iter().position(|h| h == TABLE_COUNT_COLUMN)?;
    Some(Box::new(reader.into_records().filter_map(move |row| {
        let row = match row {
            Ok(row) => row,
            Err(_) => {
                skipped.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        let name = row.get(name_idx).unwrap_or("").trim();
        let price = row.get(price_idx).unwrap_or("").trim();
        let count = row.get(count_idx).unwrap_or("").trim();
        if name.is_empty() || !is_numeric(price) {
            skipped.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let mut record = Map::new();
        record.insert(
            TABLE_NAME_COLUMN.to_string(),
            Value::String(name.to_string()),
        );
        record.insert(
            TABLE_PRICE_COLUMN.to_string(),
            Value::String(price.to_string()),
        );
        record.insert(
            TABLE_COUNT_COLUMN.to_string(),
            Value::String(count.to_string()),
        );
        Some(record)
    })))
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.replace(',', ".").parse::<f64>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(stream: RecordStream<'_>) -> Vec<String> {
        stream
            .map(|r| {
                r.get("market_hash_name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn test_document_root_array() {
        let payload = br#"[{"market_hash_name":"A"},{"market_hash_name":"B"},3]"#;
        let stream = extract_records(payload, &DEFAULT_STRATEGIES).unwrap();
        assert_eq!(stream.strategy(), ShapeStrategy::Document);
        assert_eq!(names(stream), ["A", "B"]);
    }

    #[test]
    fn test_document_container_key_priority() {
        let payload = br#"{"meta":1,"data":[{"market_hash_name":"A"}],"items":[{"market_hash_name":"X"}]}"#;
        let stream = extract_records(payload, &DEFAULT_STRATEGIES).unwrap();
        assert_eq!(names(stream), ["A"]);
    }

    #[test]
    fn test_document_non_array_container_is_skipped() {
        let payload = br#"{"products":"n/a","items":[{"market_hash_name":"A"}]}"#;
        let stream = extract_records(payload, &DEFAULT_STRATEGIES).unwrap();
        assert_eq!(names(stream), ["A"]);
    }

    #[test]
    fn test_document_single_record_with_name_field() {
        let payload = br#"{"market_hash_name":"A","price":1.5}"#;
        let stream = extract_records(payload, &DEFAULT_STRATEGIES).unwrap();
        assert_eq!(names(stream), ["A"]);
    }

    #[test]
    fn test_truncated_array_yields_complete_prefix() {
        let payload = br#"[{"market_hash_name":"A"},{"market_hash_name":"B"},{"market_ha"#;
        let stream = extract_records(payload, &DEFAULT_STRATEGIES).unwrap();
        assert_eq!(stream.strategy(), ShapeStrategy::ArrayStream);
        assert_eq!(names(stream), ["A", "B"]);
    }

    #[test]
    fn test_truncated_nested_array() {
        let payload = br#"{"products": [{"market_hash_name":"A"}, {"market_hash_name":"B"}, {"truncat"#;
        let stream = extract_records(payload, &DEFAULT_STRATEGIES).unwrap();
        assert_eq!(stream.strategy(), ShapeStrategy::NestedArrayStream);
        assert_eq!(names(stream), ["A", "B"]);
    }

    #[test]
    fn test_keyed_map_injects_name() {
        let payload = br#"{"AK-47 | Redline (Field-Tested)": {"starting_at": {"price": 12.5}},
                           "AWP | Asiimov (Field-Tested)": {"starting_at": {"price": 60.0}}}"#;
        let stream = extract_records(payload, &[ShapeStrategy::KeyedMap]).unwrap();
        let records: Vec<RawRecord> = stream.collect();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].get("market_hash_name").and_then(Value::as_str),
            Some("AK-47 | Redline (Field-Tested)")
        );
        assert!(records[0].contains_key("starting_at"));
    }

    #[test]
    fn test_keyed_map_truncated_tail_keeps_complete_pairs() {
        let payload = br#"{"A": {"starting_at": {"price": 1}}, "B": {"starting_a"#;
        let stream = extract_records(payload, &[ShapeStrategy::KeyedMap]).unwrap();
        assert_eq!(names(stream), ["A"]);
    }

    #[test]
    fn test_lines_skips_and_counts_malformed() {
        let payload = b"{\"market_hash_name\":\"A\"}\nnot json\n{\"market_hash_name\":\"B\"}\n";
        let mut stream = extract_records(payload, &[ShapeStrategy::Lines]).unwrap();
        let collected: Vec<RawRecord> = stream.by_ref().collect();
        assert_eq!(collected.len(), 2);
        assert_eq!(stream.skipped(), 1);
    }

    #[test]
    fn test_table_skips_bad_rows_without_aborting() {
        let payload = b"market_hash_name,price,market_product_count\n\
                        AK-47 | Redline (Field-Tested),12.50,3\n\
                        Broken Row,not-a-price,9\n\
                        AWP | Asiimov (Field-Tested),\"60,25\",1\n";
        let mut stream = extract_records(payload, &[ShapeStrategy::Table]).unwrap();
        let collected: Vec<RawRecord> = stream.by_ref().collect();
        assert_eq!(collected.len(), 2);
        assert_eq!(stream.skipped(), 1);
        assert_eq!(
            collected[1].get("price").and_then(Value::as_str),
            Some("60,25")
        );
    }

    #[test]
    fn test_table_requires_header_contract() {
        let payload = b"name,cost\nAK,1.0\n";
        assert!(extract_records(payload, &[ShapeStrategy::Table]).is_none());
    }

    #[test]
    fn test_strategy_escalation_on_invalid_document() {
        // Whole-payload parse fails on the trailing garbage; the incremental
        // walk still recovers the leading records.
        let payload = br#"[{"market_hash_name":"A"}] trailing garbage"#;
        let stream = extract_records(payload, &DEFAULT_STRATEGIES).unwrap();
        assert_eq!(stream.strategy(), ShapeStrategy::ArrayStream);
        assert_eq!(names(stream), ["A"]);
    }

    #[test]
    fn test_no_strategy_matches() {
        assert!(extract_records(b"plain text, nothing structured", &DEFAULT_STRATEGIES).is_none());
    }
}
