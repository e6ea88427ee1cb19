//! Readers for the storefront's loosely typed payloads.
//!
//! The storefront API serializes nearly everything as strings: numeric
//! ids, money amounts, booleans. These helpers coerce record fields to
//! the shapes gateways work with, treating a missing key and a null the
//! same way.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use storelink_rpc::parse_remote_time;

/// List-call results as a slice of rows; anything that is not an array
/// reads as empty.
pub fn rows(value: &JsonValue) -> &[JsonValue] {
    value.as_array().map(Vec::as_slice).unwrap_or_default()
}

/// A string field, kept verbatim.
pub fn text<'a>(row: &'a JsonValue, key: &str) -> Option<&'a str> {
    row.get(key).and_then(JsonValue::as_str)
}

/// A field read as a string, accepting numbers. Remote ids arrive in
/// either shape depending on the API version.
pub fn string(row: &JsonValue, key: &str) -> Option<String> {
    match row.get(key) {
        Some(JsonValue::String(s)) => Some(s.clone()),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// A numeric field, accepting `"12.5000"` style strings.
pub fn number(row: &JsonValue, key: &str) -> Option<f64> {
    match row.get(key) {
        Some(JsonValue::Number(n)) => n.as_f64(),
        Some(JsonValue::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// An integer field, accepting strings and truncating floats.
pub fn integer(row: &JsonValue, key: &str) -> Option<i64> {
    match row.get(key) {
        Some(JsonValue::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(JsonValue::String(s)) => {
            let s = s.trim();
            s.parse().ok().or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

/// A boolean flag, accepting `"1"`, `1`, and `true`.
pub fn flag(row: &JsonValue, key: &str) -> bool {
    match row.get(key) {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0),
        Some(JsonValue::String(s)) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// A remote timestamp field.
pub fn time(row: &JsonValue, key: &str) -> Option<DateTime<Utc>> {
    text(row, key).and_then(parse_remote_time)
}

/// A scalar call result. Write calls answer with a bare id, a
/// single-element array, or nothing useful at all; empty strings count
/// as nothing.
pub fn scalar(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Array(items) => items.first().and_then(scalar),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_and_numbers_coerce_both_ways() {
        let row = json!({"entity_id": 4521, "increment_id": "100000123", "qty": "2.0000"});
        assert_eq!(string(&row, "entity_id").as_deref(), Some("4521"));
        assert_eq!(string(&row, "increment_id").as_deref(), Some("100000123"));
        assert_eq!(number(&row, "qty"), Some(2.0));
        assert_eq!(integer(&row, "qty"), Some(2));
        assert_eq!(integer(&row, "entity_id"), Some(4521));
        assert_eq!(string(&row, "missing"), None);
    }

    #[test]
    fn flags_accept_the_storefront_shapes() {
        let row = json!({"a": "1", "b": 1, "c": true, "d": "0", "e": null});
        assert!(flag(&row, "a"));
        assert!(flag(&row, "b"));
        assert!(flag(&row, "c"));
        assert!(!flag(&row, "d"));
        assert!(!flag(&row, "e"));
        assert!(!flag(&row, "missing"));
    }

    #[test]
    fn rows_read_non_arrays_as_empty() {
        assert_eq!(rows(&json!([1, 2])).len(), 2);
        assert!(rows(&json!({"result": []})).is_empty());
        assert!(rows(&JsonValue::Null).is_empty());
    }

    #[test]
    fn scalar_unwraps_the_write_result_shapes() {
        assert_eq!(scalar(&json!("100000321")).as_deref(), Some("100000321"));
        assert_eq!(scalar(&json!(["100000321"])).as_deref(), Some("100000321"));
        assert_eq!(scalar(&json!(4521)).as_deref(), Some("4521"));
        assert_eq!(scalar(&json!("")), None);
        assert_eq!(scalar(&json!([])), None);
        assert_eq!(scalar(&json!(false)), None);
        assert_eq!(scalar(&JsonValue::Null), None);
    }

    #[test]
    fn time_parses_the_remote_format() {
        let row = json!({"updated_at": "2026-03-01 10:15:00"});
        let parsed = time(&row, "updated_at").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-03-01T10:15:00+00:00");
        assert!(time(&row, "created_at").is_none());
    }
}
