//! Attribute values and attribute maps.
//!
//! Remote payloads arrive as loosely typed JSON (the storefront encodes most
//! numbers as strings), so the accessors coerce where that is safe.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// A single attribute value, single or multi-valued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// No value (null).
    Null,
    /// A single string value.
    String(String),
    /// A single integer value.
    Integer(i64),
    /// A single floating-point value.
    Float(f64),
    /// A single boolean value.
    Boolean(bool),
    /// Multiple values.
    Array(Vec<AttributeValue>),
    /// Nested key/value data (payment maps, raw payload fragments).
    Object(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Get as a string if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as an integer, coercing numeric strings and floats.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            AttributeValue::Float(f) => Some(*f as i64),
            AttributeValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get as a float, coercing integers and numeric strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(f) => Some(*f),
            AttributeValue::Integer(i) => Some(*i as f64),
            AttributeValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get as a boolean, coercing the storefront's `"1"`/`"0"` flags.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(b) => Some(*b),
            AttributeValue::Integer(i) => Some(*i != 0),
            AttributeValue::String(s) => match s.as_str() {
                "1" | "true" => Some(true),
                "0" | "false" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Get as an array if this is multi-valued.
    pub fn as_array(&self) -> Option<&[AttributeValue]> {
        match self {
            AttributeValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Get as a nested object.
    pub fn as_object(&self) -> Option<&BTreeMap<String, AttributeValue>> {
        match self {
            AttributeValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Convert a JSON value into an attribute value.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => AttributeValue::Null,
            JsonValue::Bool(b) => AttributeValue::Boolean(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    AttributeValue::Integer(i)
                } else {
                    AttributeValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => AttributeValue::String(s),
            JsonValue::Array(arr) => {
                AttributeValue::Array(arr.into_iter().map(Self::from_json).collect())
            }
            JsonValue::Object(map) => AttributeValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert back into a JSON value.
    pub fn to_json(&self) -> JsonValue {
        match self {
            AttributeValue::Null => JsonValue::Null,
            AttributeValue::String(s) => JsonValue::String(s.clone()),
            AttributeValue::Integer(i) => JsonValue::from(*i),
            AttributeValue::Float(f) => {
                serde_json::Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number)
            }
            AttributeValue::Boolean(b) => JsonValue::Bool(*b),
            AttributeValue::Array(arr) => {
                JsonValue::Array(arr.iter().map(AttributeValue::to_json).collect())
            }
            AttributeValue::Object(map) => JsonValue::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

impl From<i32> for AttributeValue {
    fn from(i: i32) -> Self {
        AttributeValue::Integer(i64::from(i))
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Float(f)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(vec: Vec<T>) -> Self {
        AttributeValue::Array(vec.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(AttributeValue::Null, Into::into)
    }
}

/// A named set of attribute values carried by an entity or a payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeMap {
    #[serde(flatten)]
    attributes: BTreeMap<String, AttributeValue>,
}

impl AttributeMap {
    /// Create a new empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Set an attribute using builder pattern.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Get an attribute value.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Get a string attribute.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttributeValue::as_str)
    }

    /// Get an integer attribute (with string coercion).
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(AttributeValue::as_i64)
    }

    /// Get a float attribute (with string coercion).
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(AttributeValue::as_f64)
    }

    /// Get a boolean attribute (with flag coercion).
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(AttributeValue::as_bool)
    }

    /// Check if an attribute is present (a stored null counts as present).
    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Check if an attribute is present with a non-null value.
    pub fn has_value(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| !v.is_null())
    }

    /// Remove an attribute.
    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(name)
    }

    /// Merge another map into this one, overwriting on conflict.
    pub fn merge(&mut self, other: AttributeMap) {
        self.attributes.extend(other.attributes);
    }

    /// Merge only the keys this map does not have yet.
    pub fn merge_missing(&mut self, other: AttributeMap) {
        for (key, value) in other.attributes {
            self.attributes.entry(key).or_insert(value);
        }
    }

    /// Get all attribute names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Iterate over all attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.attributes.iter()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Check if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Build a map from a JSON object; non-object values yield an empty map.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Object(map) => Self {
                attributes: map
                    .into_iter()
                    .map(|(k, v)| (k, AttributeValue::from_json(v)))
                    .collect(),
            },
            _ => Self::new(),
        }
    }

    /// Convert into a JSON object.
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, AttributeValue)> for AttributeMap {
    fn from_iter<T: IntoIterator<Item = (String, AttributeValue)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_coercion() {
        let value = AttributeValue::String("12.5000".to_string());
        assert_eq!(value.as_f64(), Some(12.5));
        assert_eq!(AttributeValue::String("42".into()).as_i64(), Some(42));
        assert_eq!(AttributeValue::String("1".into()).as_bool(), Some(true));
        assert_eq!(AttributeValue::String("0".into()).as_bool(), Some(false));
    }

    #[test]
    fn test_map_accessors() {
        let map = AttributeMap::new()
            .with("sku", "ABC-1")
            .with("qty", 3i64)
            .with("price", 19.99);

        assert_eq!(map.get_str("sku"), Some("ABC-1"));
        assert_eq!(map.get_i64("qty"), Some(3));
        assert_eq!(map.get_f64("price"), Some(19.99));
        assert_eq!(map.get_f64("qty"), Some(3.0));
        assert!(!map.has("missing"));
    }

    #[test]
    fn test_null_presence() {
        let map = AttributeMap::new().with("grand_total", AttributeValue::Null);
        assert!(map.has("grand_total"));
        assert!(!map.has_value("grand_total"));
    }

    #[test]
    fn test_from_json() {
        let map = AttributeMap::from_json(json!({
            "increment_id": "100000123",
            "base_grand_total": "59.9000",
            "items": [{"sku": "A", "qty_ordered": "2.0000"}],
        }));

        assert_eq!(map.get_str("increment_id"), Some("100000123"));
        assert_eq!(map.get_f64("base_grand_total"), Some(59.9));
        let items = map.get("items").and_then(AttributeValue::as_array).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_merge_missing() {
        let mut info = AttributeMap::new().with("status", "processing");
        let list = AttributeMap::new()
            .with("status", "pending")
            .with("store_id", 1i64);

        info.merge_missing(list);
        assert_eq!(info.get_str("status"), Some("processing"));
        assert_eq!(info.get_i64("store_id"), Some(1));
    }

    #[test]
    fn test_json_roundtrip() {
        let map = AttributeMap::new()
            .with("name", "Widget")
            .with("enabled", true)
            .with("price", 10.5);

        let back = AttributeMap::from_json(map.to_json());
        assert_eq!(back, map);
    }
}
