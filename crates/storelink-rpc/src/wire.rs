//! Wire-format helpers shared by the storefront call sites.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{json, Value as JsonValue};

/// Timestamp layout used by the storefront, in its own clock.
pub const REMOTE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render a timestamp the way the storefront expects it.
#[must_use]
pub fn format_remote_time(time: DateTime<Utc>) -> String {
    time.format(REMOTE_TIME_FORMAT).to_string()
}

/// Parse a storefront timestamp. Returns `None` for anything malformed.
#[must_use]
pub fn parse_remote_time(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), REMOTE_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Builder for the storefront's `complex_filter` search parameter.
#[derive(Debug, Clone, Default)]
pub struct ComplexFilter {
    conditions: Vec<(String, String, String)>,
}

impl ComplexFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cursor filter used by every retrieval pass.
    #[must_use]
    pub fn updated_since(since: DateTime<Utc>) -> Self {
        Self::new().condition("updated_at", "gt", format_remote_time(since))
    }

    #[must_use]
    pub fn condition(
        mut self,
        field: impl Into<String>,
        op: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.conditions.push((field.into(), op.into(), value.into()));
        self
    }

    /// The filter as the first positional call parameter.
    #[must_use]
    pub fn to_value(&self) -> JsonValue {
        let conditions: Vec<JsonValue> = self
            .conditions
            .iter()
            .map(|(field, op, value)| {
                json!({
                    "key": field,
                    "value": {"key": op, "value": value},
                })
            })
            .collect();
        json!({ "complex_filter": conditions })
    }
}
