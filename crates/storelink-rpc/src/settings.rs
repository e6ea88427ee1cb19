//! Client-side RPC settings.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_timeout_secs() -> u64 {
    30
}

/// Deadlines applied locally around storefront calls.
///
/// Some calls are structurally slow (full catalog listings, bulk stock
/// reads), so the default can be overridden per method name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSettings {
    /// Deadline for any call without a specific override, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Per-method deadline overrides, in seconds.
    #[serde(default)]
    pub call_timeout_secs: HashMap<String, u64>,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            call_timeout_secs: HashMap::new(),
        }
    }
}

impl RpcSettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_default_timeout(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_call_timeout(mut self, method: impl Into<String>, secs: u64) -> Self {
        self.call_timeout_secs.insert(method.into(), secs);
        self
    }

    /// The deadline for one method.
    #[must_use]
    pub fn timeout_for(&self, method: &str) -> Duration {
        let secs = self
            .call_timeout_secs
            .get(method)
            .copied()
            .unwrap_or(self.default_timeout_secs);
        Duration::from_secs(secs)
    }
}
