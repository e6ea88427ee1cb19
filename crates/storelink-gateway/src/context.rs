//! Node configuration and the shared context handed to gateways.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use storelink_entity::EntityStore;
use storelink_rpc::RpcClient;
use uuid::Uuid;

use crate::error::SyncFault;

fn default_api_overlap_secs() -> i64 {
    90
}

fn default_new_min() -> i64 {
    100_000_000
}

fn default_new_max() -> i64 {
    200_000_000
}

fn default_legacy_floor() -> i64 {
    200_048_293
}

fn default_refund_retry_cutover() -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(2017, 4, 4, 23, 0, 0).single()
}

/// Order increment-id bands that decide retrieval eligibility.
///
/// Ids strictly inside `(new_min, new_max)` belong to this channel and
/// are always eligible. Ids above `legacy_floor` predate the band split
/// but are still owned here. Ids above `new_max` that fall below the
/// floor are foreign, and only picked up while still open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIdBands {
    #[serde(default = "default_new_min")]
    pub new_min: i64,
    #[serde(default = "default_new_max")]
    pub new_max: i64,
    #[serde(default = "default_legacy_floor")]
    pub legacy_floor: i64,
}

impl Default for OrderIdBands {
    fn default() -> Self {
        Self {
            new_min: default_new_min(),
            new_max: default_new_max(),
            legacy_floor: default_legacy_floor(),
        }
    }
}

impl OrderIdBands {
    pub fn validate(&self) -> Result<(), SyncFault> {
        if self.new_min >= self.new_max {
            return Err(SyncFault::configuration(format!(
                "order id bands: new_min {} must be below new_max {}",
                self.new_min, self.new_max
            )));
        }
        if self.legacy_floor < self.new_max {
            return Err(SyncFault::configuration(format!(
                "order id bands: legacy_floor {} must not be below new_max {}",
                self.legacy_floor, self.new_max
            )));
        }
        Ok(())
    }
}

/// Per-node sync configuration.
///
/// Time deltas compensate for storefronts whose clocks run in local
/// time: they shift the retrieval window start by whole hours. The
/// overlap widens every window backwards so records committed close to
/// the previous cursor are seen twice rather than never.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Mirror remote store scopes instead of collapsing to scope 0.
    #[serde(default)]
    pub multi_store: bool,
    /// Storefront exposes enterprise attributes (store credit, gift wrap).
    #[serde(default)]
    pub enterprise: bool,
    /// Fetch extra per-customer attributes and addresses on retrieval.
    #[serde(default)]
    pub load_full_customer: bool,
    /// Fetch full product info instead of trusting the list payload.
    #[serde(default)]
    pub load_full_product: bool,
    /// Enable stock level retrieval.
    #[serde(default)]
    pub load_stock: bool,
    #[serde(default = "default_api_overlap_secs")]
    pub api_overlap_secs: i64,
    /// Hours added to remote order timestamps to reach UTC.
    #[serde(default)]
    pub time_correction_order: i64,
    /// Hours added to the customer retrieval window start.
    #[serde(default)]
    pub time_delta_customer: i64,
    /// Hours added to the product retrieval window start.
    #[serde(default)]
    pub time_delta_product: i64,
    #[serde(default)]
    pub customer_attributes: Vec<String>,
    #[serde(default)]
    pub product_attributes: Vec<String>,
    #[serde(default)]
    pub order_id_bands: OrderIdBands,
    /// Refunds on orders placed before this instant may retry once with
    /// the store-credit portion folded into the negative adjustment.
    #[serde(default = "default_refund_retry_cutover")]
    pub refund_retry_cutover: Option<DateTime<Utc>>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            multi_store: false,
            enterprise: false,
            load_full_customer: false,
            load_full_product: false,
            load_stock: false,
            api_overlap_secs: default_api_overlap_secs(),
            time_correction_order: 0,
            time_delta_customer: 0,
            time_delta_product: 0,
            customer_attributes: Vec::new(),
            product_attributes: Vec::new(),
            order_id_bands: OrderIdBands::default(),
            refund_retry_cutover: default_refund_retry_cutover(),
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<(), SyncFault> {
        if self.api_overlap_secs < 0 {
            return Err(SyncFault::configuration(format!(
                "api_overlap_secs must not be negative, got {}",
                self.api_overlap_secs
            )));
        }
        self.order_id_bands.validate()
    }
}

/// One remote store view, as reported by the storefront.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreView {
    pub id: i32,
    pub code: String,
    pub name: String,
}

impl StoreView {
    /// Parse a `storeList` row. The storefront serializes ids as strings.
    pub fn from_row(row: &JsonValue) -> Option<Self> {
        let id = match row.get("store_id") {
            Some(JsonValue::String(s)) => s.trim().parse().ok()?,
            Some(JsonValue::Number(n)) => i32::try_from(n.as_i64()?).ok()?,
            _ => return None,
        };
        let field = |key: &str| {
            row.get(key)
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Some(Self {
            id,
            code: field("code"),
            name: field("name"),
        })
    }
}

/// Everything a gateway needs for one pass against one node.
#[derive(Clone)]
pub struct SyncContext {
    pub node: Uuid,
    pub store: Arc<dyn EntityStore>,
    pub rpc: RpcClient,
    pub config: NodeConfig,
    pub store_views: Vec<StoreView>,
}

impl SyncContext {
    pub fn new(
        node: Uuid,
        store: Arc<dyn EntityStore>,
        rpc: RpcClient,
        config: NodeConfig,
    ) -> Self {
        Self {
            node,
            store,
            rpc,
            config,
            store_views: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_store_views(mut self, store_views: Vec<StoreView>) -> Self {
        self.store_views = store_views;
        self
    }

    /// Store scope an order-channel record lands in.
    ///
    /// Single-store nodes collapse every remote store view to scope 0.
    #[must_use]
    pub fn order_scope(&self, remote_store_id: Option<i32>) -> i32 {
        if self.config.multi_store {
            remote_store_id.unwrap_or(0)
        } else {
            0
        }
    }

    /// Scopes a per-store-view retrieval iterates over.
    #[must_use]
    pub fn retrieval_scopes(&self) -> Vec<i32> {
        if self.config.multi_store && !self.store_views.is_empty() {
            self.store_views.iter().map(|view| view.id).collect()
        } else {
            vec![0]
        }
    }
}
