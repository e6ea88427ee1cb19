//! Stock side effects of order status transitions.
//!
//! Entering the pending class reserves stock (available drops), the
//! processing class moves the quantity into pre-transit, and the
//! cancelled class restores it. Each effect records a flag on the
//! order item so replays and forced re-syncs never double-apply, and a
//! cancellation after processing also backs the pre-transit move out.
//!
//! Stock items live at store scope 0 under the product SKU regardless
//! of which store view the order came through.

use storelink_entity::{AttributeMap, Entity, EntityType};
use tracing::{debug, error, info};

use crate::context::SyncContext;
use crate::error::SyncFault;
use crate::order::status::{classify, StatusClass};

pub const RESERVED_FLAG: &str = "reserved_applied";
pub const PRETRANSIT_FLAG: &str = "pretransit_applied";
pub const CANCEL_FLAG: &str = "cancel_applied";

/// Apply the stock effect of `order_status` for one order item.
///
/// Returns `Some(true)` when stock moved, `Some(false)` when the stock
/// item is missing, and `None` when the status triggers nothing or the
/// effect was already applied.
pub async fn apply_order_item_effects(
    cx: &SyncContext,
    order_status: &str,
    item: &Entity,
) -> Result<Option<bool>, SyncFault> {
    let class = classify(order_status);
    if !matches!(
        class,
        StatusClass::Pending | StatusClass::Processing | StatusClass::Cancelled
    ) {
        debug!(
            item = %item.unique_id,
            order_status,
            "status class carries no stock effect"
        );
        return Ok(None);
    }

    let quantity = item.attr_f64("quantity").unwrap_or(0.0);
    let reserved = item.attr_bool(RESERVED_FLAG).unwrap_or(false);
    let pretransit = item.attr_bool(PRETRANSIT_FLAG).unwrap_or(false);
    let cancelled = item.attr_bool(CANCEL_FLAG).unwrap_or(false);

    let sku = item.attr_str("sku").map(str::to_string);
    let stockitem = match &sku {
        Some(sku) => {
            cx.store
                .load_entity(cx.node, EntityType::StockItem, 0, sku)
                .await?
        }
        None => None,
    };
    let Some(stockitem) = stockitem else {
        error!(
            code = "stockitem_missing",
            item = %item.unique_id,
            sku = sku.as_deref().unwrap_or(""),
            order_status,
            "no stock item to adjust for order item"
        );
        return Ok(Some(false));
    };

    let mut available_delta = 0.0;
    let mut pretransit_delta = 0.0;
    let mut flags = AttributeMap::new();
    match class {
        StatusClass::Pending if !reserved && !cancelled => {
            available_delta = -quantity;
            flags.set(RESERVED_FLAG, true);
        }
        StatusClass::Processing if !pretransit && !cancelled => {
            pretransit_delta = quantity;
            flags.set(PRETRANSIT_FLAG, true);
        }
        StatusClass::Cancelled if !cancelled => {
            available_delta = quantity;
            if pretransit {
                pretransit_delta = -quantity;
            }
            flags.set(CANCEL_FLAG, true);
        }
        _ => {
            debug!(
                item = %item.unique_id,
                order_status,
                "stock effect already applied"
            );
            return Ok(None);
        }
    }

    let available = stockitem.attr_f64("available").unwrap_or(0.0) + available_delta;
    let pre_transit = stockitem.attr_f64("qty_pre_transit").unwrap_or(0.0) + pretransit_delta;
    let mut levels = AttributeMap::new();
    if available_delta != 0.0 {
        levels.set("available", available);
    }
    if pretransit_delta != 0.0 {
        levels.set("qty_pre_transit", pre_transit);
    }
    cx.store
        .update_entity(cx.node, stockitem.id, levels, true)
        .await?;
    cx.store.update_entity(cx.node, item.id, flags, true).await?;

    info!(
        code = "stock_adjusted",
        item = %item.unique_id,
        sku = %stockitem.unique_id,
        order_status,
        available,
        pre_transit,
        "adjusted stock for order item"
    );
    Ok(Some(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use storelink_entity::MemoryStore;
    use storelink_rpc::{MockTransport, RpcClient};
    use uuid::Uuid;

    use crate::context::{NodeConfig, SyncContext};

    fn context() -> SyncContext {
        SyncContext::new(
            Uuid::new_v4(),
            Arc::new(MemoryStore::new()),
            RpcClient::new(Arc::new(MockTransport::new())),
            NodeConfig::default(),
        )
    }

    async fn seed(cx: &SyncContext, available: f64, quantity: f64) -> Entity {
        cx.store
            .create_entity(
                cx.node,
                EntityType::StockItem,
                0,
                "SKU-1",
                AttributeMap::new().with("available", available),
                None,
            )
            .await
            .unwrap();
        cx.store
            .create_entity(
                cx.node,
                EntityType::OrderItem,
                0,
                "100000001-SKU-1-9",
                AttributeMap::new().with("sku", "SKU-1").with("quantity", quantity),
                None,
            )
            .await
            .unwrap()
    }

    async fn stock_levels(cx: &SyncContext) -> (f64, f64) {
        let stockitem = cx
            .store
            .load_entity(cx.node, EntityType::StockItem, 0, "SKU-1")
            .await
            .unwrap()
            .unwrap();
        (
            stockitem.attr_f64("available").unwrap_or(0.0),
            stockitem.attr_f64("qty_pre_transit").unwrap_or(0.0),
        )
    }

    async fn reload(cx: &SyncContext, item: &Entity) -> Entity {
        cx.store
            .load_entity_by_id(cx.node, item.id)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn pending_processing_cancel_walkthrough() {
        let cx = context();
        let item = seed(&cx, 10.0, 2.0).await;

        // Pending reserves.
        let applied = apply_order_item_effects(&cx, "pending", &item).await.unwrap();
        assert_eq!(applied, Some(true));
        assert_eq!(stock_levels(&cx).await, (8.0, 0.0));

        // Processing moves the quantity into pre-transit.
        let item = reload(&cx, &item).await;
        apply_order_item_effects(&cx, "processing", &item).await.unwrap();
        assert_eq!(stock_levels(&cx).await, (8.0, 2.0));

        // Cancellation restores both levels.
        let item = reload(&cx, &item).await;
        apply_order_item_effects(&cx, "canceled", &item).await.unwrap();
        assert_eq!(stock_levels(&cx).await, (10.0, 0.0));
    }

    #[tokio::test]
    async fn replays_apply_each_effect_once() {
        let cx = context();
        let item = seed(&cx, 10.0, 2.0).await;

        apply_order_item_effects(&cx, "pending", &item).await.unwrap();
        let item = reload(&cx, &item).await;
        let replay = apply_order_item_effects(&cx, "pending", &item).await.unwrap();
        assert_eq!(replay, None);
        assert_eq!(stock_levels(&cx).await, (8.0, 0.0));

        // A replayed cancellation after the full walk stays settled.
        apply_order_item_effects(&cx, "processing", &item).await.unwrap();
        let item = reload(&cx, &item).await;
        apply_order_item_effects(&cx, "canceled", &item).await.unwrap();
        let item = reload(&cx, &item).await;
        let replay = apply_order_item_effects(&cx, "canceled", &item).await.unwrap();
        assert_eq!(replay, None);
        assert_eq!(stock_levels(&cx).await, (10.0, 0.0));
    }

    #[tokio::test]
    async fn cancel_without_processing_skips_the_pretransit_reversal() {
        let cx = context();
        let item = seed(&cx, 10.0, 2.0).await;

        apply_order_item_effects(&cx, "pending", &item).await.unwrap();
        let item = reload(&cx, &item).await;
        apply_order_item_effects(&cx, "canceled", &item).await.unwrap();
        assert_eq!(stock_levels(&cx).await, (10.0, 0.0));
    }

    #[tokio::test]
    async fn missing_stockitem_reports_failure_without_erroring() {
        let cx = context();
        let item = cx
            .store
            .create_entity(
                cx.node,
                EntityType::OrderItem,
                0,
                "100000001-GHOST-9",
                AttributeMap::new().with("sku", "GHOST").with("quantity", 1.0),
                None,
            )
            .await
            .unwrap();
        let applied = apply_order_item_effects(&cx, "pending", &item).await.unwrap();
        assert_eq!(applied, Some(false));
    }

    #[tokio::test]
    async fn irrelevant_statuses_touch_nothing() {
        let cx = context();
        let item = seed(&cx, 10.0, 2.0).await;
        assert_eq!(
            apply_order_item_effects(&cx, "complete", &item).await.unwrap(),
            None
        );
        assert_eq!(
            apply_order_item_effects(&cx, "holded", &item).await.unwrap(),
            None
        );
        assert_eq!(stock_levels(&cx).await, (10.0, 0.0));
    }
}
