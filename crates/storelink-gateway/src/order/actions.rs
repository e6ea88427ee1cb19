//! Outbound order actions.
//!
//! Actions are the only direction orders flow outward. Each one
//! resolves the remote order first: a segregated order does not exist
//! on the storefront, so anything additive targets the original order
//! it was split from, and anything that would change the original's
//! lifecycle is refused outright.

use serde_json::{json, Map as JsonMap, Value as JsonValue};
use storelink_entity::{Action, ActionKind, AttributeMap, AttributeValue, Entity, EntityType};
use storelink_rpc::format_remote_time;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::SyncContext;
use crate::error::SyncFault;
use crate::payload;

use super::status::{is_cancelled, is_pending, is_processing, STATUS_COMPLETE};
use super::{comment_token, OrderGateway};

impl OrderGateway {
    pub(crate) async fn perform_action(
        &self,
        cx: &SyncContext,
        order: &Entity,
        action: &Action,
    ) -> Result<Option<bool>, SyncFault> {
        match action.kind {
            ActionKind::Comment => self.action_comment(cx, order, action).await,
            ActionKind::Cancel => self.action_cancel(cx, order, action).await,
            ActionKind::Hold => self.action_hold(cx, order, true).await,
            ActionKind::Unhold => self.action_hold(cx, order, false).await,
            ActionKind::Ship => self.action_ship(cx, order, action).await,
            ActionKind::CreditMemo => self.action_creditmemo(cx, order, action).await,
            ActionKind::Delete => Err(SyncFault::consistency(
                EntityType::Order,
                &order.unique_id,
                format!("unsupported order action: {}", action.kind),
            )),
        }
    }

    /// Push a comment onto the remote order. The body embeds the local
    /// comment id so the history import recognizes the reflection.
    async fn action_comment(
        &self,
        cx: &SyncContext,
        order: &Entity,
        action: &Action,
    ) -> Result<Option<bool>, SyncFault> {
        let remote_unique = self.remote_order_unique(cx, order).await?;
        let status = action
            .payload
            .get_str("status")
            .or_else(|| order.attr_str("status"))
            .unwrap_or_default()
            .to_string();
        let mut body = action
            .payload
            .get_str("comment")
            .unwrap_or_default()
            .to_string();
        if let Some(comment_id) = action
            .payload
            .get_str("comment_id")
            .and_then(|raw| raw.parse::<Uuid>().ok())
        {
            body = format!("{}{body}", comment_token(comment_id));
        }
        if let Some(title) = action.payload.get_str("title").filter(|t| !t.is_empty()) {
            body = format!("{title} - {body}");
        }
        let notify = action
            .payload
            .get_bool("customer_visible")
            .or_else(|| action.payload.get_bool("notify"))
            .unwrap_or(false);

        cx.rpc
            .call(
                "salesOrderAddComment",
                vec![json!(remote_unique), json!(status), json!(body), json!(notify)],
            )
            .await?;
        info!(code = "order_comment_pushed", order = %order.unique_id, "comment pushed to storefront");
        Ok(Some(true))
    }

    async fn action_cancel(
        &self,
        cx: &SyncContext,
        order: &Entity,
        _action: &Action,
    ) -> Result<Option<bool>, SyncFault> {
        let status = order.attr_str("status").unwrap_or_default().to_string();
        if is_cancelled(&status) {
            warn!(code = "order_already_cancelled", order = %order.unique_id, "order is already cancelled");
            return Ok(Some(true));
        }
        if !is_pending(&status) {
            return Err(SyncFault::consistency(
                EntityType::Order,
                &order.unique_id,
                format!("only pending orders can be cancelled remotely, status is {status}"),
            ));
        }
        if order.attr_ref("original_order").is_some() {
            return Err(SyncFault::consistency(
                EntityType::Order,
                &order.unique_id,
                "segregated orders cannot be cancelled remotely",
            ));
        }

        cx.rpc
            .call("salesOrderCancel", vec![json!(order.unique_id)])
            .await?;

        // Pick up whatever status the storefront settled on.
        let detail = cx
            .rpc
            .call("salesOrderInfo", vec![json!(order.unique_id)])
            .await?;
        let new_status = payload::text(&detail, "status").unwrap_or("canceled").to_string();
        cx.store
            .update_entity(
                cx.node,
                order.id,
                AttributeMap::new().with("status", new_status.clone()),
                true,
            )
            .await?;
        let reloaded = cx
            .store
            .load_entity_by_id(cx.node, order.id)
            .await?
            .unwrap_or_else(|| order.clone());
        let history = json!({
            "status_history": [{
                "comment": format!("Status updated to {new_status} after remote cancellation."),
                "status": new_status,
                "created_at": format_remote_time(chrono::Utc::now()),
            }]
        });
        self.update_status_history(cx, &history, &reloaded).await?;
        info!(code = "order_cancelled", order = %order.unique_id, status = new_status, "order cancelled remotely");
        Ok(Some(true))
    }

    async fn action_hold(
        &self,
        cx: &SyncContext,
        order: &Entity,
        hold: bool,
    ) -> Result<Option<bool>, SyncFault> {
        if order.attr_ref("original_order").is_some() {
            return Err(SyncFault::consistency(
                EntityType::Order,
                &order.unique_id,
                "segregated orders cannot change hold state remotely",
            ));
        }
        let method = if hold { "salesOrderHold" } else { "salesOrderUnhold" };
        cx.rpc.call(method, vec![json!(order.unique_id)]).await?;
        info!(code = "order_hold_changed", order = %order.unique_id, hold, "hold state pushed");
        Ok(Some(true))
    }

    async fn action_ship(
        &self,
        cx: &SyncContext,
        order: &Entity,
        action: &Action,
    ) -> Result<Option<bool>, SyncFault> {
        let status = order.attr_str("status").unwrap_or_default();
        if !is_processing(status) {
            return Err(SyncFault::consistency(
                EntityType::Order,
                &order.unique_id,
                format!("invalid order status for shipment: {status}"),
            ));
        }
        let remote_unique = self.remote_order_unique(cx, order).await?;
        let items = self
            .preprocess_request_items(cx, order, action.payload.get("items"))
            .await?;
        // An empty specification ships the whole order.
        let item_spec = if items.is_empty() {
            JsonValue::Null
        } else {
            JsonValue::Array(
                items
                    .iter()
                    .map(|(id, qty)| json!({"order_item_id": id, "qty": qty}))
                    .collect(),
            )
        };
        let comment = action.payload.get_str("comment").unwrap_or_default();
        let notify = action.payload.get_bool("notify").unwrap_or(false);
        let send_comment = action.payload.get_bool("send_comment").unwrap_or(false);

        let response = cx
            .rpc
            .call(
                "salesOrderShipmentCreate",
                vec![
                    json!(remote_unique),
                    item_spec,
                    json!(comment),
                    json!(notify),
                    json!(send_comment),
                ],
            )
            .await?;
        let shipment = response
            .get("shipmentIncrementId")
            .and_then(payload::scalar)
            .or_else(|| payload::scalar(&response))
            .ok_or_else(|| {
                SyncFault::consistency(
                    EntityType::Order,
                    &order.unique_id,
                    "invalid shipment creation response",
                )
            })?;
        info!(code = "order_shipped", order = %order.unique_id, shipment, "shipment created remotely");

        if let Some(tracking_code) = action
            .payload
            .get_str("tracking_code")
            .filter(|code| !code.is_empty())
        {
            let carrier_title = order.attr_str("shipping_method").unwrap_or("Shipping");
            cx.rpc
                .call(
                    "salesOrderShipmentAddTrack",
                    vec![
                        json!(shipment),
                        json!("custom"),
                        json!(carrier_title),
                        json!(tracking_code),
                    ],
                )
                .await?;
        }
        Ok(Some(true))
    }

    /// Refund through a remote credit memo created from an order-level
    /// action. The acknowledgement comment carries the direct order
    /// unique so the memo retrieval parents it correctly, segregated or
    /// not.
    async fn action_creditmemo(
        &self,
        cx: &SyncContext,
        order: &Entity,
        action: &Action,
    ) -> Result<Option<bool>, SyncFault> {
        let status = order.attr_str("status").unwrap_or_default();
        if !is_processing(status) && status != STATUS_COMPLETE {
            return Err(SyncFault::consistency(
                EntityType::Order,
                &order.unique_id,
                format!("invalid order status for creditmemo: {status}"),
            ));
        }
        let remote_unique = self.remote_order_unique(cx, order).await?;
        let items = match action.payload.get("items") {
            Some(requested) => {
                self.preprocess_request_items(cx, order, Some(requested))
                    .await?
            }
            None => {
                // No specification refunds amounts only.
                let mut zeroed = Vec::new();
                for item in cx
                    .store
                    .load_children(cx.node, EntityType::OrderItem, order.id)
                    .await?
                {
                    let local = cx.store.get_local_id(cx.node, item.id).await?.ok_or_else(|| {
                        SyncFault::consistency(
                            EntityType::OrderItem,
                            &item.unique_id,
                            "order item has no remote id",
                        )
                    })?;
                    zeroed.push((local, 0.0));
                }
                zeroed
            }
        };

        let mut qtys = JsonMap::new();
        for (id, qty) in &items {
            qtys.insert(id.clone(), json!(qty));
        }
        let data = json!({
            "qtys": qtys,
            "shipping_amount": action.payload.get_f64("shipping_amount").unwrap_or(0.0),
            "adjustment_positive": action.payload.get_f64("adjustment_positive").unwrap_or(0.0),
            "adjustment_negative": action.payload.get_f64("adjustment_negative").unwrap_or(0.0),
        });
        let comment = action.payload.get_str("comment").unwrap_or_default();
        let notify = action.payload.get_bool("notify").unwrap_or(false);
        let send_comment = action.payload.get_bool("send_comment").unwrap_or(false);
        let credit_refund = action.payload.get_f64("credit_refund").unwrap_or(0.0);

        let response = cx
            .rpc
            .call(
                "salesOrderCreditmemoCreate",
                vec![
                    json!(remote_unique),
                    data,
                    json!(comment),
                    json!(notify),
                    json!(send_comment),
                    json!(credit_refund),
                ],
            )
            .await?;
        let memo = payload::scalar(&response).ok_or_else(|| {
            SyncFault::consistency(
                EntityType::Order,
                &order.unique_id,
                "invalid creditmemo creation response",
            )
        })?;
        cx.rpc
            .call(
                "salesOrderCreditmemoAddComment",
                vec![
                    json!(memo),
                    json!(format!("FOR ORDER: {}", order.unique_id)),
                    json!(false),
                    json!(false),
                ],
            )
            .await?;
        info!(code = "order_refunded", order = %order.unique_id, memo, "creditmemo created remotely");
        Ok(Some(true))
    }

    /// Unique id the storefront knows this order by. Segregated orders
    /// resolve to the original they were split from.
    pub(crate) async fn remote_order_unique(
        &self,
        cx: &SyncContext,
        order: &Entity,
    ) -> Result<String, SyncFault> {
        match order.attr_ref("original_order") {
            Some(root_id) => match cx.store.load_entity_by_id(cx.node, root_id).await? {
                Some(root) => Ok(root.unique_id),
                None => Err(SyncFault::consistency(
                    EntityType::Order,
                    &order.unique_id,
                    "segregated order references a missing original order",
                )),
            },
            None => Ok(order.unique_id.clone()),
        }
    }

    /// Resolve a `{item uuid: qty}` specification to remote item ids.
    /// A null quantity means the full ordered quantity; requesting more
    /// than was ordered is refused.
    async fn preprocess_request_items(
        &self,
        cx: &SyncContext,
        order: &Entity,
        requested: Option<&AttributeValue>,
    ) -> Result<Vec<(String, f64)>, SyncFault> {
        let mut resolved = Vec::new();
        let Some(requested) = requested else {
            for item in cx
                .store
                .load_children(cx.node, EntityType::OrderItem, order.id)
                .await?
            {
                let local = cx.store.get_local_id(cx.node, item.id).await?.ok_or_else(|| {
                    SyncFault::consistency(
                        EntityType::OrderItem,
                        &item.unique_id,
                        "order item has no remote id",
                    )
                })?;
                resolved.push((local, item.attr_f64("quantity").unwrap_or(0.0)));
            }
            return Ok(resolved);
        };

        let Some(entries) = requested.as_object() else {
            return Err(SyncFault::consistency(
                EntityType::Order,
                &order.unique_id,
                "invalid items specification",
            ));
        };
        for (raw_id, value) in entries {
            let item_id: Uuid = raw_id.parse().map_err(|_| {
                SyncFault::consistency(
                    EntityType::Order,
                    &order.unique_id,
                    format!("invalid item reference {raw_id}"),
                )
            })?;
            let item = cx
                .store
                .load_entity_by_id(cx.node, item_id)
                .await?
                .filter(|item| {
                    item.entity_type == EntityType::OrderItem
                        && item.parent == Some(order.id)
                        && item.store_scope == order.store_scope
                })
                .ok_or_else(|| {
                    SyncFault::consistency(
                        EntityType::Order,
                        &order.unique_id,
                        format!("item {item_id} does not belong to this order"),
                    )
                })?;
            let ordered = item.attr_f64("quantity").unwrap_or(0.0);
            let quantity = match value.as_f64() {
                Some(qty) => qty,
                None if value.is_null() => ordered,
                None => {
                    return Err(SyncFault::consistency(
                        EntityType::Order,
                        &order.unique_id,
                        format!("invalid quantity for item {item_id}"),
                    ))
                }
            };
            if quantity > ordered {
                return Err(SyncFault::consistency(
                    EntityType::Order,
                    &order.unique_id,
                    format!("requested quantity {quantity} exceeds ordered quantity {ordered}"),
                ));
            }
            let local = cx.store.get_local_id(cx.node, item.id).await?.ok_or_else(|| {
                SyncFault::consistency(
                    EntityType::OrderItem,
                    &item.unique_id,
                    "order item has no remote id",
                )
            })?;
            resolved.push((local, quantity));
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use storelink_entity::MemoryStore;
    use storelink_rpc::{MockTransport, RpcClient};

    use crate::context::NodeConfig;

    fn context(transport: Arc<MockTransport>) -> SyncContext {
        SyncContext::new(
            Uuid::new_v4(),
            Arc::new(MemoryStore::new()),
            RpcClient::new(transport),
            NodeConfig::default(),
        )
    }

    async fn seed_order(cx: &SyncContext, unique: &str, status: &str) -> Entity {
        let order = cx
            .store
            .create_entity(
                cx.node,
                EntityType::Order,
                0,
                unique,
                AttributeMap::new()
                    .with("status", status)
                    .with("shipping_method", "flatrate_flatrate"),
                None,
            )
            .await
            .unwrap();
        cx.store.link_entity(cx.node, order.id, "4521").await.unwrap();
        order
    }

    async fn seed_item(cx: &SyncContext, order: &Entity, qty: f64, local: &str) -> Entity {
        let item = cx
            .store
            .create_entity(
                cx.node,
                EntityType::OrderItem,
                0,
                &format!("{}-SKU-1-{}", order.unique_id, local),
                AttributeMap::new().with("sku", "SKU-1").with("quantity", qty),
                Some(order.id),
            )
            .await
            .unwrap();
        cx.store.link_entity(cx.node, item.id, local).await.unwrap();
        item
    }

    #[tokio::test]
    async fn comment_push_embeds_a_recognizable_token() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone());
        let order = seed_order(&cx, "100000123", "processing").await;
        let comment = cx
            .store
            .create_entity_comment(cx.node, order.id, "admin", "Note", "Called the customer", None, true)
            .await
            .unwrap();

        transport.enqueue("salesOrderAddComment", json!(true));
        let action = Action::new(
            order.id,
            ActionKind::Comment,
            AttributeMap::new()
                .with("comment", "Called the customer")
                .with("comment_id", comment.id.to_string())
                .with("title", "Note")
                .with("customer_visible", true),
        );
        let result = OrderGateway::new()
            .perform_action(&cx, &order, &action)
            .await
            .unwrap();
        assert_eq!(result, Some(true));

        let calls = transport.calls_to("salesOrderAddComment");
        assert_eq!(calls[0][0], json!("100000123"));
        assert_eq!(calls[0][1], json!("processing"));
        let body = calls[0][2].as_str().unwrap().to_string();
        assert_eq!(body, format!("Note - {{{}}} - Called the customer", comment.id));
        assert_eq!(calls[0][3], json!(true));

        // The same text coming back through the history import is
        // recognized as our own comment and skipped.
        let history = json!({"status_history": [{
            "comment": body,
            "status": "processing",
            "created_at": "2014-02-01 00:00:00",
        }]});
        OrderGateway::new()
            .update_status_history(&cx, &history, &order)
            .await
            .unwrap();
        let comments = cx.store.load_entity_comments(cx.node, order.id).await.unwrap();
        assert_eq!(comments.len(), 1);
    }

    #[tokio::test]
    async fn comments_on_segregated_orders_target_the_original() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone());
        let root = seed_order(&cx, "100000123", "processing").await;
        let child = cx
            .store
            .create_entity(
                cx.node,
                EntityType::Order,
                0,
                "100000123-1",
                AttributeMap::new()
                    .with("status", "processing")
                    .with("original_order", root.id.to_string()),
                None,
            )
            .await
            .unwrap();

        transport.enqueue("salesOrderAddComment", json!(true));
        let action = Action::new(
            child.id,
            ActionKind::Comment,
            AttributeMap::new().with("comment", "note"),
        );
        OrderGateway::new()
            .perform_action(&cx, &child, &action)
            .await
            .unwrap();
        assert_eq!(
            transport.calls_to("salesOrderAddComment")[0][0],
            json!("100000123")
        );
    }

    #[tokio::test]
    async fn cancel_requires_a_pending_order() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone());
        let order = seed_order(&cx, "100000123", "processing").await;
        let action = Action::new(order.id, ActionKind::Cancel, AttributeMap::new());

        let fault = OrderGateway::new()
            .perform_action(&cx, &order, &action)
            .await
            .unwrap_err();
        assert_eq!(fault.code(), "consistency");
        assert!(transport.calls().is_empty());

        // Already cancelled resolves without touching the storefront.
        let cancelled = seed_order(&cx, "100000124", "canceled").await;
        let action = Action::new(cancelled.id, ActionKind::Cancel, AttributeMap::new());
        let result = OrderGateway::new()
            .perform_action(&cx, &cancelled, &action)
            .await
            .unwrap();
        assert_eq!(result, Some(true));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn cancel_records_the_settled_status() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone());
        let order = seed_order(&cx, "100000123", "pending").await;
        transport.enqueue("salesOrderCancel", json!(true));
        transport.enqueue("salesOrderInfo", json!({"status": "canceled"}));

        let action = Action::new(order.id, ActionKind::Cancel, AttributeMap::new());
        OrderGateway::new()
            .perform_action(&cx, &order, &action)
            .await
            .unwrap();

        let order = cx.store.load_entity_by_id(cx.node, order.id).await.unwrap().unwrap();
        assert_eq!(order.attr_str("status"), Some("canceled"));
        let comments = cx.store.load_entity_comments(cx.node, order.id).await.unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(
            comments[0].body,
            "Status updated to canceled after remote cancellation."
        );
    }

    #[tokio::test]
    async fn shipment_resolves_items_and_attaches_tracking() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone());
        let order = seed_order(&cx, "100000123", "processing").await;
        let item = seed_item(&cx, &order, 2.0, "9001").await;

        transport.enqueue("salesOrderShipmentCreate", json!("300000001"));
        transport.enqueue("salesOrderShipmentAddTrack", json!(true));

        let mut spec = BTreeMap::new();
        spec.insert(item.id.to_string(), AttributeValue::Null);
        let action = Action::new(
            order.id,
            ActionKind::Ship,
            AttributeMap::new()
                .with("items", AttributeValue::Object(spec))
                .with("tracking_code", "TRACK-1"),
        );
        OrderGateway::new()
            .perform_action(&cx, &order, &action)
            .await
            .unwrap();

        let create = transport.calls_to("salesOrderShipmentCreate");
        assert_eq!(create[0][0], json!("100000123"));
        assert_eq!(create[0][1], json!([{"order_item_id": "9001", "qty": 2.0}]));
        let track = transport.calls_to("salesOrderShipmentAddTrack");
        assert_eq!(
            track[0],
            vec![
                json!("300000001"),
                json!("custom"),
                json!("flatrate_flatrate"),
                json!("TRACK-1"),
            ]
        );
    }

    #[tokio::test]
    async fn shipment_refuses_overshipment_and_foreign_items() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone());
        let order = seed_order(&cx, "100000123", "processing").await;
        let item = seed_item(&cx, &order, 2.0, "9001").await;

        let mut over = BTreeMap::new();
        over.insert(item.id.to_string(), AttributeValue::from(5.0));
        let action = Action::new(
            order.id,
            ActionKind::Ship,
            AttributeMap::new().with("items", AttributeValue::Object(over)),
        );
        let fault = OrderGateway::new()
            .perform_action(&cx, &order, &action)
            .await
            .unwrap_err();
        assert!(fault.to_string().contains("exceeds ordered quantity"));

        let mut foreign = BTreeMap::new();
        foreign.insert(Uuid::new_v4().to_string(), AttributeValue::Null);
        let action = Action::new(
            order.id,
            ActionKind::Ship,
            AttributeMap::new().with("items", AttributeValue::Object(foreign)),
        );
        let fault = OrderGateway::new()
            .perform_action(&cx, &order, &action)
            .await
            .unwrap_err();
        assert!(fault.to_string().contains("does not belong"));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn creditmemo_action_refunds_and_tags_the_memo() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone());
        let order = seed_order(&cx, "100000123", "complete").await;
        seed_item(&cx, &order, 2.0, "9001").await;

        transport.enqueue("salesOrderCreditmemoCreate", json!("400000001"));
        transport.enqueue("salesOrderCreditmemoAddComment", json!(true));

        let action = Action::new(
            order.id,
            ActionKind::CreditMemo,
            AttributeMap::new().with("shipping_amount", 5.0),
        );
        OrderGateway::new()
            .perform_action(&cx, &order, &action)
            .await
            .unwrap();

        let create = transport.calls_to("salesOrderCreditmemoCreate");
        assert_eq!(create[0][0], json!("100000123"));
        assert_eq!(
            create[0][1],
            json!({
                "qtys": {"9001": 0.0},
                "shipping_amount": 5.0,
                "adjustment_positive": 0.0,
                "adjustment_negative": 0.0,
            })
        );
        assert_eq!(
            transport.calls_to("salesOrderCreditmemoAddComment")[0][1],
            json!("FOR ORDER: 100000123")
        );
    }

    #[tokio::test]
    async fn hold_refuses_segregated_orders() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone());
        let root = seed_order(&cx, "100000123", "processing").await;
        let child = cx
            .store
            .create_entity(
                cx.node,
                EntityType::Order,
                0,
                "100000123-1",
                AttributeMap::new()
                    .with("status", "processing")
                    .with("original_order", root.id.to_string()),
                None,
            )
            .await
            .unwrap();

        let action = Action::new(child.id, ActionKind::Hold, AttributeMap::new());
        let fault = OrderGateway::new()
            .perform_action(&cx, &child, &action)
            .await
            .unwrap_err();
        assert_eq!(fault.code(), "consistency");
        assert!(transport.calls().is_empty());
    }
}
