//! Queue consumption.
//!
//! Actions and attribute updates queue locally and drain here, one
//! item at a time in queue order. An action on an entity that has no
//! remote identity yet is deferred, not failed; the entity keeps its
//! queue position until a later run links it. Updates are never
//! deferred for temporary entities, because pushing a creation is
//! exactly how a temporary entity earns its remote identity.

use std::time::Instant;

use storelink_gateway::{GatewayRegistry, SyncContext, SyncFault};
use tracing::{debug, error, info, warn};

use crate::report::DispatchTally;

/// Drain the action queue through the registered gateways.
pub async fn process_actions(
    cx: &SyncContext,
    registry: &GatewayRegistry,
) -> Result<DispatchTally, SyncFault> {
    let started = Instant::now();
    let mut tally = DispatchTally::default();
    for action in cx.store.pending_actions(cx.node).await? {
        tally.processed += 1;
        let Some(entity) = cx.store.load_entity_by_id(cx.node, action.entity_id).await? else {
            warn!(code = "action_no_entity", action = %action.id, "action references a missing entity");
            cx.store.resolve_action(cx.node, action.id, false).await?;
            tally.failed += 1;
            continue;
        };
        if entity.is_temporary() {
            debug!(
                code = "action_deferred",
                action = %action.id,
                entity = %entity.unique_id,
                "entity has no remote identity yet"
            );
            tally.deferred += 1;
            continue;
        }
        let Some(gateway) = registry.get(entity.entity_type) else {
            warn!(
                code = "action_no_gateway",
                action = %action.id,
                entity_type = %entity.entity_type,
                "no gateway serves this entity type"
            );
            cx.store.resolve_action(cx.node, action.id, false).await?;
            tally.failed += 1;
            continue;
        };
        match gateway.write_action(cx, &entity, &action).await {
            Ok(Some(true)) => {
                cx.store.resolve_action(cx.node, action.id, true).await?;
                tally.succeeded += 1;
            }
            Ok(Some(false)) => {
                cx.store.resolve_action(cx.node, action.id, false).await?;
                tally.failed += 1;
            }
            Ok(None) => tally.deferred += 1,
            Err(fault) if fault.is_fatal() => return Err(fault),
            Err(fault) => {
                error!(
                    code = "action_failed",
                    action = %action.id,
                    entity = %entity.unique_id,
                    kind = %action.kind,
                    error = %fault,
                    "action failed"
                );
                cx.store.resolve_action(cx.node, action.id, false).await?;
                tally.failed += 1;
            }
        }
    }
    info!(
        code = "actions_done",
        processed = tally.processed,
        succeeded = tally.succeeded,
        failed = tally.failed,
        deferred = tally.deferred,
        seconds = started.elapsed().as_secs_f64(),
        "action dispatch finished"
    );
    Ok(tally)
}

/// Drain the attribute-update queue through the registered gateways.
///
/// An update is consumed whether the push succeeded or failed; only a
/// gateway that explicitly leaves the work pending keeps it queued.
pub async fn process_updates(
    cx: &SyncContext,
    registry: &GatewayRegistry,
) -> Result<DispatchTally, SyncFault> {
    let started = Instant::now();
    let mut tally = DispatchTally::default();
    for update in cx.store.pending_updates(cx.node).await? {
        tally.processed += 1;
        let Some(entity) = cx.store.load_entity_by_id(cx.node, update.entity_id).await? else {
            warn!(code = "update_no_entity", update = %update.id, "update references a missing entity");
            cx.store.resolve_update(cx.node, update.id).await?;
            tally.failed += 1;
            continue;
        };
        let Some(gateway) = registry.get(entity.entity_type) else {
            warn!(
                code = "update_no_gateway",
                update = %update.id,
                entity_type = %entity.entity_type,
                "no gateway serves this entity type"
            );
            cx.store.resolve_update(cx.node, update.id).await?;
            tally.failed += 1;
            continue;
        };
        match gateway.write_update(cx, &entity, &update).await {
            Ok(Some(true)) => {
                cx.store.resolve_update(cx.node, update.id).await?;
                tally.succeeded += 1;
            }
            Ok(Some(false)) => {
                cx.store.resolve_update(cx.node, update.id).await?;
                tally.failed += 1;
            }
            Ok(None) => tally.deferred += 1,
            Err(fault) if fault.is_fatal() => return Err(fault),
            Err(fault) => {
                error!(
                    code = "update_failed",
                    update = %update.id,
                    entity = %entity.unique_id,
                    error = %fault,
                    "update push failed"
                );
                cx.store.resolve_update(cx.node, update.id).await?;
                tally.failed += 1;
            }
        }
    }
    info!(
        code = "updates_done",
        processed = tally.processed,
        succeeded = tally.succeeded,
        failed = tally.failed,
        deferred = tally.deferred,
        seconds = started.elapsed().as_secs_f64(),
        "update dispatch finished"
    );
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use storelink_entity::{
        Action, ActionKind, AttributeMap, Entity, EntityType, MemoryStore, PendingUpdate,
        UpdateType, TEMPORARY_PREFIX,
    };
    use storelink_gateway::NodeConfig;
    use storelink_rpc::{MockTransport, RpcClient};
    use uuid::Uuid;

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
                AttributeMap::new().with("status", status),
                None,
            )
            .await
            .unwrap();
        cx.store.link_entity(cx.node, order.id, "4521").await.unwrap();
        order
    }

    #[tokio::test]
    async fn actions_resolve_through_the_gateway() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone());
        let registry = GatewayRegistry::standard();
        let order = seed_order(&cx, "100000123", "pending").await;
        cx.store
            .queue_action(
                cx.node,
                Action::new(order.id, ActionKind::Cancel, AttributeMap::new()),
            )
            .await
            .unwrap();

        transport.enqueue("salesOrderCancel", json!(true));
        transport.enqueue("salesOrderInfo", json!({"status": "canceled"}));

        let tally = process_actions(&cx, &registry).await.unwrap();
        assert_eq!(tally.processed, 1);
        assert_eq!(tally.succeeded, 1);
        assert_eq!(tally.failed, 0);
        assert!(cx.store.pending_actions(cx.node).await.unwrap().is_empty());
        assert_eq!(transport.calls_to("salesOrderCancel").len(), 1);
    }

    #[tokio::test]
    async fn temporary_entities_defer_their_actions() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone());
        let registry = GatewayRegistry::standard();
        let unique = format!("{TEMPORARY_PREFIX}{}", Uuid::new_v4());
        let order = cx
            .store
            .create_entity(
                cx.node,
                EntityType::Order,
                0,
                &unique,
                AttributeMap::new().with("status", "pending"),
                None,
            )
            .await
            .unwrap();
        cx.store
            .queue_action(
                cx.node,
                Action::new(
                    order.id,
                    ActionKind::Comment,
                    AttributeMap::new().with("comment", "call the customer"),
                ),
            )
            .await
            .unwrap();

        let tally = process_actions(&cx, &registry).await.unwrap();
        assert_eq!(tally.deferred, 1);
        assert_eq!(cx.store.pending_actions(cx.node).await.unwrap().len(), 1);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_entities_fail_their_actions() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport);
        let registry = GatewayRegistry::standard();
        cx.store
            .queue_action(
                cx.node,
                Action::new(Uuid::new_v4(), ActionKind::Cancel, AttributeMap::new()),
            )
            .await
            .unwrap();

        let tally = process_actions(&cx, &registry).await.unwrap();
        assert_eq!(tally.failed, 1);
        assert!(cx.store.pending_actions(cx.node).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn faulted_actions_resolve_as_failed() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone());
        let registry = GatewayRegistry::standard();
        let order = seed_order(&cx, "100000124", "pending").await;
        cx.store
            .queue_action(
                cx.node,
                Action::new(order.id, ActionKind::Cancel, AttributeMap::new()),
            )
            .await
            .unwrap();

        transport.enqueue_fault("salesOrderCancel", "order locked by another process");

        let tally = process_actions(&cx, &registry).await.unwrap();
        assert_eq!(tally.failed, 1);
        assert!(cx.store.pending_actions(cx.node).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn updates_push_and_consume() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone());
        let registry = GatewayRegistry::standard();
        let product = cx
            .store
            .create_entity(
                cx.node,
                EntityType::Product,
                0,
                "WIDGET-1",
                AttributeMap::new().with("name", "Widget"),
                None,
            )
            .await
            .unwrap();
        cx.store.link_entity(cx.node, product.id, "501").await.unwrap();
        cx.store
            .queue_update(
                cx.node,
                PendingUpdate::new(product.id, UpdateType::Update, vec!["name".to_string()]),
            )
            .await
            .unwrap();

        transport.enqueue("catalogProductUpdate", json!(true));

        let tally = process_updates(&cx, &registry).await.unwrap();
        assert_eq!(tally.succeeded, 1);
        assert!(cx.store.pending_updates(cx.node).await.unwrap().is_empty());
        assert_eq!(transport.calls_to("catalogProductUpdate").len(), 1);
    }

    #[tokio::test]
    async fn deferred_updates_stay_queued() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone());
        let registry = GatewayRegistry::standard();
        let unique = format!("{TEMPORARY_PREFIX}{}", Uuid::new_v4());
        let order = cx
            .store
            .create_entity(
                cx.node,
                EntityType::Order,
                0,
                &unique,
                AttributeMap::new().with("status", "processing"),
                None,
            )
            .await
            .unwrap();
        let memo = cx
            .store
            .create_entity(
                cx.node,
                EntityType::CreditMemo,
                0,
                "200000009",
                AttributeMap::new(),
                Some(order.id),
            )
            .await
            .unwrap();
        cx.store
            .queue_update(
                cx.node,
                PendingUpdate::new(memo.id, UpdateType::Update, vec![]),
            )
            .await
            .unwrap();

        let tally = process_updates(&cx, &registry).await.unwrap();
        assert_eq!(tally.deferred, 1);
        assert_eq!(cx.store.pending_updates(cx.node).await.unwrap().len(), 1);
        assert!(transport.calls().is_empty());
    }
}
