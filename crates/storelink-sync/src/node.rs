//! One synchronization node: a single storefront endpoint, its
//! configuration, and the gateways that serve it.

use chrono::Utc;
use storelink_gateway::{GatewayRegistry, StoreView, SyncContext, SyncFault};
use storelink_gateway::payload;
use tracing::{error, info, instrument, warn};

use crate::dispatch;
use crate::report::RunReport;

pub struct SyncNode {
    context: SyncContext,
    registry: GatewayRegistry,
}

impl SyncNode {
    pub fn new(context: SyncContext, registry: GatewayRegistry) -> Self {
        Self { context, registry }
    }

    /// A node running the full standard gateway set.
    #[must_use]
    pub fn standard(context: SyncContext) -> Self {
        Self::new(context, GatewayRegistry::standard())
    }

    #[must_use]
    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    /// Build the store-view table from the storefront and let every
    /// gateway build its remote lookup tables.
    ///
    /// Must complete before the first [`run_once`](Self::run_once); call
    /// again to pick up remote configuration changes.
    #[instrument(skip(self), fields(node = %self.context.node))]
    pub async fn init(&mut self) -> Result<(), SyncFault> {
        let response = self.context.rpc.call("storeList", vec![]).await?;
        let views: Vec<StoreView> = payload::rows(&response)
            .iter()
            .filter_map(StoreView::from_row)
            .collect();
        if self.context.config.multi_store && views.len() <= 1 {
            error!(
                code = "node_store_views",
                views = views.len(),
                "multi-store is enabled but the storefront reports one store view"
            );
        }
        if !self.context.config.multi_store && views.len() > 1 {
            warn!(
                code = "node_store_views",
                views = views.len(),
                "storefront reports several store views, collapsing to the default scope"
            );
        }
        self.context.store_views = views;

        for gateway in self.registry.iter() {
            gateway.init(&self.context).await?;
        }
        info!(
            code = "node_init",
            views = self.context.store_views.len(),
            gateways = self.registry.len(),
            "node initialized"
        );
        Ok(())
    }

    /// One full pass: retrieval for every entity type in dependency
    /// order, then queued actions, then queued attribute updates.
    ///
    /// A failed retrieval pass is recorded and the remaining gateways
    /// still run; only configuration faults abort the run.
    pub async fn run_once(&self) -> Result<RunReport, SyncFault> {
        let mut report = RunReport::new(self.context.node, Utc::now());

        for gateway in self.registry.iter() {
            match gateway.retrieve(&self.context).await {
                Ok(outcome) => {
                    if !outcome.residual_drift.is_empty() {
                        report.faults.push(SyncFault::drift(
                            outcome.entity_type,
                            outcome.residual_drift.clone(),
                        ));
                    }
                    report.retrievals.push(outcome);
                }
                Err(fault) if fault.is_fatal() => return Err(fault),
                Err(fault) => {
                    error!(
                        code = "node_retrieve_failed",
                        entity_type = %gateway.entity_type(),
                        error = %fault,
                        "retrieval pass failed"
                    );
                    report.faults.push(fault);
                }
            }
        }

        report.actions = dispatch::process_actions(&self.context, &self.registry).await?;
        report.updates = dispatch::process_updates(&self.context, &self.registry).await?;
        report.finished_at = Utc::now();
        info!(
            code = "node_run_done",
            retrieved = report.retrieved_total(),
            faults = report.faults.len(),
            success = report.success(),
            "synchronization run finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use storelink_entity::{
        Action, ActionKind, AttributeMap, EntityType, MemoryStore, TEMPORARY_PREFIX,
    };
    use storelink_gateway::NodeConfig;
    use storelink_rpc::{MockTransport, RpcClient};
    use uuid::Uuid;

    fn node(transport: Arc<MockTransport>, config: NodeConfig) -> SyncNode {
        let context = SyncContext::new(
            Uuid::new_v4(),
            Arc::new(MemoryStore::new()),
            RpcClient::new(transport),
            config,
        );
        SyncNode::standard(context)
    }

    fn script_init(transport: &MockTransport) {
        transport.enqueue(
            "storeList",
            json!([{"store_id": "1", "code": "default", "name": "Default Store"}]),
        );
        transport.enqueue("customerGroupList", json!([]));
        transport.enqueue("catalogProductAttributeSetList", json!([]));
    }

    fn script_empty_retrieval(transport: &MockTransport) {
        transport.enqueue("customerCustomerList", json!([]));
        transport.enqueue("catalogProductList", json!([]));
        transport.enqueue("salesOrderList", json!([]));
        transport.enqueue("salesOrderList", json!([]));
        transport.enqueue("salesOrderCreditmemoList", json!([]));
    }

    #[tokio::test]
    async fn init_builds_the_store_view_table() {
        let transport = Arc::new(MockTransport::new());
        let mut node = node(transport.clone(), NodeConfig::default());
        script_init(&transport);

        node.init().await.unwrap();
        assert_eq!(node.context().store_views.len(), 1);
        assert_eq!(node.context().store_views[0].code, "default");
        assert_eq!(transport.calls_to("customerGroupList").len(), 1);
        assert_eq!(transport.calls_to("catalogProductAttributeSetList").len(), 1);
    }

    #[tokio::test]
    async fn run_once_covers_every_phase() {
        let transport = Arc::new(MockTransport::new());
        let mut node = node(transport.clone(), NodeConfig::default());
        script_init(&transport);
        node.init().await.unwrap();

        // An action on a not-yet-pushed entity waits for a later run.
        let cx = node.context();
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
                Action::new(order.id, ActionKind::Comment, AttributeMap::new()),
            )
            .await
            .unwrap();

        script_empty_retrieval(&transport);
        let report = node.run_once().await.unwrap();

        assert!(report.success());
        assert_eq!(report.retrievals.len(), 5);
        assert_eq!(report.actions.deferred, 1);
        assert_eq!(report.updates.processed, 0);
        assert!(report.outcome(EntityType::StockItem).is_some());
        assert!(report.finished_at >= report.started_at);
    }

    #[tokio::test]
    async fn failed_retrieval_passes_are_reported_not_fatal() {
        let transport = Arc::new(MockTransport::new());
        let mut node = node(transport.clone(), NodeConfig::default());
        script_init(&transport);
        node.init().await.unwrap();

        transport.enqueue_connection_error("customerCustomerList", "connection refused");
        transport.enqueue("catalogProductList", json!([]));
        transport.enqueue("salesOrderList", json!([]));
        transport.enqueue("salesOrderList", json!([]));
        transport.enqueue("salesOrderCreditmemoList", json!([]));

        let report = node.run_once().await.unwrap();
        assert!(!report.success());
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.retrievals.len(), 4);
        // The order pass still ran despite the customer failure.
        assert!(report.outcome(EntityType::Order).is_some());
    }

    #[tokio::test]
    async fn single_view_with_multi_store_still_initializes() {
        let transport = Arc::new(MockTransport::new());
        let config = NodeConfig {
            multi_store: true,
            ..NodeConfig::default()
        };
        let mut node = node(transport.clone(), config);
        script_init(&transport);

        node.init().await.unwrap();
        assert_eq!(node.context().store_views.len(), 1);
        assert_eq!(node.context().retrieval_scopes(), vec![1]);
    }
}
