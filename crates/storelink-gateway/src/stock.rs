//! Stock level retrieval and write-back.
//!
//! Stock is a full snapshot rather than a windowed feed: each pass
//! lists the levels for every known product sku in one call. Outward,
//! only the available quantity is pushed, and a failed push walks a
//! small ladder of stale-link repairs before giving up, because the
//! remote stock item id changes whenever the product is recreated.

use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use storelink_entity::{Action, AttributeMap, Entity, EntityType, PendingUpdate};
use tracing::{debug, error, info, warn};

use crate::context::SyncContext;
use crate::error::SyncFault;
use crate::gateway::{Gateway, RetrieveOutcome};
use crate::identity;
use crate::payload;
use crate::window::RetrievalWindow;

pub struct StockGateway;

impl StockGateway {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn store_stock_row(&self, cx: &SyncContext, row: &JsonValue) -> Result<bool, SyncFault> {
        let Some(sku) = payload::text(row, "sku").filter(|sku| !sku.is_empty()) else {
            return Err(SyncFault::consistency(
                EntityType::StockItem,
                "(unknown)",
                "stock row carries no sku",
            ));
        };
        let local_id = payload::string(row, "product_id").unwrap_or_default();
        let available = payload::number(row, "qty").unwrap_or(0.0);

        let Some(product) = cx
            .store
            .load_entity(cx.node, EntityType::Product, 0, sku)
            .await?
        else {
            debug!(sku, "stock row for a product the store does not carry");
            return Ok(false);
        };

        let attributes = AttributeMap::new().with("available", available);
        match identity::resolve(cx, EntityType::StockItem, 0, &local_id, sku).await? {
            Some(found) => {
                cx.store
                    .update_entity(cx.node, found.entity.id, attributes, true)
                    .await?;
            }
            None => {
                let stockitem = cx
                    .store
                    .create_entity(
                        cx.node,
                        EntityType::StockItem,
                        0,
                        sku,
                        attributes,
                        Some(product.id),
                    )
                    .await?;
                if !local_id.is_empty() {
                    cx.store.link_entity(cx.node, stockitem.id, &local_id).await?;
                }
                info!(code = "stockitem_new", sku, "stored new stock item");
            }
        }
        Ok(true)
    }

    async fn push_level(
        &self,
        cx: &SyncContext,
        remote_id: &str,
        available: f64,
    ) -> Result<JsonValue, storelink_rpc::RpcFault> {
        cx.rpc
            .call(
                "catalogInventoryStockItemUpdate",
                vec![
                    json!(remote_id),
                    json!({"qty": available, "is_in_stock": if available > 0.0 { 1 } else { 0 }}),
                ],
            )
            .await
    }
}

impl Default for StockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Gateway for StockGateway {
    fn entity_type(&self) -> EntityType {
        EntityType::StockItem
    }

    async fn retrieve(&self, cx: &SyncContext) -> Result<RetrieveOutcome, SyncFault> {
        let mut outcome = RetrieveOutcome::new(EntityType::StockItem);
        if !cx.config.load_stock {
            debug!("stock retrieval is disabled for this node");
            return Ok(outcome);
        }
        let started = Instant::now();
        let window = RetrievalWindow::compute(None, Utc::now(), cx.config.api_overlap_secs, 0);

        let skus = cx
            .store
            .list_unique_ids(cx.node, EntityType::Product, 0)
            .await?;
        if skus.is_empty() {
            return Ok(outcome);
        }
        let response = cx
            .rpc
            .call("catalogInventoryStockItemList", vec![json!(skus)])
            .await?;
        for row in payload::rows(&response) {
            match self.store_stock_row(cx, row).await {
                Ok(true) => outcome.retrieved += 1,
                Ok(false) => outcome.skipped += 1,
                Err(fault) if fault.is_fatal() => return Err(fault),
                Err(fault) => {
                    error!(code = "stock_store_failed", error = %fault, "stock row not stored");
                    outcome.record_failures += 1;
                }
            }
        }

        cx.store
            .set_timestamp(cx.node, EntityType::StockItem, "retrieve", window.until)
            .await?;
        info!(
            code = "stock_retrieve_done",
            retrieved = outcome.retrieved,
            skipped = outcome.skipped,
            failures = outcome.record_failures,
            seconds = started.elapsed().as_secs_f64(),
            "stock retrieval pass finished"
        );
        Ok(outcome)
    }

    async fn write_update(
        &self,
        cx: &SyncContext,
        entity: &Entity,
        update: &PendingUpdate,
    ) -> Result<Option<bool>, SyncFault> {
        if !update.attributes.iter().any(|att| att == "available") {
            // Internal bookkeeping attributes never push.
            return Ok(Some(true));
        }
        let available = entity.attr_f64("available").unwrap_or(0.0);
        let stock_local = cx.store.get_local_id(cx.node, entity.id).await?;
        let parent_local = match entity.parent {
            Some(parent) => cx.store.get_local_id(cx.node, parent).await?,
            None => None,
        };
        let Some(first_id) = stock_local.clone().or_else(|| parent_local.clone()) else {
            return Err(SyncFault::consistency(
                EntityType::StockItem,
                &entity.unique_id,
                "stock item has no remote id",
            ));
        };

        match self.push_level(cx, &first_id, available).await {
            Ok(_) => {
                if stock_local.is_none() {
                    // Pushed through the parent id; remember it.
                    cx.store.link_entity(cx.node, entity.id, &first_id).await?;
                }
                info!(code = "stock_pushed", sku = %entity.unique_id, available, "stock level pushed");
                Ok(Some(true))
            }
            Err(fault) => {
                let retry_id = match (&stock_local, &parent_local) {
                    (Some(stock), Some(parent)) if stock != parent => parent.clone(),
                    _ => return Err(fault.into()),
                };
                warn!(
                    code = "stockitem_stale_link",
                    sku = %entity.unique_id,
                    error = %fault,
                    "stock push failed, retrying through the product id"
                );
                if let Err(unlink) = cx.store.unlink_entity(cx.node, entity.id).await {
                    debug!(sku = %entity.unique_id, error = %unlink, "stale stock link removal failed");
                }
                match self.push_level(cx, &retry_id, available).await {
                    Ok(_) => {
                        cx.store.link_entity(cx.node, entity.id, &retry_id).await?;
                        info!(code = "stock_pushed", sku = %entity.unique_id, available, "stock level pushed");
                        Ok(Some(true))
                    }
                    Err(second) => {
                        error!(
                            code = "stock_push_failed",
                            sku = %entity.unique_id,
                            error = %second,
                            "stock push failed through both ids"
                        );
                        if let Some(parent) = entity.parent {
                            if let Err(unlink) = cx.store.unlink_entity(cx.node, parent).await {
                                debug!(sku = %entity.unique_id, error = %unlink, "stale product link removal failed");
                            }
                        }
                        Ok(Some(false))
                    }
                }
            }
        }
    }

    async fn write_action(
        &self,
        _cx: &SyncContext,
        entity: &Entity,
        action: &Action,
    ) -> Result<Option<bool>, SyncFault> {
        Err(SyncFault::consistency(
            EntityType::StockItem,
            &entity.unique_id,
            format!("unsupported stock action: {}", action.kind),
        ))
    }
}
