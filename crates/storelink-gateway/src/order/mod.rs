//! Order retrieval, storage, and drift recovery.
//!
//! Orders only ever flow inward: the storefront owns them, and the
//! entity store mirrors what it sees through the polling window. The
//! interesting parts are the edges. Each stored order carries the
//! remote increment id as its unique id and the mutable remote row id
//! in the link table; list payloads are thin, so every record costs a
//! second detail call; and because the list filter misses records
//! whose timestamps move backwards, every pass ends with a drift check
//! that re-lists a deeper window and force-stores anything eligible
//! the store has never seen.

pub mod actions;
pub mod status;
pub mod stock_effects;

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use storelink_entity::{
    Action, AttributeMap, AttributeValue, Entity, EntityType, PendingUpdate, StoreError,
};
use storelink_rpc::{format_remote_time, ComplexFilter};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::SyncContext;
use crate::error::SyncFault;
use crate::gateway::{Gateway, RetrieveOutcome};
use crate::identity::{self, MatchKind};
use crate::payload;
use crate::window::{forced_window_start, RetrievalWindow};

use self::status::{is_cancelled, is_final, is_order_retrievable, is_processing};
use self::stock_effects::apply_order_item_effects;

/// Attributes the storefront may not overwrite once set locally.
/// A forced store bypasses this.
const NOT_TO_UPDATE: [&str; 1] = ["grand_total"];

/// Token a pushed comment embeds so the history import can recognize
/// its own reflection coming back.
static COMMENT_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([0-9a-fA-F-]{36})\} - ").expect("COMMENT_TOKEN is a valid regex pattern")
});

/// Body prefix for a comment pushed to the storefront, searchable by
/// [`COMMENT_TOKEN`] when the same text returns in the status history.
pub(crate) fn comment_token(comment_id: Uuid) -> String {
    format!("{{{comment_id}}} - ")
}

/// Whether remote writes referring to this order make sense at all.
pub(crate) fn order_writable(order: &Entity) -> bool {
    !order.is_temporary()
}

pub struct OrderGateway;

impl OrderGateway {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn retrieve_order(
        &self,
        cx: &SyncContext,
        list_row: &JsonValue,
    ) -> Result<(), SyncFault> {
        let unique = payload::text(list_row, "increment_id").ok_or_else(|| {
            SyncFault::consistency(
                EntityType::Order,
                "(unknown)",
                "order list row carries no increment_id",
            )
        })?;
        debug!(unique, "fetching order detail");
        let detail = cx.rpc.call("salesOrderInfo", vec![json!(unique)]).await?;
        let merged = merge_list_detail(list_row, &detail);
        self.store_order_data(cx, &merged, false).await
    }

    /// Store one remote order payload, creating or updating the entity
    /// and everything hanging off it.
    async fn store_order_data(
        &self,
        cx: &SyncContext,
        data: &JsonValue,
        forced: bool,
    ) -> Result<(), SyncFault> {
        let unique = payload::text(data, "increment_id")
            .ok_or_else(|| {
                SyncFault::consistency(
                    EntityType::Order,
                    "(unknown)",
                    "order payload carries no increment_id",
                )
            })?
            .to_string();
        let local_id = payload::string(data, "entity_id")
            .or_else(|| payload::string(data, "order_id"))
            .ok_or_else(|| {
                SyncFault::consistency(EntityType::Order, &unique, "order payload carries no remote id")
            })?;
        let status = payload::text(data, "status")
            .ok_or_else(|| {
                SyncFault::consistency(EntityType::Order, &unique, "order payload carries no status")
            })?
            .to_string();
        let scope = cx.order_scope(payload::integer(data, "store_id").map(|id| id as i32));

        let mut attributes = self.order_attributes(cx, data, &unique, &status).await?;

        let resolution = identity::resolve(cx, EntityType::Order, scope, &local_id, &unique).await?;
        let (mut entity, needs_update, mut order_comment) = match resolution {
            Some(found) => {
                match found.kind {
                    MatchKind::Local => {
                        if !forced {
                            for code in NOT_TO_UPDATE {
                                if found.entity.attr(code).is_some_and(|value| !value.is_null()) {
                                    attributes.remove(code);
                                }
                            }
                        }
                        if forced {
                            warn!(code = "order_update_forced", unique, "updating out-of-sync order");
                        } else {
                            info!(code = "order_update", unique, "updating order");
                        }
                    }
                    MatchKind::Relinked { .. } => {
                        if forced {
                            warn!(code = "order_relink_forced", unique, local_id, "relinked out-of-sync order");
                        } else {
                            info!(code = "order_relink", unique, local_id, "relinked order");
                        }
                    }
                }
                (found.entity, true, None)
            }
            None => {
                let entity = self
                    .create_order(cx, scope, &unique, &local_id, attributes.clone(), data, &status, forced)
                    .await?;
                let comment = (
                    "Initial sync".to_string(),
                    format!("Order #{unique} synced into the entity store."),
                );
                (entity, false, Some(comment))
            }
        };

        if needs_update {
            let old_status = entity.attr_str("status").unwrap_or_default().to_string();
            if old_status != status {
                order_comment = Some((
                    "Status change".to_string(),
                    format!("Order #{unique} moved from {old_status} to {status}"),
                ));
                // Segregated siblings share the real order's lifecycle.
                for related in self.related_orders(cx, &entity).await? {
                    if related.id == entity.id {
                        continue;
                    }
                    cx.store
                        .update_entity(
                            cx.node,
                            related.id,
                            AttributeMap::new().with("status", status.clone()),
                            true,
                        )
                        .await?;
                }
            }
            let moved_to_processing = is_processing(&status) && !is_processing(&old_status);
            let moved_to_cancel = is_cancelled(&status) && !is_cancelled(&old_status);
            cx.store
                .update_entity(cx.node, entity.id, attributes, true)
                .await?;
            entity = cx
                .store
                .load_entity_by_id(cx.node, entity.id)
                .await?
                .ok_or(StoreError::UnknownEntity { entity_id: entity.id })?;
            if moved_to_processing || moved_to_cancel {
                for item in cx
                    .store
                    .load_children(cx.node, EntityType::OrderItem, entity.id)
                    .await?
                {
                    apply_order_item_effects(cx, &status, &item).await?;
                }
            }
        }

        if let Some((title, body)) = order_comment {
            if let Err(fault) = cx
                .store
                .create_entity_comment(cx.node, entity.id, "storelink", &title, &body, None, false)
                .await
            {
                error!(code = "order_comment_failed", unique, error = %fault, "order comment not recorded");
            }
        }
        if let Err(fault) = self.update_status_history(cx, data, &entity).await {
            error!(code = "order_history_failed", unique, error = %fault, "status history not recorded");
        }
        Ok(())
    }

    /// Convert a remote order payload into stored attributes.
    async fn order_attributes(
        &self,
        cx: &SyncContext,
        data: &JsonValue,
        unique: &str,
        status: &str,
    ) -> Result<AttributeMap, SyncFault> {
        let mut attributes = AttributeMap::new();
        attributes.set("status", status);
        attributes.set("customer_email", payload::text(data, "customer_email"));

        let first = payload::text(data, "customer_firstname").unwrap_or_default();
        let last = payload::text(data, "customer_lastname").unwrap_or_default();
        let name: Vec<&str> = [first, last].into_iter().filter(|s| !s.is_empty()).collect();
        attributes.set("customer_name", name.join(" "));

        if let Some(created) = payload::time(data, "created_at") {
            let placed = created + Duration::hours(cx.config.time_correction_order);
            attributes.set("placed_at", format_remote_time(placed));
        }

        attributes.set("grand_total", payload::number(data, "base_grand_total"));
        attributes.set(
            "base_to_currency_rate",
            payload::number(data, "base_to_order_rate"),
        );
        attributes.set("weight_total", payload::number(data, "weight").unwrap_or(0.0));
        attributes.set(
            "discount_total",
            payload::number(data, "base_discount_amount").unwrap_or(0.0),
        );
        attributes.set(
            "shipping_total",
            payload::number(data, "base_shipping_amount").unwrap_or(0.0),
        );
        attributes.set(
            "tax_total",
            payload::number(data, "base_tax_amount").unwrap_or(0.0),
        );
        attributes.set("shipping_method", payload::text(data, "shipping_method"));

        let first_number = |keys: [&str; 2]| {
            keys.iter()
                .find_map(|key| payload::number(data, key))
                .unwrap_or(0.0)
        };
        attributes.set(
            "giftcard_total",
            first_number(["base_gift_cards_amount", "base_gift_cards_invoiced"]),
        );
        attributes.set(
            "reward_total",
            first_number([
                "base_reward_currency_amount",
                "base_reward_currency_amount_invoiced",
            ]),
        );
        attributes.set(
            "storecredit_total",
            first_number([
                "base_customer_balance_amount",
                "base_customer_balance_invoiced",
            ]),
        );

        if let Some(payment) = data.get("payment") {
            attributes.set("payment_method", payment_methods(payment, unique)?);
        }

        if let Some(customer_id) = payload::string(data, "customer_id") {
            let customer = cx
                .store
                .load_entity_local(cx.node, EntityType::Customer, 0, &customer_id)
                .await?;
            match customer {
                Some(customer) => attributes.set("customer", customer.id.to_string()),
                None => attributes.set("customer", AttributeValue::Null),
            }
        } else if is_final(status) {
            warn!(code = "order_no_customer", unique, "order carries no customer id");
        } else {
            error!(code = "order_no_customer", unique, "open order carries no customer id");
        }

        Ok(attributes)
    }

    /// Creation runs inside a scoped transaction: the order, its
    /// addresses, its items, and their stock effects land together or
    /// not at all. The remote acknowledgement comment stays outside
    /// that guarantee.
    #[allow(clippy::too_many_arguments)]
    async fn create_order(
        &self,
        cx: &SyncContext,
        scope: i32,
        unique: &str,
        local_id: &str,
        attributes: AttributeMap,
        data: &JsonValue,
        status: &str,
        forced: bool,
    ) -> Result<Entity, SyncFault> {
        let transaction = format!("storefront-order-{unique}");
        cx.store.begin_entity_transaction(&transaction).await?;
        let result = self
            .create_order_inner(cx, scope, unique, local_id, attributes, data, status, forced)
            .await;
        match result {
            Ok(entity) => {
                cx.store.commit_entity_transaction(&transaction).await?;
                Ok(entity)
            }
            Err(fault) => {
                if let Err(rollback) = cx.store.rollback_entity_transaction(&transaction).await {
                    error!(
                        code = "order_rollback_failed",
                        transaction,
                        error = %rollback,
                        "order creation rollback failed"
                    );
                }
                Err(fault)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_order_inner(
        &self,
        cx: &SyncContext,
        scope: i32,
        unique: &str,
        local_id: &str,
        mut attributes: AttributeMap,
        data: &JsonValue,
        status: &str,
        forced: bool,
    ) -> Result<Entity, SyncFault> {
        attributes.merge(self.create_addresses(cx, data, unique, scope).await?);
        let entity = cx
            .store
            .create_entity(cx.node, EntityType::Order, scope, unique, attributes, None)
            .await?;
        cx.store.link_entity(cx.node, entity.id, local_id).await?;
        if forced {
            warn!(code = "order_new_forced", unique, local_id, "stored out-of-sync order");
        } else {
            info!(code = "order_new", unique, local_id, "stored new order");
        }
        self.create_items(cx, data, &entity, status).await?;

        // Best effort: a failed acknowledgement must not undo the creation.
        let note = format!("Order retrieved, entity {}", entity.id);
        if let Err(fault) = cx
            .rpc
            .call(
                "salesOrderAddComment",
                vec![json!(unique), json!(status), json!(note), json!(false)],
            )
            .await
        {
            warn!(
                code = "order_ack_comment_failed",
                unique,
                error = %fault,
                "storefront did not accept the retrieval acknowledgement"
            );
        }
        Ok(entity)
    }

    async fn create_addresses(
        &self,
        cx: &SyncContext,
        data: &JsonValue,
        unique: &str,
        scope: i32,
    ) -> Result<AttributeMap, SyncFault> {
        let mut refs = AttributeMap::new();
        for kind in ["billing", "shipping"] {
            let Some(address) = data.get(format!("{kind}_address")) else {
                continue;
            };
            if let Some(id) = self.create_address(cx, address, unique, scope, kind).await? {
                refs.set(format!("{kind}_address"), id.to_string());
            }
        }
        Ok(refs)
    }

    async fn create_address(
        &self,
        cx: &SyncContext,
        address: &JsonValue,
        order_unique: &str,
        scope: i32,
        kind: &str,
    ) -> Result<Option<Uuid>, SyncFault> {
        let Some(local_id) = payload::string(address, "address_id") else {
            return Ok(None);
        };
        let unique = format!("order-{order_unique}-{kind}");
        if let Some(existing) = cx
            .store
            .load_entity(cx.node, EntityType::Address, scope, &unique)
            .await?
        {
            return Ok(Some(existing.id));
        }
        let mut attributes = AttributeMap::new();
        for (code, key) in [
            ("first_name", "firstname"),
            ("last_name", "lastname"),
            ("street", "street"),
            ("city", "city"),
            ("region", "region"),
            ("postcode", "postcode"),
            ("country_code", "country_id"),
            ("telephone", "telephone"),
            ("company", "company"),
        ] {
            attributes.set(code, payload::text(address, key));
        }
        let entity = cx
            .store
            .create_entity(cx.node, EntityType::Address, scope, &unique, attributes, None)
            .await?;
        cx.store.link_entity(cx.node, entity.id, &local_id).await?;
        Ok(Some(entity.id))
    }

    /// Store the order's items. Items are immutable once created; a
    /// re-retrieval only fills gaps.
    async fn create_items(
        &self,
        cx: &SyncContext,
        data: &JsonValue,
        order: &Entity,
        status: &str,
    ) -> Result<(), SyncFault> {
        for row in payload::rows(data.get("items").unwrap_or(&JsonValue::Null)) {
            let sku = payload::text(row, "sku").unwrap_or_default();
            let item_local = payload::string(row, "item_id").unwrap_or_default();
            let unique = format!("{}-{}-{}", order.unique_id, sku, item_local);
            if cx
                .store
                .load_entity(cx.node, EntityType::OrderItem, order.store_scope, &unique)
                .await?
                .is_some()
            {
                continue;
            }

            let quantity = payload::number(row, "qty_ordered").unwrap_or(0.0);
            let item_price = payload::number(row, "base_price").unwrap_or(0.0);
            let total_price = payload::number(row, "base_row_total").unwrap_or(0.0);
            let total_tax = payload::number(row, "base_tax_amount").unwrap_or(0.0);
            let total_discount = payload::number(row, "base_discount_amount").unwrap_or(0.0);
            let item_tax = if let Some(incl) = payload::number(row, "base_price_incl_tax") {
                incl - item_price
            } else if total_price > 0.0 {
                (total_tax / total_price) * item_price
            } else if quantity > 0.0 {
                total_tax / quantity
            } else {
                0.0
            };
            let item_discount = if quantity > 0.0 {
                total_discount / quantity
            } else {
                0.0
            };

            let product = cx
                .store
                .load_entity(cx.node, EntityType::Product, 0, sku)
                .await?;
            let mut attributes = AttributeMap::new();
            attributes.set("product", product.map(|p| p.id.to_string()));
            attributes.set("sku", sku);
            attributes.set(
                "product_name",
                payload::text(row, "name").unwrap_or_default(),
            );
            attributes.set("is_physical", !payload::flag(row, "is_virtual"));
            attributes.set("product_type", payload::text(row, "product_type"));
            attributes.set("quantity", quantity);
            attributes.set("item_price", item_price);
            attributes.set("total_price", total_price);
            attributes.set("total_tax", total_tax);
            attributes.set("total_discount", total_discount);
            attributes.set("weight", payload::number(row, "row_weight").unwrap_or(0.0));
            attributes.set("item_tax", item_tax);
            attributes.set("item_discount", item_discount);

            info!(code = "orderitem_new", unique, quantity, "stored new order item");
            let item = cx
                .store
                .create_entity(
                    cx.node,
                    EntityType::OrderItem,
                    order.store_scope,
                    &unique,
                    attributes,
                    Some(order.id),
                )
                .await?;
            if !item_local.is_empty() {
                cx.store.link_entity(cx.node, item.id, &item_local).await?;
            }
            apply_order_item_effects(cx, status, &item).await?;
        }
        Ok(())
    }

    /// Import remote status history rows as comments, skipping anything
    /// already present. Two matches count: a pushed comment whose token
    /// came back, and a row whose created_at is already a reference id.
    pub(crate) async fn update_status_history(
        &self,
        cx: &SyncContext,
        data: &JsonValue,
        order: &Entity,
    ) -> Result<(), SyncFault> {
        let Some(rows) = data.get("status_history") else {
            return Ok(());
        };
        let history = payload::rows(rows);
        if history.is_empty() {
            return Ok(());
        }
        let comments = cx.store.load_entity_comments(cx.node, order.id).await?;
        let reference_ids: HashSet<&str> = comments
            .iter()
            .filter_map(|comment| comment.reference_id.as_deref())
            .collect();
        let comment_ids: HashSet<Uuid> = comments.iter().map(|comment| comment.id).collect();

        for row in history {
            let body = payload::text(row, "comment")
                .filter(|s| !s.is_empty())
                .unwrap_or("(no comment)");
            let event_status = payload::text(row, "status")
                .filter(|s| !s.is_empty())
                .unwrap_or("(no status)");
            let created_at = payload::text(row, "created_at").unwrap_or_default();

            let own_reflection = COMMENT_TOKEN
                .captures(body)
                .and_then(|captures| captures.get(1))
                .and_then(|token| token.as_str().parse::<Uuid>().ok())
                .is_some_and(|id| comment_ids.contains(&id));
            if own_reflection {
                continue;
            }
            if !created_at.is_empty() && reference_ids.contains(created_at) {
                continue;
            }

            let title = format!("Status history event: {created_at} - {event_status}");
            let reference = (!created_at.is_empty()).then_some(created_at);
            let notify = payload::flag(row, "is_customer_notified");
            match cx
                .store
                .create_entity_comment(cx.node, order.id, "storefront", &title, body, reference, notify)
                .await
            {
                Ok(_) => {}
                Err(StoreError::DuplicateCommentReference { .. }) => {
                    debug!(order = %order.unique_id, created_at, "history row already recorded");
                }
                Err(fault) => return Err(fault.into()),
            }
        }
        Ok(())
    }

    /// The real order plus every segregated order pointing at it.
    async fn related_orders(
        &self,
        cx: &SyncContext,
        order: &Entity,
    ) -> Result<Vec<Entity>, SyncFault> {
        let root = match order.attr_ref("original_order") {
            Some(root_id) => cx
                .store
                .load_entity_by_id(cx.node, root_id)
                .await?
                .unwrap_or_else(|| order.clone()),
            None => order.clone(),
        };
        let value = AttributeValue::from(root.id.to_string());
        let mut related = cx
            .store
            .locate_by_attribute(cx.node, EntityType::Order, "original_order", &value)
            .await?;
        related.push(root);
        Ok(related)
    }

    /// Eligible remote orders the entity store has never seen, listed
    /// over the deep forced window.
    async fn drifted_order_ids(
        &self,
        cx: &SyncContext,
        last_cursor: Option<DateTime<Utc>>,
        window: &RetrievalWindow,
    ) -> Result<Vec<String>, SyncFault> {
        let started = Instant::now();
        let start = forced_window_start(
            last_cursor.unwrap_or(DateTime::UNIX_EPOCH),
            window.until,
        );
        let response = cx
            .rpc
            .call(
                "salesOrderList",
                vec![ComplexFilter::updated_since(start).to_value()],
            )
            .await?;
        let mut missing = Vec::new();
        for row in payload::rows(&response) {
            let Some(unique) = payload::text(row, "increment_id") else {
                continue;
            };
            let row_status = payload::text(row, "status").unwrap_or_default();
            let updated_at = payload::time(row, "updated_at");
            if !is_order_retrievable(&cx.config.order_id_bands, window, unique, row_status, updated_at)
            {
                continue;
            }
            if cx
                .store
                .load_entity(cx.node, EntityType::Order, 0, unique)
                .await?
                .is_none()
            {
                missing.push(unique.to_string());
            }
        }
        debug!(
            since = %format_remote_time(start),
            missing = missing.len(),
            seconds = started.elapsed().as_secs_f64(),
            "scanned the forced window"
        );
        Ok(missing)
    }

    /// Re-store every drifted order. Residual drift fails the run
    /// without aborting it; the cursor has already advanced.
    async fn force_synchronization(
        &self,
        cx: &SyncContext,
        last_cursor: Option<DateTime<Utc>>,
        window: &RetrievalWindow,
        outcome: &mut RetrieveOutcome,
    ) -> Result<(), SyncFault> {
        let started = Instant::now();
        let drifted = self.drifted_order_ids(cx, last_cursor, window).await?;
        if drifted.is_empty() {
            return Ok(());
        }
        warn!(
            code = "order_out_of_sync",
            count = drifted.len(),
            ids = ?drifted,
            "forcing synchronization of out-of-sync orders"
        );
        let mut residual = Vec::new();
        for unique in &drifted {
            match self.force_one(cx, unique).await {
                Ok(true) => outcome.forced += 1,
                Ok(false) => residual.push(unique.clone()),
                Err(fault) if fault.is_fatal() => return Err(fault),
                Err(fault) => {
                    error!(code = "order_forced_failed", unique, error = %fault, "forced store failed");
                    residual.push(unique.clone());
                }
            }
        }
        if residual.is_empty() {
            info!(
                code = "order_forced_done",
                count = drifted.len(),
                seconds = started.elapsed().as_secs_f64(),
                "forced synchronization recovered all drifted orders"
            );
        } else {
            error!(
                code = "order_forced_residual",
                ids = ?residual,
                "orders still out of sync after the forced pass"
            );
            outcome.success = false;
            outcome.residual_drift = residual;
        }
        Ok(())
    }

    async fn force_one(&self, cx: &SyncContext, unique: &str) -> Result<bool, SyncFault> {
        let detail = cx.rpc.call("salesOrderInfo", vec![json!(unique)]).await?;
        let listed = cx
            .rpc
            .call(
                "salesOrderList",
                vec![ComplexFilter::new()
                    .condition("increment_id", "eq", unique)
                    .to_value()],
            )
            .await?;
        let merged = match payload::rows(&listed).first() {
            Some(row) => merge_list_detail(row, &detail),
            None => detail,
        };
        self.store_order_data(cx, &merged, true).await?;
        Ok(cx
            .store
            .load_entity(cx.node, EntityType::Order, 0, unique)
            .await?
            .is_some())
    }
}

impl Default for OrderGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Gateway for OrderGateway {
    fn entity_type(&self) -> EntityType {
        EntityType::Order
    }

    async fn retrieve(&self, cx: &SyncContext) -> Result<RetrieveOutcome, SyncFault> {
        let started = Instant::now();
        let now = Utc::now();
        let last_cursor = cx
            .store
            .get_timestamp(cx.node, EntityType::Order, "retrieve")
            .await?;
        let window = RetrievalWindow::compute(last_cursor, now, cx.config.api_overlap_secs, 0);
        info!(
            code = "retr_time",
            entity_type = "order",
            since = %format_remote_time(window.since),
            "retrieving orders updated since {}",
            format_remote_time(window.since)
        );

        let response = cx
            .rpc
            .call(
                "salesOrderList",
                vec![ComplexFilter::updated_since(window.since).to_value()],
            )
            .await?;

        let mut outcome = RetrieveOutcome::new(EntityType::Order);
        for row in payload::rows(&response) {
            let unique = payload::text(row, "increment_id").unwrap_or_default();
            let row_status = payload::text(row, "status").unwrap_or_default();
            let updated_at = payload::time(row, "updated_at");
            if !is_order_retrievable(&cx.config.order_id_bands, &window, unique, row_status, updated_at)
            {
                debug!(unique, status = row_status, "order not eligible for this channel");
                outcome.skipped += 1;
                continue;
            }
            match self.retrieve_order(cx, row).await {
                Ok(()) => outcome.retrieved += 1,
                Err(fault) if fault.is_fatal() => return Err(fault),
                Err(fault) => {
                    error!(code = "order_store_failed", unique, error = %fault, "order not stored");
                    outcome.record_failures += 1;
                }
            }
        }

        cx.store
            .set_timestamp(cx.node, EntityType::Order, "retrieve", window.until)
            .await?;

        self.force_synchronization(cx, last_cursor, &window, &mut outcome)
            .await?;

        info!(
            code = "order_retrieve_done",
            retrieved = outcome.retrieved,
            skipped = outcome.skipped,
            failures = outcome.record_failures,
            forced = outcome.forced,
            seconds = started.elapsed().as_secs_f64(),
            "order retrieval pass finished"
        );
        Ok(outcome)
    }

    async fn write_update(
        &self,
        _cx: &SyncContext,
        entity: &Entity,
        update: &PendingUpdate,
    ) -> Result<Option<bool>, SyncFault> {
        // Orders belong to the storefront; attribute changes never push.
        debug!(
            order = %entity.unique_id,
            update = %update.update_type,
            "order updates do not write back"
        );
        Ok(None)
    }

    async fn write_action(
        &self,
        cx: &SyncContext,
        entity: &Entity,
        action: &Action,
    ) -> Result<Option<bool>, SyncFault> {
        self.perform_action(cx, entity, action).await
    }
}

/// Detail payload joined with whatever extra fields the list row had.
/// The detail's own status and timestamps stay authoritative.
fn merge_list_detail(list_row: &JsonValue, detail: &JsonValue) -> JsonValue {
    let mut merged = match detail {
        JsonValue::Object(map) => map.clone(),
        _ => JsonMap::new(),
    };
    if let JsonValue::Object(list) = list_row {
        for (key, value) in list {
            if key == "status" || key == "updated_at" {
                continue;
            }
            merged.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    JsonValue::Object(merged)
}

/// Flatten payment rows into a `{method[:card_type]: amount}` map.
fn payment_methods(payment: &JsonValue, unique: &str) -> Result<AttributeValue, SyncFault> {
    let mut methods = JsonMap::new();
    let mut add = |entry: &JsonValue| -> Result<(), SyncFault> {
        let method = payload::text(entry, "method").ok_or_else(|| {
            SyncFault::consistency(EntityType::Order, unique, "invalid payment details format")
        })?;
        let amount = payload::number(entry, "base_amount_ordered").unwrap_or(0.0);
        let key = match payload::text(entry, "cc_type") {
            Some(card) if !card.is_empty() => format!("{method}:{card}"),
            _ => method.to_string(),
        };
        methods.insert(key, json!(amount));
        Ok(())
    };
    match payment {
        JsonValue::Array(entries) => {
            for entry in entries {
                add(entry)?;
            }
        }
        JsonValue::Object(map) if map.contains_key("payment_id") => add(payment)?,
        _ => {
            return Err(SyncFault::consistency(
                EntityType::Order,
                unique,
                "invalid payment details format",
            ))
        }
    }
    Ok(AttributeValue::from_json(JsonValue::Object(methods)))
}
