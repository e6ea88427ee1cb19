//! Credit memo retrieval and the temporary-memo push flow.
//!
//! Memos created on the storefront flow inward like orders do. Memos
//! created locally start life as temporary entities with a `TMP-`
//! unique id; pushing one creates the remote memo, adopts the remote
//! increment id as the real unique id, and renames the item children to
//! match. The `FOR ORDER:` acknowledgement comment ties a remote memo
//! back to the exact local order it refunds, which matters for
//! segregated orders that share one remote order between them.
//!
//! Attribute storage is explicit about nulls: a field the storefront
//! stopped sending is nulled out rather than left stale, but a locally
//! populated value never degrades to null just because a thin list row
//! omitted it.

use std::sync::LazyLock;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use storelink_entity::{
    Action, ActionKind, AttributeMap, AttributeValue, Entity, EntityType, PendingUpdate,
    StoreError, UpdateType,
};
use storelink_rpc::{format_remote_time, parse_remote_time, ComplexFilter, FaultKind};
use tracing::{debug, error, info, warn};

use crate::context::SyncContext;
use crate::error::SyncFault;
use crate::gateway::{Gateway, RetrieveOutcome};
use crate::identity::{self, MatchKind};
use crate::order::order_writable;
use crate::payload;
use crate::window::RetrievalWindow;

/// Marker an acknowledgement comment carries to tie a remote memo to
/// the local order it refunds.
static ORDER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"FOR ORDER: ([0-9]+[a-zA-Z]*)").expect("ORDER_MARKER is a valid regex pattern")
});

/// Orders placed before this are assumed when the order itself carries
/// no placement time.
const FALLBACK_PLACED_AT: &str = "2014-01-01 00:00:00";

const BASE_FIELDS: [(&str, &str); 12] = [
    ("order_currency", "order_currency_code"),
    ("status", "creditmemo_status"),
    ("tax_amount", "base_tax_amount"),
    ("shipping_tax", "base_shipping_tax_amount"),
    ("subtotal", "base_subtotal"),
    ("discount_amount", "base_discount_amount"),
    ("shipping_amount", "base_shipping_amount"),
    ("adjustment", "adjustment"),
    ("adjustment_positive", "adjustment_positive"),
    ("adjustment_negative", "adjustment_negative"),
    ("grand_total", "base_grand_total"),
    ("hidden_tax", "base_hidden_tax_amount"),
];

const ENTERPRISE_FIELDS: [(&str, &str); 12] = [
    ("customer_balance", "base_customer_balance_amount"),
    ("customer_balance_ref", "bs_customer_bal_total_refunded"),
    ("gift_cards_amount", "base_gift_cards_amount"),
    ("gw_price", "gw_base_price"),
    ("gw_items_price", "gw_items_base_price"),
    ("gw_card_price", "gw_card_base_price"),
    ("gw_tax_amount", "gw_base_tax_amount"),
    ("gw_items_tax_amount", "gw_items_base_tax_amount"),
    ("gw_card_tax_amount", "gw_card_base_tax_amount"),
    ("reward_currency_amount", "base_reward_currency_amount"),
    ("reward_points_balance", "reward_points_balance"),
    ("reward_points_refund", "reward_points_balance_refund"),
];

const ITEM_FIELDS: [(&str, &str); 6] = [
    ("qty", "qty"),
    ("price", "base_price"),
    ("row_total", "base_row_total"),
    ("tax_amount", "base_tax_amount"),
    ("discount_amount", "base_discount_amount"),
    ("hidden_tax", "base_hidden_tax_amount"),
];

pub struct CreditMemoGateway;

impl CreditMemoGateway {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn retrieve_memo(&self, cx: &SyncContext, row: &JsonValue) -> Result<(), SyncFault> {
        let unique = payload::text(row, "increment_id")
            .ok_or_else(|| {
                SyncFault::consistency(
                    EntityType::CreditMemo,
                    "(unknown)",
                    "creditmemo list row carries no increment_id",
                )
            })?
            .to_string();
        let detail = cx
            .rpc
            .call("salesOrderCreditmemoInfo", vec![json!(unique)])
            .await?;
        let data = merge_rows(row, &detail);
        let local_id = payload::string(&data, "creditmemo_id").ok_or_else(|| {
            SyncFault::consistency(EntityType::CreditMemo, &unique, "creditmemo carries no remote id")
        })?;
        let scope = cx.order_scope(payload::integer(&data, "store_id").map(|id| id as i32));

        let resolution =
            identity::resolve(cx, EntityType::CreditMemo, scope, &local_id, &unique).await?;
        let existing = resolution.as_ref().map(|found| &found.entity);
        let attributes = self.convert_memo_data(cx, &data, scope, existing).await?;

        let memo = match resolution {
            Some(found) => {
                match found.kind {
                    MatchKind::Local => info!(code = "creditmemo_update", unique, "updating creditmemo"),
                    MatchKind::Relinked { verified, .. } => {
                        warn!(code = "creditmemo_relink", unique, local_id, verified, "relinked creditmemo");
                    }
                }
                cx.store
                    .update_entity(cx.node, found.entity.id, attributes, true)
                    .await?;
                self.store_items(cx, &data, &found.entity, false).await?;
                found.entity
            }
            None => {
                let order = self.resolve_order(cx, &data, &unique, scope).await?;
                let transaction = format!("storefront-creditmemo-{unique}");
                cx.store.begin_entity_transaction(&transaction).await?;
                let created = async {
                    let memo = cx
                        .store
                        .create_entity(
                            cx.node,
                            EntityType::CreditMemo,
                            scope,
                            &unique,
                            attributes,
                            Some(order.id),
                        )
                        .await?;
                    cx.store.link_entity(cx.node, memo.id, &local_id).await?;
                    self.store_items(cx, &data, &memo, true).await?;
                    Ok::<Entity, SyncFault>(memo)
                }
                .await;
                match created {
                    Ok(memo) => {
                        cx.store.commit_entity_transaction(&transaction).await?;
                        info!(code = "creditmemo_new", unique, local_id, "stored new creditmemo");
                        memo
                    }
                    Err(fault) => {
                        if let Err(rollback) =
                            cx.store.rollback_entity_transaction(&transaction).await
                        {
                            error!(
                                code = "creditmemo_rollback_failed",
                                transaction,
                                error = %rollback,
                                "creditmemo creation rollback failed"
                            );
                        }
                        return Err(fault);
                    }
                }
            }
        };

        self.store_comments(cx, &data, &memo).await?;
        Ok(())
    }

    /// The order this memo refunds: the `FOR ORDER:` acknowledgement
    /// comment names the exact local order, with the remote order link
    /// as fallback.
    async fn resolve_order(
        &self,
        cx: &SyncContext,
        data: &JsonValue,
        unique: &str,
        scope: i32,
    ) -> Result<Entity, SyncFault> {
        for row in payload::rows(data.get("comments").unwrap_or(&JsonValue::Null)) {
            let Some(body) = payload::text(row, "comment") else {
                continue;
            };
            let Some(captures) = ORDER_MARKER.captures(body) else {
                continue;
            };
            let order_unique = &captures[1];
            return cx
                .store
                .load_entity(cx.node, EntityType::Order, 0, order_unique)
                .await?
                .ok_or_else(|| {
                    SyncFault::consistency(
                        EntityType::CreditMemo,
                        unique,
                        format!("acknowledgement names unknown order {order_unique}"),
                    )
                });
        }
        if let Some(order_id) = payload::string(data, "order_id") {
            if let Some(order) = cx
                .store
                .load_entity_local(cx.node, EntityType::Order, scope, &order_id)
                .await?
            {
                return Ok(order);
            }
        }
        Err(SyncFault::consistency(
            EntityType::CreditMemo,
            unique,
            "creditmemo references an unknown order",
        ))
    }

    async fn convert_memo_data(
        &self,
        cx: &SyncContext,
        data: &JsonValue,
        scope: i32,
        existing: Option<&Entity>,
    ) -> Result<AttributeMap, SyncFault> {
        let mut attributes = AttributeMap::new();
        apply(&mut attributes, existing, "order_currency", text_value(data, BASE_FIELDS[0].1));
        for (code, key) in &BASE_FIELDS[1..] {
            if *code == "status" {
                apply(&mut attributes, existing, code, string_value(data, key));
            } else {
                apply(&mut attributes, existing, code, number_value(data, key));
            }
        }
        if cx.config.enterprise {
            for (code, key) in &ENTERPRISE_FIELDS {
                apply(&mut attributes, existing, code, number_value(data, key));
            }
        }

        for (code, key) in [
            ("billing_address", "billing_address_id"),
            ("shipping_address", "shipping_address_id"),
        ] {
            let reference = match payload::string(data, key) {
                Some(address_id) => Some(
                    cx.store
                        .load_entity_local(cx.node, EntityType::Address, scope, &address_id)
                        .await?
                        .map_or(AttributeValue::Null, |address| {
                            AttributeValue::from(address.id.to_string())
                        }),
                ),
                None => None,
            };
            apply(&mut attributes, existing, code, reference);
        }
        Ok(attributes)
    }

    /// Store the memo's item children. Outside creation mode an
    /// unmatched sku is first reconciled against a sibling created
    /// under an older naming, and renamed rather than duplicated.
    async fn store_items(
        &self,
        cx: &SyncContext,
        data: &JsonValue,
        memo: &Entity,
        creation_mode: bool,
    ) -> Result<(), SyncFault> {
        for row in payload::rows(data.get("items").unwrap_or(&JsonValue::Null)) {
            let sku = payload::text(row, "sku").unwrap_or_default();
            let item_local = payload::string(row, "item_id").unwrap_or_default();
            let unique = format!("{}-{}-{}", memo.unique_id, sku, item_local);

            let mut attributes = AttributeMap::new();
            attributes.set("sku", sku);
            for (code, key) in &ITEM_FIELDS {
                attributes.set(*code, payload::number(row, key));
            }
            if let Some(product_id) = payload::string(row, "product_id") {
                let product = cx
                    .store
                    .load_entity_local(cx.node, EntityType::Product, 0, &product_id)
                    .await?;
                attributes.set("product", product.map(|p| p.id.to_string()));
            }
            if let Some(parent_id) = payload::string(row, "parent_id") {
                let parent = cx
                    .store
                    .load_entity_local(cx.node, EntityType::CreditMemoItem, memo.store_scope, &parent_id)
                    .await?;
                attributes.set("parent_item", parent.map(|p| p.id.to_string()));
            }
            if let Some(order_item_id) = payload::string(row, "order_item_id") {
                let order_item = cx
                    .store
                    .load_entity_local(cx.node, EntityType::OrderItem, memo.store_scope, &order_item_id)
                    .await?;
                attributes.set("order_item", order_item.map(|i| i.id.to_string()));
            }

            let mut target = cx
                .store
                .load_entity(cx.node, EntityType::CreditMemoItem, memo.store_scope, &unique)
                .await?;
            if target.is_none() && !creation_mode && !sku.is_empty() {
                let siblings = cx
                    .store
                    .load_children(cx.node, EntityType::CreditMemoItem, memo.id)
                    .await?;
                if let Some(sibling) = siblings
                    .into_iter()
                    .find(|item| item.attr_str("sku") == Some(sku))
                {
                    warn!(
                        code = "creditmemoitem_renamed",
                        memo = %memo.unique_id,
                        from = %sibling.unique_id,
                        to = %unique,
                        "reconciled creditmemo item under its remote naming"
                    );
                    cx.store
                        .update_entity_unique(cx.node, sibling.id, &unique)
                        .await?;
                    target = cx.store.load_entity_by_id(cx.node, sibling.id).await?;
                }
            }
            match target {
                Some(item) => {
                    cx.store
                        .update_entity(cx.node, item.id, attributes, true)
                        .await?;
                    if !item_local.is_empty() {
                        cx.store.link_entity(cx.node, item.id, &item_local).await?;
                    }
                }
                None => {
                    let item = cx
                        .store
                        .create_entity(
                            cx.node,
                            EntityType::CreditMemoItem,
                            memo.store_scope,
                            &unique,
                            attributes,
                            Some(memo.id),
                        )
                        .await?;
                    if !item_local.is_empty() {
                        cx.store.link_entity(cx.node, item.id, &item_local).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Import remote memo comments, keyed by the remote comment id.
    async fn store_comments(
        &self,
        cx: &SyncContext,
        data: &JsonValue,
        memo: &Entity,
    ) -> Result<(), SyncFault> {
        let Some(comments) = data.get("comments") else {
            return Ok(());
        };
        let rows = payload::rows(comments);
        if rows.is_empty() {
            return Ok(());
        }
        let known: Vec<String> = cx
            .store
            .load_entity_comments(cx.node, memo.id)
            .await?
            .into_iter()
            .filter_map(|comment| comment.reference_id)
            .collect();
        for row in rows {
            let Some(comment_id) = payload::string(row, "comment_id") else {
                continue;
            };
            if known.iter().any(|reference| reference == &comment_id) {
                continue;
            }
            let created_at = payload::text(row, "created_at").unwrap_or_default();
            let body = payload::text(row, "comment").unwrap_or_default();
            let visible = payload::flag(row, "is_visible_on_front");
            match cx
                .store
                .create_entity_comment(
                    cx.node,
                    memo.id,
                    "storefront",
                    &format!("Comment: {created_at}"),
                    body,
                    Some(&comment_id),
                    visible,
                )
                .await
            {
                Ok(_) => {}
                Err(StoreError::DuplicateCommentReference { .. }) => {
                    debug!(memo = %memo.unique_id, comment_id, "comment already recorded");
                }
                Err(fault) => return Err(fault.into()),
            }
        }
        Ok(())
    }

    /// Push a locally created memo out and adopt the remote identity it
    /// comes back with.
    async fn push_new_memo(
        &self,
        cx: &SyncContext,
        entity: &Entity,
        order: &Entity,
    ) -> Result<Option<bool>, SyncFault> {
        let root = match order.attr_ref("original_order") {
            Some(root_id) => cx
                .store
                .load_entity_by_id(cx.node, root_id)
                .await?
                .unwrap_or_else(|| order.clone()),
            None => order.clone(),
        };
        let rate = root
            .attr_f64("base_to_currency_rate")
            .filter(|rate| *rate > 0.0)
            .unwrap_or(1.0);
        let store_credit_refund = entity.attr_f64("customer_balance_ref").unwrap_or(0.0) / rate;

        let mut qtys = JsonMap::new();
        let items = cx
            .store
            .load_children(cx.node, EntityType::CreditMemoItem, entity.id)
            .await?;
        if items.is_empty() {
            for order_item in cx
                .store
                .load_children(cx.node, EntityType::OrderItem, order.id)
                .await?
            {
                let local = cx
                    .store
                    .get_local_id(cx.node, order_item.id)
                    .await?
                    .ok_or_else(|| {
                        SyncFault::consistency(
                            EntityType::OrderItem,
                            &order_item.unique_id,
                            "order item has no remote id",
                        )
                    })?;
                qtys.insert(local, json!(0.0));
            }
        } else {
            for item in &items {
                let order_item_id = item.attr_ref("order_item").ok_or_else(|| {
                    SyncFault::consistency(
                        EntityType::CreditMemoItem,
                        &item.unique_id,
                        "creditmemo item references no order item",
                    )
                })?;
                let local = cx
                    .store
                    .get_local_id(cx.node, order_item_id)
                    .await?
                    .ok_or_else(|| {
                        SyncFault::consistency(
                            EntityType::CreditMemoItem,
                            &item.unique_id,
                            "referenced order item has no remote id",
                        )
                    })?;
                qtys.insert(local, json!(item.attr_f64("qty").unwrap_or(0.0)));
            }
        }

        let mut adjustment_negative = entity.attr_f64("adjustment_negative").unwrap_or(0.0);
        let build_data = |adjustment_negative: f64| {
            json!({
                "qtys": qtys,
                "shipping_amount": entity.attr_f64("shipping_amount").unwrap_or(0.0),
                "adjustment_positive": entity.attr_f64("adjustment_positive").unwrap_or(0.0),
                "adjustment_negative": adjustment_negative,
            })
        };

        let first = cx
            .rpc
            .call(
                "salesOrderCreditmemoCreate",
                vec![
                    json!(root.unique_id),
                    build_data(adjustment_negative),
                    json!(""),
                    json!(false),
                    json!(false),
                    json!(store_credit_refund),
                ],
            )
            .await;
        let result = match first {
            Ok(result) => result,
            Err(fault) if self.may_retry_refund(cx, &fault, &root) => {
                // Old orders can carry store credit the storefront no
                // longer accounts for; fold it into the adjustment.
                warn!(
                    code = "creditmemo_refund_retry",
                    memo = %entity.unique_id,
                    error = %fault.message,
                    "refund ceiling hit, folding store credit into the adjustment"
                );
                adjustment_negative += store_credit_refund;
                match cx
                    .rpc
                    .call(
                        "salesOrderCreditmemoCreate",
                        vec![
                            json!(root.unique_id),
                            build_data(adjustment_negative),
                            json!(""),
                            json!(false),
                            json!(false),
                            json!(0.0),
                        ],
                    )
                    .await
                {
                    Ok(result) => result,
                    Err(mut second) => {
                        second.message.push_str(" - 2nd call");
                        return Err(second.into());
                    }
                }
            }
            Err(fault) => return Err(fault.into()),
        };

        let new_unique = payload::scalar(&result).ok_or_else(|| {
            SyncFault::consistency(
                EntityType::CreditMemo,
                &entity.unique_id,
                "invalid creditmemo creation response",
            )
        })?;
        cx.store
            .update_entity_unique(cx.node, entity.id, &new_unique)
            .await?;
        info!(
            code = "creditmemo_pushed",
            memo = %entity.unique_id,
            remote = new_unique,
            "creditmemo created remotely"
        );

        let detail = cx
            .rpc
            .call("salesOrderCreditmemoInfo", vec![json!(new_unique)])
            .await?;
        if let Some(remote_id) = payload::string(&detail, "creditmemo_id") {
            if let Err(unlink) = cx.store.unlink_entity(cx.node, entity.id).await {
                debug!(memo = %new_unique, error = %unlink, "no stale memo link to remove");
            }
            cx.store.link_entity(cx.node, entity.id, &remote_id).await?;
        }
        self.adopt_remote_items(cx, &detail, entity, &new_unique, items)
            .await?;

        // Name the direct order, so a segregated refund resolves to the
        // right child on the way back in.
        cx.rpc
            .call(
                "salesOrderCreditmemoAddComment",
                vec![
                    json!(new_unique),
                    json!(format!("FOR ORDER: {}", order.unique_id)),
                    json!(false),
                    json!(false),
                ],
            )
            .await?;
        Ok(Some(true))
    }

    fn may_retry_refund(&self, cx: &SyncContext, fault: &storelink_rpc::RpcFault, root: &Entity) -> bool {
        if fault.kind != FaultKind::RefundCeiling || fault.call != "salesOrderCreditmemoCreate" {
            return false;
        }
        let Some(cutover) = cx.config.refund_retry_cutover else {
            return false;
        };
        let placed_at = root
            .attr_str("placed_at")
            .and_then(parse_remote_time)
            .or_else(|| parse_remote_time(FALLBACK_PLACED_AT));
        placed_at.is_some_and(|placed| placed < cutover)
    }

    /// Rename local item children to the remote naming and link them,
    /// matching each remote row to the first unconsumed local item with
    /// the same sku and quantity.
    async fn adopt_remote_items(
        &self,
        cx: &SyncContext,
        detail: &JsonValue,
        memo: &Entity,
        new_unique: &str,
        local_items: Vec<Entity>,
    ) -> Result<(), SyncFault> {
        let mut unconsumed = local_items;
        for row in payload::rows(detail.get("items").unwrap_or(&JsonValue::Null)) {
            let sku = payload::text(row, "sku").unwrap_or_default();
            let qty = payload::number(row, "qty").unwrap_or(0.0);
            let item_local = payload::string(row, "item_id").unwrap_or_default();
            let position = unconsumed.iter().position(|item| {
                item.attr_str("sku") == Some(sku) && item.attr_f64("qty").unwrap_or(0.0) == qty
            });
            let Some(position) = position else {
                debug!(memo = %memo.unique_id, sku, "remote item has no local counterpart");
                continue;
            };
            let item = unconsumed.swap_remove(position);
            let renamed = format!("{new_unique}-{sku}-{item_local}");
            cx.store
                .update_entity_unique(cx.node, item.id, &renamed)
                .await?;
            if !item_local.is_empty() {
                if let Err(unlink) = cx.store.unlink_entity(cx.node, item.id).await {
                    debug!(item = %renamed, error = %unlink, "no stale item link to remove");
                }
                cx.store.link_entity(cx.node, item.id, &item_local).await?;
            }
        }
        Ok(())
    }

    async fn parent_order(&self, cx: &SyncContext, entity: &Entity) -> Result<Entity, SyncFault> {
        let parent = entity.parent.ok_or_else(|| {
            SyncFault::consistency(
                EntityType::CreditMemo,
                &entity.unique_id,
                "creditmemo has no parent order",
            )
        })?;
        cx.store
            .load_entity_by_id(cx.node, parent)
            .await?
            .ok_or_else(|| {
                SyncFault::consistency(
                    EntityType::CreditMemo,
                    &entity.unique_id,
                    "creditmemo parent order does not exist",
                )
            })
    }
}

impl Default for CreditMemoGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Gateway for CreditMemoGateway {
    fn entity_type(&self) -> EntityType {
        EntityType::CreditMemo
    }

    async fn retrieve(&self, cx: &SyncContext) -> Result<RetrieveOutcome, SyncFault> {
        let started = Instant::now();
        let now = Utc::now();
        let last_cursor = cx
            .store
            .get_timestamp(cx.node, EntityType::CreditMemo, "retrieve")
            .await?;
        let window = RetrievalWindow::compute(last_cursor, now, cx.config.api_overlap_secs, 0);
        info!(
            code = "retr_time",
            entity_type = "creditmemo",
            since = %format_remote_time(window.since),
            "retrieving creditmemos updated since {}",
            format_remote_time(window.since)
        );

        let response = cx
            .rpc
            .call(
                "salesOrderCreditmemoList",
                vec![ComplexFilter::updated_since(window.since).to_value()],
            )
            .await?;

        let mut outcome = RetrieveOutcome::new(EntityType::CreditMemo);
        for row in payload::rows(&response) {
            match self.retrieve_memo(cx, row).await {
                Ok(()) => outcome.retrieved += 1,
                Err(fault) if fault.is_fatal() => return Err(fault),
                Err(fault) => {
                    error!(code = "creditmemo_store_failed", error = %fault, "creditmemo not stored");
                    outcome.record_failures += 1;
                }
            }
        }

        cx.store
            .set_timestamp(cx.node, EntityType::CreditMemo, "retrieve", window.until)
            .await?;
        info!(
            code = "creditmemo_retrieve_done",
            retrieved = outcome.retrieved,
            failures = outcome.record_failures,
            seconds = started.elapsed().as_secs_f64(),
            "creditmemo retrieval pass finished"
        );
        Ok(outcome)
    }

    async fn write_update(
        &self,
        cx: &SyncContext,
        entity: &Entity,
        update: &PendingUpdate,
    ) -> Result<Option<bool>, SyncFault> {
        let order = self.parent_order(cx, entity).await?;
        if !order_writable(&order) {
            // The order itself has not been pushed yet.
            return Ok(None);
        }
        match update.update_type {
            UpdateType::Update => Ok(Some(true)),
            UpdateType::Delete => {
                cx.rpc
                    .call("salesOrderCreditmemoCancel", vec![json!(entity.unique_id)])
                    .await?;
                info!(code = "creditmemo_cancelled", memo = %entity.unique_id, "creditmemo cancelled remotely");
                Ok(Some(true))
            }
            UpdateType::Create => self.push_new_memo(cx, entity, &order).await,
        }
    }

    async fn write_action(
        &self,
        cx: &SyncContext,
        entity: &Entity,
        action: &Action,
    ) -> Result<Option<bool>, SyncFault> {
        if entity.is_temporary() {
            debug!(memo = %entity.unique_id, "memo has no remote identity yet");
            return Ok(None);
        }
        let order = self.parent_order(cx, entity).await?;
        if !order_writable(&order) {
            return Ok(None);
        }
        match action.kind {
            ActionKind::Comment => {
                let comment = action.payload.get_str("comment").unwrap_or_default();
                let notify = action.payload.get_bool("notify").unwrap_or(false);
                let include = action.payload.get_bool("include_comment").unwrap_or(false);
                cx.rpc
                    .call(
                        "salesOrderCreditmemoAddComment",
                        vec![
                            json!(entity.unique_id),
                            json!(comment),
                            json!(notify),
                            json!(include),
                        ],
                    )
                    .await?;
                Ok(Some(true))
            }
            ActionKind::Cancel | ActionKind::Delete => {
                cx.rpc
                    .call("salesOrderCreditmemoCancel", vec![json!(entity.unique_id)])
                    .await?;
                Ok(Some(true))
            }
            other => Err(SyncFault::consistency(
                EntityType::CreditMemo,
                &entity.unique_id,
                format!("unsupported creditmemo action: {other}"),
            )),
        }
    }
}

/// Detail payload joined with whatever extra fields the list row had.
fn merge_rows(row: &JsonValue, detail: &JsonValue) -> JsonValue {
    let mut merged = match detail {
        JsonValue::Object(map) => map.clone(),
        _ => JsonMap::new(),
    };
    if let JsonValue::Object(base) = row {
        for (key, value) in base {
            merged.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    JsonValue::Object(merged)
}

/// Null-aware attribute application: a value the storefront sent wins,
/// an absent value nulls the attribute unless a non-null local value
/// already exists.
fn apply(
    attributes: &mut AttributeMap,
    existing: Option<&Entity>,
    code: &str,
    remote: Option<AttributeValue>,
) {
    match remote {
        Some(value) => attributes.set(code, value),
        None => {
            let keep = existing
                .is_some_and(|entity| entity.attr(code).is_some_and(|value| !value.is_null()));
            if !keep {
                attributes.set(code, AttributeValue::Null);
            }
        }
    }
}

fn number_value(data: &JsonValue, key: &str) -> Option<AttributeValue> {
    payload::number(data, key).map(AttributeValue::from)
}

fn text_value(data: &JsonValue, key: &str) -> Option<AttributeValue> {
    payload::text(data, key).map(AttributeValue::from)
}

fn string_value(data: &JsonValue, key: &str) -> Option<AttributeValue> {
    payload::string(data, key).map(AttributeValue::from)
}
