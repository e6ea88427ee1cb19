//! Product retrieval and write-back.
//!
//! Products flow both ways. Retrieval converts the storefront's
//! numeric flags into typed attributes; write-back converts them
//! straight back. The attribute-set table fetched at init maps the
//! remote `set` id to a product class name, and every new product gets
//! an empty stock item child so levels have somewhere to land before
//! the stock channel first runs.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use storelink_entity::{
    Action, ActionKind, AttributeMap, AttributeValue, Entity, EntityType, PendingUpdate,
    StoreError, UpdateType,
};
use storelink_rpc::{format_remote_time, ComplexFilter, FaultKind};
use tracing::{debug, error, info, warn};

use crate::context::SyncContext;
use crate::error::SyncFault;
use crate::gateway::{Gateway, RetrieveOutcome};
use crate::identity::{self, MatchKind};
use crate::payload;
use crate::window::RetrievalWindow;

pub struct ProductGateway {
    /// Remote attribute-set id to class name, filled by [`Gateway::init`].
    attribute_sets: RwLock<HashMap<i64, String>>,
}

impl ProductGateway {
    #[must_use]
    pub fn new() -> Self {
        Self {
            attribute_sets: RwLock::new(HashMap::new()),
        }
    }

    fn class_for_set(&self, set_id: i64) -> Option<String> {
        self.attribute_sets
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&set_id)
            .cloned()
    }

    fn set_for_class(&self, class: &str) -> Option<i64> {
        self.attribute_sets
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(class))
            .map(|(id, _)| *id)
    }

    async fn retrieve_product(
        &self,
        cx: &SyncContext,
        row: &JsonValue,
        scope: i32,
    ) -> Result<(), SyncFault> {
        let unique = payload::text(row, "sku")
            .filter(|sku| !sku.is_empty())
            .ok_or_else(|| {
                SyncFault::consistency(EntityType::Product, "(unknown)", "product row carries no sku")
            })?
            .to_string();
        let local_id = payload::string(row, "product_id").ok_or_else(|| {
            SyncFault::consistency(EntityType::Product, &unique, "product row carries no remote id")
        })?;

        let data = if cx.config.load_full_product {
            let info = self.load_product_info(cx, &local_id, scope, &unique).await?;
            merge_rows(row, &info)
        } else {
            row.clone()
        };
        let attributes = self.convert_product_data(cx, &data, &unique)?;

        match identity::resolve(cx, EntityType::Product, scope, &local_id, &unique).await? {
            Some(found) => {
                match found.kind {
                    MatchKind::Local => info!(code = "product_update", unique, "updating product"),
                    MatchKind::Relinked { had_stale_link, .. } => {
                        if had_stale_link {
                            warn!(code = "product_wronglink", unique, local_id, "repaired product link");
                        } else {
                            info!(code = "product_link", unique, local_id, "linked product");
                        }
                    }
                }
                cx.store
                    .update_entity(cx.node, found.entity.id, attributes, true)
                    .await?;
            }
            None => {
                let product = cx
                    .store
                    .create_entity(cx.node, EntityType::Product, scope, &unique, attributes, None)
                    .await?;
                cx.store.link_entity(cx.node, product.id, &local_id).await?;
                info!(code = "product_new", unique, local_id, "stored new product");

                // Levels arriving through the stock channel need a child
                // to land in.
                match cx
                    .store
                    .create_entity(
                        cx.node,
                        EntityType::StockItem,
                        scope,
                        &unique,
                        AttributeMap::new(),
                        Some(product.id),
                    )
                    .await
                {
                    Ok(stockitem) => {
                        cx.store.link_entity(cx.node, stockitem.id, &local_id).await?;
                    }
                    Err(StoreError::DuplicateUnique { .. }) => {
                        warn!(code = "already_stockitem", unique, "stock item already exists");
                    }
                    Err(fault) => return Err(fault.into()),
                }
            }
        }
        Ok(())
    }

    async fn load_product_info(
        &self,
        cx: &SyncContext,
        local_id: &str,
        scope: i32,
        unique: &str,
    ) -> Result<JsonValue, SyncFault> {
        let info = cx
            .rpc
            .call(
                "catalogProductInfo",
                vec![
                    json!(local_id),
                    json!(scope),
                    json!({"additional_attributes": cx.config.product_attributes}),
                    json!("id"),
                ],
            )
            .await?;
        if payload::text(&info, "sku").is_none() {
            return Err(SyncFault::consistency(
                EntityType::Product,
                unique,
                "invalid product info response",
            ));
        }
        Ok(info)
    }

    /// Convert a remote product payload into stored attributes.
    fn convert_product_data(
        &self,
        cx: &SyncContext,
        data: &JsonValue,
        unique: &str,
    ) -> Result<AttributeMap, SyncFault> {
        let mut attributes = AttributeMap::new();
        attributes.set(
            "type",
            payload::text(data, "type_id").or_else(|| payload::text(data, "type")),
        );
        attributes.set("name", payload::text(data, "name"));
        attributes.set("description", payload::text(data, "description"));
        attributes.set("short_description", payload::text(data, "short_description"));
        attributes.set("enabled", payload::integer(data, "status") == Some(1));
        attributes.set("visible", payload::integer(data, "visibility") == Some(4));
        attributes.set("price", payload::number(data, "price"));
        attributes.set("taxable", payload::integer(data, "tax_class_id") == Some(2));
        if data.get("special_price").is_some() {
            attributes.set("special_price", payload::number(data, "special_price"));
            attributes.set("special_from_date", payload::text(data, "special_from_date"));
            attributes.set("special_to_date", payload::text(data, "special_to_date"));
        } else {
            attributes.set("special_price", AttributeValue::Null);
            attributes.set("special_from_date", AttributeValue::Null);
            attributes.set("special_to_date", AttributeValue::Null);
        }

        if let Some(set_id) = payload::integer(data, "set") {
            match self.class_for_set(set_id) {
                Some(class) => attributes.set("product_class", class),
                None => warn!(
                    code = "unknown_set",
                    unique, set_id, "attribute set is not in the remote set table"
                ),
            }
        }

        match data.get("additional_attributes") {
            Some(pairs) => {
                for pair in payload::rows(pairs) {
                    let key = payload::text(pair, "key").unwrap_or_default().trim().to_lowercase();
                    if !cx.config.product_attributes.iter().any(|att| att == &key) {
                        return Err(SyncFault::consistency(
                            EntityType::Product,
                            unique,
                            format!("unexpected attribute returned by the storefront: {key}"),
                        ));
                    }
                    let value = pair
                        .get("value")
                        .cloned()
                        .map_or(AttributeValue::Null, AttributeValue::from_json);
                    attributes.set(key, value);
                }
            }
            None => {
                for att in &cx.config.product_attributes {
                    let value = data
                        .get(att)
                        .cloned()
                        .map_or(AttributeValue::Null, AttributeValue::from_json);
                    attributes.set(att.clone(), value);
                }
            }
        }
        Ok(attributes)
    }

    /// Assemble the remote payload for the changed attribute codes.
    fn assemble_write_data(
        &self,
        cx: &SyncContext,
        entity: &Entity,
        update: &PendingUpdate,
    ) -> Result<JsonMap<String, JsonValue>, SyncFault> {
        let mut soap_data = JsonMap::new();
        let mut customs = Vec::new();
        for code in &update.attributes {
            let value = entity.attr(code);
            let as_json = || value.map_or(JsonValue::Null, AttributeValue::to_json);
            match code.as_str() {
                "price" | "special_price" | "special_from_date" | "special_to_date" => {
                    let json = match as_json() {
                        JsonValue::String(s) if s.is_empty() => JsonValue::Null,
                        other => other,
                    };
                    soap_data.insert(code.clone(), json);
                }
                "name" | "description" | "short_description" | "weight" | "barcode"
                | "bin_location" | "msrp" => {
                    soap_data.insert(code.clone(), as_json());
                }
                "enabled" => {
                    let status = if value.and_then(AttributeValue::as_bool) == Some(true) {
                        1
                    } else {
                        2
                    };
                    soap_data.insert("status".to_string(), json!(status));
                }
                "visible" => {
                    let visibility = if value.and_then(AttributeValue::as_bool) == Some(true) {
                        4
                    } else {
                        1
                    };
                    soap_data.insert("visibility".to_string(), json!(visibility));
                }
                "taxable" => {
                    let tax_class = if value.and_then(AttributeValue::as_bool) == Some(true) {
                        2
                    } else {
                        1
                    };
                    soap_data.insert("tax_class_id".to_string(), json!(tax_class));
                }
                "product_class" | "type" => {
                    if update.update_type != UpdateType::Create {
                        error!(
                            code = "product_class_immutable",
                            product = %entity.unique_id,
                            attribute = %code,
                            "product class and type cannot change after creation"
                        );
                    }
                }
                "brand" | "size" => {}
                custom if cx.config.product_attributes.iter().any(|att| att == custom) => {
                    let json = as_json();
                    if json.is_array() {
                        return Err(SyncFault::consistency(
                            EntityType::Product,
                            &entity.unique_id,
                            format!("array attribute {custom} cannot be written to the storefront"),
                        ));
                    }
                    customs.push(json!({"key": custom, "value": json}));
                }
                other => {
                    warn!(
                        code = "product_invalid_data",
                        product = %entity.unique_id,
                        attribute = other,
                        "attribute has no remote mapping"
                    );
                }
            }
        }
        if !customs.is_empty() {
            soap_data.insert(
                "additional_attributes".to_string(),
                json!({"single_data": customs}),
            );
        }
        Ok(soap_data)
    }

    /// Remote store views that should carry this product.
    async fn website_ids(&self, cx: &SyncContext, entity: &Entity) -> Result<Vec<i32>, SyncFault> {
        let mut ids = vec![entity.store_scope];
        if cx.config.multi_store {
            for view in &cx.store_views {
                if view.id == entity.store_scope {
                    continue;
                }
                if cx
                    .store
                    .load_entity(cx.node, EntityType::Product, view.id, &entity.unique_id)
                    .await?
                    .is_some()
                {
                    ids.push(view.id);
                }
            }
        }
        Ok(ids)
    }

    /// A creation that hit the unique-SKU constraint means the product
    /// already exists remotely under an id nobody linked. Adopt it and
    /// push the payload as an update instead.
    async fn resolve_duplicate_sku(
        &self,
        cx: &SyncContext,
        entity: &Entity,
        soap_data: &JsonValue,
    ) -> Result<Option<String>, SyncFault> {
        let check = cx
            .rpc
            .call(
                "catalogProductInfo",
                vec![json!(entity.unique_id), json!(0), json!([]), json!("sku")],
            )
            .await?;
        let found = payload::string(&check, "product_id")
            .filter(|_| payload::text(&check, "sku") == Some(entity.unique_id.as_str()));
        let Some(remote_id) = found else {
            return Ok(None);
        };
        cx.store.link_entity(cx.node, entity.id, &remote_id).await?;
        warn!(
            code = "product_duplicate_resolved",
            product = %entity.unique_id,
            remote_id,
            "adopted the existing remote product"
        );
        cx.rpc
            .call(
                "catalogProductUpdate",
                vec![
                    json!(entity.unique_id),
                    soap_data.clone(),
                    json!(entity.store_scope),
                    json!("sku"),
                ],
            )
            .await?;
        Ok(Some(remote_id))
    }
}

impl Default for ProductGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Info payload joined with whatever extra fields the list row had.
fn merge_rows(row: &JsonValue, info: &JsonValue) -> JsonValue {
    let mut merged = match info {
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

#[async_trait]
impl Gateway for ProductGateway {
    fn entity_type(&self) -> EntityType {
        EntityType::Product
    }

    async fn init(&self, cx: &SyncContext) -> Result<(), SyncFault> {
        let response = cx.rpc.call("catalogProductAttributeSetList", vec![]).await?;
        let mut table = HashMap::new();
        for row in payload::rows(&response) {
            let Some(id) = payload::integer(row, "set_id") else {
                continue;
            };
            let Some(name) = payload::text(row, "name") else {
                continue;
            };
            table.insert(id, name.to_string());
        }
        debug!(sets = table.len(), "attribute set table refreshed");
        *self
            .attribute_sets
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = table;
        Ok(())
    }

    async fn retrieve(&self, cx: &SyncContext) -> Result<RetrieveOutcome, SyncFault> {
        let started = Instant::now();
        let now = Utc::now();
        let last_cursor = cx
            .store
            .get_timestamp(cx.node, EntityType::Product, "retrieve")
            .await?;
        let window = RetrievalWindow::compute(
            last_cursor,
            now,
            cx.config.api_overlap_secs,
            cx.config.time_delta_product,
        );
        info!(
            code = "retr_time",
            entity_type = "product",
            since = %format_remote_time(window.since),
            "retrieving products updated since {}",
            format_remote_time(window.since)
        );

        let mut outcome = RetrieveOutcome::new(EntityType::Product);
        for scope in cx.retrieval_scopes() {
            let response = cx
                .rpc
                .call(
                    "catalogProductList",
                    vec![
                        ComplexFilter::updated_since(window.since).to_value(),
                        json!(scope),
                    ],
                )
                .await?;
            for row in payload::rows(&response) {
                match self.retrieve_product(cx, row, scope).await {
                    Ok(()) => outcome.retrieved += 1,
                    Err(fault) if fault.is_fatal() => return Err(fault),
                    Err(fault) => {
                        error!(code = "product_store_failed", error = %fault, "product not stored");
                        outcome.record_failures += 1;
                    }
                }
            }
        }

        // One cursor covers every store view.
        cx.store
            .set_timestamp(cx.node, EntityType::Product, "retrieve", window.until)
            .await?;
        info!(
            code = "product_retrieve_done",
            retrieved = outcome.retrieved,
            failures = outcome.record_failures,
            seconds = started.elapsed().as_secs_f64(),
            "product retrieval pass finished"
        );
        Ok(outcome)
    }

    async fn write_update(
        &self,
        cx: &SyncContext,
        entity: &Entity,
        update: &PendingUpdate,
    ) -> Result<Option<bool>, SyncFault> {
        if update.update_type == UpdateType::Delete {
            cx.rpc
                .call(
                    "catalogProductDelete",
                    vec![json!(entity.unique_id), json!("sku")],
                )
                .await?;
            info!(code = "product_deleted", product = %entity.unique_id, "product deleted remotely");
            return Ok(Some(true));
        }

        let mut soap_data = self.assemble_write_data(cx, entity, update)?;
        if soap_data.is_empty() {
            warn!(
                code = "product_no_update",
                product = %entity.unique_id,
                "no writable attributes in this update"
            );
        }
        soap_data.insert(
            "website_ids".to_string(),
            json!(self.website_ids(cx, entity).await?),
        );
        let soap_data = JsonValue::Object(soap_data);

        let mut local_id = cx.store.get_local_id(cx.node, entity.id).await?;
        if update.update_type == UpdateType::Create && local_id.is_none() && cx.config.multi_store {
            // Another store view may have created this product already.
            for scope in cx.retrieval_scopes() {
                if scope == entity.store_scope {
                    continue;
                }
                let Some(sibling) = cx
                    .store
                    .load_entity(cx.node, EntityType::Product, scope, &entity.unique_id)
                    .await?
                else {
                    continue;
                };
                if let Some(shared) = cx.store.get_local_id(cx.node, sibling.id).await? {
                    info!(
                        code = "product_store_duplicate",
                        product = %entity.unique_id,
                        "product already exists in another store view"
                    );
                    cx.store.link_entity(cx.node, entity.id, &shared).await?;
                    local_id = Some(shared);
                    break;
                }
            }
            if local_id.is_none() {
                info!(code = "product_store_new", product = %entity.unique_id, "first store view for this product");
            }
        }

        if update.update_type == UpdateType::Update || local_id.is_some() {
            info!(code = "product_update_push", product = %entity.unique_id, "pushing product update");
            cx.rpc
                .call(
                    "catalogProductUpdate",
                    vec![
                        json!(entity.unique_id),
                        soap_data,
                        json!(entity.store_scope),
                        json!("sku"),
                    ],
                )
                .await?;
            return Ok(Some(true));
        }

        let class = entity.attr_str("product_class").unwrap_or("default");
        let set_id = self.set_for_class(class).ok_or_else(|| {
            SyncFault::consistency(
                EntityType::Product,
                &entity.unique_id,
                format!("invalid product class {class}"),
            )
        })?;
        let product_type = entity.attr_str("type").unwrap_or("simple");
        let created = cx
            .rpc
            .call(
                "catalogProductCreate",
                vec![
                    json!(product_type),
                    json!(set_id),
                    json!(entity.unique_id),
                    soap_data.clone(),
                    json!(entity.store_scope),
                ],
            )
            .await;
        match created {
            Ok(result) => {
                if let Some(remote_id) = payload::scalar(&result) {
                    cx.store.link_entity(cx.node, entity.id, &remote_id).await?;
                }
                info!(code = "product_created", product = %entity.unique_id, "product created remotely");
                Ok(Some(true))
            }
            Err(fault) if fault.kind == FaultKind::DuplicateSku => {
                warn!(
                    code = "product_duplicate_sku",
                    product = %entity.unique_id,
                    "creation hit the unique-SKU constraint"
                );
                match self.resolve_duplicate_sku(cx, entity, &soap_data).await? {
                    Some(_) => Ok(Some(true)),
                    None => Err(fault.into()),
                }
            }
            Err(fault) => Err(fault.into()),
        }
    }

    async fn write_action(
        &self,
        cx: &SyncContext,
        entity: &Entity,
        action: &Action,
    ) -> Result<Option<bool>, SyncFault> {
        match action.kind {
            ActionKind::Delete => {
                cx.rpc
                    .call(
                        "catalogProductDelete",
                        vec![json!(entity.unique_id), json!("sku")],
                    )
                    .await?;
                info!(code = "product_deleted", product = %entity.unique_id, "product deleted remotely");
                Ok(Some(true))
            }
            other => Err(SyncFault::consistency(
                EntityType::Product,
                &entity.unique_id,
                format!("unsupported product action: {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use storelink_entity::MemoryStore;
    use storelink_rpc::{MockTransport, RpcClient};
    use uuid::Uuid;

    use crate::context::NodeConfig;

    fn context(transport: Arc<MockTransport>, config: NodeConfig) -> SyncContext {
        SyncContext::new(
            Uuid::new_v4(),
            Arc::new(MemoryStore::new()),
            RpcClient::new(transport),
            config,
        )
    }

    async fn init_sets(gateway: &ProductGateway, cx: &SyncContext, transport: &MockTransport) {
        transport.enqueue(
            "catalogProductAttributeSetList",
            json!([{"set_id": "4", "name": "Default"}]),
        );
        gateway.init(cx).await.unwrap();
    }

    #[tokio::test]
    async fn retrieval_converts_flags_and_creates_the_stock_child() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone(), NodeConfig::default());
        let gateway = ProductGateway::new();
        init_sets(&gateway, &cx, &transport).await;

        transport.enqueue(
            "catalogProductList",
            json!([{
                "product_id": "501",
                "sku": "SKU-1",
                "name": "Widget",
                "set": "4",
                "type_id": "simple",
                "status": "1",
                "visibility": "4",
                "tax_class_id": "2",
                "price": "10.0000",
                "special_price": "8.0000",
            }]),
        );

        let outcome = gateway.retrieve(&cx).await.unwrap();
        assert_eq!(outcome.retrieved, 1);

        let product = cx
            .store
            .load_entity(cx.node, EntityType::Product, 0, "SKU-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product.attr_str("name"), Some("Widget"));
        assert_eq!(product.attr_bool("enabled"), Some(true));
        assert_eq!(product.attr_bool("visible"), Some(true));
        assert_eq!(product.attr_bool("taxable"), Some(true));
        assert_eq!(product.attr_f64("price"), Some(10.0));
        assert_eq!(product.attr_f64("special_price"), Some(8.0));
        assert_eq!(product.attr_str("product_class"), Some("Default"));
        assert_eq!(
            cx.store.get_local_id(cx.node, product.id).await.unwrap(),
            Some("501".to_string())
        );

        let children = cx
            .store
            .load_children(cx.node, EntityType::StockItem, product.id)
            .await
            .unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].unique_id, "SKU-1");
        assert_eq!(
            cx.store.get_local_id(cx.node, children[0].id).await.unwrap(),
            Some("501".to_string())
        );
    }

    #[tokio::test]
    async fn full_info_merges_additional_attributes() {
        let transport = Arc::new(MockTransport::new());
        let config = NodeConfig {
            load_full_product: true,
            product_attributes: vec!["barcode".to_string()],
            ..NodeConfig::default()
        };
        let cx = context(transport.clone(), config);
        let gateway = ProductGateway::new();
        init_sets(&gateway, &cx, &transport).await;

        transport.enqueue(
            "catalogProductList",
            json!([{"product_id": "501", "sku": "SKU-1", "set": "4"}]),
        );
        transport.enqueue(
            "catalogProductInfo",
            json!({
                "product_id": "501",
                "sku": "SKU-1",
                "name": "Widget",
                "status": "1",
                "additional_attributes": [{"key": "barcode", "value": "9400001"}],
            }),
        );

        gateway.retrieve(&cx).await.unwrap();
        let product = cx
            .store
            .load_entity(cx.node, EntityType::Product, 0, "SKU-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product.attr_str("barcode"), Some("9400001"));
        assert_eq!(product.attr_str("name"), Some("Widget"));

        let info_calls = transport.calls_to("catalogProductInfo");
        assert_eq!(info_calls[0][0], json!("501"));
        assert_eq!(info_calls[0][2], json!({"additional_attributes": ["barcode"]}));
    }

    #[tokio::test]
    async fn unexpected_attributes_fault_the_record() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone(), NodeConfig::default());
        let gateway = ProductGateway::new();

        transport.enqueue(
            "catalogProductList",
            json!([{
                "product_id": "501",
                "sku": "SKU-1",
                "additional_attributes": [{"key": "mystery", "value": "1"}],
            }]),
        );
        let outcome = gateway.retrieve(&cx).await.unwrap();
        assert_eq!(outcome.retrieved, 0);
        assert_eq!(outcome.record_failures, 1);
    }

    #[tokio::test]
    async fn update_push_converts_attributes_back() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone(), NodeConfig::default());
        let gateway = ProductGateway::new();

        let product = cx
            .store
            .create_entity(
                cx.node,
                EntityType::Product,
                0,
                "SKU-1",
                AttributeMap::new()
                    .with("name", "Widget")
                    .with("enabled", true)
                    .with("visible", false),
                None,
            )
            .await
            .unwrap();
        cx.store.link_entity(cx.node, product.id, "501").await.unwrap();

        transport.enqueue("catalogProductUpdate", json!(true));
        let update = PendingUpdate::new(
            product.id,
            UpdateType::Update,
            vec![
                "name".to_string(),
                "enabled".to_string(),
                "visible".to_string(),
                "special_price".to_string(),
            ],
        );
        let result = gateway.write_update(&cx, &product, &update).await.unwrap();
        assert_eq!(result, Some(true));

        let calls = transport.calls_to("catalogProductUpdate");
        assert_eq!(calls[0][0], json!("SKU-1"));
        assert_eq!(
            calls[0][1],
            json!({
                "name": "Widget",
                "status": 1,
                "visibility": 1,
                "special_price": null,
                "website_ids": [0],
            })
        );
        assert_eq!(calls[0][2], json!(0));
        assert_eq!(calls[0][3], json!("sku"));
    }

    #[tokio::test]
    async fn creation_resolves_the_attribute_set() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone(), NodeConfig::default());
        let gateway = ProductGateway::new();
        init_sets(&gateway, &cx, &transport).await;

        let product = cx
            .store
            .create_entity(
                cx.node,
                EntityType::Product,
                0,
                "NEW-SKU",
                AttributeMap::new().with("name", "New widget"),
                None,
            )
            .await
            .unwrap();

        transport.enqueue("catalogProductCreate", json!("901"));
        let update = PendingUpdate::new(product.id, UpdateType::Create, vec!["name".to_string()]);
        gateway.write_update(&cx, &product, &update).await.unwrap();

        let calls = transport.calls_to("catalogProductCreate");
        assert_eq!(calls[0][0], json!("simple"));
        assert_eq!(calls[0][1], json!(4));
        assert_eq!(calls[0][2], json!("NEW-SKU"));
        assert_eq!(
            cx.store.get_local_id(cx.node, product.id).await.unwrap(),
            Some("901".to_string())
        );
    }

    #[tokio::test]
    async fn duplicate_sku_adopts_the_existing_remote_product() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone(), NodeConfig::default());
        let gateway = ProductGateway::new();
        init_sets(&gateway, &cx, &transport).await;

        let product = cx
            .store
            .create_entity(
                cx.node,
                EntityType::Product,
                0,
                "SKU-1",
                AttributeMap::new().with("name", "Widget"),
                None,
            )
            .await
            .unwrap();

        transport.enqueue_fault(
            "catalogProductCreate",
            "The value of attribute \"SKU\" must be unique",
        );
        transport.enqueue(
            "catalogProductInfo",
            json!({"product_id": "777", "sku": "SKU-1"}),
        );
        transport.enqueue("catalogProductUpdate", json!(true));

        let update = PendingUpdate::new(product.id, UpdateType::Create, vec!["name".to_string()]);
        let result = gateway.write_update(&cx, &product, &update).await.unwrap();
        assert_eq!(result, Some(true));
        assert_eq!(
            cx.store.get_local_id(cx.node, product.id).await.unwrap(),
            Some("777".to_string())
        );
        assert_eq!(transport.calls_to("catalogProductUpdate").len(), 1);
    }

    #[tokio::test]
    async fn unknown_product_class_is_a_consistency_fault() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone(), NodeConfig::default());
        let gateway = ProductGateway::new();
        init_sets(&gateway, &cx, &transport).await;

        let product = cx
            .store
            .create_entity(
                cx.node,
                EntityType::Product,
                0,
                "NEW-SKU",
                AttributeMap::new().with("product_class", "imaginary"),
                None,
            )
            .await
            .unwrap();
        let update = PendingUpdate::new(product.id, UpdateType::Create, vec![]);
        let fault = gateway.write_update(&cx, &product, &update).await.unwrap_err();
        assert!(fault.to_string().contains("invalid product class"));
    }

    #[tokio::test]
    async fn delete_action_removes_the_remote_product() {
        let transport = Arc::new(MockTransport::new());
        let cx = context(transport.clone(), NodeConfig::default());
        let product = cx
            .store
            .create_entity(cx.node, EntityType::Product, 0, "SKU-1", AttributeMap::new(), None)
            .await
            .unwrap();

        transport.enqueue("catalogProductDelete", json!(true));
        let action = Action::new(product.id, ActionKind::Delete, AttributeMap::new());
        let result = ProductGateway::new()
            .write_action(&cx, &product, &action)
            .await
            .unwrap();
        assert_eq!(result, Some(true));
        assert_eq!(
            transport.calls_to("catalogProductDelete")[0],
            vec![json!("SKU-1"), json!("sku")]
        );

        let action = Action::new(product.id, ActionKind::Hold, AttributeMap::new());
        let fault = ProductGateway::new()
            .write_action(&cx, &product, &action)
            .await
            .unwrap_err();
        assert_eq!(fault.code(), "consistency");
    }
}
