//! Customer retrieval.
//!
//! Customers flow inward only, keyed by email address. The remote
//! numeric customer id lives in the link table; group membership is
//! resolved through a lookup table fetched at init time.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use storelink_entity::{Action, AttributeMap, Entity, EntityType, PendingUpdate};
use storelink_rpc::{format_remote_time, ComplexFilter};
use tracing::{debug, error, info, warn};

use crate::context::SyncContext;
use crate::error::SyncFault;
use crate::gateway::{Gateway, RetrieveOutcome};
use crate::identity::{self, MatchKind};
use crate::payload;
use crate::window::RetrievalWindow;

pub struct CustomerGateway {
    /// Remote group id to group code, filled by [`Gateway::init`].
    groups: RwLock<HashMap<i64, String>>,
}

impl CustomerGateway {
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
        }
    }

    fn group_code(&self, group_id: i64) -> Option<String> {
        self.groups
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&group_id)
            .cloned()
    }

    async fn retrieve_customer(&self, cx: &SyncContext, row: &JsonValue) -> Result<(), SyncFault> {
        let unique = payload::text(row, "email")
            .filter(|email| !email.is_empty())
            .ok_or_else(|| {
                SyncFault::consistency(
                    EntityType::Customer,
                    "(unknown)",
                    "customer row carries no email address",
                )
            })?
            .to_string();
        let local_id = payload::string(row, "customer_id").ok_or_else(|| {
            SyncFault::consistency(EntityType::Customer, &unique, "customer row carries no remote id")
        })?;
        let scope = cx.order_scope(payload::integer(row, "store_id").map(|id| id as i32));

        let mut attributes = AttributeMap::new();
        attributes.set("first_name", payload::text(row, "firstname"));
        attributes.set("middle_name", payload::text(row, "middlename"));
        attributes.set("last_name", payload::text(row, "lastname"));
        attributes.set("date_of_birth", payload::text(row, "dob"));

        if !cx.config.customer_attributes.is_empty() {
            let extra = cx
                .rpc
                .call(
                    "customerCustomerInfo",
                    vec![json!(local_id), json!(cx.config.customer_attributes)],
                )
                .await?;
            for attribute in &cx.config.customer_attributes {
                attributes.set(attribute.clone(), payload::text(&extra, attribute));
            }
        }

        if let Some(group_id) = payload::integer(row, "group_id") {
            match self.group_code(group_id) {
                Some(code) => attributes.set("customer_type", code),
                None => warn!(
                    code = "unknown_group",
                    unique, group_id, "customer group is not in the remote group table"
                ),
            }
        }

        if cx.config.load_full_customer {
            attributes.merge(self.retrieve_addresses(cx, &local_id, scope).await?);
        }

        match identity::resolve(cx, EntityType::Customer, scope, &local_id, &unique).await? {
            Some(found) => {
                match found.kind {
                    MatchKind::Local => info!(code = "customer_update", unique, "updating customer"),
                    MatchKind::Relinked { had_stale_link, .. } => {
                        if had_stale_link {
                            warn!(code = "customer_wronglink", unique, local_id, "repaired customer link");
                        } else {
                            info!(code = "customer_link", unique, local_id, "linked customer");
                        }
                    }
                }
                cx.store
                    .update_entity(cx.node, found.entity.id, attributes, true)
                    .await?;
            }
            None => {
                let entity = cx
                    .store
                    .create_entity(cx.node, EntityType::Customer, scope, &unique, attributes, None)
                    .await?;
                cx.store.link_entity(cx.node, entity.id, &local_id).await?;
                info!(code = "customer_new", unique, local_id, "stored new customer");
            }
        }
        Ok(())
    }

    /// Pull the customer's address book and store the default billing
    /// and shipping entries. Returns the reference attributes to merge
    /// into the customer.
    async fn retrieve_addresses(
        &self,
        cx: &SyncContext,
        customer_local_id: &str,
        scope: i32,
    ) -> Result<AttributeMap, SyncFault> {
        let response = cx
            .rpc
            .call("customerAddressList", vec![json!(customer_local_id)])
            .await?;
        let mut refs = AttributeMap::new();
        for row in payload::rows(&response) {
            let kind = if payload::flag(row, "is_default_billing") {
                "billing"
            } else if payload::flag(row, "is_default_shipping") {
                "shipping"
            } else {
                continue;
            };
            let unique = format!("cust-{customer_local_id}-{kind}");

            let mut attributes = AttributeMap::new();
            for (code, key) in [
                ("prefix", "prefix"),
                ("first_name", "firstname"),
                ("middle_name", "middlename"),
                ("last_name", "lastname"),
                ("suffix", "suffix"),
                ("street", "street"),
                ("city", "city"),
                ("region", "region"),
                ("postcode", "postcode"),
                ("country_code", "country_id"),
                ("telephone", "telephone"),
                ("company", "company"),
            ] {
                attributes.set(code, payload::text(row, key));
            }

            let address = match cx
                .store
                .load_entity(cx.node, EntityType::Address, scope, &unique)
                .await?
            {
                Some(existing) => {
                    cx.store
                        .update_entity(cx.node, existing.id, attributes, true)
                        .await?;
                    existing
                }
                None => {
                    let created = cx
                        .store
                        .create_entity(cx.node, EntityType::Address, scope, &unique, attributes, None)
                        .await?;
                    if let Some(local) = payload::string(row, "customer_address_id") {
                        cx.store.link_entity(cx.node, created.id, &local).await?;
                    }
                    created
                }
            };
            refs.set(format!("{kind}_address"), address.id.to_string());
        }
        Ok(refs)
    }
}

impl Default for CustomerGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Gateway for CustomerGateway {
    fn entity_type(&self) -> EntityType {
        EntityType::Customer
    }

    async fn init(&self, cx: &SyncContext) -> Result<(), SyncFault> {
        let response = cx.rpc.call("customerGroupList", vec![]).await?;
        let mut table = HashMap::new();
        for row in payload::rows(&response) {
            let Some(id) = payload::integer(row, "customer_group_id") else {
                continue;
            };
            let Some(code) = payload::text(row, "customer_group_code") else {
                continue;
            };
            table.insert(id, code.to_string());
        }
        debug!(groups = table.len(), "customer group table refreshed");
        *self
            .groups
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = table;
        Ok(())
    }

    async fn retrieve(&self, cx: &SyncContext) -> Result<RetrieveOutcome, SyncFault> {
        let started = Instant::now();
        let now = Utc::now();
        let last_cursor = cx
            .store
            .get_timestamp(cx.node, EntityType::Customer, "retrieve")
            .await?;
        let window = RetrievalWindow::compute(
            last_cursor,
            now,
            cx.config.api_overlap_secs,
            cx.config.time_delta_customer,
        );
        info!(
            code = "retr_time",
            entity_type = "customer",
            since = %format_remote_time(window.since),
            "retrieving customers updated since {}",
            format_remote_time(window.since)
        );

        let response = cx
            .rpc
            .call(
                "customerCustomerList",
                vec![ComplexFilter::updated_since(window.since).to_value()],
            )
            .await?;

        let mut outcome = RetrieveOutcome::new(EntityType::Customer);
        for row in payload::rows(&response) {
            match self.retrieve_customer(cx, row).await {
                Ok(()) => outcome.retrieved += 1,
                Err(fault) if fault.is_fatal() => return Err(fault),
                Err(fault) => {
                    error!(code = "customer_store_failed", error = %fault, "customer not stored");
                    outcome.record_failures += 1;
                }
            }
        }

        cx.store
            .set_timestamp(cx.node, EntityType::Customer, "retrieve", window.until)
            .await?;
        info!(
            code = "customer_retrieve_done",
            retrieved = outcome.retrieved,
            failures = outcome.record_failures,
            seconds = started.elapsed().as_secs_f64(),
            "customer retrieval pass finished"
        );
        Ok(outcome)
    }

    async fn write_update(
        &self,
        _cx: &SyncContext,
        entity: &Entity,
        _update: &PendingUpdate,
    ) -> Result<Option<bool>, SyncFault> {
        // Customer master data lives on the storefront.
        debug!(customer = %entity.unique_id, code = "customer_write_skip", "customer updates do not write back");
        Ok(None)
    }

    async fn write_action(
        &self,
        _cx: &SyncContext,
        entity: &Entity,
        action: &Action,
    ) -> Result<Option<bool>, SyncFault> {
        warn!(
            code = "customer_action_unsupported",
            customer = %entity.unique_id,
            kind = %action.kind,
            "customer actions are not supported"
        );
        Ok(Some(false))
    }
}
