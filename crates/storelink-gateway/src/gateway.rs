//! The gateway seam between the entity store and the storefront.

use std::sync::Arc;

use async_trait::async_trait;
use storelink_entity::{Action, Entity, EntityType, PendingUpdate};

use crate::context::SyncContext;
use crate::creditmemo::CreditMemoGateway;
use crate::customer::CustomerGateway;
use crate::error::SyncFault;
use crate::order::OrderGateway;
use crate::product::ProductGateway;
use crate::stock::StockGateway;

/// What one retrieval pass did for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrieveOutcome {
    pub entity_type: EntityType,
    /// Records stored or updated.
    pub retrieved: usize,
    /// Records not eligible for this channel, or deferred as too fresh.
    pub skipped: usize,
    /// Records that faulted individually; the cursor advanced anyway.
    pub record_failures: usize,
    /// Records recovered by the forced resynchronization pass.
    pub forced: usize,
    /// Eligible remote ids still absent after the forced pass.
    pub residual_drift: Vec<String>,
    pub success: bool,
}

impl RetrieveOutcome {
    #[must_use]
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            retrieved: 0,
            skipped: 0,
            record_failures: 0,
            forced: 0,
            residual_drift: Vec::new(),
            success: true,
        }
    }
}

/// One entity type's bridge to the storefront.
///
/// A gateway owns three flows: pulling changed remote records into the
/// entity store, pushing pending attribute updates out, and performing
/// queued actions remotely. Write methods return `Ok(None)` when the
/// work does not apply to the remote side and was skipped, which leaves
/// the queue item pending.
#[async_trait]
pub trait Gateway: Send + Sync {
    fn entity_type(&self) -> EntityType;

    /// Build remote lookup tables and check node prerequisites. Called
    /// once before the first pass; call again to refresh the tables.
    async fn init(&self, cx: &SyncContext) -> Result<(), SyncFault> {
        let _ = cx;
        Ok(())
    }

    async fn retrieve(&self, cx: &SyncContext) -> Result<RetrieveOutcome, SyncFault>;

    async fn write_update(
        &self,
        cx: &SyncContext,
        entity: &Entity,
        update: &PendingUpdate,
    ) -> Result<Option<bool>, SyncFault>;

    async fn write_action(
        &self,
        cx: &SyncContext,
        entity: &Entity,
        action: &Action,
    ) -> Result<Option<bool>, SyncFault>;
}

/// The gateways a node runs, in retrieval order.
///
/// Order matters: orders resolve customer and product references, and
/// credit memos resolve orders, so parents retrieve first.
pub struct GatewayRegistry {
    gateways: Vec<Arc<dyn Gateway>>,
}

impl GatewayRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            gateways: Vec::new(),
        }
    }

    /// The full standard set.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CustomerGateway::new()));
        registry.register(Arc::new(ProductGateway::new()));
        registry.register(Arc::new(StockGateway::new()));
        registry.register(Arc::new(OrderGateway::new()));
        registry.register(Arc::new(CreditMemoGateway::new()));
        registry
    }

    pub fn register(&mut self, gateway: Arc<dyn Gateway>) {
        self.gateways.push(gateway);
    }

    #[must_use]
    pub fn get(&self, entity_type: EntityType) -> Option<&Arc<dyn Gateway>> {
        self.gateways
            .iter()
            .find(|gateway| gateway.entity_type() == entity_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Gateway>> {
        self.gateways.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new()
    }
}
