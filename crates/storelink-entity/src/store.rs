//! The entity store collaborator interface.
//!
//! The synchronization engine never talks to storage directly; everything
//! goes through [`EntityStore`]. The store owns the link table (storefront
//! numeric id → local entity), the per-entity comment log, the retrieval
//! timestamp cursors, and the action/update queues the dispatcher drains.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{Action, Comment, Entity, EntityType, PendingUpdate};
use crate::value::{AttributeMap, AttributeValue};

/// Errors raised by an entity store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Lookup target does not exist.
    #[error("{entity_type} not found: {key}")]
    NotFound { entity_type: EntityType, key: String },

    /// No entity carries this internal id.
    #[error("unknown entity: {entity_id}")]
    UnknownEntity { entity_id: Uuid },

    /// No queued action/update carries this id.
    #[error("unknown queue item: {id}")]
    UnknownQueueItem { id: Uuid },

    /// Unique id already taken within `(node, entityType, storeScope)`.
    #[error("duplicate unique id for {entity_type}: {unique_id}")]
    DuplicateUnique {
        entity_type: EntityType,
        unique_id: String,
    },

    /// A comment with this reference id already exists on the entity.
    #[error("duplicate comment reference: {reference_id}")]
    DuplicateCommentReference { reference_id: String },

    /// Unlink requested for an entity that holds no link.
    #[error("entity {entity_id} is not linked")]
    NotLinked { entity_id: Uuid },

    /// Transaction scope name is already open.
    #[error("transaction already open: {name}")]
    TransactionOpen { name: String },

    /// Commit/rollback for a transaction scope that was never begun.
    #[error("unknown transaction: {name}")]
    UnknownTransaction { name: String },

    /// Backend failure.
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Convenience result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// The entity store the engine reconciles against.
///
/// Implementations are external to this workspace; [`crate::MemoryStore`]
/// is the reference implementation used by tests.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Load an entity by its stable unique id. Scope 0 matches any
    /// store scope.
    async fn load_entity(
        &self,
        node: Uuid,
        entity_type: EntityType,
        store_scope: i32,
        unique_id: &str,
    ) -> StoreResult<Option<Entity>>;

    /// Load an entity through the link table by the storefront's local
    /// id. Scope 0 matches any store scope.
    async fn load_entity_local(
        &self,
        node: Uuid,
        entity_type: EntityType,
        store_scope: i32,
        local_id: &str,
    ) -> StoreResult<Option<Entity>>;

    /// Load an entity by its internal id.
    async fn load_entity_by_id(&self, node: Uuid, entity_id: Uuid) -> StoreResult<Option<Entity>>;

    /// Create a new entity. Fails if the unique id is taken.
    async fn create_entity(
        &self,
        node: Uuid,
        entity_type: EntityType,
        store_scope: i32,
        unique_id: &str,
        attributes: AttributeMap,
        parent: Option<Uuid>,
    ) -> StoreResult<Entity>;

    /// Update entity attributes and refresh `last_synced_at`.
    ///
    /// With `partial` set, only the provided keys are written; otherwise the
    /// provided map becomes the entity's full attribute set.
    async fn update_entity(
        &self,
        node: Uuid,
        entity_id: Uuid,
        attributes: AttributeMap,
        partial: bool,
    ) -> StoreResult<()>;

    /// Rewrite an entity's unique id (after the storefront assigns the real
    /// one to a temporary entity).
    async fn update_entity_unique(
        &self,
        node: Uuid,
        entity_id: Uuid,
        unique_id: &str,
    ) -> StoreResult<()>;

    /// Bind a storefront local id to an entity.
    ///
    /// At most one entity holds a link for a given `(entityType, localId)`;
    /// linking displaces any previous holder.
    async fn link_entity(&self, node: Uuid, entity_id: Uuid, local_id: &str) -> StoreResult<()>;

    /// Remove an entity's link. Errors with [`StoreError::NotLinked`] if the
    /// entity holds none.
    async fn unlink_entity(&self, node: Uuid, entity_id: Uuid) -> StoreResult<()>;

    /// Get the storefront local id an entity is linked to, if any.
    async fn get_local_id(&self, node: Uuid, entity_id: Uuid) -> StoreResult<Option<String>>;

    /// Load child entities of a given type under a parent.
    async fn load_children(
        &self,
        node: Uuid,
        entity_type: EntityType,
        parent: Uuid,
    ) -> StoreResult<Vec<Entity>>;

    /// List all unique ids of a type within a store scope.
    async fn list_unique_ids(
        &self,
        node: Uuid,
        entity_type: EntityType,
        store_scope: i32,
    ) -> StoreResult<Vec<String>>;

    /// Find entities whose attribute equals the given value.
    async fn locate_by_attribute(
        &self,
        node: Uuid,
        entity_type: EntityType,
        attribute: &str,
        value: &AttributeValue,
    ) -> StoreResult<Vec<Entity>>;

    /// Attach a comment to an entity. A duplicate `reference_id` on the same
    /// entity is rejected.
    #[allow(clippy::too_many_arguments)]
    async fn create_entity_comment(
        &self,
        node: Uuid,
        entity_id: Uuid,
        author: &str,
        title: &str,
        body: &str,
        reference_id: Option<&str>,
        visible_to_customer: bool,
    ) -> StoreResult<Comment>;

    /// Load all comments on an entity.
    async fn load_entity_comments(&self, node: Uuid, entity_id: Uuid) -> StoreResult<Vec<Comment>>;

    /// Open a named transaction scope covering subsequent writes.
    async fn begin_entity_transaction(&self, name: &str) -> StoreResult<()>;

    /// Commit a named transaction scope.
    async fn commit_entity_transaction(&self, name: &str) -> StoreResult<()>;

    /// Roll back every write made since the named scope was opened.
    async fn rollback_entity_transaction(&self, name: &str) -> StoreResult<()>;

    /// Read a cursor timestamp for `(node, entityType, op)`.
    async fn get_timestamp(
        &self,
        node: Uuid,
        entity_type: EntityType,
        op: &str,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    /// Advance a cursor timestamp.
    async fn set_timestamp(
        &self,
        node: Uuid,
        entity_type: EntityType,
        op: &str,
        value: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Queue an action for the dispatcher.
    async fn queue_action(&self, node: Uuid, action: Action) -> StoreResult<()>;

    /// All unresolved actions for a node, oldest first.
    async fn pending_actions(&self, node: Uuid) -> StoreResult<Vec<Action>>;

    /// Mark an action terminal with the given result.
    async fn resolve_action(&self, node: Uuid, action_id: Uuid, success: bool) -> StoreResult<()>;

    /// Queue an attribute-change notification for the write side.
    async fn queue_update(&self, node: Uuid, update: PendingUpdate) -> StoreResult<()>;

    /// All unconsumed updates for a node, oldest first.
    async fn pending_updates(&self, node: Uuid) -> StoreResult<Vec<PendingUpdate>>;

    /// Remove a consumed update from the queue.
    async fn resolve_update(&self, node: Uuid, update_id: Uuid) -> StoreResult<()>;
}
