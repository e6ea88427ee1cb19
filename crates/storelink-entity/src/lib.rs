//! # storelink-entity
//!
//! The entity data model shared by the StoreLink synchronization engine and
//! the interface to the entity store it reconciles against.
//!
//! Entities carry a dual identity: the `unique_id` is the storefront's
//! stable business key (order increment number, customer email, SKU), while
//! the storefront's mutable numeric id lives in the store's link table and
//! may be absent or stale. The engine repairs links; the store enforces the
//! at-most-one-holder invariant.

pub mod memory;
pub mod model;
pub mod store;
pub mod value;

pub use memory::MemoryStore;
pub use model::{
    Action, ActionKind, Comment, Entity, EntityType, PendingUpdate, UpdateType, TEMPORARY_PREFIX,
};
pub use store::{EntityStore, StoreError, StoreResult};
pub use value::{AttributeMap, AttributeValue};
