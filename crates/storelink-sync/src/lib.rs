//! Node orchestration for StoreLink.
//!
//! A [`SyncNode`] ties one storefront endpoint to the gateway registry
//! serving it. [`SyncNode::init`] builds the store-view and gateway
//! lookup tables; [`SyncNode::run_once`] performs one full pass —
//! retrieval in dependency order, then the action queue, then the
//! attribute-update queue — and returns a [`RunReport`]. Scheduling the
//! passes is the caller's concern.

pub mod dispatch;
pub mod node;
pub mod report;

pub use dispatch::{process_actions, process_updates};
pub use node::SyncNode;
pub use report::{DispatchTally, RunReport};
