//! Per-entity-type storefront gateways.
//!
//! A [`Gateway`] owns one entity type's traffic in both directions:
//! retrieval pulls changed remote records into the entity store through
//! the dual-identity resolution in [`identity`], and the write methods
//! push queued updates and actions back out. Retrieval is eventually
//! consistent by construction; the [`window`] module bounds each pass
//! and the order gateway carries a drift-recovery sweep on top because
//! order rows are the one place the storefront is known to lie about
//! `updated_at`.

pub mod context;
pub mod creditmemo;
pub mod customer;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod order;
pub mod payload;
pub mod product;
pub mod stock;
pub mod window;

pub use context::{NodeConfig, OrderIdBands, StoreView, SyncContext};
pub use creditmemo::CreditMemoGateway;
pub use customer::CustomerGateway;
pub use error::SyncFault;
pub use gateway::{Gateway, GatewayRegistry, RetrieveOutcome};
pub use order::OrderGateway;
pub use product::ProductGateway;
pub use stock::StockGateway;
pub use window::RetrievalWindow;
