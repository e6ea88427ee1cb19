//! Storefront RPC plumbing for storelink.
//!
//! The storefront exposes a polling RPC API and never calls us back, so every
//! interaction goes through [`RpcClient::call`]. This crate owns the transport
//! seam, local deadlines, the response envelope, and the translation of the
//! storefront's free-text faults into the typed [`FaultKind`] taxonomy the
//! gateways act on.

pub mod client;
pub mod fault;
pub mod settings;
pub mod transport;
pub mod wire;

pub use client::RpcClient;
pub use fault::{FaultKind, FaultTranslator, RpcFault};
pub use settings::RpcSettings;
pub use transport::{MockTransport, RpcTransport, TransportError};
pub use wire::{format_remote_time, parse_remote_time, ComplexFilter, REMOTE_TIME_FORMAT};
