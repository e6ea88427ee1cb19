//! Synchronization fault taxonomy.
//!
//! Faults carry different blast radii. Transport and store faults abort
//! the record they occur in, or the whole pass when raised outside a
//! record loop. Configuration faults are fatal until an operator fixes
//! the node. Consistency faults mark a single record as contradicting
//! the entity store. Drift faults report records still missing after a
//! forced resynchronization; they fail the run without stopping it.

use storelink_entity::{EntityType, StoreError};
use storelink_rpc::RpcFault;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncFault {
    /// A storefront call failed, timed out, or returned a fault.
    #[error(transparent)]
    Transport(#[from] RpcFault),

    /// The entity store rejected an operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The node is misconfigured; no pass can succeed until it is fixed.
    #[error("configuration fault: {message}")]
    Configuration { message: String },

    /// A remote record or queued request contradicts the entity store.
    #[error("consistency fault on {entity_type} {unique_id}: {message}")]
    Consistency {
        entity_type: EntityType,
        unique_id: String,
        message: String,
    },

    /// Eligible remote records stayed absent after a forced pass.
    #[error("{entity_type} drift: {} record(s) still out of sync", unique_ids.len())]
    Drift {
        entity_type: EntityType,
        unique_ids: Vec<String>,
    },
}

impl SyncFault {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn consistency(
        entity_type: EntityType,
        unique_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Consistency {
            entity_type,
            unique_id: unique_id.into(),
            message: message.into(),
        }
    }

    pub fn drift(entity_type: EntityType, unique_ids: Vec<String>) -> Self {
        Self::Drift {
            entity_type,
            unique_ids,
        }
    }

    /// Stable code for log correlation.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Store(_) => "store",
            Self::Configuration { .. } => "configuration",
            Self::Consistency { .. } => "consistency",
            Self::Drift { .. } => "drift",
        }
    }

    /// Whether the fault poisons the whole run rather than one record.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_faults_are_fatal() {
        let fault = SyncFault::configuration("node has no storefront endpoint");
        assert!(fault.is_fatal());
        assert_eq!(fault.code(), "configuration");
        assert_eq!(
            fault.to_string(),
            "configuration fault: node has no storefront endpoint"
        );
    }

    #[test]
    fn consistency_faults_name_the_record() {
        let fault = SyncFault::consistency(
            EntityType::Order,
            "100000123",
            "payment details missing",
        );
        assert!(!fault.is_fatal());
        assert_eq!(
            fault.to_string(),
            "consistency fault on order 100000123: payment details missing"
        );
    }

    #[test]
    fn drift_reports_the_residual_count() {
        let fault = SyncFault::drift(
            EntityType::Order,
            vec!["100000123".into(), "100000124".into()],
        );
        assert_eq!(fault.code(), "drift");
        assert_eq!(
            fault.to_string(),
            "order drift: 2 record(s) still out of sync"
        );
    }

    #[test]
    fn rpc_faults_convert_transparently() {
        let fault: SyncFault = RpcFault::transport("salesOrderList", "connection refused").into();
        assert_eq!(fault.code(), "transport");
        assert!(!fault.is_fatal());
    }
}
