//! What one synchronization run did.

use chrono::{DateTime, Utc};
use storelink_gateway::{RetrieveOutcome, SyncFault};
use storelink_entity::EntityType;
use uuid::Uuid;

/// Counters for one queue-dispatch phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchTally {
    /// Queue items examined.
    pub processed: usize,
    /// Items the remote side accepted.
    pub succeeded: usize,
    /// Items resolved as failed, including unresolvable references.
    pub failed: usize,
    /// Items left pending for a later run.
    pub deferred: usize,
}

/// Summary of one full pass over a node.
///
/// Per-record retrieval failures are tallied inside each
/// [`RetrieveOutcome`] and do not fail the run; run-level faults and
/// residual drift do.
#[derive(Debug)]
pub struct RunReport {
    pub node: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub retrievals: Vec<RetrieveOutcome>,
    pub actions: DispatchTally,
    pub updates: DispatchTally,
    /// Run-level faults: failed retrieval passes and residual drift.
    pub faults: Vec<SyncFault>,
}

impl RunReport {
    pub(crate) fn new(node: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            node,
            started_at,
            finished_at: started_at,
            retrievals: Vec::new(),
            actions: DispatchTally::default(),
            updates: DispatchTally::default(),
            faults: Vec::new(),
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.faults.is_empty() && self.retrievals.iter().all(|outcome| outcome.success)
    }

    #[must_use]
    pub fn retrieved_total(&self) -> usize {
        self.retrievals.iter().map(|outcome| outcome.retrieved).sum()
    }

    #[must_use]
    pub fn outcome(&self, entity_type: EntityType) -> Option<&RetrieveOutcome> {
        self.retrievals
            .iter()
            .find(|outcome| outcome.entity_type == entity_type)
    }
}
