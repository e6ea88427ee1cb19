//! Identity resolution between remote records and stored entities.
//!
//! A remote record carries two identifiers: the mutable numeric id the
//! storefront assigns (held in the store's link table) and the stable
//! business key used as the entity unique id. Resolution trusts the
//! link table first and falls back to the unique id, rebuilding the
//! link when the two disagree. Relinks verify by reloading through the
//! link table so a silent repair failure still leaves a trace.

use storelink_entity::{Entity, EntityType};
use tracing::{debug, error};

use crate::context::SyncContext;
use crate::error::SyncFault;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Found through the link table; the authoritative match.
    Local,
    /// Found by unique id; the link was rebuilt to the new local id.
    Relinked {
        /// The entity held a different local id before the repair.
        had_stale_link: bool,
        /// Reloading through the link table found the entity again.
        verified: bool,
    },
}

#[derive(Debug, Clone)]
pub struct IdentityMatch {
    pub entity: Entity,
    pub kind: MatchKind,
}

/// Resolve a remote record to a stored entity, repairing the link if
/// only the unique id matches. Returns `None` when the record is new.
pub async fn resolve(
    cx: &SyncContext,
    entity_type: EntityType,
    store_scope: i32,
    local_id: &str,
    unique_id: &str,
) -> Result<Option<IdentityMatch>, SyncFault> {
    if let Some(entity) = cx
        .store
        .load_entity_local(cx.node, entity_type, store_scope, local_id)
        .await?
    {
        return Ok(Some(IdentityMatch {
            entity,
            kind: MatchKind::Local,
        }));
    }

    let Some(entity) = cx
        .store
        .load_entity(cx.node, entity_type, store_scope, unique_id)
        .await?
    else {
        return Ok(None);
    };

    let had_stale_link = cx.store.get_local_id(cx.node, entity.id).await?.is_some();
    if had_stale_link {
        // Best effort: a failed unlink still lets the relink displace it.
        if let Err(fault) = cx.store.unlink_entity(cx.node, entity.id).await {
            debug!(
                entity_type = %entity_type,
                unique_id,
                error = %fault,
                "stale link removal failed"
            );
        }
    }
    cx.store.link_entity(cx.node, entity.id, local_id).await?;

    let verified = cx
        .store
        .load_entity_local(cx.node, entity_type, store_scope, local_id)
        .await?
        .is_some_and(|reloaded| reloaded.id == entity.id);
    if !verified {
        error!(
            code = "relink_failed",
            entity_type = %entity_type,
            unique_id,
            local_id,
            "relink did not verify through the link table"
        );
    }

    Ok(Some(IdentityMatch {
        entity,
        kind: MatchKind::Relinked {
            had_stale_link,
            verified,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use storelink_entity::{AttributeMap, MemoryStore};
    use storelink_rpc::{MockTransport, RpcClient};
    use uuid::Uuid;

    fn context() -> SyncContext {
        SyncContext::new(
            Uuid::new_v4(),
            Arc::new(MemoryStore::new()),
            RpcClient::new(Arc::new(MockTransport::new())),
            crate::context::NodeConfig::default(),
        )
    }

    #[tokio::test]
    async fn local_id_wins_over_unique_id() {
        let cx = context();
        let by_local = cx
            .store
            .create_entity(
                cx.node,
                EntityType::Product,
                0,
                "SKU-1",
                AttributeMap::new(),
                None,
            )
            .await
            .unwrap();
        cx.store.link_entity(cx.node, by_local.id, "77").await.unwrap();
        let by_unique = cx
            .store
            .create_entity(
                cx.node,
                EntityType::Product,
                0,
                "SKU-2",
                AttributeMap::new(),
                None,
            )
            .await
            .unwrap();

        let found = resolve(&cx, EntityType::Product, 0, "77", "SKU-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.entity.id, by_local.id);
        assert_eq!(found.kind, MatchKind::Local);
        let _ = by_unique;
    }

    #[tokio::test]
    async fn unique_match_rebuilds_the_link() {
        let cx = context();
        let entity = cx
            .store
            .create_entity(
                cx.node,
                EntityType::Product,
                0,
                "SKU-1",
                AttributeMap::new(),
                None,
            )
            .await
            .unwrap();

        let found = resolve(&cx, EntityType::Product, 0, "90", "SKU-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            found.kind,
            MatchKind::Relinked {
                had_stale_link: false,
                verified: true
            }
        );
        assert_eq!(
            cx.store.get_local_id(cx.node, entity.id).await.unwrap(),
            Some("90".to_string())
        );
    }

    #[tokio::test]
    async fn stale_links_are_displaced() {
        let cx = context();
        let entity = cx
            .store
            .create_entity(
                cx.node,
                EntityType::Product,
                0,
                "SKU-1",
                AttributeMap::new(),
                None,
            )
            .await
            .unwrap();
        cx.store.link_entity(cx.node, entity.id, "11").await.unwrap();

        let found = resolve(&cx, EntityType::Product, 0, "12", "SKU-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            found.kind,
            MatchKind::Relinked {
                had_stale_link: true,
                verified: true
            }
        );
        assert_eq!(
            cx.store.get_local_id(cx.node, entity.id).await.unwrap(),
            Some("12".to_string())
        );
        assert!(cx
            .store
            .load_entity_local(cx.node, EntityType::Product, 0, "11")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unknown_records_resolve_to_none() {
        let cx = context();
        let found = resolve(&cx, EntityType::Product, 0, "1", "SKU-404")
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
