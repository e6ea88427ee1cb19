//! In-memory reference implementation of [`EntityStore`].
//!
//! Backs the test suites of every crate in the workspace and doubles as a
//! scratch store for local development. Named transactions are implemented
//! as whole-state snapshots: begin clones, rollback restores, commit
//! discards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::model::{Action, Comment, Entity, EntityType, PendingUpdate};
use crate::store::{EntityStore, StoreError, StoreResult};
use crate::value::{AttributeMap, AttributeValue};

#[derive(Debug, Default, Clone)]
struct State {
    entities: HashMap<Uuid, Entity>,
    /// Which node an entity was created under.
    owner: HashMap<Uuid, Uuid>,
    /// `(node, type, scope, uniqueId)` → entity.
    by_unique: HashMap<(Uuid, EntityType, i32, String), Uuid>,
    /// `(node, type, localId)` → entity. At most one holder per key.
    links: HashMap<(Uuid, EntityType, String), Uuid>,
    /// Reverse side of `links`.
    local_ids: HashMap<Uuid, String>,
    comments: HashMap<Uuid, Vec<Comment>>,
    timestamps: HashMap<(Uuid, EntityType, String), DateTime<Utc>>,
    actions: HashMap<Uuid, Vec<Action>>,
    updates: HashMap<Uuid, Vec<PendingUpdate>>,
}

struct Inner {
    state: State,
    snapshots: HashMap<String, State>,
}

/// In-memory [`EntityStore`].
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::default(),
                snapshots: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Number of entities of a type, handy for test assertions.
    pub fn count(&self, entity_type: EntityType) -> usize {
        self.lock()
            .state
            .entities
            .values()
            .filter(|e| e.entity_type == entity_type)
            .count()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn load_entity(
        &self,
        node: Uuid,
        entity_type: EntityType,
        store_scope: i32,
        unique_id: &str,
    ) -> StoreResult<Option<Entity>> {
        let inner = self.lock();
        let key = (node, entity_type, store_scope, unique_id.to_string());
        if let Some(entity) = inner
            .state
            .by_unique
            .get(&key)
            .and_then(|id| inner.state.entities.get(id))
        {
            return Ok(Some(entity.clone()));
        }
        if store_scope != 0 {
            return Ok(None);
        }
        // Scope 0 reads across store views, like load_entity_local.
        Ok(inner
            .state
            .by_unique
            .iter()
            .filter(|((n, t, _, u), _)| *n == node && *t == entity_type && u == unique_id)
            .min_by_key(|((_, _, scope, _), _)| *scope)
            .and_then(|(_, id)| inner.state.entities.get(id))
            .cloned())
    }

    async fn load_entity_local(
        &self,
        node: Uuid,
        entity_type: EntityType,
        store_scope: i32,
        local_id: &str,
    ) -> StoreResult<Option<Entity>> {
        let inner = self.lock();
        let key = (node, entity_type, local_id.to_string());
        Ok(inner
            .state
            .links
            .get(&key)
            .and_then(|id| inner.state.entities.get(id))
            .filter(|e| e.store_scope == store_scope || store_scope == 0)
            .cloned())
    }

    async fn load_entity_by_id(&self, node: Uuid, entity_id: Uuid) -> StoreResult<Option<Entity>> {
        let inner = self.lock();
        Ok(inner
            .state
            .entities
            .get(&entity_id)
            .filter(|_| inner.state.owner.get(&entity_id) == Some(&node))
            .cloned())
    }

    async fn create_entity(
        &self,
        node: Uuid,
        entity_type: EntityType,
        store_scope: i32,
        unique_id: &str,
        attributes: AttributeMap,
        parent: Option<Uuid>,
    ) -> StoreResult<Entity> {
        let mut inner = self.lock();
        let key = (node, entity_type, store_scope, unique_id.to_string());
        if inner.state.by_unique.contains_key(&key) {
            return Err(StoreError::DuplicateUnique {
                entity_type,
                unique_id: unique_id.to_string(),
            });
        }

        let entity = Entity {
            id: Uuid::new_v4(),
            entity_type,
            store_scope,
            unique_id: unique_id.to_string(),
            parent,
            attributes,
            last_synced_at: Some(Utc::now()),
        };
        inner.state.by_unique.insert(key, entity.id);
        inner.state.owner.insert(entity.id, node);
        inner.state.entities.insert(entity.id, entity.clone());
        Ok(entity)
    }

    async fn update_entity(
        &self,
        _node: Uuid,
        entity_id: Uuid,
        attributes: AttributeMap,
        partial: bool,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        let entity = inner
            .state
            .entities
            .get_mut(&entity_id)
            .ok_or(StoreError::UnknownEntity { entity_id })?;
        if partial {
            entity.attributes.merge(attributes);
        } else {
            entity.attributes = attributes;
        }
        entity.last_synced_at = Some(Utc::now());
        Ok(())
    }

    async fn update_entity_unique(
        &self,
        node: Uuid,
        entity_id: Uuid,
        unique_id: &str,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        let (entity_type, store_scope, old_unique) = {
            let entity = inner
                .state
                .entities
                .get(&entity_id)
                .ok_or(StoreError::UnknownEntity { entity_id })?;
            (entity.entity_type, entity.store_scope, entity.unique_id.clone())
        };

        let new_key = (node, entity_type, store_scope, unique_id.to_string());
        if let Some(holder) = inner.state.by_unique.get(&new_key) {
            if *holder != entity_id {
                return Err(StoreError::DuplicateUnique {
                    entity_type,
                    unique_id: unique_id.to_string(),
                });
            }
        }

        inner
            .state
            .by_unique
            .remove(&(node, entity_type, store_scope, old_unique));
        inner.state.by_unique.insert(new_key, entity_id);
        if let Some(entity) = inner.state.entities.get_mut(&entity_id) {
            entity.unique_id = unique_id.to_string();
        }
        Ok(())
    }

    async fn link_entity(&self, node: Uuid, entity_id: Uuid, local_id: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        let entity_type = inner
            .state
            .entities
            .get(&entity_id)
            .map(|e| e.entity_type)
            .ok_or(StoreError::UnknownEntity { entity_id })?;

        // Drop any link this entity already holds.
        if let Some(old) = inner.state.local_ids.remove(&entity_id) {
            inner.state.links.remove(&(node, entity_type, old));
        }
        // Displace a previous holder of this local id.
        let key = (node, entity_type, local_id.to_string());
        if let Some(previous) = inner.state.links.remove(&key) {
            inner.state.local_ids.remove(&previous);
        }

        inner.state.links.insert(key, entity_id);
        inner
            .state
            .local_ids
            .insert(entity_id, local_id.to_string());
        Ok(())
    }

    async fn unlink_entity(&self, node: Uuid, entity_id: Uuid) -> StoreResult<()> {
        let mut inner = self.lock();
        let entity_type = inner
            .state
            .entities
            .get(&entity_id)
            .map(|e| e.entity_type)
            .ok_or(StoreError::UnknownEntity { entity_id })?;
        let local_id = inner
            .state
            .local_ids
            .remove(&entity_id)
            .ok_or(StoreError::NotLinked { entity_id })?;
        inner.state.links.remove(&(node, entity_type, local_id));
        Ok(())
    }

    async fn get_local_id(&self, _node: Uuid, entity_id: Uuid) -> StoreResult<Option<String>> {
        Ok(self.lock().state.local_ids.get(&entity_id).cloned())
    }

    async fn load_children(
        &self,
        node: Uuid,
        entity_type: EntityType,
        parent: Uuid,
    ) -> StoreResult<Vec<Entity>> {
        let inner = self.lock();
        let mut children: Vec<Entity> = inner
            .state
            .entities
            .values()
            .filter(|e| {
                e.entity_type == entity_type
                    && e.parent == Some(parent)
                    && inner.state.owner.get(&e.id) == Some(&node)
            })
            .cloned()
            .collect();
        children.sort_by(|a, b| a.unique_id.cmp(&b.unique_id));
        Ok(children)
    }

    async fn list_unique_ids(
        &self,
        node: Uuid,
        entity_type: EntityType,
        store_scope: i32,
    ) -> StoreResult<Vec<String>> {
        let inner = self.lock();
        let mut ids: Vec<String> = inner
            .state
            .by_unique
            .keys()
            .filter(|(n, t, s, _)| *n == node && *t == entity_type && *s == store_scope)
            .map(|(_, _, _, unique)| unique.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn locate_by_attribute(
        &self,
        node: Uuid,
        entity_type: EntityType,
        attribute: &str,
        value: &AttributeValue,
    ) -> StoreResult<Vec<Entity>> {
        let inner = self.lock();
        let mut found: Vec<Entity> = inner
            .state
            .entities
            .values()
            .filter(|e| {
                e.entity_type == entity_type
                    && inner.state.owner.get(&e.id) == Some(&node)
                    && e.attributes.get(attribute) == Some(value)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.unique_id.cmp(&b.unique_id));
        Ok(found)
    }

    async fn create_entity_comment(
        &self,
        _node: Uuid,
        entity_id: Uuid,
        author: &str,
        title: &str,
        body: &str,
        reference_id: Option<&str>,
        visible_to_customer: bool,
    ) -> StoreResult<Comment> {
        let mut inner = self.lock();
        let existing = inner.state.comments.entry(entity_id).or_default();
        if let Some(reference) = reference_id {
            if existing
                .iter()
                .any(|c| c.reference_id.as_deref() == Some(reference))
            {
                return Err(StoreError::DuplicateCommentReference {
                    reference_id: reference.to_string(),
                });
            }
        }

        let comment = Comment {
            id: Uuid::new_v4(),
            entity_id,
            author: author.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            reference_id: reference_id.map(str::to_string),
            visible_to_customer,
            created_at: Utc::now(),
        };
        existing.push(comment.clone());
        Ok(comment)
    }

    async fn load_entity_comments(
        &self,
        _node: Uuid,
        entity_id: Uuid,
    ) -> StoreResult<Vec<Comment>> {
        Ok(self
            .lock()
            .state
            .comments
            .get(&entity_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn begin_entity_transaction(&self, name: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.snapshots.contains_key(name) {
            return Err(StoreError::TransactionOpen {
                name: name.to_string(),
            });
        }
        let snapshot = inner.state.clone();
        inner.snapshots.insert(name.to_string(), snapshot);
        Ok(())
    }

    async fn commit_entity_transaction(&self, name: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        inner
            .snapshots
            .remove(name)
            .map(|_| ())
            .ok_or(StoreError::UnknownTransaction {
                name: name.to_string(),
            })
    }

    async fn rollback_entity_transaction(&self, name: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        let snapshot = inner
            .snapshots
            .remove(name)
            .ok_or(StoreError::UnknownTransaction {
                name: name.to_string(),
            })?;
        inner.state = snapshot;
        Ok(())
    }

    async fn get_timestamp(
        &self,
        node: Uuid,
        entity_type: EntityType,
        op: &str,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self
            .lock()
            .state
            .timestamps
            .get(&(node, entity_type, op.to_string()))
            .copied())
    }

    async fn set_timestamp(
        &self,
        node: Uuid,
        entity_type: EntityType,
        op: &str,
        value: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.lock()
            .state
            .timestamps
            .insert((node, entity_type, op.to_string()), value);
        Ok(())
    }

    async fn queue_action(&self, node: Uuid, action: Action) -> StoreResult<()> {
        self.lock().state.actions.entry(node).or_default().push(action);
        Ok(())
    }

    async fn pending_actions(&self, node: Uuid) -> StoreResult<Vec<Action>> {
        Ok(self
            .lock()
            .state
            .actions
            .get(&node)
            .map(|actions| {
                actions
                    .iter()
                    .filter(|a| !a.is_resolved())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn resolve_action(&self, node: Uuid, action_id: Uuid, success: bool) -> StoreResult<()> {
        let mut inner = self.lock();
        let actions = inner.state.actions.entry(node).or_default();
        let action = actions
            .iter_mut()
            .find(|a| a.id == action_id)
            .ok_or(StoreError::UnknownQueueItem { id: action_id })?;
        action.result = Some(success);
        Ok(())
    }

    async fn queue_update(&self, node: Uuid, update: PendingUpdate) -> StoreResult<()> {
        self.lock().state.updates.entry(node).or_default().push(update);
        Ok(())
    }

    async fn pending_updates(&self, node: Uuid) -> StoreResult<Vec<PendingUpdate>> {
        Ok(self
            .lock()
            .state
            .updates
            .get(&node)
            .cloned()
            .unwrap_or_default())
    }

    async fn resolve_update(&self, node: Uuid, update_id: Uuid) -> StoreResult<()> {
        let mut inner = self.lock();
        let updates = inner.state.updates.entry(node).or_default();
        let before = updates.len();
        updates.retain(|u| u.id != update_id);
        if updates.len() == before {
            return Err(StoreError::UnknownQueueItem { id: update_id });
        }
        Ok(())
    }
}
