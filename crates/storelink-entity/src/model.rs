//! Core entity model: entities, comments, actions, and pending updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::value::{AttributeMap, AttributeValue};

/// Unique-id prefix marking an entity that exists locally but has not been
/// pushed to the storefront yet. Remote writes skip these.
pub const TEMPORARY_PREFIX: &str = "TMP-";

/// The entity types the synchronization engine handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Order,
    #[serde(rename = "orderitem")]
    OrderItem,
    Customer,
    Address,
    Product,
    #[serde(rename = "stockitem")]
    StockItem,
    #[serde(rename = "creditmemo")]
    CreditMemo,
    #[serde(rename = "creditmemoitem")]
    CreditMemoItem,
}

impl EntityType {
    /// Stable tag used in store keys and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::OrderItem => "orderitem",
            Self::Customer => "customer",
            Self::Address => "address",
            Self::Product => "product",
            Self::StockItem => "stockitem",
            Self::CreditMemo => "creditmemo",
            Self::CreditMemoItem => "creditmemoitem",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order" => Ok(Self::Order),
            "orderitem" => Ok(Self::OrderItem),
            "customer" => Ok(Self::Customer),
            "address" => Ok(Self::Address),
            "product" => Ok(Self::Product),
            "stockitem" => Ok(Self::StockItem),
            "creditmemo" => Ok(Self::CreditMemo),
            "creditmemoitem" => Ok(Self::CreditMemoItem),
            _ => Err(format!("unknown entity type: {s}")),
        }
    }
}

/// A locally stored entity.
///
/// `unique_id` is the stable business key assigned by the storefront (order
/// increment number, customer email, SKU). The storefront's mutable numeric
/// id is not stored here; it lives in the store's link table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub store_scope: i32,
    pub unique_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Uuid>,
    pub attributes: AttributeMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Entity {
    /// Get an attribute value.
    pub fn attr(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Get a string attribute.
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attributes.get_str(name)
    }

    /// Get a float attribute (with string coercion).
    pub fn attr_f64(&self, name: &str) -> Option<f64> {
        self.attributes.get_f64(name)
    }

    /// Get a boolean attribute.
    pub fn attr_bool(&self, name: &str) -> Option<bool> {
        self.attributes.get_bool(name)
    }

    /// Resolve an attribute holding a reference to another local entity.
    pub fn attr_ref(&self, name: &str) -> Option<Uuid> {
        self.attributes
            .get_str(name)
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Whether this entity only exists locally so far.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.unique_id.starts_with(TEMPORARY_PREFIX)
    }
}

/// A comment attached to an entity.
///
/// `reference_id` is the dedupe key: a remote comment id, a remote history
/// timestamp, or an id embedded in pushed comment text. No two comments on
/// one entity share a reference id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub author: String,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    pub visible_to_customer: bool,
    pub created_at: DateTime<Utc>,
}

/// The kinds of locally queued actions the dispatcher can push out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Comment,
    Cancel,
    Hold,
    Unhold,
    Ship,
    #[serde(rename = "creditmemo")]
    CreditMemo,
    Delete,
}

impl ActionKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comment => "comment",
            Self::Cancel => "cancel",
            Self::Hold => "hold",
            Self::Unhold => "unhold",
            Self::Ship => "ship",
            Self::CreditMemo => "creditmemo",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "comment" => Ok(Self::Comment),
            "cancel" => Ok(Self::Cancel),
            "hold" => Ok(Self::Hold),
            "unhold" => Ok(Self::Unhold),
            "ship" => Ok(Self::Ship),
            "creditmemo" => Ok(Self::CreditMemo),
            "delete" => Ok(Self::Delete),
            _ => Err(format!("unknown action kind: {s}")),
        }
    }
}

/// A locally created action waiting to be pushed to the storefront.
///
/// Terminal once `result` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub kind: ActionKind,
    pub payload: AttributeMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<bool>,
}

impl Action {
    /// Create a new pending action.
    #[must_use]
    pub fn new(entity_id: Uuid, kind: ActionKind, payload: AttributeMap) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id,
            kind,
            payload,
            result: None,
        }
    }

    /// Whether the action has reached a terminal state.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.result.is_some()
    }
}

/// What a pending update asks the write side to do remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Create,
    Update,
    Delete,
}

impl UpdateType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for UpdateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued notification that local attributes changed and should be written
/// out to the storefront.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingUpdate {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub update_type: UpdateType,
    /// The attribute codes that changed.
    pub attributes: Vec<String>,
}

impl PendingUpdate {
    /// Create a new pending update.
    #[must_use]
    pub fn new(entity_id: Uuid, update_type: UpdateType, attributes: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id,
            update_type,
            attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_roundtrip() {
        for ty in [
            EntityType::Order,
            EntityType::OrderItem,
            EntityType::Customer,
            EntityType::Address,
            EntityType::Product,
            EntityType::StockItem,
            EntityType::CreditMemo,
            EntityType::CreditMemoItem,
        ] {
            assert_eq!(ty.as_str().parse::<EntityType>(), Ok(ty));
        }
        assert!("invoice".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_action_kind_roundtrip() {
        assert_eq!("creditmemo".parse::<ActionKind>(), Ok(ActionKind::CreditMemo));
        assert_eq!(ActionKind::Unhold.as_str(), "unhold");
        assert!("refund".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_temporary_entity() {
        let entity = Entity {
            id: Uuid::new_v4(),
            entity_type: EntityType::CreditMemo,
            store_scope: 0,
            unique_id: "TMP-7f3a".to_string(),
            parent: None,
            attributes: AttributeMap::new(),
            last_synced_at: None,
        };
        assert!(entity.is_temporary());
    }

    #[test]
    fn test_entity_ref_attribute() {
        let target = Uuid::new_v4();
        let entity = Entity {
            id: Uuid::new_v4(),
            entity_type: EntityType::Order,
            store_scope: 0,
            unique_id: "100000001".to_string(),
            parent: None,
            attributes: AttributeMap::new().with("original_order", target.to_string()),
            last_synced_at: None,
        };
        assert_eq!(entity.attr_ref("original_order"), Some(target));
        assert_eq!(entity.attr_ref("missing"), None);
    }

    #[test]
    fn test_action_resolution() {
        let mut action = Action::new(Uuid::new_v4(), ActionKind::Ship, AttributeMap::new());
        assert!(!action.is_resolved());
        action.result = Some(true);
        assert!(action.is_resolved());
    }
}
