//! Wire model: the entity tree carried by every state snapshot
//!
//! Every server response that can affect visible state carries a full
//! [`Snapshot`]. The engine never accepts partial patches; a snapshot is
//! always a total replacement of the previous one.

use std::collections::HashMap;
use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Defines an opaque integer id with consistent equality.
///
/// The server keys snapshot maps by stringified ids while embedding the same
/// ids as numbers in entity bodies, so deserialization accepts both forms.
/// Everything past the wire boundary compares ids as plain integers.
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_u64(self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct IdVisitor;

                impl<'de> de::Visitor<'de> for IdVisitor {
                    type Value = u64;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str("an integer id as a number or numeric string")
                    }

                    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
                        Ok(v)
                    }

                    fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
                        u64::try_from(v)
                            .map_err(|_| E::custom(format!("negative id: {}", v)))
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
                        v.parse()
                            .map_err(|_| E::custom(format!("non-numeric id: {:?}", v)))
                    }
                }

                deserializer.deserialize_any(IdVisitor).map($name)
            }
        }
    };
}

entity_id!(
    /// Id of a single list item.
    ItemId
);
entity_id!(
    /// Id of a list.
    ListId
);
entity_id!(
    /// Id of a user's subscription to a list.
    SubscriptionId
);
entity_id!(
    /// Id of a user account.
    UserId
);

/// One entry of a list, ordered within its list by `position`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub list_id: ListId,
    pub text: String,
    /// Ascending order within the owning list. Unique per list in any settled
    /// state; duplicates may appear transiently mid-merge.
    pub position: i64,
    #[serde(default)]
    pub important: bool,
    #[serde(default)]
    pub url: Option<String>,
}

/// A list with its items, as embedded in a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct List {
    pub id: ListId,
    pub name: String,
    pub owner_id: UserId,
    #[serde(default)]
    pub items: HashMap<ItemId, Item>,
}

/// Catalogue entry: a list without its items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListSummary {
    pub id: ListId,
    pub name: String,
    pub owner_id: UserId,
}

/// A user's binding to a list, carrying its own ordering position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    /// Ascending order among the viewing user's subscriptions.
    pub position: i64,
    #[serde(default)]
    pub minimized: bool,
    pub list: List,
}

impl Subscription {
    pub fn list_id(&self) -> ListId {
        self.list.id
    }
}

/// Where a moved entity should land, as understood by the server.
///
/// Serialized into the `where` request parameter: `up`/`down` for single-step
/// moves, otherwise the number of siblings that should precede the entity.
/// Server placement is authoritative; any local application of a move target
/// is provisional until the next merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveTarget {
    Up,
    Down,
    Index(i64),
}

impl MoveTarget {
    pub(crate) fn as_param(&self) -> String {
        match self {
            MoveTarget::Up => "up".to_string(),
            MoveTarget::Down => "down".to_string(),
            MoveTarget::Index(n) => n.to_string(),
        }
    }
}

/// Where a newly added item should land.
///
/// Serialized into the `position` request parameter: `0` for the beginning,
/// `-1` for the end, otherwise the number of items that should precede it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddPosition {
    Begin,
    End,
    Index(i64),
}

impl AddPosition {
    pub(crate) fn as_param(&self) -> String {
        match self {
            AddPosition::Begin => "0".to_string(),
            AddPosition::End => "-1".to_string(),
            AddPosition::Index(n) => n.to_string(),
        }
    }
}

/// The full authoritative state payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub subscriptions: HashMap<SubscriptionId, Subscription>,
    #[serde(default)]
    pub lists: HashMap<ListId, ListSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_accepts_number_and_string() {
        let from_number: ItemId = serde_json::from_str("42").unwrap();
        let from_string: ItemId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(from_number, ItemId(42));
    }

    #[test]
    fn test_id_rejects_garbage() {
        assert!(serde_json::from_str::<ItemId>("\"abc\"").is_err());
        assert!(serde_json::from_str::<ItemId>("-3").is_err());
    }

    #[test]
    fn test_snapshot_decodes_string_keyed_maps() {
        let raw = r#"{
            "subscriptions": {
                "1": {
                    "id": 1,
                    "position": 0,
                    "minimized": false,
                    "list": {
                        "id": "10",
                        "name": "Groceries",
                        "owner_id": 7,
                        "items": {
                            "100": {
                                "id": 100,
                                "list_id": 10,
                                "text": "milk",
                                "position": 0
                            }
                        }
                    }
                }
            },
            "lists": {
                "10": {"id": 10, "name": "Groceries", "owner_id": 7}
            }
        }"#;
        let snapshot: Snapshot = serde_json::from_str(raw).unwrap();
        let sub = &snapshot.subscriptions[&SubscriptionId(1)];
        assert_eq!(sub.list_id(), ListId(10));
        let item = &sub.list.items[&ItemId(100)];
        assert_eq!(item.text, "milk");
        assert!(!item.important);
        assert!(item.url.is_none());
    }

    #[test]
    fn test_snapshot_missing_sections_default_empty() {
        let snapshot: Snapshot = serde_json::from_str("{}").unwrap();
        assert!(snapshot.subscriptions.is_empty());
        assert!(snapshot.lists.is_empty());
    }
}
