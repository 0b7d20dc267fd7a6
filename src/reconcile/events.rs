//! Change events emitted by a merge
//!
//! Consumers (the view layer) apply these strictly in emission order. A
//! `Reordered` is a structural move of an existing node; `before` names the
//! sibling the entity now precedes, `None` meaning it goes last.

use crate::model::{Item, ItemId, ListId, Subscription, SubscriptionId};
use crate::store::CatalogRow;

/// Which item fields changed in an `ItemUpdated`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemFields {
    pub text: bool,
    pub important: bool,
    pub url: bool,
    pub position: bool,
}

impl ItemFields {
    pub fn any(&self) -> bool {
        self.text || self.important || self.url || self.position
    }
}

/// Which subscription fields changed in a `SubscriptionUpdated`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionFields {
    pub minimized: bool,
    pub position: bool,
}

impl SubscriptionFields {
    pub fn any(&self) -> bool {
        self.minimized || self.position
    }
}

/// One ordered change produced by reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    SubscriptionAdded {
        subscription: Subscription,
        before: Option<SubscriptionId>,
    },
    SubscriptionRemoved {
        id: SubscriptionId,
        list_id: ListId,
    },
    SubscriptionUpdated {
        subscription: Subscription,
        fields: SubscriptionFields,
    },
    SubscriptionReordered {
        id: SubscriptionId,
        before: Option<SubscriptionId>,
    },
    /// Lighter-weight than a full update: only the list's display name
    /// changed.
    ListRenamed {
        subscription_id: SubscriptionId,
        list_id: ListId,
        name: String,
    },
    ItemAdded {
        item: Item,
        before: Option<ItemId>,
    },
    ItemRemoved {
        id: ItemId,
        list_id: ListId,
    },
    ItemUpdated {
        item: Item,
        fields: ItemFields,
    },
    ItemReordered {
        id: ItemId,
        list_id: ListId,
        before: Option<ItemId>,
    },
    /// The subscribe/unsubscribe menu needs a re-render. Emitted only when
    /// list ids, names, or subscription ownership actually changed.
    CatalogChanged {
        rows: Vec<CatalogRow>,
    },
}
