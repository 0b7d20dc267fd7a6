//! Entity store: in-memory mirror of the last merged snapshot
//!
//! Holds the subscription tree, the list catalogue, and the `sub_of_list`
//! reverse index. Mutated only from inside a merge or an optimistic
//! compensation step. Inconsistent mutations (removing a missing entity,
//! adding an item to a list nobody is subscribed to) are reconciliation
//! anomalies: logged and skipped, never fatal.

use std::collections::HashMap;

use tracing::warn;

use crate::model::{Item, ItemId, ListId, ListSummary, Subscription, SubscriptionId, UserId};
use crate::reconcile::position;

/// One row of the subscribe/unsubscribe catalogue menu.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRow {
    pub list_id: ListId,
    pub name: String,
    /// The viewing user's live subscription to this list, if any.
    pub subscription: Option<SubscriptionId>,
    /// Whether the viewing user owns the list and may delete it.
    pub deletable: bool,
}

/// In-memory mirror of server state.
#[derive(Debug, Default)]
pub struct EntityStore {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    lists: HashMap<ListId, ListSummary>,
    /// Reverse index; partial injective map. Kept in lockstep with
    /// `subscriptions` by the mutation methods below.
    sub_of_list: HashMap<ListId, SubscriptionId>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscription(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subscriptions.get(&id)
    }

    pub fn subscriptions(&self) -> &HashMap<SubscriptionId, Subscription> {
        &self.subscriptions
    }

    pub fn lists(&self) -> &HashMap<ListId, ListSummary> {
        &self.lists
    }

    pub fn subscription_of_list(&self, list_id: ListId) -> Option<SubscriptionId> {
        self.sub_of_list.get(&list_id).copied()
    }

    /// Subscription ids in ascending position order.
    pub fn ordered_subscriptions(&self) -> Vec<(SubscriptionId, i64)> {
        position::ordered(self.subscriptions.values().map(|s| (s.id, s.position)))
    }

    /// Item ids of one list in ascending position order. Empty when the list
    /// has no live subscription.
    pub fn ordered_items(&self, list_id: ListId) -> Vec<(ItemId, i64)> {
        let Some(sub_id) = self.subscription_of_list(list_id) else {
            return Vec::new();
        };
        let Some(sub) = self.subscriptions.get(&sub_id) else {
            return Vec::new();
        };
        position::ordered(sub.list.items.values().map(|i| (i.id, i.position)))
    }

    pub fn item(&self, list_id: ListId, item_id: ItemId) -> Option<&Item> {
        let sub_id = self.subscription_of_list(list_id)?;
        self.subscriptions.get(&sub_id)?.list.items.get(&item_id)
    }

    /// Insert or replace a subscription, updating the reverse index.
    pub fn upsert_subscription(&mut self, subscription: Subscription) {
        if let Some(previous) = self.subscriptions.get(&subscription.id) {
            if previous.list_id() != subscription.list_id() {
                self.sub_of_list.remove(&previous.list_id());
            }
        }
        self.sub_of_list
            .insert(subscription.list_id(), subscription.id);
        self.subscriptions.insert(subscription.id, subscription);
    }

    /// Remove a subscription and its reverse-index entry.
    pub fn remove_subscription(&mut self, id: SubscriptionId) -> Option<Subscription> {
        match self.subscriptions.remove(&id) {
            Some(subscription) => {
                self.sub_of_list.remove(&subscription.list_id());
                Some(subscription)
            }
            None => {
                warn!(subscription = %id, "tried to remove an unknown subscription");
                None
            }
        }
    }

    /// Insert or replace an item in its list's subscription.
    ///
    /// Skips with an anomaly warning when no live subscription covers the
    /// item's list.
    pub fn upsert_item(&mut self, item: Item) -> bool {
        let Some(sub_id) = self.subscription_of_list(item.list_id) else {
            warn!(item = %item.id, list = %item.list_id,
                "tried to add an item to a list with no subscription");
            return false;
        };
        let Some(subscription) = self.subscriptions.get_mut(&sub_id) else {
            warn!(item = %item.id, subscription = %sub_id,
                "reverse index points at a missing subscription");
            return false;
        };
        subscription.list.items.insert(item.id, item);
        true
    }

    /// Remove an item from its list.
    pub fn remove_item(&mut self, list_id: ListId, item_id: ItemId) -> Option<Item> {
        let removed = self
            .subscription_of_list(list_id)
            .and_then(|sub_id| self.subscriptions.get_mut(&sub_id))
            .and_then(|sub| sub.list.items.remove(&item_id));
        if removed.is_none() {
            warn!(item = %item_id, list = %list_id, "tried to remove an unknown item");
        }
        removed
    }

    /// Replace the list catalogue wholesale.
    pub fn apply_list_catalog(&mut self, lists: HashMap<ListId, ListSummary>) {
        self.lists = lists;
    }

    pub fn rename_list(&mut self, subscription_id: SubscriptionId, name: &str) {
        if let Some(subscription) = self.subscriptions.get_mut(&subscription_id) {
            subscription.list.name = name.to_string();
        }
    }

    pub fn set_subscription_minimized(&mut self, id: SubscriptionId, minimized: bool) {
        if let Some(subscription) = self.subscriptions.get_mut(&id) {
            subscription.minimized = minimized;
        }
    }

    pub fn set_subscription_position(&mut self, id: SubscriptionId, pos: i64) {
        if let Some(subscription) = self.subscriptions.get_mut(&id) {
            subscription.position = pos;
        }
    }

    pub fn set_item_position(&mut self, list_id: ListId, item_id: ItemId, pos: i64) {
        if let Some(sub_id) = self.subscription_of_list(list_id) {
            if let Some(item) = self
                .subscriptions
                .get_mut(&sub_id)
                .and_then(|s| s.list.items.get_mut(&item_id))
            {
                item.position = pos;
            }
        }
    }

    /// What the catalogue menu depends on: list ids, names, and the
    /// subscription-ownership mapping. Compared across a merge to decide
    /// whether the (comparatively expensive) catalogue refresh fires.
    pub fn catalog_signature(&self) -> Vec<(ListId, String, Option<SubscriptionId>)> {
        let mut signature: Vec<_> = self
            .lists
            .values()
            .map(|l| (l.id, l.name.clone(), self.subscription_of_list(l.id)))
            .collect();
        signature.sort_by_key(|&(id, _, _)| id);
        signature
    }

    /// Catalogue rows for the viewing user, sorted by name then id.
    pub fn catalog_rows(&self, viewer: UserId) -> Vec<CatalogRow> {
        let mut rows: Vec<CatalogRow> = self
            .lists
            .values()
            .map(|l| CatalogRow {
                list_id: l.id,
                name: l.name.clone(),
                subscription: self.subscription_of_list(l.id),
                deletable: l.owner_id == viewer,
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.list_id.cmp(&b.list_id)));
        rows
    }
}
