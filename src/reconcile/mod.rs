//! Reconciliation: merging authoritative snapshots into the local mirror
//!
//! Every server response carries a full [`Snapshot`]; [`Reconciler::merge`]
//! diffs it against the entity store and applies the minimal structural
//! changes, emitting [`ChangeEvent`]s for the view layer in application
//! order. Merges are atomic units of work relative to each other: the engine
//! runs on one logical thread of control and a merge never suspends.

pub mod diff;
pub mod events;
pub mod position;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

pub use events::{ChangeEvent, ItemFields, SubscriptionFields};

use crate::model::{
    Item, ItemId, ListId, MoveTarget, Snapshot, Subscription, SubscriptionId, UserId,
};
use crate::optimistic::DragOp;
use crate::store::EntityStore;
use diff::diff_ids;

/// Owns the entity store and drives merges against it.
///
/// All merge state (store, reverse index, merge timestamp) lives here
/// explicitly; there is no module-level ambient state.
pub struct Reconciler {
    store: EntityStore,
    viewer: UserId,
    last_merge_at: Option<DateTime<Utc>>,
}

impl Reconciler {
    pub fn new(viewer: UserId) -> Self {
        Self {
            store: EntityStore::new(),
            viewer,
            last_merge_at: None,
        }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn last_merge_at(&self) -> Option<DateTime<Utc>> {
        self.last_merge_at
    }

    /// Time since the last completed merge, `None` before the first one.
    pub fn time_since_last_merge(&self) -> Option<chrono::Duration> {
        self.last_merge_at
            .map(|at| Utc::now().signed_duration_since(at))
    }

    /// Merge the optional `state` field of a server reply.
    ///
    /// A reply without a snapshot is a logged no-op; the store is untouched.
    pub fn merge_reply_state(&mut self, state: Option<Snapshot>) -> Vec<ChangeEvent> {
        match state {
            Some(snapshot) => self.merge(snapshot),
            None => {
                warn!("merge requested without a snapshot; ignoring");
                Vec::new()
            }
        }
    }

    /// Reconcile the store to `snapshot`, returning the ordered change events.
    ///
    /// Order of application: subscription removals, subscription additions
    /// (each followed by its items as adds in position order), then per kept
    /// subscription item removals / additions / field updates, renames and
    /// subscription field updates, then all deferred structural reorders, and
    /// finally the catalogue refresh when it actually changed.
    pub fn merge(&mut self, snapshot: Snapshot) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        let catalog_before = self.store.catalog_signature();

        let sub_diff = diff_ids(
            self.store.subscriptions().keys().copied(),
            snapshot.subscriptions.keys().copied(),
        );
        debug!(
            added = sub_diff.added.len(),
            removed = sub_diff.removed.len(),
            kept = sub_diff.kept.len(),
            "diffed subscriptions"
        );

        // Removals before additions, so an id freed in this merge is gone
        // before anything new lands near its old position.
        let mut removals: Vec<(SubscriptionId, i64)> = sub_diff
            .removed
            .iter()
            .filter_map(|id| self.store.subscription(*id).map(|s| (*id, s.position)))
            .collect();
        removals.sort_by_key(|&(id, pos)| (pos, id));
        for (id, _) in removals {
            if let Some(sub) = self.store.remove_subscription(id) {
                events.push(ChangeEvent::SubscriptionRemoved {
                    id,
                    list_id: sub.list_id(),
                });
            }
        }

        let mut additions: Vec<&Subscription> = sub_diff
            .added
            .iter()
            .filter_map(|id| snapshot.subscriptions.get(id))
            .collect();
        additions.sort_by_key(|s| (s.position, s.id));
        for sub in additions {
            self.add_subscription(sub.clone(), &mut events);
        }

        // Kept subscriptions: recurse into item diffs, then field updates.
        // Structural repositioning is deferred until every field update has
        // been applied, otherwise anchor lookups would see half-moved state.
        let mut moved_subs: Vec<(SubscriptionId, i64)> = Vec::new();
        let mut moved_items: Vec<(ListId, ItemId, i64)> = Vec::new();

        let mut kept: Vec<&Subscription> = sub_diff
            .kept
            .iter()
            .filter_map(|id| snapshot.subscriptions.get(id))
            .collect();
        kept.sort_by_key(|s| (s.position, s.id));
        for new_sub in kept {
            let Some(old_sub) = self.store.subscription(new_sub.id).cloned() else {
                warn!(subscription = %new_sub.id, "kept subscription missing from store; adding");
                self.add_subscription(new_sub.clone(), &mut events);
                continue;
            };

            if old_sub.list_id() != new_sub.list_id() {
                // Same subscription id now binds a different list: this is a
                // remove-then-add, not an update.
                warn!(
                    subscription = %new_sub.id,
                    old_list = %old_sub.list_id(),
                    new_list = %new_sub.list_id(),
                    "kept subscription switched lists"
                );
                self.store.remove_subscription(new_sub.id);
                events.push(ChangeEvent::SubscriptionRemoved {
                    id: new_sub.id,
                    list_id: old_sub.list_id(),
                });
                self.add_subscription(new_sub.clone(), &mut events);
                continue;
            }

            self.reconcile_items(&old_sub, new_sub, &mut events, &mut moved_items);

            if old_sub.list.name != new_sub.list.name {
                self.store.rename_list(new_sub.id, &new_sub.list.name);
                events.push(ChangeEvent::ListRenamed {
                    subscription_id: new_sub.id,
                    list_id: new_sub.list_id(),
                    name: new_sub.list.name.clone(),
                });
            }

            let fields = SubscriptionFields {
                minimized: old_sub.minimized != new_sub.minimized,
                position: old_sub.position != new_sub.position,
            };
            if fields.any() {
                self.store
                    .set_subscription_minimized(new_sub.id, new_sub.minimized);
                self.store
                    .set_subscription_position(new_sub.id, new_sub.position);
                events.push(ChangeEvent::SubscriptionUpdated {
                    subscription: new_sub.clone(),
                    fields,
                });
                if fields.position {
                    moved_subs.push((new_sub.id, new_sub.position));
                }
            }
        }

        moved_subs.sort_by_key(|&(id, pos)| (pos, id));
        for (id, target) in moved_subs {
            let sequence: Vec<(SubscriptionId, i64)> = self
                .store
                .ordered_subscriptions()
                .into_iter()
                .filter(|&(other, _)| other != id)
                .collect();
            events.push(ChangeEvent::SubscriptionReordered {
                id,
                before: position::insertion_anchor(&sequence, target),
            });
        }

        moved_items.sort_by_key(|&(list, id, pos)| (pos, list, id));
        for (list_id, id, target) in moved_items {
            let sequence: Vec<(ItemId, i64)> = self
                .store
                .ordered_items(list_id)
                .into_iter()
                .filter(|&(other, _)| other != id)
                .collect();
            events.push(ChangeEvent::ItemReordered {
                id,
                list_id,
                before: position::insertion_anchor(&sequence, target),
            });
        }

        self.store.apply_list_catalog(snapshot.lists);
        if self.store.catalog_signature() != catalog_before {
            events.push(ChangeEvent::CatalogChanged {
                rows: self.store.catalog_rows(self.viewer),
            });
        }

        self.last_merge_at = Some(Utc::now());
        debug!(events = events.len(), "merge complete");
        events
    }

    /// Insert a new subscription and emit its shell plus its items in
    /// ascending position order. The `SubscriptionAdded` payload carries an
    /// empty item map; the items arrive as the `ItemAdded` events that
    /// follow.
    fn add_subscription(&mut self, mut sub: Subscription, events: &mut Vec<ChangeEvent>) {
        let list_id = sub.list_id();
        let stray: Vec<ItemId> = sub
            .list
            .items
            .values()
            .filter(|i| i.list_id != list_id)
            .map(|i| i.id)
            .collect();
        for id in stray {
            warn!(item = %id, list = %list_id, "item claims a different list; skipping");
            sub.list.items.remove(&id);
        }

        let before =
            position::insertion_anchor(&self.store.ordered_subscriptions(), sub.position);

        let mut items: Vec<Item> = sub.list.items.values().cloned().collect();
        items.sort_by_key(|i| (i.position, i.id));

        let mut shell = sub.clone();
        shell.list.items.clear();

        self.store.upsert_subscription(sub);
        events.push(ChangeEvent::SubscriptionAdded {
            subscription: shell,
            before,
        });
        for item in items {
            events.push(ChangeEvent::ItemAdded { item, before: None });
        }
    }

    fn reconcile_items(
        &mut self,
        old_sub: &Subscription,
        new_sub: &Subscription,
        events: &mut Vec<ChangeEvent>,
        moved_items: &mut Vec<(ListId, ItemId, i64)>,
    ) {
        let list_id = new_sub.list_id();
        let item_diff = diff_ids(
            old_sub.list.items.keys().copied(),
            new_sub.list.items.keys().copied(),
        );
        debug!(
            subscription = %new_sub.id,
            added = item_diff.added.len(),
            removed = item_diff.removed.len(),
            kept = item_diff.kept.len(),
            "diffed items"
        );

        let mut removals: Vec<(ItemId, i64)> = item_diff
            .removed
            .iter()
            .filter_map(|id| old_sub.list.items.get(id).map(|i| (*id, i.position)))
            .collect();
        removals.sort_by_key(|&(id, pos)| (pos, id));
        for (id, _) in removals {
            if self.store.remove_item(list_id, id).is_some() {
                events.push(ChangeEvent::ItemRemoved { id, list_id });
            }
        }

        let mut additions: Vec<&Item> = item_diff
            .added
            .iter()
            .filter_map(|id| new_sub.list.items.get(id))
            .collect();
        additions.sort_by_key(|i| (i.position, i.id));
        for item in additions {
            if item.list_id != list_id {
                warn!(item = %item.id, list = %list_id, "item claims a different list; skipping");
                continue;
            }
            let before =
                position::insertion_anchor(&self.store.ordered_items(list_id), item.position);
            if self.store.upsert_item(item.clone()) {
                events.push(ChangeEvent::ItemAdded {
                    item: item.clone(),
                    before,
                });
            }
        }

        let mut kept: Vec<&Item> = item_diff
            .kept
            .iter()
            .filter_map(|id| new_sub.list.items.get(id))
            .collect();
        kept.sort_by_key(|i| (i.position, i.id));
        for new_item in kept {
            let Some(old_item) = old_sub.list.items.get(&new_item.id) else {
                continue;
            };
            let fields = ItemFields {
                text: old_item.text != new_item.text,
                important: old_item.important != new_item.important,
                url: old_item.url != new_item.url,
                position: old_item.position != new_item.position,
            };
            if fields.any() {
                self.store.upsert_item(new_item.clone());
                events.push(ChangeEvent::ItemUpdated {
                    item: new_item.clone(),
                    fields,
                });
                if fields.position {
                    moved_items.push((list_id, new_item.id, new_item.position));
                }
            }
        }
    }

    /// Apply a speculative local reorder of an item within its list, ahead of
    /// server confirmation.
    ///
    /// Captures the compensation anchor (the sibling the item used to
    /// precede), rewrites the list's provisional positions, and emits the
    /// structural move. Returns `None` when the item is unknown.
    pub fn speculate_item_move(
        &mut self,
        item_id: ItemId,
        list_id: ListId,
        target: MoveTarget,
    ) -> Option<(DragOp, Vec<ChangeEvent>)> {
        let sequence = self.store.ordered_items(list_id);
        let Some(index) = sequence.iter().position(|&(id, _)| id == item_id) else {
            warn!(item = %item_id, list = %list_id, "cannot move an unknown item");
            return None;
        };
        let prior_before = sequence.get(index + 1).map(|&(id, _)| id);

        let mut rest: Vec<ItemId> = sequence
            .iter()
            .filter(|&&(id, _)| id != item_id)
            .map(|&(id, _)| id)
            .collect();
        let new_index = resolve_index(index, rest.len(), target);
        rest.insert(new_index, item_id);
        for (pos, id) in rest.iter().enumerate() {
            self.store.set_item_position(list_id, *id, pos as i64);
        }

        let op = DragOp::Item {
            id: item_id,
            from_list: list_id,
            prior_before,
        };
        let events = vec![ChangeEvent::ItemReordered {
            id: item_id,
            list_id,
            before: rest.get(new_index + 1).copied(),
        }];
        Some((op, events))
    }

    /// Apply a speculative local move of an item into another list at `index`.
    ///
    /// Emits remove-then-add since the item changes parents. Returns `None`
    /// when the item is unknown or the target list has no subscription.
    pub fn speculate_item_transfer(
        &mut self,
        item_id: ItemId,
        from_list: ListId,
        to_list: ListId,
        index: i64,
    ) -> Option<(DragOp, Vec<ChangeEvent>)> {
        if self.store.subscription_of_list(to_list).is_none() {
            warn!(item = %item_id, list = %to_list, "cannot move an item to an unsubscribed list");
            return None;
        }
        let source = self.store.ordered_items(from_list);
        let source_index = source.iter().position(|&(id, _)| id == item_id)?;
        let prior_before = source.get(source_index + 1).map(|&(id, _)| id);

        let mut item = self.store.remove_item(from_list, item_id)?;
        item.list_id = to_list;

        let mut rest: Vec<ItemId> = self
            .store
            .ordered_items(to_list)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let new_index = (index.max(0) as usize).min(rest.len());
        rest.insert(new_index, item_id);
        item.position = new_index as i64;
        let before = rest.get(new_index + 1).copied();
        self.store.upsert_item(item.clone());
        for (pos, id) in rest.iter().enumerate() {
            self.store.set_item_position(to_list, *id, pos as i64);
        }

        let op = DragOp::Item {
            id: item_id,
            from_list,
            prior_before,
        };
        let events = vec![
            ChangeEvent::ItemRemoved {
                id: item_id,
                list_id: from_list,
            },
            ChangeEvent::ItemAdded { item, before },
        ];
        Some((op, events))
    }

    /// Apply a speculative local reorder of a subscription.
    pub fn speculate_subscription_move(
        &mut self,
        sub_id: SubscriptionId,
        target: MoveTarget,
    ) -> Option<(DragOp, Vec<ChangeEvent>)> {
        let sequence = self.store.ordered_subscriptions();
        let Some(index) = sequence.iter().position(|&(id, _)| id == sub_id) else {
            warn!(subscription = %sub_id, "cannot move an unknown subscription");
            return None;
        };
        let prior_before = sequence.get(index + 1).map(|&(id, _)| id);

        let mut rest: Vec<SubscriptionId> = sequence
            .iter()
            .filter(|&&(id, _)| id != sub_id)
            .map(|&(id, _)| id)
            .collect();
        let new_index = resolve_index(index, rest.len(), target);
        rest.insert(new_index, sub_id);
        for (pos, id) in rest.iter().enumerate() {
            self.store.set_subscription_position(*id, pos as i64);
        }

        let op = DragOp::Subscription {
            id: sub_id,
            prior_before,
        };
        let events = vec![ChangeEvent::SubscriptionReordered {
            id: sub_id,
            before: rest.get(new_index + 1).copied(),
        }];
        Some((op, events))
    }

    /// Compensate a failed optimistic move: reinsert the entity at its prior
    /// anchor, synchronously and independently of any merge.
    pub fn revert_move(&mut self, op: DragOp) -> Vec<ChangeEvent> {
        match op {
            DragOp::Item {
                id,
                from_list,
                prior_before,
            } => {
                let mut events = Vec::new();
                // A failed cross-list transfer leaves the item parked in the
                // target list; pull it back first.
                if self.store.item(from_list, id).is_none() {
                    if let Some((current_list, mut item)) = self.find_item(id) {
                        self.store.remove_item(current_list, id);
                        events.push(ChangeEvent::ItemRemoved {
                            id,
                            list_id: current_list,
                        });
                        item.list_id = from_list;
                        if !self.store.upsert_item(item.clone()) {
                            warn!(item = %id, list = %from_list,
                                "cannot restore item: source list is gone");
                            return events;
                        }
                        events.push(ChangeEvent::ItemAdded {
                            item,
                            before: prior_before,
                        });
                    } else {
                        warn!(item = %id, "cannot revert move of a vanished item");
                        return events;
                    }
                }

                let mut rest: Vec<ItemId> = self
                    .store
                    .ordered_items(from_list)
                    .into_iter()
                    .filter(|&(other, _)| other != id)
                    .map(|(other, _)| other)
                    .collect();
                let index = prior_before
                    .and_then(|b| rest.iter().position(|&x| x == b))
                    .unwrap_or(rest.len());
                rest.insert(index, id);
                for (pos, other) in rest.iter().enumerate() {
                    self.store.set_item_position(from_list, *other, pos as i64);
                }
                events.push(ChangeEvent::ItemReordered {
                    id,
                    list_id: from_list,
                    before: rest.get(index + 1).copied(),
                });
                events
            }
            DragOp::Subscription { id, prior_before } => {
                if self.store.subscription(id).is_none() {
                    warn!(subscription = %id, "cannot revert move of a vanished subscription");
                    return Vec::new();
                }
                let mut rest: Vec<SubscriptionId> = self
                    .store
                    .ordered_subscriptions()
                    .into_iter()
                    .filter(|&(other, _)| other != id)
                    .map(|(other, _)| other)
                    .collect();
                let index = prior_before
                    .and_then(|b| rest.iter().position(|&x| x == b))
                    .unwrap_or(rest.len());
                rest.insert(index, id);
                for (pos, other) in rest.iter().enumerate() {
                    self.store.set_subscription_position(*other, pos as i64);
                }
                vec![ChangeEvent::SubscriptionReordered {
                    id,
                    before: rest.get(index + 1).copied(),
                }]
            }
        }
    }

    fn find_item(&self, item_id: ItemId) -> Option<(ListId, Item)> {
        self.store.subscriptions().values().find_map(|sub| {
            sub.list
                .items
                .get(&item_id)
                .map(|item| (sub.list_id(), item.clone()))
        })
    }
}

/// Resolve a [`MoveTarget`] to an index into the sibling sequence with the
/// moving entity taken out (`rest_len` entries).
fn resolve_index(current: usize, rest_len: usize, target: MoveTarget) -> usize {
    match target {
        MoveTarget::Up => current.saturating_sub(1),
        MoveTarget::Down => (current + 1).min(rest_len),
        MoveTarget::Index(n) => (n.max(0) as usize).min(rest_len),
    }
}
