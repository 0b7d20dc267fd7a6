//! Optimistic operation tracking for drag moves
//!
//! A drag-reorder is reflected locally before the server confirms it. The
//! tracker remembers, per entity, the anchor needed to undo the move: the
//! sibling the entity used to precede. On confirmation the record is simply
//! discarded (the confirming merge already carries the settled order); on
//! failure the record drives a compensating reinsertion.
//!
//! Overlapping operations on the same entity are not supported: a second
//! `begin` while one is pending is rejected, callers serialize per entity.

use std::collections::HashMap;

use crate::model::{ItemId, ListId, SubscriptionId};

/// The entity a drag operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DragEntity {
    Item(ItemId),
    Subscription(SubscriptionId),
}

/// A pending speculative move with everything needed to compensate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragOp {
    Item {
        id: ItemId,
        /// List the item lived in when the drag began.
        from_list: ListId,
        /// Sibling the item preceded; `None` means it was last.
        prior_before: Option<ItemId>,
    },
    Subscription {
        id: SubscriptionId,
        prior_before: Option<SubscriptionId>,
    },
}

impl DragOp {
    pub fn entity(&self) -> DragEntity {
        match self {
            DragOp::Item { id, .. } => DragEntity::Item(*id),
            DragOp::Subscription { id, .. } => DragEntity::Subscription(*id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptimisticError {
    #[error("an optimistic operation is already pending for {0:?}")]
    AlreadyPending(DragEntity),
}

/// Tracks in-flight speculative moves, one per entity.
#[derive(Debug, Default)]
pub struct OptimisticTracker {
    pending: HashMap<DragEntity, DragOp>,
}

impl OptimisticTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self, entity: DragEntity) -> bool {
        self.pending.contains_key(&entity)
    }

    /// Register a speculative move. Fails when one is already pending for the
    /// same entity.
    pub fn begin(&mut self, op: DragOp) -> Result<(), OptimisticError> {
        let entity = op.entity();
        if self.pending.contains_key(&entity) {
            return Err(OptimisticError::AlreadyPending(entity));
        }
        self.pending.insert(entity, op);
        Ok(())
    }

    /// The server confirmed the move; drop the compensation record.
    pub fn confirm(&mut self, entity: DragEntity) -> Option<DragOp> {
        self.pending.remove(&entity)
    }

    /// The request failed; hand the compensation record back to the caller.
    pub fn fail(&mut self, entity: DragEntity) -> Option<DragOp> {
        self.pending.remove(&entity)
    }
}
