//! listmirror: client-side state reconciliation for subscription-based list
//! views
//!
//! The server is the single source of truth: every response carries a full
//! state snapshot (subscriptions → lists → items, plus a list catalogue).
//! This crate keeps a local mirror of that state and, on each response,
//! computes the minimal structural changes (add/remove/update/reorder) for a
//! view layer to apply, while drag moves in flight stay optimistic with a
//! defined rollback.
//!
//! - [`reconcile`] — diffing, position index, the merge algorithm
//! - [`store`] — the in-memory entity mirror and reverse index
//! - [`optimistic`] — speculative move tracking with compensation
//! - [`client`] — typed server operations over a [`transport::Transport`]
//! - [`refresh`] — staleness-driven autorefresh loop

pub mod client;
pub mod config;
pub mod model;
pub mod optimistic;
pub mod reconcile;
pub mod refresh;
pub mod store;
pub mod transport;

pub use client::{Client, ClientError};
pub use config::ClientConfig;
pub use model::{
    AddPosition, Item, ItemId, List, ListId, ListSummary, MoveTarget, Snapshot, Subscription,
    SubscriptionId, UserId,
};
pub use reconcile::{ChangeEvent, ItemFields, Reconciler, SubscriptionFields};
pub use refresh::RefreshScheduler;
pub use store::{CatalogRow, EntityStore};
pub use transport::{EditTarget, HttpTransport, Transport};
