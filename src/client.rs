//! Client: typed operations against the state server
//!
//! One method per server operation. Every reply's snapshot is merged through
//! the reconciler, and the resulting change events are pushed to the event
//! channel handed out by [`Client::new`]; the view layer drains it and
//! applies events in order.
//!
//! Position-mutating operations (moves) run through the optimistic tracker:
//! the local order changes immediately, and a failed request rolls the entity
//! back to its prior anchor before the error is reported.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::model::{AddPosition, ItemId, ListId, MoveTarget, Snapshot, SubscriptionId};
use crate::optimistic::{DragEntity, DragOp, OptimisticError, OptimisticTracker};
use crate::reconcile::{ChangeEvent, Reconciler};
use crate::transport::{endpoints, EditTarget, RequestError, ServerReply, Transport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server rejected the operation; any state it sent alongside has
    /// already been merged.
    #[error("server reported: {0}")]
    ServerReported(String),

    #[error(transparent)]
    Optimistic(#[from] OptimisticError),

    #[error("no such entity in the local store")]
    UnknownEntity,
}

/// Reconciling client over a [`Transport`].
pub struct Client<T: Transport> {
    transport: T,
    engine: Arc<Mutex<Reconciler>>,
    drags: Mutex<OptimisticTracker>,
    events_tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl<T: Transport> Client<T> {
    /// Build a client and the event stream its merges feed.
    pub fn new(
        transport: T,
        config: &ClientConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = Self {
            transport,
            engine: Arc::new(Mutex::new(Reconciler::new(config.user_id))),
            drags: Mutex::new(OptimisticTracker::new()),
            events_tx,
        };
        (client, events_rx)
    }

    /// Shared handle to the reconciler, for inspection.
    pub fn engine(&self) -> Arc<Mutex<Reconciler>> {
        Arc::clone(&self.engine)
    }

    /// Merge a snapshot obtained out of band (e.g. the page's initial state).
    pub async fn merge_snapshot(&self, snapshot: Snapshot) {
        let events = self.engine.lock().await.merge(snapshot);
        self.emit(events);
    }

    pub async fn time_since_last_merge(&self) -> Option<std::time::Duration> {
        self.engine
            .lock()
            .await
            .time_since_last_merge()
            .and_then(|d| d.to_std().ok())
    }

    /// Fetch and merge the authoritative state.
    pub async fn refresh(&self) -> Result<Option<String>, ClientError> {
        self.send_and_merge(endpoints::GET_STATE, Vec::new()).await
    }

    pub async fn add_item(
        &self,
        list: ListId,
        text: &str,
        position: AddPosition,
    ) -> Result<Option<String>, ClientError> {
        let params = vec![
            ("list".to_string(), list.to_string()),
            ("text".to_string(), text.to_string()),
            ("position".to_string(), position.as_param()),
        ];
        self.send_and_merge(endpoints::ADD_ITEM, params).await
    }

    pub async fn remove_items(&self, items: &[ItemId]) -> Result<Option<String>, ClientError> {
        let params = items
            .iter()
            .map(|id| ("item_ids".to_string(), id.to_string()))
            .collect();
        self.send_and_merge(endpoints::REMOVE_ITEMS, params).await
    }

    /// Reorder an item within its list, optimistically.
    pub async fn move_item(
        &self,
        item: ItemId,
        list: ListId,
        target: MoveTarget,
    ) -> Result<Option<String>, ClientError> {
        let params = vec![
            ("item_id".to_string(), item.to_string()),
            ("where".to_string(), target.as_param()),
        ];
        self.optimistic_request(
            DragEntity::Item(item),
            |engine| engine.speculate_item_move(item, list, target),
            endpoints::MOVE_ITEM,
            params,
        )
        .await
    }

    /// Move an item into another list at `index`, optimistically.
    pub async fn move_item_to_list(
        &self,
        item: ItemId,
        from_list: ListId,
        to_list: ListId,
        index: i64,
    ) -> Result<Option<String>, ClientError> {
        let params = vec![
            ("item_id".to_string(), item.to_string()),
            ("where".to_string(), index.to_string()),
            ("list_id".to_string(), to_list.to_string()),
        ];
        self.optimistic_request(
            DragEntity::Item(item),
            |engine| engine.speculate_item_transfer(item, from_list, to_list, index),
            endpoints::MOVE_ITEM,
            params,
        )
        .await
    }

    /// Reorder a subscription, optimistically.
    pub async fn move_subscription(
        &self,
        subscription: SubscriptionId,
        target: MoveTarget,
    ) -> Result<Option<String>, ClientError> {
        let params = vec![
            ("subscription_id".to_string(), subscription.to_string()),
            ("where".to_string(), target.as_param()),
        ];
        self.optimistic_request(
            DragEntity::Subscription(subscription),
            |engine| engine.speculate_subscription_move(subscription, target),
            endpoints::MOVE_SUBSCRIPTION,
            params,
        )
        .await
    }

    pub async fn add_list(
        &self,
        name: &str,
        subscribe: bool,
    ) -> Result<Option<String>, ClientError> {
        let params = vec![
            ("name".to_string(), name.to_string()),
            ("subscribe".to_string(), subscribe.to_string()),
        ];
        self.send_and_merge(endpoints::ADD_LIST, params).await
    }

    pub async fn remove_list(&self, list: ListId) -> Result<Option<String>, ClientError> {
        let params = vec![("list_id".to_string(), list.to_string())];
        self.send_and_merge(endpoints::REMOVE_LIST, params).await
    }

    pub async fn add_subscription(&self, list: ListId) -> Result<Option<String>, ClientError> {
        let params = vec![("list_id".to_string(), list.to_string())];
        self.send_and_merge(endpoints::ADD_SUBSCRIPTION, params).await
    }

    pub async fn remove_subscription(&self, list: ListId) -> Result<Option<String>, ClientError> {
        let params = vec![("list_id".to_string(), list.to_string())];
        self.send_and_merge(endpoints::REMOVE_SUBSCRIPTION, params)
            .await
    }

    pub async fn minimize_subscription(
        &self,
        subscription: SubscriptionId,
    ) -> Result<Option<String>, ClientError> {
        let params = vec![("subscription_id".to_string(), subscription.to_string())];
        self.send_and_merge(endpoints::MINIMIZE_SUBSCRIPTION, params)
            .await
    }

    pub async fn maximize_subscription(
        &self,
        subscription: SubscriptionId,
    ) -> Result<Option<String>, ClientError> {
        let params = vec![("subscription_id".to_string(), subscription.to_string())];
        self.send_and_merge(endpoints::MAXIMIZE_SUBSCRIPTION, params)
            .await
    }

    /// Batch-set importance flags. Overlaps resolve server-side in favor of
    /// `important`.
    pub async fn set_item_importances(
        &self,
        important: &[ItemId],
        unimportant: &[ItemId],
    ) -> Result<Option<String>, ClientError> {
        let params = important
            .iter()
            .map(|id| ("important_item_ids".to_string(), id.to_string()))
            .chain(
                unimportant
                    .iter()
                    .map(|id| ("unimportant_item_ids".to_string(), id.to_string())),
            )
            .collect();
        self.send_and_merge(endpoints::SET_ITEM_IMPORTANCES, params)
            .await
    }

    /// Edit an item's text or a list's display name in place.
    pub async fn edit_text(
        &self,
        target: EditTarget,
        text: &str,
    ) -> Result<Option<String>, ClientError> {
        let params = vec![
            ("element_id".to_string(), target.element_id()),
            ("text".to_string(), text.to_string()),
        ];
        self.send_and_merge(endpoints::EDIT_TEXT, params).await
    }

    /// Send a request and merge whatever state comes back, on success or
    /// failure alike. The server's state is authoritative either way.
    async fn send_and_merge(
        &self,
        endpoint: &str,
        params: Vec<(String, String)>,
    ) -> Result<Option<String>, ClientError> {
        match self.transport.request(endpoint, &params).await {
            Ok(reply) => Ok(self.apply_reply(endpoint, reply).await),
            Err(err) => Err(self.apply_failure(endpoint, err).await),
        }
    }

    /// Speculate a move locally, then confirm or roll back with the reply.
    async fn optimistic_request<F>(
        &self,
        entity: DragEntity,
        speculate: F,
        endpoint: &str,
        params: Vec<(String, String)>,
    ) -> Result<Option<String>, ClientError>
    where
        F: FnOnce(&mut Reconciler) -> Option<(DragOp, Vec<ChangeEvent>)>,
    {
        {
            let mut drags = self.drags.lock().await;
            if drags.is_pending(entity) {
                return Err(OptimisticError::AlreadyPending(entity).into());
            }
            let mut engine = self.engine.lock().await;
            let Some((op, events)) = speculate(&mut *engine) else {
                return Err(ClientError::UnknownEntity);
            };
            drags.begin(op)?;
            drop(engine);
            self.emit(events);
        }

        match self.transport.request(endpoint, &params).await {
            Ok(reply) => {
                self.drags.lock().await.confirm(entity);
                Ok(self.apply_reply(endpoint, reply).await)
            }
            Err(err) => {
                // Roll back to the prior anchor before merging any carried
                // state, so compensation never depends on the merge.
                if let Some(op) = self.drags.lock().await.fail(entity) {
                    let events = self.engine.lock().await.revert_move(op);
                    self.emit(events);
                }
                Err(self.apply_failure(endpoint, err).await)
            }
        }
    }

    async fn apply_reply(&self, endpoint: &str, reply: ServerReply) -> Option<String> {
        if let Some(msg) = &reply.msg {
            debug!(endpoint, msg, "server reply");
        }
        let events = self.engine.lock().await.merge_reply_state(reply.state);
        self.emit(events);
        reply.msg
    }

    async fn apply_failure(&self, endpoint: &str, err: RequestError) -> ClientError {
        match err {
            RequestError::ServerReported { msg, state } => {
                warn!(endpoint, %msg, "operation rejected by server");
                if let Some(snapshot) = state {
                    let events = self.engine.lock().await.merge(snapshot);
                    self.emit(events);
                }
                ClientError::ServerReported(msg)
            }
            RequestError::Transport(e) => {
                warn!(endpoint, error = %e, "request failed");
                ClientError::Transport(e)
            }
        }
    }

    fn emit(&self, events: Vec<ChangeEvent>) {
        for event in events {
            // A dropped receiver just means nobody is rendering.
            let _ = self.events_tx.send(event);
        }
    }
}
