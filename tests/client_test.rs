//! Client integration tests
//!
//! Exercises the full request → merge → event pipeline over a scripted
//! transport: optimistic moves with rollback, error bodies that carry
//! authoritative state, and wire-shaped snapshot decoding.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::oneshot;

use listmirror::transport::{RequestError, ServerReply, Transport, TransportError};
use listmirror::{
    ChangeEvent, Client, ClientConfig, ClientError, ItemId, ListId, MoveTarget, Snapshot,
    SubscriptionId,
};

// =============================================================================
// Scripted transport
// =============================================================================

/// Replays a queue of canned results and records every request.
struct ScriptedTransport {
    replies: StdMutex<VecDeque<Result<ServerReply, RequestError>>>,
    requests: StdMutex<Vec<(String, Vec<(String, String)>)>>,
}

impl ScriptedTransport {
    fn new(replies: Vec<Result<ServerReply, RequestError>>) -> Self {
        Self {
            replies: StdMutex::new(replies.into_iter().collect()),
            requests: StdMutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<ServerReply, RequestError> {
        self.requests
            .lock()
            .unwrap()
            .push((endpoint.to_string(), params.to_vec()));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("transport called more times than scripted")
    }
}

fn snapshot_json(raw: &str) -> Snapshot {
    serde_json::from_str(raw).expect("snapshot fixture should parse")
}

/// Two items in one subscribed list, wire-shaped (string map keys).
fn two_item_snapshot() -> Snapshot {
    snapshot_json(
        r#"{
            "subscriptions": {
                "1": {
                    "id": 1, "position": 0, "minimized": false,
                    "list": {
                        "id": 10, "name": "Groceries", "owner_id": 7,
                        "items": {
                            "100": {"id": 100, "list_id": 10, "text": "milk", "position": 0},
                            "101": {"id": 101, "list_id": 10, "text": "eggs", "position": 1}
                        }
                    }
                }
            },
            "lists": {"10": {"id": 10, "name": "Groceries", "owner_id": 7}}
        }"#,
    )
}

/// Capture engine logs per test; `RUST_LOG` controls verbosity on failures.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> ClientConfig {
    init_tracing();
    ClientConfig {
        base_url: "http://localhost:8000".to_string(),
        user_id: listmirror::UserId(7),
        ..ClientConfig::default()
    }
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ChangeEvent>) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn item_order(client: &Client<impl Transport>, list: u64) -> Vec<ItemId> {
    let engine = client.engine();
    let engine = engine.lock().await;
    engine
        .store()
        .ordered_items(ListId(list))
        .into_iter()
        .map(|(id, _)| id)
        .collect()
}

// =============================================================================
// Refresh and reply merging
// =============================================================================

#[tokio::test]
async fn test_refresh_merges_reply_state() {
    let transport = ScriptedTransport::new(vec![Ok(ServerReply {
        state: Some(two_item_snapshot()),
        msg: None,
    })]);
    let (client, mut rx) = Client::new(transport, &config());

    client.refresh().await.unwrap();

    let events = drain(&mut rx);
    assert!(matches!(events[0], ChangeEvent::SubscriptionAdded { .. }));
    assert_eq!(item_order(&client, 10).await, vec![ItemId(100), ItemId(101)]);
}

#[tokio::test]
async fn test_reply_without_state_leaves_store_untouched() {
    let transport = ScriptedTransport::new(vec![
        Ok(ServerReply {
            state: Some(two_item_snapshot()),
            msg: None,
        }),
        Ok(ServerReply {
            state: None,
            msg: Some("ok".to_string()),
        }),
    ]);
    let (client, mut rx) = Client::new(transport, &config());

    client.refresh().await.unwrap();
    drain(&mut rx);

    let msg = client.remove_items(&[ItemId(100)]).await.unwrap();
    assert_eq!(msg.as_deref(), Some("ok"));
    assert!(drain(&mut rx).is_empty());
    assert_eq!(item_order(&client, 10).await, vec![ItemId(100), ItemId(101)]);
}

#[tokio::test]
async fn test_error_body_state_is_still_merged() {
    let transport = ScriptedTransport::new(vec![Err(RequestError::ServerReported {
        msg: "No such item".to_string(),
        state: Some(two_item_snapshot()),
    })]);
    let (client, mut rx) = Client::new(transport, &config());

    let err = client
        .add_item(ListId(10), "bread", listmirror::AddPosition::End)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::ServerReported(_)));

    // The failed operation's reply still carried authoritative state.
    assert!(!drain(&mut rx).is_empty());
    assert_eq!(item_order(&client, 10).await, vec![ItemId(100), ItemId(101)]);
}

#[tokio::test]
async fn test_request_params_are_wire_shaped() {
    let transport = Arc::new(ScriptedTransport::new(vec![Ok(ServerReply::default())]));
    let (client, _rx) = Client::new(Arc::clone(&transport), &config());

    client
        .set_item_importances(&[ItemId(100)], &[ItemId(101), ItemId(102)])
        .await
        .unwrap();

    let requests = transport.requests();
    assert_eq!(requests[0].0, "set_item_importances/");
    assert_eq!(
        requests[0].1,
        vec![
            ("important_item_ids".to_string(), "100".to_string()),
            ("unimportant_item_ids".to_string(), "101".to_string()),
            ("unimportant_item_ids".to_string(), "102".to_string()),
        ]
    );
}

// =============================================================================
// Optimistic moves
// =============================================================================

#[tokio::test]
async fn test_failed_move_rolls_back_to_prior_anchor() {
    let transport = ScriptedTransport::new(vec![
        Ok(ServerReply {
            state: Some(two_item_snapshot()),
            msg: None,
        }),
        Err(RequestError::Transport(TransportError::Timeout)),
    ]);
    let (client, mut rx) = Client::new(transport, &config());
    client.refresh().await.unwrap();
    drain(&mut rx);

    let err = client
        .move_item(ItemId(100), ListId(10), MoveTarget::Down)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Transport(TransportError::Timeout)));

    let events = drain(&mut rx);
    // Speculative move out, compensating move back, no merge in between.
    assert_eq!(
        events,
        vec![
            ChangeEvent::ItemReordered {
                id: ItemId(100),
                list_id: ListId(10),
                before: None,
            },
            ChangeEvent::ItemReordered {
                id: ItemId(100),
                list_id: ListId(10),
                before: Some(ItemId(101)),
            },
        ]
    );
    assert_eq!(item_order(&client, 10).await, vec![ItemId(100), ItemId(101)]);
}

#[tokio::test]
async fn test_confirmed_move_clears_pending_state() {
    let confirmed = snapshot_json(
        r#"{
            "subscriptions": {
                "1": {
                    "id": 1, "position": 0, "minimized": false,
                    "list": {
                        "id": 10, "name": "Groceries", "owner_id": 7,
                        "items": {
                            "100": {"id": 100, "list_id": 10, "text": "milk", "position": 1},
                            "101": {"id": 101, "list_id": 10, "text": "eggs", "position": 0}
                        }
                    }
                }
            },
            "lists": {"10": {"id": 10, "name": "Groceries", "owner_id": 7}}
        }"#,
    );
    let transport = ScriptedTransport::new(vec![
        Ok(ServerReply {
            state: Some(two_item_snapshot()),
            msg: None,
        }),
        Ok(ServerReply {
            state: Some(confirmed),
            msg: None,
        }),
        Err(RequestError::Transport(TransportError::Timeout)),
    ]);
    let (client, mut rx) = Client::new(transport, &config());
    client.refresh().await.unwrap();
    drain(&mut rx);

    client
        .move_item(ItemId(100), ListId(10), MoveTarget::Down)
        .await
        .unwrap();
    assert_eq!(item_order(&client, 10).await, vec![ItemId(101), ItemId(100)]);

    // The entity is free again: a second move is accepted (and its failure
    // rolls back only the second move).
    let err = client
        .move_item(ItemId(100), ListId(10), MoveTarget::Up)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
    assert_eq!(item_order(&client, 10).await, vec![ItemId(101), ItemId(100)]);
}

/// Holds the first request open until released, to overlap operations.
struct GatedTransport {
    gate: StdMutex<Option<oneshot::Receiver<()>>>,
}

#[async_trait]
impl Transport for GatedTransport {
    async fn request(
        &self,
        _endpoint: &str,
        _params: &[(String, String)],
    ) -> Result<ServerReply, RequestError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Err(RequestError::Transport(TransportError::Timeout))
    }
}

#[tokio::test]
async fn test_overlapping_move_on_same_entity_is_rejected() {
    let (release, gate) = oneshot::channel();
    let transport = GatedTransport {
        gate: StdMutex::new(Some(gate)),
    };
    let (client, mut rx) = Client::new(transport, &config());
    {
        let engine = client.engine();
        engine.lock().await.merge(two_item_snapshot());
    }
    drain(&mut rx);

    let client = Arc::new(client);
    let racing = Arc::clone(&client);
    let first = tokio::spawn(async move {
        racing
            .move_item(ItemId(100), ListId(10), MoveTarget::Down)
            .await
    });
    tokio::task::yield_now().await;

    let second = client
        .move_item(ItemId(100), ListId(10), MoveTarget::Up)
        .await;
    assert!(matches!(
        second,
        Err(ClientError::Optimistic(_))
    ));

    release.send(()).unwrap();
    assert!(first.await.unwrap().is_err());
    // Only the first move was speculated and rolled back.
    assert_eq!(item_order(&client, 10).await, vec![ItemId(100), ItemId(101)]);
}

#[tokio::test]
async fn test_subscription_move_rolls_back() {
    let snapshot = snapshot_json(
        r#"{
            "subscriptions": {
                "1": {"id": 1, "position": 0, "minimized": false,
                      "list": {"id": 10, "name": "A", "owner_id": 7, "items": {}}},
                "2": {"id": 2, "position": 1, "minimized": false,
                      "list": {"id": 11, "name": "B", "owner_id": 7, "items": {}}}
            },
            "lists": {}
        }"#,
    );
    let transport = ScriptedTransport::new(vec![
        Ok(ServerReply {
            state: Some(snapshot),
            msg: None,
        }),
        Err(RequestError::Transport(TransportError::Network(
            "connection reset".to_string(),
        ))),
    ]);
    let (client, mut rx) = Client::new(transport, &config());
    client.refresh().await.unwrap();
    drain(&mut rx);

    let err = client
        .move_subscription(SubscriptionId(1), MoveTarget::Down)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));

    let engine = client.engine();
    let order: Vec<SubscriptionId> = engine
        .lock()
        .await
        .store()
        .ordered_subscriptions()
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(order, vec![SubscriptionId(1), SubscriptionId(2)]);
}
