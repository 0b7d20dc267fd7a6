//! HTTP transport to the state server
//!
//! All operations are form-encoded POSTs answered with JSON. Replies carry
//! the usual `{state, msg}` shape on success and, when the server can, on
//! failure too: an error body that parses as JSON may still hold an
//! authoritative `state` snapshot, which callers must merge even though the
//! operation failed.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::model::{ItemId, Snapshot, SubscriptionId};

/// Request paths, relative to the configured base URL.
pub mod endpoints {
    pub const GET_STATE: &str = "get_state/";
    pub const ADD_ITEM: &str = "add_item/";
    pub const REMOVE_ITEMS: &str = "remove_items/";
    pub const MOVE_ITEM: &str = "move_item/";
    pub const ADD_SUBSCRIPTION: &str = "add_subscription/";
    pub const REMOVE_SUBSCRIPTION: &str = "remove_subscription/";
    pub const MOVE_SUBSCRIPTION: &str = "move_subscription/";
    pub const MINIMIZE_SUBSCRIPTION: &str = "minimize_subscription/";
    pub const MAXIMIZE_SUBSCRIPTION: &str = "maximize_subscription/";
    pub const SET_ITEM_IMPORTANCES: &str = "set_item_importances/";
    pub const ADD_LIST: &str = "add_list/";
    pub const REMOVE_LIST: &str = "remove_list/";
    pub const EDIT_TEXT: &str = "edit_text/";
}

/// Parsed reply body. Either field may be absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerReply {
    #[serde(default)]
    pub state: Option<Snapshot>,
    #[serde(default)]
    pub msg: Option<String>,
}

/// The request never produced a usable server reply.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("server returned HTTP {status} with an unparseable body")]
    BadStatus { status: u16 },
}

/// How a request can fail, as seen by the engine.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server rejected the operation but said so in a parseable body,
    /// possibly carrying an authoritative state snapshot.
    #[error("server reported: {msg}")]
    ServerReported {
        msg: String,
        state: Option<Snapshot>,
    },
}

/// Target of an `edit_text` request, rendered to the wire element id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditTarget {
    ItemText(ItemId),
    ListName(SubscriptionId),
}

impl EditTarget {
    pub fn element_id(&self) -> String {
        match self {
            EditTarget::ItemText(id) => format!("item_{}_text", id),
            EditTarget::ListName(id) => format!("subscription_{}_listname", id),
        }
    }
}

/// Seam between the engine and the HTTP layer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `params` to `endpoint` and parse the reply.
    async fn request(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<ServerReply, RequestError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn request(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<ServerReply, RequestError> {
        (**self).request(endpoint, params).await
    }
}

/// reqwest-backed transport with a fixed per-request timeout.
pub struct HttpTransport {
    base_url: String,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building http client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<ServerReply, RequestError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(%url, params = params.len(), "sending request");

        let response = self
            .http
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                TransportError::Network(format!("unparseable reply body: {e}")).into()
            });
        }

        // Even a failed operation may carry the server's state; salvage it.
        match serde_json::from_str::<ServerReply>(&body) {
            Ok(reply) => Err(RequestError::ServerReported {
                msg: reply
                    .msg
                    .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
                state: reply.state,
            }),
            Err(_) => Err(TransportError::BadStatus {
                status: status.as_u16(),
            }
            .into()),
        }
    }
}
