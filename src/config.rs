//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::model::UserId;

/// Autorefresh intervals below this disable the scheduler entirely.
pub const MIN_REFRESH_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the state server.
    pub base_url: String,

    /// The viewing user; decides which catalogue rows offer deletion.
    pub user_id: UserId,

    /// Fixed timeout applied to every outbound request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Autorefresh interval in seconds. Values below
    /// [`MIN_REFRESH_INTERVAL_SECS`] disable autorefresh.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            user_id: UserId(0),
            request_timeout_ms: default_request_timeout(),
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

fn default_request_timeout() -> u64 {
    3000
}

fn default_refresh_interval() -> u64 {
    60
}
