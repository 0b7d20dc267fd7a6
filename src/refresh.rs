//! Autorefresh scheduler
//!
//! Keeps the store from going stale when nothing else is talking to the
//! server. Fires on an interval; if the last merge is older than the
//! interval it issues a full refresh and reschedules relative to completion,
//! otherwise it sleeps out the remaining wait. Any merge (from a user action
//! or another tab's effect landing in a reply) pushes the next refresh out.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::client::Client;
use crate::config::{ClientConfig, MIN_REFRESH_INTERVAL_SECS};
use crate::transport::Transport;

/// Staleness-driven refresh loop. Runs until its task is dropped; there is no
/// explicit cancel.
pub struct RefreshScheduler<T: Transport> {
    client: Arc<Client<T>>,
    interval: Duration,
}

impl<T: Transport> RefreshScheduler<T> {
    pub fn new(client: Arc<Client<T>>, config: &ClientConfig) -> Self {
        Self {
            client,
            interval: Duration::from_secs(config.refresh_interval_secs),
        }
    }

    /// Drive the refresh loop. Returns immediately when the configured
    /// interval is below the minimum threshold (a configuration guard, not an
    /// error).
    pub async fn run(self) {
        if self.interval < Duration::from_secs(MIN_REFRESH_INTERVAL_SECS) {
            info!(
                interval_secs = self.interval.as_secs(),
                "autorefresh disabled: interval below minimum"
            );
            return;
        }

        loop {
            let wait = match self.client.time_since_last_merge().await {
                Some(elapsed) if elapsed < self.interval => self.interval - elapsed,
                _ => {
                    if let Err(e) = self.client.refresh().await {
                        // The next tick (or an explicit user retry) re-polls;
                        // no backoff.
                        warn!(error = %e, "autorefresh failed");
                    }
                    self.interval
                }
            };
            tokio::time::sleep(wait).await;
        }
    }
}
