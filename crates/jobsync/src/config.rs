use std::time::Duration;

use crate::reconnect::ReconnectConfig;

/// Interval between outbound liveness pings while connected.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(25_000);

/// How long a close handshake may take before the socket is dropped.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Settings shared by every job connection.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// WebSocket base URL of the service, e.g. `ws://localhost:8000`.
    pub ws_url: String,
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectConfig,
    pub close_timeout: Duration,
}

impl SyncConfig {
    /// Configuration with the standard heartbeat and backoff constants.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            reconnect: ReconnectConfig::default(),
            close_timeout: CLOSE_TIMEOUT,
        }
    }

    /// Status-channel URL for one job.
    pub fn job_url(&self, job_id: &str) -> String {
        format!("{}/ws/job/{}", self.ws_url.trim_end_matches('/'), job_id)
    }
}
