//! WebSocket client for a job's status channel.
//!
//! [`StatusClient`] holds the target URL for one job. Call
//! [`StatusClient::connect`] to open a live [`StatusConnection`].

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use vimax_core::types::JobId;

/// The raw WebSocket stream used for a status channel.
pub type StatusStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection target for one job's status channel.
#[derive(Debug, Clone)]
pub struct StatusClient {
    job_id: JobId,
    url: String,
}

/// A live status-channel connection.
pub struct StatusConnection {
    pub job_id: JobId,
    /// Per-connection id, used only to correlate log lines.
    pub connection_id: uuid::Uuid,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: StatusStream,
}

impl StatusClient {
    /// * `job_id` - job whose updates this channel carries.
    /// * `url`    - full channel URL, e.g. `ws://host:8000/ws/job/{job_id}`.
    pub fn new(job_id: JobId, url: String) -> Self {
        Self { job_id, url }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open the status channel.
    pub async fn connect(&self) -> Result<StatusConnection, ClientError> {
        let (ws_stream, _response) = connect_async(self.url.as_str()).await.map_err(|e| {
            ClientError::Connection(format!("Failed to connect to {}: {e}", self.url))
        })?;

        let connection_id = uuid::Uuid::new_v4();
        tracing::info!(
            job_id = %self.job_id,
            connection_id = %connection_id,
            "Status channel connected at {}",
            self.url,
        );

        Ok(StatusConnection {
            job_id: self.job_id.clone(),
            connection_id,
            ws_stream,
        })
    }
}

/// Errors that can occur on the status channel.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(#[from] tokio_tungstenite::tungstenite::Error),
}
