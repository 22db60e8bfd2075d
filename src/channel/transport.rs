//! Transport layer for the push channel.
//!
//! Defines the `PushConnector` / `PushConnection` traits and the WebSocket
//! implementation over `tokio-tungstenite`. The channel task only sees these
//! traits, so the reconnect state machine can be exercised without sockets.

use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::SyncError;

/// One inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushFrame {
    /// Any data message. The payload is informational only; its arrival is
    /// the refetch trigger.
    Signal(String),
    /// Ping/pong and other control traffic.
    Control,
}

// ---------------------------------------------------------------------------
// Transport traits
// ---------------------------------------------------------------------------

pub trait PushConnection: Send + 'static {
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Next inbound frame; `None` once the peer closed the connection.
    fn next_frame(
        &mut self,
    ) -> impl Future<Output = Option<Result<PushFrame, SyncError>>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

pub trait PushConnector: Send + Sync + 'static {
    type Connection: PushConnection;

    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Self::Connection, SyncError>> + Send;
}

// ---------------------------------------------------------------------------
// WebSocket transport
// ---------------------------------------------------------------------------

/// Handshake timeout for a single connection attempt.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl PushConnector for WsConnector {
    type Connection = WsConnection;

    async fn connect(&self, url: &str) -> Result<WsConnection, SyncError> {
        let attempt = tokio_tungstenite::connect_async(url);
        let (stream, response) = tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| SyncError::Network(format!("WebSocket handshake with {url} timed out")))?
            .map_err(|e| SyncError::Network(format!("WebSocket connect to {url} failed: {e}")))?;
        debug!(url, status = response.status().as_u16(), "websocket handshake complete");
        Ok(WsConnection { stream })
    }
}

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl PushConnection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<(), SyncError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| SyncError::Network(format!("WebSocket send failed: {e}")))
    }

    async fn next_frame(&mut self) -> Option<Result<PushFrame, SyncError>> {
        match self.stream.next().await? {
            Ok(Message::Text(text)) => Some(Ok(PushFrame::Signal(text))),
            Ok(Message::Binary(bytes)) => Some(Ok(PushFrame::Signal(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))),
            Ok(Message::Close(frame)) => {
                debug!(?frame, "websocket closed by server");
                None
            }
            Ok(_) => Some(Ok(PushFrame::Control)),
            Err(e) => Some(Err(SyncError::Network(format!("WebSocket read failed: {e}")))),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "websocket close handshake failed");
        }
    }
}

/// First message on every connection: the socket carries no identity until
/// it is told who it belongs to.
pub fn auth_message(token: &str) -> String {
    serde_json::json!({ "type": "auth", "token": token }).to_string()
}
