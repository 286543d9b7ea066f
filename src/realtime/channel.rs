//! Channel transport abstraction and the production WebSocket implementation.
//!
//! The supervisor drives a [`Connector`]/[`Transport`] pair rather than a raw
//! socket so its state machine can be exercised against scripted transports
//! in tests. [`WsConnector`] is the production implementation over
//! `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::trace;

use crate::errors::ChannelError;
use crate::realtime::events::ChannelMessage;

/// One live connection to the project channel.
#[async_trait]
pub trait Transport: Send {
    /// Next decoded frame. `None` means the peer closed the connection.
    async fn next(&mut self) -> Option<Result<ChannelMessage, ChannelError>>;

    /// Send a keepalive ping.
    async fn ping(&mut self) -> Result<(), ChannelError>;

    /// Best-effort close.
    async fn close(&mut self);
}

/// Factory for project channel connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, project_id: i64) -> Result<Box<dyn Transport>, ChannelError>;
}

/// Production connector: `ws(s)://{base}/projects/{id}/ws`.
pub struct WsConnector {
    ws_base_url: String,
}

impl WsConnector {
    pub fn new(ws_base_url: impl Into<String>) -> Self {
        Self {
            ws_base_url: ws_base_url.into(),
        }
    }

    fn url_for(&self, project_id: i64) -> String {
        format!(
            "{}/projects/{}/ws",
            self.ws_base_url.trim_end_matches('/'),
            project_id
        )
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, project_id: i64) -> Result<Box<dyn Transport>, ChannelError> {
        let url = self.url_for(project_id);
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(format!("{url}: {e}")))?;
        trace!(%url, "websocket connected");
        Ok(Box::new(WsTransport { stream }))
    }
}

/// WebSocket-backed transport.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn next(&mut self) -> Option<Result<ChannelMessage, ChannelError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(serde_json::from_str(&text).map_err(ChannelError::from));
                }
                // Pongs double as liveness signals for the supervisor's
                // keepalive accounting.
                Ok(Message::Pong(_)) => return Some(Ok(ChannelMessage::Heartbeat)),
                Ok(Message::Ping(payload)) => {
                    if let Err(e) = self.stream.send(Message::Pong(payload)).await {
                        return Some(Err(ChannelError::Protocol(e.to_string())));
                    }
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(ChannelError::Protocol(e.to_string()))),
            }
        }
    }

    async fn ping(&mut self) -> Result<(), ChannelError> {
        self.stream
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| ChannelError::Protocol(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.stream.send(Message::Close(None)).await;
    }
}
