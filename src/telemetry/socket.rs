//! Push socket seam
//!
//! The channel worker talks to a [`PushSocket`] obtained from a
//! [`PushConnector`]; production uses a WebSocket carrying JSON text frames,
//! tests inject scripted fakes.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::warn;

use crate::error::{AppError, Result};
use crate::telemetry::protocol::{ClientMessage, ServerMessage};

/// One open push connection
#[async_trait]
pub trait PushSocket: Send {
    async fn send(&mut self, message: &ClientMessage) -> Result<()>;

    /// Next inbound message; `None` once the peer has closed.
    ///
    /// Malformed frames are skipped, not surfaced: a broken message from a
    /// newer server must not kill the connection.
    async fn recv(&mut self) -> Option<Result<ServerMessage>>;

    /// Intentional teardown with a normal-closure code
    async fn close(&mut self) -> Result<()>;
}

/// Establishes push connections
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushSocket>>;
}

/// WebSocket connector used in production
pub struct WsConnector;

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushSocket>> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| AppError::Channel(format!("connect to {} failed: {}", url, e)))?;
        Ok(Box::new(WsPushSocket { stream }))
    }
}

/// JSON-over-WebSocket push socket
pub struct WsPushSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushSocket for WsPushSocket {
    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| AppError::Channel(format!("send failed: {}", e)))
    }

    async fn recv(&mut self) -> Option<Result<ServerMessage>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) => return Some(Ok(message)),
                    Err(e) => {
                        warn!(error = %e, "malformed push message skipped");
                        continue;
                    }
                },
                Ok(Message::Close(_)) => return None,
                // Frame-level ping/pong and binary frames are not part of
                // the application protocol.
                Ok(_) => continue,
                Err(e) => return Some(Err(AppError::Channel(format!("receive failed: {}", e)))),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "client teardown".into(),
            }))
            .await
            .map_err(|e| AppError::Channel(format!("close failed: {}", e)))
    }
}
