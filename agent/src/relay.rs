//! # Relay Transport
//!
//! Wraps the relay WebSocket as a sequence of [`RelayEvent`]s plus a way to
//! write [`OutboundMessage`] lines back.
//!
//! ```text
//! Relay ←──WS (one text line per frame)──→ [RelayConnection] ←──→ CommandProtocol
//! ```
//!
//! WebSocket-level ping frames are answered by tungstenite while reading;
//! binary frames are ignored.

use crate::error::{AgentError, Result};
use futures::{SinkExt, StreamExt};
use relay_protocol::OutboundMessage;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long to wait for the relay to acknowledge our close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// One thing that happened on the relay connection.
#[derive(Debug)]
pub enum RelayEvent {
    /// A text frame.
    Message(String),
    /// The connection failed.
    Error(AgentError),
    /// The peer closed, or the stream ended.
    Closed,
}

pub struct RelayConnection {
    ws: WsStream,
}

impl RelayConnection {
    /// Dials the relay; a failure here is a transport error.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _response) = connect_async(url).await.map_err(AgentError::transport)?;
        debug!("Relay WebSocket handshake complete with {}", url);
        Ok(Self { ws })
    }

    pub async fn send(&mut self, message: &OutboundMessage) -> Result<()> {
        let text = message.to_string();
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(AgentError::transport)
    }

    /// Waits for the next meaningful event. Cancel-safe while waiting for a
    /// frame; a peer close is acknowledged before `Closed` is returned.
    pub async fn next_event(&mut self) -> RelayEvent {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return RelayEvent::Message(text.as_str().to_owned()),
                Some(Ok(Message::Close(frame))) => {
                    debug!("Relay sent close frame: {:?}", frame);
                    // tungstenite only queues the close reply
                    if let Err(e) = self.ws.flush().await {
                        debug!("Could not acknowledge relay close: {}", e);
                    }
                    return RelayEvent::Closed;
                }
                Some(Ok(_)) => continue,
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => return RelayEvent::Closed,
                Some(Err(e)) => return RelayEvent::Error(AgentError::transport(e)),
            }
        }
    }

    /// Graceful close: send a close frame and drain until the peer answers.
    pub async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            warn!("Error while closing relay connection: {}", e);
            return;
        }
        let drain = async { while let Some(Ok(_)) = self.ws.next().await {} };
        if tokio::time::timeout(CLOSE_GRACE, drain).await.is_err() {
            warn!("Relay did not acknowledge close within {:?}", CLOSE_GRACE);
        }
    }
}
