//! Transport abstraction over a framed, bidirectional byte stream (§5).
//! The relay and a future client share this so connection handling logic
//! doesn't need to know whether it's talking to a real socket or a mock.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::TransportError;

#[async_trait]
pub trait Transport: Send {
    /// Send one already-framed envelope (header + payload).
    async fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Receive one complete frame, or `Ok(None)` if the peer closed the
    /// connection cleanly.
    async fn recv_frame(&mut self, deadline: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// `Transport` over a `tokio-tungstenite` WebSocket, carrying each frame as
/// one binary WS message (WS already provides message framing, so no inner
/// length prefix is needed beyond the 12-byte envelope header itself).
pub struct WebSocketTransport {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketTransport {
    pub fn new(inner: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.inner
            .send(Message::Binary(frame))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn recv_frame(&mut self, deadline: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let next = tokio::time::timeout(deadline, self.inner.next())
            .await
            .map_err(|_| TransportError::Timeout)?;

        match next {
            None => Ok(None),
            Some(Ok(Message::Binary(bytes))) => Ok(Some(bytes)),
            Some(Ok(Message::Close(_))) => Ok(None),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_))) => {
                // WS-level control/text frames are not envelope frames;
                // the caller's read loop should just poll again.
                Ok(Some(Vec::new()))
            }
            Some(Err(e)) => Err(TransportError::Io(e.to_string())),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner
            .close(None)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}
