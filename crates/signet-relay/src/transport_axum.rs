//! Adapts axum's WebSocket upgrade to the shared [`Transport`] trait, so the
//! connection loop in [`crate::connection`] doesn't care whether it's
//! talking to axum's `hyper`-backed socket or any other implementation.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use signet_protocol::transport::Transport;
use signet_protocol::TransportError;

pub struct AxumWsTransport {
    inner: WebSocket,
}

impl AxumWsTransport {
    pub fn new(inner: WebSocket) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Transport for AxumWsTransport {
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
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_))) => Ok(Some(Vec::new())),
            Some(Err(e)) => Err(TransportError::Io(e.to_string())),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}
