//! A `tokio-tungstenite`-backed [`Transport`], grounded in the split
//! sink/stream approach `gemini_client::GeminiClient` uses for concurrent
//! reading and writing over a WebSocket.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::codec::RawFrame;
use crate::error::{Result, TransportError};
use crate::transport::{Inbound, Transport};

/// A session endpoint's connection to the peer over a real WebSocket.
pub struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl WsTransport {
    /// Connect to `url` and wrap the resulting WebSocket as a [`Transport`].
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self { ws, closed: false })
    }

    /// Wrap an already-established WebSocket stream (e.g. the server side
    /// of an accepted connection) as a [`Transport`].
    pub fn from_stream(ws: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self { ws, closed: false }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, json: String) -> Result<()> {
        debug!("sending text frame ({} bytes)", json.len());
        self.ws
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    async fn send_binary(&mut self, bytes: Bytes) -> Result<()> {
        debug!("sending binary frame ({} bytes)", bytes.len());
        self.ws
            .send(Message::Binary(bytes))
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Inbound> {
        if self.closed {
            return Ok(Inbound::EndOfStream);
        }
        loop {
            return match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    Ok(Inbound::Frame(RawFrame::Text(text.to_string())))
                }
                Some(Ok(Message::Binary(bytes))) => Ok(Inbound::Frame(RawFrame::Binary(bytes))),
                Some(Ok(Message::Close(_))) | None => Ok(Inbound::EndOfStream),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => Err(TransportError::Other(e.to_string())),
            };
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.ws
            .close(None)
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }
}
