//! The transport capability: a reliable, ordered, bidirectional
//! frame-duplex. The protocol engine only ever talks to this trait --
//! never to a socket or channel directly -- so the concrete transport
//! (WebSocket, in-memory pipe, anything else) stays a swappable
//! collaborator, per the "transport genericity" design note.

pub mod mem;
pub mod ws;

use async_trait::async_trait;
use bytes::Bytes;

use crate::codec::RawFrame;
use crate::error::{Result, TransportError};

/// One inbound frame, or the end of the stream.
#[derive(Debug, Clone)]
pub enum Inbound {
    Frame(RawFrame),
    EndOfStream,
}

/// A reliable, ordered, bidirectional duplex of text and binary frames.
///
/// Implementations MUST preserve frame boundaries and relative order within
/// each direction. Any I/O failure is terminal: the core does not retry and
/// does not assume message boundaries survive a reconnect.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&mut self, json: String) -> Result<()>;

    async fn send_binary(&mut self, bytes: Bytes) -> Result<()>;

    /// Pull the next frame. Returns `Inbound::EndOfStream` after `close()`
    /// or when the peer closes cleanly; errors are reserved for I/O failure.
    async fn recv(&mut self) -> Result<Inbound>;

    /// Idempotent. Subsequent `recv()` calls yield `EndOfStream`.
    async fn close(&mut self) -> Result<()>;
}

pub(crate) fn closed_error() -> TransportError {
    TransportError::Closed
}
