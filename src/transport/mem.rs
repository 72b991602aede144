//! An in-process transport pair, channel-backed like the teacher's
//! `ws_writer`/`broker` plumbing. Used by integration tests and by any host
//! that wants to run both endpoints of a session in one process without a
//! real socket.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::codec::RawFrame;
use crate::error::Result;
use crate::transport::{closed_error, Inbound, Transport};

enum MemFrame {
    Text(String),
    Binary(Bytes),
}

/// One half of an in-memory transport pair. See [`pair`].
pub struct MemTransport {
    tx: UnboundedSender<MemFrame>,
    rx: UnboundedReceiver<MemFrame>,
    closed: bool,
}

/// Build a connected pair of in-memory transports: frames sent on one are
/// received by the other, in order, with no serialization round-trip.
pub fn pair() -> (MemTransport, MemTransport) {
    let (tx_a, rx_a) = unbounded_channel();
    let (tx_b, rx_b) = unbounded_channel();
    (
        MemTransport {
            tx: tx_a,
            rx: rx_b,
            closed: false,
        },
        MemTransport {
            tx: tx_b,
            rx: rx_a,
            closed: false,
        },
    )
}

#[async_trait]
impl Transport for MemTransport {
    async fn send_text(&mut self, json: String) -> Result<()> {
        if self.closed {
            return Err(closed_error());
        }
        self.tx.send(MemFrame::Text(json)).map_err(|_| closed_error())
    }

    async fn send_binary(&mut self, bytes: Bytes) -> Result<()> {
        if self.closed {
            return Err(closed_error());
        }
        self.tx
            .send(MemFrame::Binary(bytes))
            .map_err(|_| closed_error())
    }

    async fn recv(&mut self) -> Result<Inbound> {
        if self.closed {
            return Ok(Inbound::EndOfStream);
        }
        match self.rx.recv().await {
            Some(MemFrame::Text(text)) => Ok(Inbound::Frame(RawFrame::Text(text))),
            Some(MemFrame::Binary(bytes)) => Ok(Inbound::Frame(RawFrame::Binary(bytes))),
            None => Ok(Inbound::EndOfStream),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.rx.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_frame_travels_in_order() {
        let (mut a, mut b) = pair();
        a.send_text("one".into()).await.unwrap();
        a.send_text("two".into()).await.unwrap();
        match b.recv().await.unwrap() {
            Inbound::Frame(RawFrame::Text(t)) => assert_eq!(t, "one"),
            _ => panic!("expected text frame"),
        }
        match b.recv().await.unwrap() {
            Inbound::Frame(RawFrame::Text(t)) => assert_eq!(t, "two"),
            _ => panic!("expected text frame"),
        }
    }

    #[tokio::test]
    async fn close_yields_end_of_stream() {
        let (mut a, mut b) = pair();
        a.close().await.unwrap();
        assert!(matches!(a.recv().await.unwrap(), Inbound::EndOfStream));
        drop(a);
        assert!(matches!(b.recv().await.unwrap(), Inbound::EndOfStream));
    }
}
