use async_trait::async_trait;

use crate::protocol::message::Message;

pub mod tcp_transport;
pub mod udp_transport;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TransportKind {
    Tcp,
    Udp,
}

/// Outcome of handing a message to the transport for delivery.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SendOutcome {
    /// TCP: the line was flushed to the stream. UDP: a matching CONFIRM arrived.
    Delivered,
    /// the retry budget was exhausted without a matching CONFIRM (UDP only)
    Failed,
}

/// One unit of peer input, as seen by the state machine.
#[derive(Debug)]
pub enum Inbound {
    Message(Message),
    /// a frame arrived but could not be parsed - a protocol violation by the peer
    Malformed(anyhow::Error),
    /// the peer closed the stream, resp. the receive path shut down
    Closed,
}

/// Uniform send/receive capability over one connection, hiding the encoding
///  and the reliability discipline of the underlying medium.
///
/// Implementations serialize all raw socket reads behind a single reader, so
///  `receive` and a concurrently in-flight `send` never compete for frames.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Blocks until the message is delivered or the transport gives up on it.
    ///  An `Err` is a transport failure (socket error), distinct from the
    ///  orderly `SendOutcome::Failed`.
    async fn send(&self, msg: &Message) -> anyhow::Result<SendOutcome>;

    /// Blocks until the next peer frame is available.
    async fn receive(&self) -> Inbound;
}
