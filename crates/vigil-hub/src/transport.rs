use async_trait::async_trait;
use std::sync::Arc;

use crate::error::TransportError;

/// Frame handed to a peer's write half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Serialized envelope, shared by every recipient of one fan-out pass.
    Text(Arc<str>),
    /// Transport-native liveness probe.
    Ping,
}

/// What the reader needs to know about an inbound frame. Application payloads
/// collapse into `Data` and are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Pong,
    Close,
    Data,
}

/// Write half of a peer connection. Driven only by that peer's writer task.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), TransportError>;

    /// Send a close frame (best effort) and release the write half.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a peer connection. Driven only by that peer's reader task.
#[async_trait]
pub trait FrameStream: Send {
    /// Next inbound frame; `None` once the connection is gone.
    async fn recv(&mut self) -> Option<Result<InboundFrame, TransportError>>;
}
