use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use vigil_hub::{FrameSink, FrameStream, InboundFrame, OutboundFrame, TransportError};

/// Write half of an upgraded socket, driven by the hub's writer task.
pub struct WsSink {
    inner: SplitSink<WebSocket, Message>,
}

impl WsSink {
    pub fn new(inner: SplitSink<WebSocket, Message>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        let msg = match frame {
            OutboundFrame::Text(text) => Message::Text(text.to_string().into()),
            OutboundFrame::Ping => Message::Ping(Bytes::new()),
        };
        self.inner.send(msg).await.map_err(io)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // the peer may already be gone; still release the socket
        let _ = self.inner.send(Message::Close(None)).await;
        self.inner.close().await.map_err(io)
    }
}

/// Read half of an upgraded socket, driven by the hub's reader task.
pub struct WsStream {
    inner: SplitStream<WebSocket>,
}

impl WsStream {
    pub fn new(inner: SplitStream<WebSocket>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl FrameStream for WsStream {
    async fn recv(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        let frame = match self.inner.next().await? {
            Ok(Message::Pong(_)) => Ok(InboundFrame::Pong),
            Ok(Message::Close(_)) => Ok(InboundFrame::Close),
            // client pings are answered by the socket itself
            Ok(_) => Ok(InboundFrame::Data),
            Err(e) => Err(io(e)),
        };
        Some(frame)
    }
}

fn io(e: axum::Error) -> TransportError {
    TransportError::Io(e.to_string())
}
