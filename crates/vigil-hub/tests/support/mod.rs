//! In-memory transport standing in for a WebSocket connection.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vigil_hub::{
    FrameSink, FrameStream, Hub, HubHandle, HubSettings, InboundFrame, OutboundFrame, Peer,
    TransportError,
};

pub const WAIT: Duration = Duration::from_secs(2);

/// How the fake sink treats writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    Healthy,
    /// Every write hangs forever; only the write deadline ends it.
    Stalled,
    /// Text frames succeed, pings fail as if the socket were gone.
    BrokenPings,
}

pub struct MockSink {
    mode: SinkMode,
    written: mpsc::UnboundedSender<OutboundFrame>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        match (self.mode, &frame) {
            (SinkMode::Stalled, _) => std::future::pending().await,
            (SinkMode::BrokenPings, OutboundFrame::Ping) => {
                Err(TransportError::Io("broken pipe".into()))
            }
            _ => {
                let _ = self.written.send(frame);
                Ok(())
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockStream {
    inbound: mpsc::UnboundedReceiver<Result<InboundFrame, TransportError>>,
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn recv(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        self.inbound.recv().await
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

/// The client end of a mock connection.
pub struct Remote {
    pub written: mpsc::UnboundedReceiver<OutboundFrame>,
    pub inbound: mpsc::UnboundedSender<Result<InboundFrame, TransportError>>,
    pub sink_closed: Arc<AtomicBool>,
    pub stream_dropped: Arc<AtomicBool>,
}

impl Remote {
    /// Next envelope written to this client, skipping probes.
    pub async fn next_json(&mut self) -> Option<Value> {
        loop {
            match tokio::time::timeout(WAIT, self.written.recv()).await {
                Ok(Some(OutboundFrame::Text(text))) => {
                    return Some(serde_json::from_str(&text).expect("valid JSON"))
                }
                Ok(Some(OutboundFrame::Ping)) => continue,
                Ok(None) | Err(_) => return None,
            }
        }
    }

    /// Envelopes already written, without waiting.
    pub fn drain_json(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = self.written.try_recv() {
            if let OutboundFrame::Text(text) = frame {
                out.push(serde_json::from_str(&text).expect("valid JSON"));
            }
        }
        out
    }

    pub fn send(&self, frame: InboundFrame) {
        let _ = self.inbound.send(Ok(frame));
    }

    pub fn is_torn_down(&self) -> bool {
        self.sink_closed.load(Ordering::SeqCst) && self.stream_dropped.load(Ordering::SeqCst)
    }
}

pub fn mock_peer(mode: SinkMode) -> (Peer, Remote) {
    let (written_tx, written_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let sink_closed = Arc::new(AtomicBool::new(false));
    let stream_dropped = Arc::new(AtomicBool::new(false));

    let sink = MockSink {
        mode,
        written: written_tx,
        closed: Arc::clone(&sink_closed),
    };
    let stream = MockStream {
        inbound: inbound_rx,
        dropped: Arc::clone(&stream_dropped),
    };
    let remote = Remote {
        written: written_rx,
        inbound: inbound_tx,
        sink_closed,
        stream_dropped,
    };
    (Peer::new("127.0.0.1:40000", sink, stream), remote)
}

/// Settings with probing effectively off and short write deadlines.
pub fn quiet_settings() -> HubSettings {
    HubSettings {
        probe_interval: Duration::from_secs(3600),
        pong_timeout: None,
        write_timeout: Duration::from_millis(200),
        broadcast_buffer: 64,
        client_buffer: 64,
    }
}

/// Like [`quiet_settings`], but a stalled write never times out, so a stalled
/// peer can only leave through a full queue or a full probe lane.
pub fn no_write_deadline() -> HubSettings {
    HubSettings {
        write_timeout: Duration::from_secs(3600),
        ..quiet_settings()
    }
}

pub fn start(settings: HubSettings) -> (HubHandle, tokio::task::JoinHandle<()>) {
    Hub::spawn(settings, &CancellationToken::new())
}

pub async fn wait_for_clients(hub: &HubHandle, n: usize) {
    let mut rx = hub.watch_clients();
    tokio::time::timeout(WAIT, rx.wait_for(|count| *count == n))
        .await
        .unwrap_or_else(|_| panic!("client count never reached {n}"))
        .expect("hub dropped its count channel");
}
