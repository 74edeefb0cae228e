use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use vigil_core::types::PeerId;

use crate::transport::{FrameSink, FrameStream};

/// A freshly upgraded connection waiting to be registered with the hub.
pub struct Peer {
    id: PeerId,
    remote_addr: String,
    sink: Box<dyn FrameSink>,
    stream: Box<dyn FrameStream>,
    queue_capacity: Option<usize>,
}

impl Peer {
    pub fn new(
        remote_addr: impl Into<String>,
        sink: impl FrameSink + 'static,
        stream: impl FrameStream + 'static,
    ) -> Self {
        Self {
            id: PeerId::new(),
            remote_addr: remote_addr.into(),
            sink: Box::new(sink),
            stream: Box::new(stream),
            queue_capacity: None,
        }
    }

    /// Use a caller-chosen identity. Registering an identity that is already
    /// live replaces the old peer.
    pub fn with_id(mut self, id: PeerId) -> Self {
        self.id = id;
        self
    }

    /// Override the hub-wide outbound queue capacity for this peer.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub(crate) fn into_parts(self) -> PeerParts {
        PeerParts {
            id: self.id,
            remote_addr: self.remote_addr,
            sink: self.sink,
            stream: self.stream,
            queue_capacity: self.queue_capacity,
        }
    }
}

pub(crate) struct PeerParts {
    pub id: PeerId,
    pub remote_addr: String,
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
    pub queue_capacity: Option<usize>,
}

/// Last time a peer answered a probe, shared between its reader and the loop.
///
/// Silence is measured on the monotonic clock, so a wall-clock jump cannot
/// expire live peers. The wall-clock origin is only used for display.
#[derive(Debug)]
pub(crate) struct Liveness {
    origin: Instant,
    origin_wall: DateTime<Utc>,
    /// Milliseconds after `origin` of the last response.
    last_ms: AtomicU64,
}

impl Liveness {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            origin: Instant::now(),
            origin_wall: Utc::now(),
            last_ms: AtomicU64::new(0),
        })
    }

    pub fn touch(&self) {
        let ms = self.origin.elapsed().as_millis() as u64;
        self.last_ms.store(ms, Ordering::Relaxed);
    }

    fn last(&self) -> Duration {
        Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        let offset = chrono::Duration::from_std(self.last()).unwrap_or_else(|_| chrono::Duration::zero());
        self.origin_wall + offset
    }

    /// How long the peer has been silent as of `now`.
    pub fn silent_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.origin + self.last())
    }
}

/// Diagnostic view of one registered peer.
#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub remote_addr: String,
    pub registered_at: DateTime<Utc>,
    pub last_liveness_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_counts_from_last_response() {
        let liveness = Liveness::new();
        let start = Instant::now();
        assert!(liveness.silent_at(start + Duration::from_secs(30)) >= Duration::from_secs(30));

        liveness.touch();
        assert!(liveness.silent_at(Instant::now()) < Duration::from_secs(1));
        // an instant before the last response is not silence
        assert_eq!(liveness.silent_at(start - Duration::from_millis(1)), Duration::ZERO);
    }

    #[test]
    fn last_seen_follows_touches() {
        let before = Utc::now();
        let liveness = Liveness::new();
        let first = liveness.last_seen();
        std::thread::sleep(Duration::from_millis(20));
        liveness.touch();

        assert!(first >= before - chrono::Duration::milliseconds(1));
        assert!(liveness.last_seen() >= first + chrono::Duration::milliseconds(20));
    }
}
