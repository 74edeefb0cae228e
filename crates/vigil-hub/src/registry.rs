use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vigil_core::types::PeerId;

use crate::peer::{Liveness, PeerInfo};

/// Registry state for one live peer. Dropping the senders closes its queues.
pub(crate) struct PeerEntry {
    /// Distinguishes this registration from a later one reusing the same id.
    pub session: u64,
    pub remote_addr: String,
    pub registered_at: DateTime<Utc>,
    pub queue: mpsc::Sender<Arc<str>>,
    pub probes: mpsc::Sender<()>,
    pub liveness: Arc<Liveness>,
    pub cancel: CancellationToken,
    pub writer: JoinHandle<()>,
    pub reader: JoinHandle<()>,
}

impl PeerEntry {
    /// Close the outbound queue and stop both tasks. The writer closes the
    /// transport on its way out. Returns the task handles for callers that
    /// need to wait.
    pub fn teardown(self) -> [JoinHandle<()>; 2] {
        self.cancel.cancel();
        drop(self.queue);
        drop(self.probes);
        [self.writer, self.reader]
    }

    pub fn info(&self, id: &PeerId) -> PeerInfo {
        PeerInfo {
            id: id.clone(),
            remote_addr: self.remote_addr.clone(),
            registered_at: self.registered_at,
            last_liveness_at: self.liveness.last_seen(),
        }
    }
}

/// Connection registry. Owned by the control loop; never shared.
#[derive(Default)]
pub(crate) struct Registry {
    peers: HashMap<PeerId, PeerEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, returning the entry previously registered under `id`.
    pub fn insert(&mut self, id: PeerId, entry: PeerEntry) -> Option<PeerEntry> {
        self.peers.insert(id, entry)
    }

    pub fn remove(&mut self, id: &PeerId) -> Option<PeerEntry> {
        self.peers.remove(id)
    }

    /// Remove only if `id` still belongs to registration `session`.
    pub fn remove_session(&mut self, id: &PeerId, session: u64) -> Option<PeerEntry> {
        match self.peers.get(id) {
            Some(entry) if entry.session == session => self.peers.remove(id),
            _ => None,
        }
    }

    pub fn get(&self, id: &PeerId) -> Option<&PeerEntry> {
        self.peers.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &PeerEntry)> {
        self.peers.iter()
    }

    pub fn drain(&mut self) -> Vec<(PeerId, PeerEntry)> {
        self.peers.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Peer listing sorted by registration time.
    pub fn infos(&self) -> Vec<PeerInfo> {
        let mut infos: Vec<PeerInfo> = self.peers.iter().map(|(id, e)| e.info(id)).collect();
        infos.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.id.cmp(&b.id)));
        infos
    }
}
