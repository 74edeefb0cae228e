use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_core::types::PeerId;
use vigil_protocol::Envelope;

use crate::handle::HubHandle;
use crate::peer::{Liveness, Peer, PeerInfo};
use crate::reader::Reader;
use crate::registry::{PeerEntry, Registry};
use crate::settings::HubSettings;
use crate::writer::Writer;

/// Builds a peer's first envelope. Runs on the control loop at registration,
/// so it observes every change already fanned out and none still pending.
pub(crate) type Greeting = Box<dyn FnOnce() -> Envelope + Send>;

/// Requests processed by the control loop, in arrival order.
pub(crate) enum Command {
    Register {
        peer: Peer,
        greeting: Option<Greeting>,
    },
    /// `session: None` removes whatever is registered under `id`.
    Unregister {
        id: PeerId,
        session: Option<u64>,
        reason: Departure,
    },
    SendTo {
        id: PeerId,
        envelope: Envelope,
    },
    ListPeers(oneshot::Sender<Vec<PeerInfo>>),
}

/// Why a peer left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    Requested,
    PeerClosed,
    ReadFailed,
    WriteFailed,
    ProbeFailed,
    LivenessExpired,
    Overflow,
    Replaced,
    Shutdown,
}

impl fmt::Display for Departure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Departure::Requested => "requested",
            Departure::PeerClosed => "peer-closed",
            Departure::ReadFailed => "read-failed",
            Departure::WriteFailed => "write-failed",
            Departure::ProbeFailed => "probe-failed",
            Departure::LivenessExpired => "liveness-expired",
            Departure::Overflow => "overflow",
            Departure::Replaced => "replaced",
            Departure::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// The control loop. Sole owner of the connection registry.
pub struct Hub {
    settings: HubSettings,
    registry: Registry,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    broadcasts_rx: mpsc::Receiver<Envelope>,
    clients_tx: watch::Sender<usize>,
    shutdown: CancellationToken,
    next_session: u64,
}

impl Hub {
    /// Build a hub and the handle producers use to reach it. The hub stops
    /// when `shutdown` (or the handle's own shutdown) is cancelled.
    pub fn new(settings: HubSettings, shutdown: &CancellationToken) -> (Self, HubHandle) {
        let settings = settings.normalized();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (broadcasts_tx, broadcasts_rx) = mpsc::channel(settings.broadcast_buffer);
        let (clients_tx, clients_rx) = watch::channel(0);
        let shutdown = shutdown.child_token();

        let handle = HubHandle::new(
            commands_tx.clone(),
            broadcasts_tx,
            clients_rx,
            shutdown.clone(),
        );
        let hub = Self {
            settings,
            registry: Registry::new(),
            commands_tx,
            commands_rx,
            broadcasts_rx,
            clients_tx,
            shutdown,
            next_session: 0,
        };
        (hub, handle)
    }

    /// Build a hub and run it on the current tokio runtime.
    pub fn spawn(settings: HubSettings, shutdown: &CancellationToken) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(settings, shutdown);
        (handle, tokio::spawn(hub.run()))
    }

    /// Serve requests until shutdown, then tear every peer down and wait for
    /// all peer tasks to finish.
    pub async fn run(mut self) {
        let period = self.settings.probe_interval;
        let mut probe_tick = tokio::time::interval_at(Instant::now() + period, period);
        probe_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            probe_interval_ms = period.as_millis() as u64,
            client_buffer = self.settings.client_buffer,
            "hub started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("hub stopping: shutdown requested");
                    break;
                }
                Some(cmd) = self.commands_rx.recv() => self.handle(cmd),
                msg = self.broadcasts_rx.recv() => match msg {
                    Some(envelope) => self.fan_out(&envelope),
                    None => {
                        info!("hub stopping: every handle dropped");
                        break;
                    }
                },
                _ = probe_tick.tick() => self.probe_all(),
            }
        }

        self.close_all().await;
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Register { peer, greeting } => self.register(peer, greeting),
            Command::Unregister {
                id,
                session,
                reason,
            } => self.unregister(&id, session, reason),
            Command::SendTo { id, envelope } => self.send_to(&id, &envelope),
            Command::ListPeers(reply) => {
                let _ = reply.send(self.registry.infos());
            }
        }
    }

    fn register(&mut self, peer: Peer, greeting: Option<Greeting>) {
        let parts = peer.into_parts();
        let id = parts.id;

        if let Some(old) = self.registry.remove(&id) {
            info!(peer_id = %id, reason = %Departure::Replaced, "replacing peer with same identity");
            old.teardown();
        }

        self.next_session += 1;
        let session = self.next_session;
        let capacity = parts
            .queue_capacity
            .unwrap_or(self.settings.client_buffer)
            .max(1);
        let (queue_tx, queue_rx) = mpsc::channel(capacity);
        let (probe_tx, probe_rx) = mpsc::channel(1);
        let cancel = self.shutdown.child_token();
        let liveness = Liveness::new();

        // queued before the entry is visible to fan-out, so it is always first
        if let Some(greeting) = greeting.map(|build| build()) {
            match encode(&greeting) {
                Ok(text) => {
                    let _ = queue_tx.try_send(text);
                }
                Err(e) => {
                    error!(peer_id = %id, kind = %greeting.kind(), error = %e, "failed to serialize greeting")
                }
            }
        }

        let writer = tokio::spawn(
            Writer {
                id: id.clone(),
                session,
                sink: parts.sink,
                queue: queue_rx,
                probes: probe_rx,
                cancel: cancel.clone(),
                write_timeout: self.settings.write_timeout,
                control: self.commands_tx.clone(),
            }
            .run(),
        );
        let reader = tokio::spawn(
            Reader {
                id: id.clone(),
                session,
                stream: parts.stream,
                liveness: Arc::clone(&liveness),
                cancel: cancel.clone(),
                control: self.commands_tx.clone(),
            }
            .run(),
        );

        let remote_addr = parts.remote_addr;
        self.registry.insert(
            id.clone(),
            PeerEntry {
                session,
                remote_addr: remote_addr.clone(),
                registered_at: Utc::now(),
                queue: queue_tx,
                probes: probe_tx,
                liveness,
                cancel,
                writer,
                reader,
            },
        );
        self.publish_count();
        info!(peer_id = %id, %remote_addr, clients = self.registry.len(), "peer registered");
    }

    fn unregister(&mut self, id: &PeerId, session: Option<u64>, reason: Departure) {
        let removed = match session {
            Some(session) => self.registry.remove_session(id, session),
            None => self.registry.remove(id),
        };
        let Some(entry) = removed else {
            debug!(peer_id = %id, %reason, "unregister for absent peer ignored");
            return;
        };

        let remote_addr = entry.remote_addr.clone();
        entry.teardown();
        self.publish_count();
        info!(
            peer_id = %id,
            %remote_addr,
            %reason,
            clients = self.registry.len(),
            "peer unregistered"
        );
    }

    /// Serialize once and offer the text to every peer without waiting.
    fn fan_out(&mut self, envelope: &Envelope) {
        let text = match encode(envelope) {
            Ok(text) => text,
            Err(e) => {
                error!(kind = %envelope.kind(), error = %e, "failed to serialize broadcast, dropping it");
                return;
            }
        };

        let mut evicted = Vec::new();
        for (id, entry) in self.registry.iter() {
            match entry.queue.try_send(Arc::clone(&text)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        peer_id = %id,
                        remote_addr = %entry.remote_addr,
                        kind = %envelope.kind(),
                        "send buffer full, dropping peer"
                    );
                    evicted.push((id.clone(), entry.session, Departure::Overflow));
                }
                Err(TrySendError::Closed(_)) => {
                    evicted.push((id.clone(), entry.session, Departure::WriteFailed));
                }
            }
        }
        for (id, session, reason) in evicted {
            self.schedule_unregister(id, session, reason);
        }
    }

    fn send_to(&mut self, id: &PeerId, envelope: &Envelope) {
        let Some(entry) = self.registry.get(id) else {
            debug!(peer_id = %id, kind = %envelope.kind(), "direct send to absent peer ignored");
            return;
        };
        let text = match encode(envelope) {
            Ok(text) => text,
            Err(e) => {
                error!(peer_id = %id, kind = %envelope.kind(), error = %e, "failed to serialize direct send");
                return;
            }
        };
        let evict = match entry.queue.try_send(text) {
            Ok(()) => None,
            Err(TrySendError::Full(_)) => {
                warn!(peer_id = %id, kind = %envelope.kind(), "send buffer full, dropping peer");
                Some(Departure::Overflow)
            }
            Err(TrySendError::Closed(_)) => Some(Departure::WriteFailed),
        };
        if let Some(reason) = evict {
            self.schedule_unregister(id.clone(), entry.session, reason);
        }
    }

    /// One liveness pass: expire silent peers, then queue a probe for the rest.
    fn probe_all(&mut self) {
        let now = Instant::now();
        let mut evicted = Vec::new();
        for (id, entry) in self.registry.iter() {
            if let Some(limit) = self.settings.pong_timeout {
                let silent = entry.liveness.silent_at(now);
                if silent > limit {
                    warn!(
                        peer_id = %id,
                        silent_ms = silent.as_millis() as u64,
                        "no liveness response, dropping peer"
                    );
                    evicted.push((id.clone(), entry.session, Departure::LivenessExpired));
                    continue;
                }
            }
            match entry.probes.try_send(()) {
                Ok(()) => {}
                Err(TrySendError::Full(())) => {
                    // the writer has not managed to send last tick's probe
                    warn!(peer_id = %id, "previous probe still pending, dropping peer");
                    evicted.push((id.clone(), entry.session, Departure::ProbeFailed));
                }
                Err(TrySendError::Closed(())) => {
                    evicted.push((id.clone(), entry.session, Departure::ProbeFailed));
                }
            }
        }
        debug!(peers = self.registry.len(), evicted = evicted.len(), "liveness pass");
        for (id, session, reason) in evicted {
            self.schedule_unregister(id, session, reason);
        }
    }

    /// Removal happens on a later loop turn, never during a registry walk.
    fn schedule_unregister(&self, id: PeerId, session: u64, reason: Departure) {
        let _ = self.commands_tx.send(Command::Unregister {
            id,
            session: Some(session),
            reason,
        });
    }

    async fn close_all(&mut self) {
        let peers = self.registry.drain();
        let count = peers.len();
        let mut tasks = Vec::with_capacity(count * 2);
        for (id, entry) in peers {
            debug!(peer_id = %id, reason = %Departure::Shutdown, "closing peer");
            tasks.extend(entry.teardown());
        }
        self.publish_count();

        // late requests: dropping a pending peer closes its transport
        self.commands_rx.close();
        while let Ok(cmd) = self.commands_rx.try_recv() {
            if let Command::ListPeers(reply) = cmd {
                let _ = reply.send(Vec::new());
            }
        }

        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "peer task ended abnormally");
            }
        }
        info!(peers = count, "hub stopped, all peers disconnected");
    }

    fn publish_count(&self) {
        self.clients_tx.send_replace(self.registry.len());
    }
}

fn encode(envelope: &Envelope) -> Result<Arc<str>, serde_json::Error> {
    serde_json::to_string(envelope).map(Arc::from)
}
