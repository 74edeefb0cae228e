use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vigil_core::types::PeerId;
use vigil_protocol::Envelope;

use crate::control::{Command, Departure};
use crate::peer::{Peer, PeerInfo};

/// Cloneable entry point into a running [`Hub`](crate::Hub).
///
/// No method waits on the control loop except [`HubHandle::peers`], which
/// asks it a question.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<Command>,
    broadcasts: mpsc::Sender<Envelope>,
    clients: watch::Receiver<usize>,
    shutdown: CancellationToken,
}

impl HubHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        broadcasts: mpsc::Sender<Envelope>,
        clients: watch::Receiver<usize>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            commands,
            broadcasts,
            clients,
            shutdown,
        }
    }

    /// Hand a connection to the hub. If the hub has stopped, the peer is
    /// dropped and its transport closes.
    pub fn register(&self, peer: Peer) {
        self.submit(Command::Register {
            peer,
            greeting: None,
        });
    }

    /// Register and queue the envelope built by `greeting` ahead of any
    /// broadcast, typically the `initial` snapshot. `greeting` runs when the
    /// hub processes the registration, not when this is called.
    pub fn register_with_greeting<F>(&self, peer: Peer, greeting: F)
    where
        F: FnOnce() -> Envelope + Send + 'static,
    {
        self.submit(Command::Register {
            peer,
            greeting: Some(Box::new(greeting)),
        });
    }

    /// Remove a peer. Unknown or already removed ids are ignored.
    pub fn unregister(&self, id: &PeerId) {
        self.submit(Command::Unregister {
            id: id.clone(),
            session: None,
            reason: Departure::Requested,
        });
    }

    /// Fan `envelope` out to every registered peer.
    ///
    /// Never waits. Returns `false` when the envelope was shed because the
    /// hub inbox is full or the hub has stopped.
    pub fn broadcast(&self, envelope: Envelope) -> bool {
        match self.broadcasts.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(envelope)) => {
                warn!(kind = %envelope.kind(), "broadcast buffer full, dropping message");
                false
            }
            Err(TrySendError::Closed(envelope)) => {
                debug!(kind = %envelope.kind(), "hub stopped, dropping message");
                false
            }
        }
    }

    /// Queue `envelope` for a single peer, with the same overflow policy as
    /// [`broadcast`](Self::broadcast).
    pub fn send_to(&self, id: &PeerId, envelope: Envelope) {
        self.submit(Command::SendTo {
            id: id.clone(),
            envelope,
        });
    }

    /// Snapshot of registered peers, oldest first. Empty once the hub stopped.
    pub async fn peers(&self) -> Vec<PeerInfo> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::ListPeers(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Number of registered peers as of the last registry change.
    pub fn client_count(&self) -> usize {
        *self.clients.borrow()
    }

    /// Receiver that observes every change of the client count.
    pub fn watch_clients(&self) -> watch::Receiver<usize> {
        self.clients.clone()
    }

    /// Ask the hub to disconnect everyone and stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed() && !self.shutdown.is_cancelled()
    }

    fn submit(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            debug!("hub stopped, request dropped");
        }
    }
}
