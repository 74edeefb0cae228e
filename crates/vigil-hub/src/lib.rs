//! `vigil-hub`: real-time fan-out of dashboard envelopes to live clients.
//!
//! # Overview
//!
//! A single control loop ([`Hub::run`]) owns the connection registry. Every
//! operation (register, unregister, broadcast, direct send, peer listing)
//! reaches it as a message, so the registry needs no lock. Each registered
//! peer gets exactly two tasks:
//!
//! | Task   | Owns                           | Exits when                          |
//! |--------|--------------------------------|-------------------------------------|
//! | writer | outbound queue + transport sink | queue closed, write error, removal |
//! | reader | transport stream                | peer close, read error, removal    |
//!
//! Producers call [`HubHandle::broadcast`], which never waits. A peer whose
//! outbound queue is full is dropped rather than slowing anyone else down;
//! on reconnect it receives a fresh snapshot.
//!
//! Liveness is probed on a fixed tick from inside the loop. A probe that cannot
//! be written, or a peer that stays silent past the pong timeout, is removed.

pub mod control;
pub mod error;
pub mod handle;
pub mod peer;
mod reader;
mod registry;
pub mod settings;
pub mod transport;
mod writer;

pub use control::{Departure, Hub};
pub use error::TransportError;
pub use handle::HubHandle;
pub use peer::{Peer, PeerInfo};
pub use settings::HubSettings;
pub use transport::{FrameSink, FrameStream, InboundFrame, OutboundFrame};
