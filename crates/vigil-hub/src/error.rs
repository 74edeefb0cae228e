use thiserror::Error;

/// Failures reported by a peer transport. Always scoped to one peer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("transport I/O error: {0}")]
    Io(String),

    #[error("write timed out after {ms}ms")]
    Timeout { ms: u64 },
}
