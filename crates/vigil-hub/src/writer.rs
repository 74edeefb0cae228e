use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vigil_core::types::PeerId;

use crate::control::{Command, Departure};
use crate::error::TransportError;
use crate::transport::{FrameSink, OutboundFrame};

/// Sole consumer of one peer's outbound queue and sole writer to its sink.
pub(crate) struct Writer {
    pub id: PeerId,
    pub session: u64,
    pub sink: Box<dyn FrameSink>,
    pub queue: mpsc::Receiver<Arc<str>>,
    pub probes: mpsc::Receiver<()>,
    pub cancel: CancellationToken,
    pub write_timeout: Duration,
    pub control: mpsc::UnboundedSender<Command>,
}

impl Writer {
    pub async fn run(mut self) {
        if let Some(reason) = self.pump().await {
            // a removal already in progress must not be reported twice
            if !self.cancel.is_cancelled() {
                let _ = self.control.send(Command::Unregister {
                    id: self.id.clone(),
                    session: Some(self.session),
                    reason,
                });
            }
        }

        match timeout(self.write_timeout, self.sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(peer_id = %self.id, error = %e, "close frame not delivered"),
            Err(_) => debug!(peer_id = %self.id, "close frame timed out"),
        }
        debug!(peer_id = %self.id, "writer stopped");
    }

    /// Write until the queue closes, the peer is removed, or a write fails.
    async fn pump(&mut self) -> Option<Departure> {
        loop {
            // probes skip ahead of queued envelopes
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                Some(()) = self.probes.recv() => OutboundFrame::Ping,
                msg = self.queue.recv() => match msg {
                    Some(text) => OutboundFrame::Text(text),
                    None => return None,
                },
            };
            let is_probe = matches!(frame, OutboundFrame::Ping);

            let written = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                r = timeout(self.write_timeout, self.sink.send(frame)) => r,
            };
            let err = match written {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(_) => TransportError::Timeout {
                    ms: self.write_timeout.as_millis() as u64,
                },
            };

            let reason = if is_probe {
                Departure::ProbeFailed
            } else {
                Departure::WriteFailed
            };
            warn!(peer_id = %self.id, error = %err, %reason, "write to peer failed");
            return Some(reason);
        }
    }
}
