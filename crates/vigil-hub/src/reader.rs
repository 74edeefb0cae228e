use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vigil_core::types::PeerId;

use crate::control::{Command, Departure};
use crate::peer::Liveness;
use crate::transport::{FrameStream, InboundFrame};

/// Watches one peer's inbound side for pongs and disconnects.
pub(crate) struct Reader {
    pub id: PeerId,
    pub session: u64,
    pub stream: Box<dyn FrameStream>,
    pub liveness: Arc<Liveness>,
    pub cancel: CancellationToken,
    pub control: mpsc::UnboundedSender<Command>,
}

impl Reader {
    pub async fn run(mut self) {
        let departure = loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break None,
                frame = self.stream.recv() => frame,
            };
            match frame {
                Some(Ok(InboundFrame::Pong)) => self.liveness.touch(),
                Some(Ok(InboundFrame::Data)) => {}
                Some(Ok(InboundFrame::Close)) | None => break Some(Departure::PeerClosed),
                Some(Err(e)) => {
                    debug!(peer_id = %self.id, error = %e, "read from peer failed");
                    break Some(Departure::ReadFailed);
                }
            }
        };

        if let Some(reason) = departure {
            if !self.cancel.is_cancelled() {
                let _ = self.control.send(Command::Unregister {
                    id: self.id.clone(),
                    session: Some(self.session),
                    reason,
                });
            }
        }
        debug!(peer_id = %self.id, "reader stopped");
    }
}
