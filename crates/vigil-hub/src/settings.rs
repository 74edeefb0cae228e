use std::time::Duration;

use tracing::warn;
use vigil_core::config::HubConfig;

/// Runtime knobs for the control loop, derived from [`HubConfig`].
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub probe_interval: Duration,
    /// `None` disables liveness expiry.
    pub pong_timeout: Option<Duration>,
    pub write_timeout: Duration,
    pub broadcast_buffer: usize,
    pub client_buffer: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self::from(&HubConfig::default())
    }
}

impl From<&HubConfig> for HubSettings {
    fn from(cfg: &HubConfig) -> Self {
        let probe_interval = Duration::from_secs(cfg.probe_interval_secs.max(1));
        let pong_timeout = match cfg.pong_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self {
            probe_interval,
            pong_timeout,
            write_timeout: Duration::from_secs(cfg.write_timeout_secs.max(1)),
            broadcast_buffer: cfg.broadcast_buffer.max(1),
            client_buffer: cfg.client_buffer.max(1),
        }
        .normalized()
    }
}

impl HubSettings {
    /// A pong timeout shorter than two probe intervals would expire peers that
    /// never had the chance to answer; stretch it.
    pub fn normalized(mut self) -> Self {
        if let Some(limit) = self.pong_timeout {
            let floor = self.probe_interval * 2;
            if limit < floor {
                warn!(
                    pong_timeout_ms = limit.as_millis() as u64,
                    floor_ms = floor.as_millis() as u64,
                    "pong timeout below two probe intervals, raising it"
                );
                self.pong_timeout = Some(floor);
            }
        }
        self.broadcast_buffer = self.broadcast_buffer.max(1);
        self.client_buffer = self.client_buffer.max(1);
        self
    }
}
