//! Canvas reachability monitor.
//!
//! Polls every configured target on a fixed interval. Only a change of a
//! canvas's connected flag is published: the store is updated, then a
//! `canvas_update` and a fresh `system_status` are broadcast, in that order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_core::config::{MonitorConfig, TargetConfig};
use vigil_hub::HubHandle;
use vigil_protocol::{CanvasUpdate, Envelope};

use crate::store::DashboardStore;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("unhealthy status {0}")]
    Status(u16),
}

/// One reachability check against a monitored target.
#[async_trait]
pub trait TargetProbe: Send + Sync {
    async fn check(&self, target: &TargetConfig) -> Result<(), ProbeError>;
}

/// GET the target URL; any 2xx counts as connected.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vigil-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TargetProbe for HttpProbe {
    async fn check(&self, target: &TargetConfig) -> Result<(), ProbeError> {
        let resp = self
            .client
            .get(&target.url)
            .send()
            .await
            .map_err(|e| ProbeError::Unreachable(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(status.as_u16()))
        }
    }
}

pub struct HealthMonitor {
    targets: Vec<TargetConfig>,
    interval: Duration,
    probe: Arc<dyn TargetProbe>,
    store: Arc<DashboardStore>,
    hub: HubHandle,
}

impl HealthMonitor {
    /// Every target starts out disconnected until its first successful check.
    pub fn new(
        cfg: &MonitorConfig,
        probe: Arc<dyn TargetProbe>,
        store: Arc<DashboardStore>,
        hub: HubHandle,
    ) -> Self {
        for target in &cfg.targets {
            store.set_canvas_connected(&target.id, target.display_name(), false);
        }
        Self {
            targets: cfg.targets.clone(),
            interval: Duration::from_secs(cfg.interval_secs.max(1)),
            probe,
            store,
            hub,
        }
    }

    /// Check immediately, then on every interval until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            targets = self.targets.len(),
            interval_secs = self.interval.as_secs(),
            "health monitor started"
        );
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    self.check_all().await;
                }
            }
        }
        info!("health monitor stopped");
    }

    /// One pass over all targets. Returns the canvases whose flag changed.
    pub async fn check_all(&self) -> Vec<CanvasUpdate> {
        let results = join_all(self.targets.iter().map(|t| self.probe.check(t))).await;

        let mut changed = Vec::new();
        for (target, result) in self.targets.iter().zip(results) {
            let connected = result.is_ok();
            let previous = self.store.canvas(&target.id).map(|c| c.connected);
            if previous == Some(connected) {
                debug!(canvas_id = %target.id, connected, "canvas unchanged");
                continue;
            }

            match &result {
                Ok(()) => info!(canvas_id = %target.id, "canvas connected"),
                Err(e) => warn!(canvas_id = %target.id, url = %target.url, error = %e, "canvas disconnected"),
            }
            let mut update = self
                .store
                .set_canvas_connected(&target.id, target.display_name(), connected);
            if connected {
                update.last_activity = Some(Utc::now());
            }
            self.hub.broadcast(Envelope::canvas_update(update.clone()));
            self.hub.broadcast(Envelope::system_status(self.store.system_status()));
            changed.push(update);
        }
        changed
    }
}
