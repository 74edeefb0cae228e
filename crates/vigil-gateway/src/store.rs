//! In-memory dashboard state, the source of every `initial` snapshot.
//!
//! `DashboardStore` folds each published payload into the latest system,
//! GPU, and per-canvas view plus a bounded ring of recent tasks. Nothing is
//! persisted; a restart begins from an empty dashboard.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use dashmap::DashMap;
use vigil_core::config::DashboardConfig;
use vigil_core::types::{SystemState, TaskStatus};
use vigil_protocol::{CanvasUpdate, GpuUpdate, InitialSnapshot, Payload, SystemStatus, TaskUpdate};

pub struct DashboardStore {
    started_at: Instant,
    version: Option<String>,
    capacity: usize,
    canvases: DashMap<String, CanvasUpdate>,
    /// Tasks still processing, keyed by task id.
    active: DashMap<String, TaskUpdate>,
    /// Newest at the back.
    recent: Mutex<VecDeque<TaskUpdate>>,
    gpu: Mutex<Option<GpuUpdate>>,
    /// Last state a producer reported explicitly; overrides the derived one.
    reported: Mutex<Option<SystemState>>,
    finished: AtomicU64,
    failed: AtomicU64,
}

impl DashboardStore {
    pub fn new(cfg: &DashboardConfig) -> Self {
        let capacity = cfg.recent_tasks.max(1);
        Self {
            started_at: Instant::now(),
            version: cfg
                .version
                .clone()
                .or_else(|| Some(env!("CARGO_PKG_VERSION").to_string())),
            capacity,
            canvases: DashMap::new(),
            active: DashMap::new(),
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            gpu: Mutex::new(None),
            reported: Mutex::new(None),
            finished: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Fold one payload into the dashboard. Returns false for kinds that carry
    /// no dashboard state (ping, pong, error, initial).
    pub fn apply(&self, payload: &Payload) -> bool {
        match payload {
            Payload::TaskUpdate(task) => self.record_task(task),
            Payload::GpuUpdate(gpu) => *lock(&self.gpu) = Some(gpu.clone()),
            Payload::CanvasUpdate(canvas) => {
                self.canvases.insert(canvas.canvas_id.clone(), canvas.clone());
            }
            Payload::SystemStatus(status) => *lock(&self.reported) = Some(status.status),
            Payload::Error(_) | Payload::Ping | Payload::Pong | Payload::Initial(_) => {
                return false
            }
        }
        true
    }

    fn record_task(&self, task: &TaskUpdate) {
        if task.status.is_terminal() {
            // a task reported finished twice only counts once
            if self.active.remove(&task.task_id).is_some() || !self.seen(&task.task_id) {
                self.finished.fetch_add(1, Ordering::Relaxed);
                if task.status == TaskStatus::Error {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        } else {
            self.active.insert(task.task_id.clone(), task.clone());
        }

        let mut recent = lock(&self.recent);
        recent.retain(|t| t.task_id != task.task_id);
        recent.push_back(task.clone());
        while recent.len() > self.capacity {
            recent.pop_front();
        }
    }

    fn seen(&self, task_id: &str) -> bool {
        lock(&self.recent).iter().any(|t| t.task_id == task_id)
    }

    /// Seed or replace one canvas entry, keeping fields the caller does not
    /// know about (widget count, last activity).
    pub fn set_canvas_connected(&self, canvas_id: &str, name: &str, connected: bool) -> CanvasUpdate {
        let mut entry = self
            .canvases
            .entry(canvas_id.to_string())
            .or_insert_with(|| CanvasUpdate {
                canvas_id: canvas_id.to_string(),
                name: name.to_string(),
                connected,
                widget_count: 0,
                last_activity: None,
            });
        entry.name = name.to_string();
        entry.connected = connected;
        entry.clone()
    }

    pub fn canvas(&self, canvas_id: &str) -> Option<CanvasUpdate> {
        self.canvases.get(canvas_id).map(|c| c.clone())
    }

    /// Sorted by canvas id.
    pub fn canvases(&self) -> Vec<CanvasUpdate> {
        let mut all: Vec<CanvasUpdate> = self.canvases.iter().map(|c| c.value().clone()).collect();
        all.sort_by(|a, b| a.canvas_id.cmp(&b.canvas_id));
        all
    }

    /// Newest first.
    pub fn recent_tasks(&self) -> Vec<TaskUpdate> {
        lock(&self.recent).iter().rev().cloned().collect()
    }

    pub fn gpu(&self) -> Option<GpuUpdate> {
        lock(&self.gpu).clone()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Aggregate status. A state reported by a producer wins; otherwise any
    /// disconnected canvas makes the system degraded.
    pub fn system_status(&self) -> SystemStatus {
        let finished = self.finished.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let error_rate = if finished == 0 {
            0.0
        } else {
            failed as f64 * 100.0 / finished as f64
        };

        let status = (*lock(&self.reported)).unwrap_or_else(|| {
            if self.canvases.iter().any(|c| !c.connected) {
                SystemState::Degraded
            } else {
                SystemState::Running
            }
        });

        SystemStatus {
            status,
            uptime: self.started_at.elapsed(),
            active_tasks: self.active.len() as u32,
            total_processed: finished,
            error_rate,
            version: self.version.clone(),
        }
    }

    pub fn snapshot(&self) -> InitialSnapshot {
        InitialSnapshot {
            system: self.system_status(),
            gpu: self.gpu(),
            canvases: self.canvases(),
            recent_tasks: self.recent_tasks(),
        }
    }
}

/// Poisoned locks still hold usable dashboard data.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
