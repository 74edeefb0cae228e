use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use vigil_core::types::{SystemState, TaskStatus};

/// One dashboard event, immutable once built.
///
/// Wire: `{ "type": "task_update", "data": {...}, "timestamp": "2026-01-01T00:00:00Z" }`
///
/// The `type` tag and the `data` shape come from the same [`Payload`] variant,
/// so an envelope can never pair a tag with a foreign body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    payload: Payload,
    timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Stamp a payload with the current time.
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn task_update(data: TaskUpdate) -> Self {
        Self::new(Payload::TaskUpdate(data))
    }

    pub fn gpu_update(data: GpuUpdate) -> Self {
        Self::new(Payload::GpuUpdate(data))
    }

    pub fn canvas_update(data: CanvasUpdate) -> Self {
        Self::new(Payload::CanvasUpdate(data))
    }

    pub fn system_status(data: SystemStatus) -> Self {
        Self::new(Payload::SystemStatus(data))
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Payload::Error(ErrorBody {
            code: code.into(),
            message: message.into(),
        }))
    }

    pub fn ping() -> Self {
        Self::new(Payload::Ping)
    }

    pub fn pong() -> Self {
        Self::new(Payload::Pong)
    }

    pub fn initial(snapshot: InitialSnapshot) -> Self {
        Self::new(Payload::Initial(Box::new(snapshot)))
    }

    pub fn kind(&self) -> Kind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

/// Typed body of an [`Envelope`], tagged by `type` with the body under `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    TaskUpdate(TaskUpdate),
    GpuUpdate(GpuUpdate),
    CanvasUpdate(CanvasUpdate),
    SystemStatus(SystemStatus),
    Error(ErrorBody),
    Ping,
    Pong,
    Initial(Box<InitialSnapshot>),
}

impl Payload {
    pub fn kind(&self) -> Kind {
        match self {
            Payload::TaskUpdate(_) => Kind::TaskUpdate,
            Payload::GpuUpdate(_) => Kind::GpuUpdate,
            Payload::CanvasUpdate(_) => Kind::CanvasUpdate,
            Payload::SystemStatus(_) => Kind::SystemStatus,
            Payload::Error(_) => Kind::Error,
            Payload::Ping => Kind::Ping,
            Payload::Pong => Kind::Pong,
            Payload::Initial(_) => Kind::Initial,
        }
    }
}

/// Fieldless mirror of [`Payload`] for logging and routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    TaskUpdate,
    GpuUpdate,
    CanvasUpdate,
    SystemStatus,
    Error,
    Ping,
    Pong,
    Initial,
}

impl Kind {
    /// Wire tag, identical to the envelope's `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::TaskUpdate => "task_update",
            Kind::GpuUpdate => "gpu_update",
            Kind::CanvasUpdate => "canvas_update",
            Kind::SystemStatus => "system_status",
            Kind::Error => "error",
            Kind::Ping => "ping",
            Kind::Pong => "pong",
            Kind::Initial => "initial",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline task changed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_id: String,
    /// note, pdf, image, ...
    #[serde(default)]
    pub task_type: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canvas_id: Option<String>,
    /// Set once the task finishes. Integer nanoseconds on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "nanos::option")]
    pub duration: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn new(task_id: impl Into<String>, task_type: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: task_type.into(),
            status,
            canvas_id: None,
            duration: None,
            error: None,
        }
    }

    pub fn with_canvas(mut self, canvas_id: impl Into<String>) -> Self {
        self.canvas_id = Some(canvas_id.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Current GPU utilisation sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GpuUpdate {
    /// Percent, 0-100.
    pub utilization: f64,
    /// Celsius.
    pub temperature: f64,
    pub memory_used: u64,
    pub memory_total: u64,
    /// Percent, 0-100.
    pub memory_percent: f64,
}

impl GpuUpdate {
    /// Build a sample, deriving `memory_percent` from the byte counts.
    pub fn from_usage(utilization: f64, temperature: f64, memory_used: u64, memory_total: u64) -> Self {
        let memory_percent = if memory_total == 0 {
            0.0
        } else {
            memory_used as f64 * 100.0 / memory_total as f64
        };
        Self {
            utilization,
            temperature,
            memory_used,
            memory_total,
            memory_percent,
        }
    }
}

/// Reachability of one monitored canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasUpdate {
    pub canvas_id: String,
    pub name: String,
    pub connected: bool,
    #[serde(default)]
    pub widget_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

/// Aggregate health of the whole system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SystemStatus {
    pub status: SystemState,
    /// Integer nanoseconds on the wire.
    #[serde(with = "nanos")]
    pub uptime: Duration,
    pub active_tasks: u32,
    pub total_processed: u64,
    /// Percent of finished tasks that failed, 0-100.
    pub error_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Full dashboard state sent to a client right after it connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InitialSnapshot {
    pub system: SystemStatus,
    /// Absent when no GPU sample has been recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuUpdate>,
    pub canvases: Vec<CanvasUpdate>,
    pub recent_tasks: Vec<TaskUpdate>,
}

/// Durations travel as integer nanoseconds, the encoding existing dashboard
/// clients already parse.
mod nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_nanos)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => super::serialize(d, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(d)?.map(Duration::from_nanos))
        }
    }
}
