//! Dashboard wire protocol: the tagged envelope pushed to every client.

pub mod envelope;

pub use envelope::{
    CanvasUpdate, Envelope, ErrorBody, GpuUpdate, InitialSnapshot, Kind, Payload, SystemStatus,
    TaskUpdate,
};
