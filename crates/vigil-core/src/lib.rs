//! Shared building blocks for the Vigil dashboard backend: configuration,
//! the error taxonomy, and small identifier/status types used on the wire.

pub mod config;
pub mod error;
pub mod types;

pub use config::VigilConfig;
pub use error::{Result, VigilError};
pub use types::{PeerId, SystemState, TaskStatus};
