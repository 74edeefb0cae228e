use thiserror::Error;

#[derive(Debug, Error)]
pub enum VigilError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Unknown event type: {0}")]
    UnknownEvent(String),

    #[error("Hub unavailable: {0}")]
    HubUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VigilError {
    /// Short error code string carried in `error` envelopes and HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self {
            VigilError::Config(_) => "CONFIG_ERROR",
            VigilError::AuthFailed(_) => "AUTH_FAILED",
            VigilError::UnknownEvent(_) => "UNKNOWN_EVENT",
            VigilError::HubUnavailable(_) => "HUB_UNAVAILABLE",
            VigilError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, VigilError>;
