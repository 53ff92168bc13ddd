use thiserror::Error;

/// Errors surfaced by the stores, the sync loop and the handlers.
///
/// Only `Execution` ends up visible to operators (as a terminal `error:` status);
/// the other kinds are internal and heal on a later cycle.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("no such {kind} {key}")]
    NotFound { kind: &'static str, key: String },
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("{0}")]
    Execution(String),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FleetError {
    pub fn device_not_found(key: impl Into<String>) -> Self {
        FleetError::NotFound { kind: "device", key: key.into() }
    }

    pub fn command_not_found(key: impl Into<String>) -> Self {
        FleetError::NotFound { kind: "command", key: key.into() }
    }

    /// NotFound and transport failures are expected to clear up on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FleetError::NotFound { .. } | FleetError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
