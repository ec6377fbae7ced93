/// Shared error type used across all EnvSim crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A payload or query violated a modality rule or request schema.
    #[error("{0}")]
    Validation(String),

    /// Unknown modality, missing event id, empty queue on next/skip.
    #[error("{0}")]
    NotFound(String),

    /// The operation conflicts with current state (past-scheduled event,
    /// backwards time set, cancel of a non-pending event, ...).
    #[error("{0}")]
    Conflict(String),

    /// Undo data no longer matches the state it claims to reverse.
    #[error("inconsistent undo state: {0}")]
    Inconsistent(String),

    /// An outbound call (weather API) failed.
    #[error("external service error: {0}")]
    External(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::Inconsistent(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
