#![forbid(unsafe_code)]

use crate::session::SessionState;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to read procfs info: {0}")]
    ProcfsReadFailed(#[from] procfs::ProcError),

    #[error("Failed to access file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Session store error: {0}")]
    Store(String),

    #[error("Session {0} does not exist")]
    SessionMissing(i64),

    #[error("Cannot {operation} while the session is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Whitelist cannot change while enforcement is running")]
    EnforcementRunning,

    #[error("Enforcement worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Session runner has shut down")]
    RunnerClosed,
}

impl Error {
    /// Whether the error is a rejected state transition (a caller mistake)
    /// rather than a subsystem fault.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}
