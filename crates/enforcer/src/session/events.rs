#![forbid(unsafe_code)]

use crate::session::SessionState;
use std::path::PathBuf;
use std::time::Duration;

/// Notifications for whatever is presenting the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started {
        id: i64,
    },
    Updated {
        elapsed: Duration,
        remaining: Duration,
    },
    Ended {
        id: i64,
        emergency_exit: bool,
    },
    AppBlocked {
        name: String,
        exe: Option<PathBuf>,
    },
    /// Emitted after every block with the session's running total.
    AppBlockedTotal {
        name: String,
        total: u64,
    },
    StateChanged(SessionState),
    Error(String),
}
