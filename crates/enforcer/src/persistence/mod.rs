#![forbid(unsafe_code)]

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Error;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Completed,
    EmergencyExit,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::EmergencyExit => "emergency_exit",
        }
    }

    pub fn from_exit(emergency_exit: bool) -> Self {
        if emergency_exit {
            Self::EmergencyExit
        } else {
            Self::Completed
        }
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "emergency_exit" => Ok(Self::EmergencyExit),
            other => Err(Error::Store(format!("unknown session status {other:?}"))),
        }
    }
}

/// What is known about a session when it is set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub name: String,
    pub duration: Duration,
    pub whitelist: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub duration: Duration,
    pub whitelist: Vec<String>,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub ended_at: Option<SystemTime>,
    pub time_locked_in: Option<Duration>,
    pub status: SessionStatus,
    pub apps_blocked_count: u64,
    pub notes: Option<String>,
}

impl SessionRecord {
    pub fn emergency_exit(&self) -> bool {
        self.status == SessionStatus::EmergencyExit
    }
}

/// Fields to overwrite on an existing session. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub started_at: Option<SystemTime>,
    pub apps_blocked_count: Option<u64>,
    pub notes: Option<String>,
}

/// How often one app was blocked during one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedAppRecord {
    pub app_name: String,
    pub app_path: Option<PathBuf>,
    pub count: u64,
    pub last_blocked_at: SystemTime,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session and return its identifier.
    async fn create_session(&self, session: &NewSession) -> Result<i64, Error>;

    async fn update_session(&self, id: i64, update: &SessionUpdate) -> Result<(), Error>;

    /// Mark a session finished, recording how long it actually ran.
    async fn end_session(
        &self,
        id: i64,
        time_locked_in: Duration,
        emergency_exit: bool,
    ) -> Result<(), Error>;

    /// Count one block of `app_name` against the session.
    async fn record_blocked_app(
        &self,
        id: i64,
        app_name: &str,
        app_path: Option<&Path>,
    ) -> Result<(), Error>;

    async fn get_session(&self, id: i64) -> Result<Option<SessionRecord>, Error>;

    /// Blocked apps of a session, most blocked first.
    async fn blocked_apps(&self, id: i64) -> Result<Vec<BlockedAppRecord>, Error>;

    /// Newest sessions first.
    async fn recent_sessions(&self, limit: u32) -> Result<Vec<SessionRecord>, Error>;
}

pub(crate) fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub(crate) fn from_unix_seconds(secs: i64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Completed,
            SessionStatus::EmergencyExit,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("aborted".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn timestamps_truncate_to_seconds() {
        let time = SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000_000_750);
        assert_eq!(
            from_unix_seconds(unix_seconds(time)),
            SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
        );
    }
}
