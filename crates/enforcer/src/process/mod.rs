#![forbid(unsafe_code)]

mod procfs_source;
mod signal_control;

pub use procfs_source::ProcfsSource;
pub use signal_control::SignalControl;

use crate::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// One live process as seen by a single snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
}

impl ProcessRecord {
    pub fn new(pid: u32, name: impl Into<String>, exe: impl Into<PathBuf>) -> Self {
        let exe = exe.into();
        Self {
            pid,
            name: name.into(),
            exe: (!exe.as_os_str().is_empty()).then_some(exe),
        }
    }

    pub fn without_exe(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            exe: None,
        }
    }

    pub fn exe(&self) -> Option<&Path> {
        self.exe.as_deref()
    }
}

pub trait ProcessSource: Send + Sync {
    /// Enumerate the processes alive right now.
    ///
    /// Processes that exit or become unreadable while the list is being
    /// built are left out; only a failure to enumerate at all is an error.
    fn snapshot(&self) -> Result<Vec<ProcessRecord>, Error>;

    /// PIDs that must outlive any session: the calling process and every
    /// ancestor it was started from (shell, terminal, `sudo`, multiplexer).
    fn protected_pids(&self) -> Result<Vec<u32>, Error> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("no such process")]
    NoSuchProcess,

    #[error("access denied")]
    AccessDenied,

    #[error("{0}")]
    Other(String),
}

pub trait ProcessControl: Send + Sync {
    /// Ask the process to exit.
    fn terminate(&self, pid: u32) -> Result<(), ControlError>;

    /// Block until the process is gone or `timeout` elapses. Returns whether
    /// the process exited.
    fn wait_for_exit(&self, pid: u32, timeout: Duration) -> Result<bool, ControlError>;

    /// Kill the process without giving it a chance to clean up.
    fn kill(&self, pid: u32) -> Result<(), ControlError>;
}

/// Reports what would be terminated without signalling anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunControl;

impl ProcessControl for DryRunControl {
    fn terminate(&self, pid: u32) -> Result<(), ControlError> {
        info!(pid, "dry run: would terminate");
        Ok(())
    }

    fn wait_for_exit(&self, _pid: u32, _timeout: Duration) -> Result<bool, ControlError> {
        Ok(true)
    }

    fn kill(&self, pid: u32) -> Result<(), ControlError> {
        info!(pid, "dry run: would kill");
        Ok(())
    }
}
