#![forbid(unsafe_code)]

use crate::process::{ControlError, ProcessControl};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::trace;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Terminates processes with SIGTERM, then SIGKILL.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalControl;

impl SignalControl {
    fn signal(pid: u32, signal: Option<Signal>) -> Result<(), ControlError> {
        let pid = i32::try_from(pid).map_err(|_| ControlError::NoSuchProcess)?;
        kill(Pid::from_raw(pid), signal).map_err(|errno| match errno {
            Errno::ESRCH => ControlError::NoSuchProcess,
            Errno::EPERM => ControlError::AccessDenied,
            other => ControlError::Other(other.desc().to_string()),
        })
    }

    /// A zombie has exited; it just has not been reaped by its parent.
    fn is_zombie(pid: u32) -> bool {
        procfs::process::Process::new(pid as i32)
            .and_then(|p| p.stat())
            .map(|stat| stat.state == 'Z')
            .unwrap_or(false)
    }

    fn is_gone(pid: u32) -> Result<bool, ControlError> {
        match Self::signal(pid, None) {
            Ok(()) => Ok(Self::is_zombie(pid)),
            Err(ControlError::NoSuchProcess) => Ok(true),
            Err(err) => Err(err),
        }
    }
}

impl ProcessControl for SignalControl {
    fn terminate(&self, pid: u32) -> Result<(), ControlError> {
        trace!(pid, "sending SIGTERM");
        Self::signal(pid, Some(Signal::SIGTERM))
    }

    fn wait_for_exit(&self, pid: u32, timeout: Duration) -> Result<bool, ControlError> {
        let deadline = Instant::now() + timeout;
        loop {
            if Self::is_gone(pid)? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn kill(&self, pid: u32) -> Result<(), ControlError> {
        trace!(pid, "sending SIGKILL");
        Self::signal(pid, Some(Signal::SIGKILL))
    }
}
