#![forbid(unsafe_code)]

use crate::error::Error;
use crate::process::{ProcessRecord, ProcessSource};
use procfs::ProcError;
use procfs::process::Process;
use std::path::Path;
use tracing::{trace, warn};

/// Kernel threads carry this flag in `/proc/<pid>/stat`; they are not
/// applications and ignore termination signals anyway.
const PF_KTHREAD: u32 = 0x0020_0000;

/// `comm` is cut to `TASK_COMM_LEN - 1` bytes by the kernel.
const COMM_LEN: usize = 15;

/// Upper bound on the ancestor walk; real process trees are far shallower.
const MAX_ANCESTORS: usize = 128;

/// Enumerates processes through `/proc`.
#[derive(Debug, Default)]
pub struct ProcfsSource;

impl ProcfsSource {
    fn display_name(comm: String, exe: Option<&Path>) -> String {
        if comm.len() < COMM_LEN {
            return comm;
        }
        exe.and_then(Path::file_name)
            .and_then(|name| name.to_str())
            .filter(|name| name.starts_with(&comm))
            .map(str::to_owned)
            .unwrap_or(comm)
    }
}

impl ProcessSource for ProcfsSource {
    fn snapshot(&self) -> Result<Vec<ProcessRecord>, Error> {
        let own_pid = std::process::id();
        let mut records = Vec::new();

        for process in procfs::process::all_processes()? {
            let process = match process {
                Ok(p) => p,
                Err(ProcError::NotFound(_)) => continue,
                Err(err) => {
                    warn!(?err, "failed to read process entry");
                    continue;
                }
            };
            let pid = process.pid as u32;
            if pid == own_pid {
                continue;
            }

            let stat = match process.stat() {
                Ok(stat) => stat,
                Err(ProcError::NotFound(_) | ProcError::PermissionDenied(_)) => continue,
                Err(err) => {
                    warn!(pid, ?err, "failed to read process stat");
                    continue;
                }
            };
            if stat.flags & PF_KTHREAD != 0 {
                continue;
            }

            // Other users' exe links are unreadable without privileges.
            let exe = match process.exe() {
                Ok(path) => Some(path),
                Err(err) => {
                    trace!(pid, ?err, "exe path unavailable");
                    None
                }
            };
            let name = Self::display_name(stat.comm, exe.as_deref());
            records.push(ProcessRecord { pid, name, exe });
        }

        trace!(count = records.len(), "process snapshot collected");
        Ok(records)
    }

    fn protected_pids(&self) -> Result<Vec<u32>, Error> {
        let mut pid = std::process::id() as i32;
        let mut chain = Vec::new();

        while pid > 1 && chain.len() < MAX_ANCESTORS {
            chain.push(pid as u32);
            pid = match Process::new(pid).and_then(|process| process.stat()) {
                Ok(stat) => stat.ppid,
                // An ancestor exited; the ones above it were reparented away.
                Err(ProcError::NotFound(_)) => break,
                Err(err) => return Err(err.into()),
            };
        }

        trace!(?chain, "protected process chain");
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_comm_expands_to_exe_name() {
        let exe = Path::new("/usr/lib/electron/chrome_crashpad_handler");
        let name = ProcfsSource::display_name("chrome_crashpad".into(), Some(exe));
        assert_eq!(name, "chrome_crashpad_handler");
    }

    #[test]
    fn short_comm_is_kept() {
        let exe = Path::new("/usr/bin/python3.12");
        let name = ProcfsSource::display_name("python3".into(), Some(exe));
        assert_eq!(name, "python3");
    }

    #[test]
    fn truncated_comm_without_matching_exe_is_kept() {
        let exe = Path::new("/usr/bin/something-else");
        let name = ProcfsSource::display_name("Web Content 123".into(), Some(exe));
        assert_eq!(name, "Web Content 123");
        let name = ProcfsSource::display_name("Web Content 123".into(), None);
        assert_eq!(name, "Web Content 123");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn protected_chain_reaches_the_parent() {
        let chain = ProcfsSource.protected_pids().unwrap();
        assert_eq!(chain.first(), Some(&std::process::id()));
        let parent = std::os::unix::process::parent_id();
        if parent > 1 {
            assert!(chain.contains(&parent));
        }
        assert!(!chain.contains(&1));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn snapshot_excludes_own_pid() {
        let records = ProcfsSource.snapshot().unwrap();
        let own = std::process::id();
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.pid != own));
    }
}
