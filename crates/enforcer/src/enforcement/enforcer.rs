#![forbid(unsafe_code)]

use crate::error::Error;
use crate::policy::{Verdict, Whitelist, is_system_process};
use crate::process::{ControlError, ProcessControl, ProcessRecord, ProcessSource};
use config::{Enforcement, MatchMode};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// A process that was sent a termination request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedProcess {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
}

impl From<ProcessRecord> for BlockedProcess {
    fn from(record: ProcessRecord) -> Self {
        Self {
            pid: record.pid,
            name: record.name,
            exe: record.exe,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ScanReport {
    pub scanned: usize,
    pub newly_whitelisted: usize,
    pub blocked: Vec<BlockedProcess>,
    /// Tracked PIDs dropped because they were no longer alive.
    pub reaped: usize,
}

#[derive(Debug, Default, Clone)]
pub struct SweepReport {
    pub terminated: usize,
    pub blocked: Vec<BlockedProcess>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnforcerStatus {
    pub running: bool,
    pub known: usize,
    pub whitelisted: usize,
}

/// An entry for an app picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningApp {
    pub name: String,
    pub exe: Option<PathBuf>,
}

/// Tracks which PIDs have been classified and terminates the ones that are
/// not whitelisted.
///
/// A PID is classified once, the first time it is seen, and never again for
/// as long as it stays alive.
pub struct Enforcer {
    whitelist: Whitelist,
    mode: MatchMode,
    always_allow: Vec<String>,
    grace: Duration,
    known: FxHashMap<u32, String>,
    whitelisted: FxHashSet<u32>,
    /// The host process and its ancestors. Never terminated.
    protected: FxHashSet<u32>,
    running: bool,
    source: Box<dyn ProcessSource>,
    control: Box<dyn ProcessControl>,
}

impl Enforcer {
    pub fn new(
        config: &Enforcement,
        source: Box<dyn ProcessSource>,
        control: Box<dyn ProcessControl>,
    ) -> Self {
        Self {
            whitelist: Whitelist::with_options(
                std::iter::empty::<&str>(),
                config.match_mode,
                &config.always_allow,
            ),
            mode: config.match_mode,
            always_allow: config.always_allow.clone(),
            grace: config.termination_grace,
            known: FxHashMap::default(),
            whitelisted: FxHashSet::default(),
            protected: FxHashSet::default(),
            running: false,
            source,
            control,
        }
    }

    /// Replace the whitelist. Refused while running.
    pub fn configure<I, S>(&mut self, apps: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.running {
            return Err(Error::EnforcementRunning);
        }
        self.whitelist = Whitelist::with_options(apps, self.mode, &self.always_allow);
        debug!(entries = self.whitelist.len(), "whitelist configured");
        Ok(())
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_known_pid(&self, pid: u32) -> bool {
        self.known.contains_key(&pid)
    }

    pub fn is_whitelisted_pid(&self, pid: u32) -> bool {
        self.whitelisted.contains(&pid)
    }

    pub fn is_protected_pid(&self, pid: u32) -> bool {
        self.protected.contains(&pid)
    }

    pub fn status(&self) -> EnforcerStatus {
        EnforcerStatus {
            running: self.running,
            known: self.known.len(),
            whitelisted: self.whitelisted.len(),
        }
    }

    /// Begin enforcing. Every process alive now is recorded as known and the
    /// allowed ones are remembered as whitelisted, so processes that were
    /// already running are left alone by later scans.
    ///
    /// Returns the number of whitelisted PIDs. The enforcer is running even
    /// when the initial snapshot fails; the next scan starts from scratch.
    #[tracing::instrument(skip_all)]
    pub fn start(&mut self) -> Result<usize, Error> {
        if self.running {
            return Ok(self.whitelisted.len());
        }
        self.running = true;
        self.known.clear();
        self.whitelisted.clear();
        self.refresh_protected();

        for process in self.source.snapshot()? {
            if self.protected.contains(&process.pid)
                || self.whitelist.is_allowed(&process.name, process.exe())
            {
                self.whitelisted.insert(process.pid);
            }
            self.known.insert(process.pid, process.name);
        }

        info!(
            known = self.known.len(),
            whitelisted = self.whitelisted.len(),
            "enforcement started"
        );
        Ok(self.whitelisted.len())
    }

    pub fn stop(&mut self) {
        if self.running {
            info!("enforcement stopped");
        }
        self.running = false;
        self.known.clear();
    }

    /// One enforcement pass over the live process list.
    #[tracing::instrument(skip_all)]
    pub fn scan(&mut self) -> Result<ScanReport, Error> {
        let mut report = ScanReport::default();
        if !self.running {
            return Ok(report);
        }

        let snapshot = self.source.snapshot()?;
        report.scanned = snapshot.len();
        let live: FxHashSet<u32> = snapshot.iter().map(|p| p.pid).collect();

        for process in snapshot {
            if self.whitelisted.contains(&process.pid) || self.known.contains_key(&process.pid) {
                continue;
            }

            match self.whitelist.decide(&process.name, process.exe()) {
                Verdict::Allow(reason) => {
                    trace!(pid = process.pid, name = %process.name, ?reason, "allowed");
                    self.whitelisted.insert(process.pid);
                    self.known.insert(process.pid, process.name);
                    report.newly_whitelisted += 1;
                }
                Verdict::Block => {
                    if let Some(blocked) = self.block(process) {
                        report.blocked.push(blocked);
                    }
                }
            }
        }

        let before = self.known.len();
        self.known.retain(|pid, _| live.contains(pid));
        self.whitelisted.retain(|pid| live.contains(pid));
        report.reaped = before - self.known.len();

        trace!(
            scanned = report.scanned,
            blocked = report.blocked.len(),
            reaped = report.reaped,
            "scan finished"
        );
        Ok(report)
    }

    /// Terminate every non-whitelisted process right now, without waiting
    /// for any of them to exit. Works whether or not the enforcer is running.
    #[tracing::instrument(skip_all)]
    pub fn close_all_non_whitelisted(&mut self) -> Result<SweepReport, Error> {
        let mut report = SweepReport::default();
        self.refresh_protected();

        for process in self.source.snapshot()? {
            if self.protected.contains(&process.pid)
                || self.whitelist.is_allowed(&process.name, process.exe())
            {
                self.whitelisted.insert(process.pid);
                continue;
            }

            match self.control.terminate(process.pid) {
                Ok(()) => {
                    info!(pid = process.pid, name = %process.name, "closed process");
                    report.terminated += 1;
                    report.blocked.push(process.into());
                }
                Err(err) => {
                    debug!(pid = process.pid, name = %process.name, %err, "could not close process");
                }
            }
        }

        Ok(report)
    }

    /// Distinct apps currently running, sorted by name. OS processes are
    /// hidden unless `include_system` is set.
    pub fn running_apps(&self, include_system: bool) -> Result<Vec<RunningApp>, Error> {
        let mut seen = FxHashSet::default();
        let mut apps = Vec::new();

        for process in self.source.snapshot()? {
            if process.name.is_empty() || !seen.insert(process.name.to_lowercase()) {
                continue;
            }
            if !include_system && is_system_process(&process.name, process.exe()) {
                continue;
            }
            apps.push(RunningApp {
                name: process.name,
                exe: process.exe,
            });
        }

        apps.sort_by_cached_key(|app| app.name.to_lowercase());
        Ok(apps)
    }

    /// Re-read the host's ancestor chain. On failure the previous chain is
    /// kept.
    fn refresh_protected(&mut self) {
        match self.source.protected_pids() {
            Ok(pids) => self.protected = pids.into_iter().collect(),
            Err(err) => warn!(%err, "could not read the host process chain"),
        }
    }

    fn block(&mut self, process: ProcessRecord) -> Option<BlockedProcess> {
        let pid = process.pid;
        if self.protected.contains(&pid) {
            self.whitelisted.insert(pid);
            self.known.insert(pid, process.name);
            return None;
        }

        // The verdict came from this same whitelist, but never kill on a
        // stale decision.
        if self.whitelist.is_allowed(&process.name, process.exe()) {
            return None;
        }

        match self.control.terminate(pid) {
            Ok(()) => {}
            Err(ControlError::NoSuchProcess) => {
                self.known.insert(pid, process.name);
                return None;
            }
            Err(err) => {
                debug!(pid, name = %process.name, %err, "termination refused");
                self.known.insert(pid, process.name);
                return None;
            }
        }

        let exited = match self.control.wait_for_exit(pid, self.grace) {
            Ok(exited) => exited,
            Err(err) => {
                trace!(pid, %err, "wait for exit failed");
                false
            }
        };
        if !exited {
            match self.control.kill(pid) {
                Ok(()) | Err(ControlError::NoSuchProcess) => {}
                Err(err) => warn!(pid, name = %process.name, %err, "force kill failed"),
            }
        }

        info!(pid, name = %process.name, exe = ?process.exe, "blocked process");
        self.known.insert(pid, process.name.clone());
        Some(process.into())
    }
}
