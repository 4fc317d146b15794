#![forbid(unsafe_code)]

use crate::enforcement::{
    BlockedProcess, Enforcer, EnforcerStatus, RunningApp, ScanReport, SweepReport,
};
use crate::error::Error;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcerEvent {
    Blocked(BlockedProcess),
    /// The process list could not be read; enforcement continues next tick.
    ScanFailed(String),
}

struct ScanTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs an [`Enforcer`] off the async executor.
///
/// Every operation takes the same lock on the blocking pool, so configure,
/// start, stop, scans and sweeps never overlap. Periodic scans run on their
/// own task and report through the channel returned by [`EnforcementLoop::new`].
pub struct EnforcementLoop {
    enforcer: Arc<Mutex<Enforcer>>,
    interval: Duration,
    events: mpsc::UnboundedSender<EnforcerEvent>,
    scan_task: Option<ScanTask>,
}

impl EnforcementLoop {
    pub fn new(
        enforcer: Enforcer,
        interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<EnforcerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let this = Self {
            enforcer: Arc::new(Mutex::new(enforcer)),
            interval,
            events,
            scan_task: None,
        };
        (this, events_rx)
    }

    async fn with_enforcer<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Enforcer) -> T + Send + 'static,
        T: Send + 'static,
    {
        let enforcer = self.enforcer.clone();
        Ok(task::spawn_blocking(move || f(&mut *enforcer.lock())).await?)
    }

    pub fn is_running(&self) -> bool {
        self.scan_task.is_some()
    }

    pub async fn configure(&self, apps: Vec<String>) -> Result<(), Error> {
        self.with_enforcer(move |enforcer| enforcer.configure(apps))
            .await?
    }

    pub async fn close_all_non_whitelisted(&self) -> Result<SweepReport, Error> {
        self.with_enforcer(Enforcer::close_all_non_whitelisted)
            .await?
    }

    pub async fn status(&self) -> Result<EnforcerStatus, Error> {
        self.with_enforcer(|enforcer| enforcer.status()).await
    }

    pub async fn running_apps(&self, include_system: bool) -> Result<Vec<RunningApp>, Error> {
        self.with_enforcer(move |enforcer| enforcer.running_apps(include_system))
            .await?
    }

    /// Seed the baseline and begin periodic scanning. No-op when running.
    ///
    /// A failed initial snapshot is reported as [`EnforcerEvent::ScanFailed`];
    /// scanning starts regardless.
    pub async fn start(&mut self) -> Result<(), Error> {
        if self.scan_task.is_some() {
            return Ok(());
        }

        match self.with_enforcer(Enforcer::start).await? {
            Ok(whitelisted) => debug!(whitelisted, "baseline recorded"),
            Err(err) => {
                warn!(%err, "initial scan failed");
                let _ = self.events.send(EnforcerEvent::ScanFailed(err.to_string()));
            }
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scan_loop(
            self.enforcer.clone(),
            self.interval,
            self.events.clone(),
            cancel.clone(),
        ));
        self.scan_task = Some(ScanTask { cancel, handle });
        Ok(())
    }

    /// Stop periodic scanning. A scan already in progress finishes first and
    /// its results are still delivered.
    pub async fn stop(&mut self) -> Result<(), Error> {
        if let Some(ScanTask { cancel, handle }) = self.scan_task.take() {
            cancel.cancel();
            if let Err(err) = handle.await {
                error!(%err, "scan task ended abnormally");
            }
        }
        self.with_enforcer(Enforcer::stop).await
    }
}

impl Drop for EnforcementLoop {
    fn drop(&mut self) {
        if let Some(task) = &self.scan_task {
            task.cancel.cancel();
        }
    }
}

async fn scan_loop(
    enforcer: Arc<Mutex<Enforcer>>,
    period: Duration,
    events: mpsc::UnboundedSender<EnforcerEvent>,
    cancel: CancellationToken,
) {
    // The baseline scan just ran; the first periodic scan is one period out.
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let enforcer = enforcer.clone();
        let result = task::spawn_blocking(move || enforcer.lock().scan()).await;
        match result {
            Ok(Ok(ScanReport { blocked, .. })) => {
                for process in blocked {
                    if events.send(EnforcerEvent::Blocked(process)).is_err() {
                        trace!("event receiver dropped, stopping scans");
                        return;
                    }
                }
            }
            Ok(Err(err)) => {
                warn!(%err, "scan failed");
                let _ = events.send(EnforcerEvent::ScanFailed(err.to_string()));
            }
            Err(err) => {
                error!(%err, "scan worker failed");
                let _ = events.send(EnforcerEvent::ScanFailed(err.to_string()));
            }
        }
    }
}
