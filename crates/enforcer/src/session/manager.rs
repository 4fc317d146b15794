#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::enforcement::{
    BlockedProcess, EnforcementLoop, Enforcer, EnforcerEvent, EnforcerStatus, RunningApp,
};
use crate::error::Error;
use crate::persistence::{NewSession, SessionStore, SessionUpdate};
use crate::session::{SessionEvent, SessionState, Stopwatch};
use config::Config;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 256;

pub struct Services {
    pub enforcer: Enforcer,
    pub store: Arc<dyn SessionStore>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub name: String,
    pub duration_minutes: u32,
    /// App names and/or executable paths allowed to keep running.
    pub whitelist: Vec<String>,
    pub description: Option<String>,
}

/// Point-in-time view of the current session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub state: SessionState,
    pub duration: Duration,
    pub elapsed: Duration,
    pub remaining: Duration,
    /// 0 to 100.
    pub progress: f64,
    pub apps_blocked: u64,
    pub whitelist: Vec<String>,
    pub notes: Option<String>,
}

pub enum ControlEvent {
    Setup {
        request: SessionRequest,
        reply: oneshot::Sender<Result<i64, Error>>,
    },
    Start {
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Pause {
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Resume {
        reply: oneshot::Sender<Result<(), Error>>,
    },
    End {
        emergency_exit: bool,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    UpdateNotes {
        notes: String,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Info {
        reply: oneshot::Sender<SessionInfo>,
    },
}

/// Cloneable client for a [`SessionManager`] driven by
/// [`SessionManager::run_until`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<ControlEvent>,
}

impl SessionHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ControlEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    async fn request<T>(
        &self,
        event: impl FnOnce(oneshot::Sender<T>) -> ControlEvent,
    ) -> Result<T, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(event(reply)).map_err(|_| Error::RunnerClosed)?;
        rx.await.map_err(|_| Error::RunnerClosed)
    }

    pub async fn setup(&self, request: SessionRequest) -> Result<i64, Error> {
        self.request(|reply| ControlEvent::Setup { request, reply })
            .await?
    }

    pub async fn start(&self) -> Result<(), Error> {
        self.request(|reply| ControlEvent::Start { reply }).await?
    }

    pub async fn pause(&self) -> Result<(), Error> {
        self.request(|reply| ControlEvent::Pause { reply }).await?
    }

    pub async fn resume(&self) -> Result<(), Error> {
        self.request(|reply| ControlEvent::Resume { reply }).await?
    }

    pub async fn end(&self, emergency_exit: bool) -> Result<(), Error> {
        self.request(|reply| ControlEvent::End {
            emergency_exit,
            reply,
        })
        .await?
    }

    pub async fn reset(&self) -> Result<(), Error> {
        self.request(|reply| ControlEvent::Reset { reply }).await
    }

    pub async fn update_notes(&self, notes: impl Into<String>) -> Result<(), Error> {
        let notes = notes.into();
        self.request(|reply| ControlEvent::UpdateNotes { notes, reply })
            .await?
    }

    pub async fn info(&self) -> Result<SessionInfo, Error> {
        self.request(|reply| ControlEvent::Info { reply }).await
    }
}

struct CurrentSession {
    id: i64,
    name: String,
    description: Option<String>,
    duration: Duration,
    whitelist: Vec<String>,
    blocked: u64,
    stopwatch: Stopwatch,
}

/// Drives one focus session at a time through its lifecycle and keeps the
/// enforcement loop in step with it.
///
/// Failed transitions return an error and change nothing. Store failures are
/// additionally broadcast as [`SessionEvent::Error`]. Ending a session always
/// stops enforcement, even when the store cannot record the end.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    enforcement: EnforcementLoop,
    enforcer_rx: mpsc::UnboundedReceiver<EnforcerEvent>,
    events: broadcast::Sender<SessionEvent>,
    update_interval: Duration,
    state: SessionState,
    current: Option<CurrentSession>,
}

impl SessionManager {
    pub fn new(config: &Config, services: Services) -> Self {
        let (enforcement, enforcer_rx) =
            EnforcementLoop::new(services.enforcer, config.enforcement.scan_interval);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store: services.store,
            clock: services.clock,
            enforcement,
            enforcer_rx,
            events,
            update_interval: config.session.update_interval,
            state: SessionState::Idle,
            current: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<i64> {
        self.current.as_ref().map(|current| current.id)
    }

    pub fn blocked_count(&self) -> u64 {
        self.current.as_ref().map_or(0, |current| current.blocked)
    }

    pub fn elapsed(&self) -> Duration {
        let now = self.clock.now();
        self.current
            .as_ref()
            .map_or(Duration::ZERO, |current| current.stopwatch.elapsed(now))
    }

    pub fn remaining(&self) -> Duration {
        self.current.as_ref().map_or(Duration::ZERO, |current| {
            current.duration.saturating_sub(self.elapsed())
        })
    }

    pub fn progress(&self) -> f64 {
        match &self.current {
            Some(current) if !current.duration.is_zero() => {
                (self.elapsed().as_secs_f64() / current.duration.as_secs_f64() * 100.0).min(100.0)
            }
            _ => 0.0,
        }
    }

    pub async fn enforcement_status(&self) -> Result<EnforcerStatus, Error> {
        self.enforcement.status().await
    }

    pub async fn running_apps(&self, include_system: bool) -> Result<Vec<RunningApp>, Error> {
        self.enforcement.running_apps(include_system).await
    }

    /// Record a new session. Only valid while idle.
    #[tracing::instrument(skip_all, fields(name = %request.name))]
    pub async fn setup_session(&mut self, request: SessionRequest) -> Result<i64, Error> {
        if self.state != SessionState::Idle {
            return Err(self.invalid("set up a session"));
        }

        let duration = Duration::from_secs(u64::from(request.duration_minutes) * 60);
        let new = NewSession {
            name: request.name.clone(),
            duration,
            whitelist: request.whitelist.clone(),
            description: request.description.clone(),
        };
        let id = self
            .store
            .create_session(&new)
            .await
            .inspect_err(|err| self.report("could not create session", err))?;

        // Blocks reported after the previous session ended belong to nobody.
        self.discard_enforcer_events();
        self.current = Some(CurrentSession {
            id,
            name: request.name,
            description: request.description,
            duration,
            whitelist: request.whitelist,
            blocked: 0,
            stopwatch: Stopwatch::default(),
        });
        self.set_state(SessionState::Setup);
        info!(id, minutes = request.duration_minutes, "session set up");
        Ok(id)
    }

    /// Close everything not whitelisted and begin enforcing. Only valid after
    /// setup.
    #[tracing::instrument(skip_all)]
    pub async fn start_session(&mut self) -> Result<(), Error> {
        let id = self.require("start a session", &[SessionState::Setup])?;
        let whitelist = self
            .current
            .as_ref()
            .map(|current| current.whitelist.clone())
            .unwrap_or_default();

        let update = SessionUpdate {
            started_at: Some(SystemTime::now()),
            ..SessionUpdate::default()
        };
        self.store
            .update_session(id, &update)
            .await
            .inspect_err(|err| self.report("could not record session start", err))?;

        self.enforcement
            .configure(whitelist)
            .await
            .inspect_err(|err| self.report("could not configure enforcement", err))?;

        match self.enforcement.close_all_non_whitelisted().await {
            Ok(sweep) => {
                info!(closed = sweep.terminated, "closed non-whitelisted apps");
                for process in sweep.blocked {
                    self.on_app_blocked(process).await;
                }
            }
            Err(err) => self.report("could not close non-whitelisted apps", &err),
        }

        self.enforcement
            .start()
            .await
            .inspect_err(|err| self.report("could not start enforcement", err))?;

        let now = self.clock.now();
        if let Some(current) = self.current.as_mut() {
            current.stopwatch.start(now);
        }
        self.set_state(SessionState::Active);
        self.emit(SessionEvent::Started { id });
        info!(id, "session started");
        Ok(())
    }

    /// Recompute the countdown and end the session once it reaches zero.
    /// Does nothing unless the session is active.
    pub async fn tick(&mut self) -> Result<(), Error> {
        if self.state != SessionState::Active {
            return Ok(());
        }

        let elapsed = self.elapsed();
        let remaining = self.remaining();
        self.emit(SessionEvent::Updated { elapsed, remaining });

        if remaining.is_zero() {
            info!("session time is up");
            self.end_session(false).await?;
        }
        Ok(())
    }

    pub async fn pause_session(&mut self) -> Result<(), Error> {
        self.require("pause the session", &[SessionState::Active])?;
        self.enforcement
            .stop()
            .await
            .inspect_err(|err| self.report("could not stop enforcement", err))?;

        let now = self.clock.now();
        if let Some(current) = self.current.as_mut() {
            current.stopwatch.pause(now);
        }
        self.set_state(SessionState::Paused);
        info!("session paused");
        Ok(())
    }

    pub async fn resume_session(&mut self) -> Result<(), Error> {
        self.require("resume the session", &[SessionState::Paused])?;
        self.enforcement
            .start()
            .await
            .inspect_err(|err| self.report("could not start enforcement", err))?;

        let now = self.clock.now();
        if let Some(current) = self.current.as_mut() {
            current.stopwatch.resume(now);
        }
        self.set_state(SessionState::Active);
        info!("session resumed");
        Ok(())
    }

    /// Stop enforcing and record the outcome. Only valid while active or
    /// paused.
    ///
    /// The session is completed even when the store fails; the store error is
    /// returned afterwards.
    #[tracing::instrument(skip(self))]
    pub async fn end_session(&mut self, emergency_exit: bool) -> Result<(), Error> {
        let id = self.require(
            "end the session",
            &[SessionState::Active, SessionState::Paused],
        )?;
        self.set_state(SessionState::Ending);

        if let Err(err) = self.enforcement.stop().await {
            self.report("could not stop enforcement", &err);
        }
        // The last scan may have blocked something before it was stopped.
        self.drain_enforcer_events().await;

        let now = self.clock.now();
        let (elapsed, blocked) = match self.current.as_mut() {
            Some(current) => {
                current.stopwatch.pause(now);
                (current.stopwatch.elapsed(now), current.blocked)
            }
            None => (Duration::ZERO, 0),
        };

        let ended = self.store.end_session(id, elapsed, emergency_exit).await;
        let update = SessionUpdate {
            apps_blocked_count: Some(blocked),
            ..SessionUpdate::default()
        };
        let counted = self.store.update_session(id, &update).await;
        let persisted = ended.and(counted);
        if let Err(err) = &persisted {
            self.report("could not record session end", err);
        }

        self.set_state(SessionState::Completed);
        self.emit(SessionEvent::Ended { id, emergency_exit });
        info!(
            id,
            emergency_exit,
            elapsed_secs = elapsed.as_secs(),
            blocked,
            "session ended"
        );
        persisted
    }

    /// Return to idle, ending a running session as an emergency exit first.
    pub async fn reset(&mut self) {
        if self.state.is_running()
            && let Err(err) = self.end_session(true).await
        {
            warn!(%err, "session end was not fully recorded");
        }

        if let Err(err) = self.enforcement.stop().await {
            self.report("could not stop enforcement", &err);
        }
        self.current = None;
        self.discard_enforcer_events();
        self.set_state(SessionState::Idle);
        debug!("session manager reset");
    }

    pub async fn update_notes(&mut self, notes: String) -> Result<(), Error> {
        let Some(id) = self.session_id() else {
            return Err(self.invalid("update notes"));
        };
        let update = SessionUpdate {
            notes: Some(notes),
            ..SessionUpdate::default()
        };
        self.store
            .update_session(id, &update)
            .await
            .inspect_err(|err| self.report("could not save notes", err))
    }

    pub async fn info(&self) -> SessionInfo {
        let notes = match self.session_id() {
            Some(id) => match self.store.get_session(id).await {
                Ok(record) => record.and_then(|record| record.notes),
                Err(err) => {
                    warn!(%err, "could not read session notes");
                    None
                }
            },
            None => None,
        };

        let current = self.current.as_ref();
        SessionInfo {
            id: current.map(|c| c.id),
            name: current.map(|c| c.name.clone()).unwrap_or_default(),
            description: current.and_then(|c| c.description.clone()),
            state: self.state,
            duration: current.map_or(Duration::ZERO, |c| c.duration),
            elapsed: self.elapsed(),
            remaining: self.remaining(),
            progress: self.progress(),
            apps_blocked: self.blocked_count(),
            whitelist: current.map(|c| c.whitelist.clone()).unwrap_or_default(),
            notes,
        }
    }

    pub async fn handle_enforcer_event(&mut self, event: EnforcerEvent) {
        match event {
            EnforcerEvent::Blocked(process) => self.on_app_blocked(process).await,
            EnforcerEvent::ScanFailed(message) => {
                warn!(%message, "enforcement scan failed");
                self.emit(SessionEvent::Error(format!("scan failed: {message}")));
            }
        }
    }

    /// Serve control requests, enforcement events and the countdown until
    /// `cancel` fires. A running session is ended as an emergency exit on
    /// cancellation so enforcement never outlives its host.
    pub async fn run_until(
        &mut self,
        cancel: CancellationToken,
        mut control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    ) -> Result<(), Error> {
        let mut ticker = time::interval(self.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticking = false;

        loop {
            let active = self.state == SessionState::Active;
            if active && !ticking {
                // First update lands one interval after start or resume.
                ticker.reset();
            }
            ticking = active;

            tokio::select! {
                _ = cancel.cancelled() => {
                    if self.state.is_running() {
                        info!("shutdown requested, ending session");
                        if let Err(err) = self.end_session(true).await {
                            error!(%err, "emergency exit was not fully recorded");
                        }
                    }
                    break;
                }
                Some(event) = control_rx.recv() => {
                    self.handle_control(event).await;
                }
                Some(event) = self.enforcer_rx.recv() => {
                    self.handle_enforcer_event(event).await;
                }
                _ = ticker.tick(), if active => {
                    if let Err(err) = self.tick().await {
                        warn!(%err, "session update failed");
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Setup { request, reply } => {
                let _ = reply.send(self.setup_session(request).await);
            }
            ControlEvent::Start { reply } => {
                let _ = reply.send(self.start_session().await);
            }
            ControlEvent::Pause { reply } => {
                let _ = reply.send(self.pause_session().await);
            }
            ControlEvent::Resume { reply } => {
                let _ = reply.send(self.resume_session().await);
            }
            ControlEvent::End {
                emergency_exit,
                reply,
            } => {
                let _ = reply.send(self.end_session(emergency_exit).await);
            }
            ControlEvent::Reset { reply } => {
                self.reset().await;
                let _ = reply.send(());
            }
            ControlEvent::UpdateNotes { notes, reply } => {
                let _ = reply.send(self.update_notes(notes).await);
            }
            ControlEvent::Info { reply } => {
                let _ = reply.send(self.info().await);
            }
        }
    }

    async fn on_app_blocked(&mut self, process: BlockedProcess) {
        let Some(current) = self.current.as_mut() else {
            debug!(name = %process.name, "block reported outside a session");
            return;
        };
        current.blocked += 1;
        let (id, total) = (current.id, current.blocked);

        if let Err(err) = self
            .store
            .record_blocked_app(id, &process.name, process.exe.as_deref())
            .await
        {
            self.report("could not record blocked app", &err);
        }

        self.emit(SessionEvent::AppBlocked {
            name: process.name.clone(),
            exe: process.exe,
        });
        self.emit(SessionEvent::AppBlockedTotal {
            name: process.name,
            total,
        });
    }

    async fn drain_enforcer_events(&mut self) {
        while let Ok(event) = self.enforcer_rx.try_recv() {
            self.handle_enforcer_event(event).await;
        }
    }

    fn discard_enforcer_events(&mut self) {
        while self.enforcer_rx.try_recv().is_ok() {}
    }

    /// Check the state and return the current session id.
    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<i64, Error> {
        match &self.current {
            Some(current) if allowed.contains(&self.state) => Ok(current.id),
            _ => Err(self.invalid(operation)),
        }
    }

    fn invalid(&self, operation: &'static str) -> Error {
        debug!(operation, state = %self.state, "transition refused");
        Error::InvalidTransition {
            operation,
            state: self.state,
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            self.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn report(&self, context: &str, err: &Error) {
        error!(%err, "{}", context);
        self.emit(SessionEvent::Error(format!("{context}: {err}")));
    }
}
