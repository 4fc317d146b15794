#![forbid(unsafe_code)]

use crate::error::Error;
use crate::persistence::{
    BlockedAppRecord, NewSession, SessionRecord, SessionStatus, SessionStore, SessionUpdate,
    from_unix_seconds, unix_seconds,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, SystemTime};

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    sessions: BTreeMap<i64, SessionRecord>,
    blocked: BTreeMap<i64, Vec<BlockedAppRecord>>,
}

/// Keeps sessions in process memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

// Timestamps are truncated to whole seconds so records read the same as the
// ones coming back from SQLite.
fn now() -> SystemTime {
    from_unix_seconds(unix_seconds(SystemTime::now()))
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: &NewSession) -> Result<i64, Error> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.sessions.insert(
            id,
            SessionRecord {
                id,
                name: session.name.clone(),
                description: session.description.clone(),
                duration: session.duration,
                whitelist: session.whitelist.clone(),
                created_at: now(),
                started_at: None,
                ended_at: None,
                time_locked_in: None,
                status: SessionStatus::Active,
                apps_blocked_count: 0,
                notes: None,
            },
        );
        Ok(id)
    }

    async fn update_session(&self, id: i64, update: &SessionUpdate) -> Result<(), Error> {
        let mut state = self.state.lock();
        let record = state.sessions.get_mut(&id).ok_or(Error::SessionMissing(id))?;
        if let Some(started_at) = update.started_at {
            record.started_at = Some(from_unix_seconds(unix_seconds(started_at)));
        }
        if let Some(count) = update.apps_blocked_count {
            record.apps_blocked_count = count;
        }
        if let Some(notes) = &update.notes {
            record.notes = Some(notes.clone());
        }
        Ok(())
    }

    async fn end_session(
        &self,
        id: i64,
        time_locked_in: Duration,
        emergency_exit: bool,
    ) -> Result<(), Error> {
        let mut state = self.state.lock();
        let record = state.sessions.get_mut(&id).ok_or(Error::SessionMissing(id))?;
        record.ended_at = Some(now());
        record.time_locked_in = Some(Duration::from_secs(time_locked_in.as_secs()));
        record.status = SessionStatus::from_exit(emergency_exit);
        Ok(())
    }

    async fn record_blocked_app(
        &self,
        id: i64,
        app_name: &str,
        app_path: Option<&Path>,
    ) -> Result<(), Error> {
        let mut state = self.state.lock();
        let record = state.sessions.get_mut(&id).ok_or(Error::SessionMissing(id))?;
        record.apps_blocked_count += 1;

        let apps = state.blocked.entry(id).or_default();
        match apps.iter_mut().find(|app| app.app_name == app_name) {
            Some(app) => {
                app.count += 1;
                app.last_blocked_at = now();
                if app.app_path.is_none() {
                    app.app_path = app_path.map(Path::to_path_buf);
                }
            }
            None => apps.push(BlockedAppRecord {
                app_name: app_name.to_owned(),
                app_path: app_path.map(Path::to_path_buf),
                count: 1,
                last_blocked_at: now(),
            }),
        }
        Ok(())
    }

    async fn get_session(&self, id: i64) -> Result<Option<SessionRecord>, Error> {
        Ok(self.state.lock().sessions.get(&id).cloned())
    }

    async fn blocked_apps(&self, id: i64) -> Result<Vec<BlockedAppRecord>, Error> {
        let mut apps = self
            .state
            .lock()
            .blocked
            .get(&id)
            .cloned()
            .unwrap_or_default();
        apps.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.app_name.cmp(&b.app_name)));
        Ok(apps)
    }

    async fn recent_sessions(&self, limit: u32) -> Result<Vec<SessionRecord>, Error> {
        Ok(self
            .state
            .lock()
            .sessions
            .values()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session(name: &str) -> NewSession {
        NewSession {
            name: name.into(),
            duration: Duration::from_secs(25 * 60),
            whitelist: vec!["code".into()],
            description: None,
        }
    }

    #[tokio::test]
    async fn blocked_apps_are_counted_per_name() {
        let store = MemoryStore::new();
        let id = store.create_session(&new_session("focus")).await.unwrap();

        store
            .record_blocked_app(id, "steam", Some(Path::new("/usr/bin/steam")))
            .await
            .unwrap();
        store.record_blocked_app(id, "discord", None).await.unwrap();
        store.record_blocked_app(id, "steam", None).await.unwrap();

        let apps = store.blocked_apps(id).await.unwrap();
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].app_name, "steam");
        assert_eq!(apps[0].count, 2);
        assert_eq!(apps[0].app_path.as_deref(), Some(Path::new("/usr/bin/steam")));

        let record = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(record.apps_blocked_count, 3);
    }

    #[tokio::test]
    async fn unknown_session_is_reported() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.end_session(7, Duration::ZERO, true).await,
            Err(Error::SessionMissing(7))
        ));
        assert!(store.get_session(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recent_sessions_are_newest_first() {
        let store = MemoryStore::new();
        for name in ["a", "b", "c"] {
            store.create_session(&new_session(name)).await.unwrap();
        }
        let names: Vec<_> = store
            .recent_sessions(2)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["c", "b"]);
    }
}
