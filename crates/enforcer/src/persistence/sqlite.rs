#![forbid(unsafe_code)]

use crate::error::Error;
use crate::persistence::{
    BlockedAppRecord, NewSession, SessionRecord, SessionStatus, SessionStore, SessionUpdate,
    from_unix_seconds, unix_seconds,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

const SESSION_COLUMNS: &str = "id, name, description, duration_secs, created_at, started_at, \
     ended_at, time_locked_in_secs, status, apps_blocked_count, notes";

#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a session database file and bring its schema up to date.
    pub async fn new(path: PathBuf) -> Result<Self, Error> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;

        debug!(path = %path.display(), "session database ready");
        Ok(Self { path, pool })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn whitelist(&self, id: i64) -> Result<Vec<String>, Error> {
        let rows = sqlx::query(
            "SELECT entry FROM session_whitelist WHERE session_id = ? ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("entry").map_err(Error::from))
            .collect()
    }

    async fn with_whitelist(&self, row: &SqliteRow) -> Result<SessionRecord, Error> {
        let mut record = session_from_row(row)?;
        record.whitelist = self.whitelist(record.id).await?;
        Ok(record)
    }
}

fn session_from_row(row: &SqliteRow) -> Result<SessionRecord, Error> {
    let status: String = row.try_get("status")?;
    Ok(SessionRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        duration: Duration::from_secs(row.try_get::<i64, _>("duration_secs")?.max(0) as u64),
        whitelist: Vec::new(),
        created_at: from_unix_seconds(row.try_get("created_at")?),
        started_at: row
            .try_get::<Option<i64>, _>("started_at")?
            .map(from_unix_seconds),
        ended_at: row
            .try_get::<Option<i64>, _>("ended_at")?
            .map(from_unix_seconds),
        time_locked_in: row
            .try_get::<Option<i64>, _>("time_locked_in_secs")?
            .map(|secs| Duration::from_secs(secs.max(0) as u64)),
        status: status.parse()?,
        apps_blocked_count: row.try_get::<i64, _>("apps_blocked_count")?.max(0) as u64,
        notes: row.try_get("notes")?,
    })
}

fn missing_if_untouched(rows_affected: u64, id: i64) -> Result<(), Error> {
    if rows_affected == 0 {
        Err(Error::SessionMissing(id))
    } else {
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create_session(&self, session: &NewSession) -> Result<i64, Error> {
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query(
            "INSERT INTO sessions (name, description, duration_secs, created_at, status) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&session.name)
        .bind(&session.description)
        .bind(session.duration.as_secs() as i64)
        .bind(unix_seconds(SystemTime::now()))
        .bind(SessionStatus::Active.as_str())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (position, entry) in session.whitelist.iter().enumerate() {
            sqlx::query(
                "INSERT INTO session_whitelist (session_id, position, entry) VALUES (?, ?, ?)",
            )
            .bind(id)
            .bind(position as i64)
            .bind(entry)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(id, name = %session.name, "session created");
        Ok(id)
    }

    async fn update_session(&self, id: i64, update: &SessionUpdate) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE sessions SET \
             started_at = COALESCE(?, started_at), \
             apps_blocked_count = COALESCE(?, apps_blocked_count), \
             notes = COALESCE(?, notes) \
             WHERE id = ?",
        )
        .bind(update.started_at.map(unix_seconds))
        .bind(update.apps_blocked_count.map(|count| count as i64))
        .bind(&update.notes)
        .bind(id)
        .execute(&self.pool)
        .await?;
        missing_if_untouched(result.rows_affected(), id)
    }

    async fn end_session(
        &self,
        id: i64,
        time_locked_in: Duration,
        emergency_exit: bool,
    ) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE sessions SET ended_at = ?, time_locked_in_secs = ?, status = ? WHERE id = ?",
        )
        .bind(unix_seconds(SystemTime::now()))
        .bind(time_locked_in.as_secs() as i64)
        .bind(SessionStatus::from_exit(emergency_exit).as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        missing_if_untouched(result.rows_affected(), id)?;
        debug!(id, emergency_exit, "session ended");
        Ok(())
    }

    async fn record_blocked_app(
        &self,
        id: i64,
        app_name: &str,
        app_path: Option<&Path>,
    ) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        let result =
            sqlx::query("UPDATE sessions SET apps_blocked_count = apps_blocked_count + 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        missing_if_untouched(result.rows_affected(), id)?;

        sqlx::query(
            "INSERT INTO blocked_apps (session_id, app_name, app_path, blocked_count, last_blocked_at) \
             VALUES (?, ?, ?, 1, ?) \
             ON CONFLICT (session_id, app_name) DO UPDATE SET \
             blocked_count = blocked_count + 1, \
             last_blocked_at = excluded.last_blocked_at, \
             app_path = COALESCE(blocked_apps.app_path, excluded.app_path)",
        )
        .bind(id)
        .bind(app_name)
        .bind(app_path.map(|path| path.to_string_lossy().into_owned()))
        .bind(unix_seconds(SystemTime::now()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_session(&self, id: i64) -> Result<Option<SessionRecord>, Error> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.with_whitelist(&row).await?)),
            None => Ok(None),
        }
    }

    async fn blocked_apps(&self, id: i64) -> Result<Vec<BlockedAppRecord>, Error> {
        let rows = sqlx::query(
            "SELECT app_name, app_path, blocked_count, last_blocked_at FROM blocked_apps \
             WHERE session_id = ? ORDER BY blocked_count DESC, app_name",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut apps = Vec::with_capacity(rows.len());
        for row in rows {
            apps.push(BlockedAppRecord {
                app_name: row.try_get("app_name")?,
                app_path: row
                    .try_get::<Option<String>, _>("app_path")?
                    .map(PathBuf::from),
                count: row.try_get::<i64, _>("blocked_count")?.max(0) as u64,
                last_blocked_at: from_unix_seconds(row.try_get("last_blocked_at")?),
            });
        }
        Ok(apps)
    }

    async fn recent_sessions(&self, limit: u32) -> Result<Vec<SessionRecord>, Error> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC, id DESC LIMIT ?"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            sessions.push(self.with_whitelist(row).await?);
        }
        Ok(sessions)
    }
}
