use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionViews {
    pub session_id: String,
    pub views: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database; nothing survives the process.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("storage: open in-memory database")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    /// Adds one view to `session_id` and returns the new total.
    pub fn increment_session_views(&self, session_id: &str) -> Result<u64> {
        if session_id.is_empty() {
            bail!("storage: session id required");
        }
        let now = Utc::now().timestamp();
        let conn = self.conn.lock();
        let views: i64 = conn
            .query_row(
                r#"
INSERT INTO session_views (session_id, views, updated_at)
VALUES (?1, 1, ?2)
ON CONFLICT(session_id) DO UPDATE SET
  views = views + 1,
  updated_at = excluded.updated_at
RETURNING views
"#,
                params![session_id, now],
                |row| row.get(0),
            )
            .context("storage: increment session views")?;
        Ok(views.max(0) as u64)
    }

    pub fn session_views(&self, session_id: &str) -> Result<Option<SessionViews>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT session_id, views, updated_at
FROM session_views
WHERE session_id = ?1
"#,
            params![session_id],
            |row| {
                let views: i64 = row.get(1)?;
                let updated: i64 = row.get(2)?;
                Ok(SessionViews {
                    session_id: row.get(0)?,
                    views: views.max(0) as u64,
                    updated_at: Utc
                        .timestamp_opt(updated, 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                })
            },
        )
        .optional()
        .context("storage: query session views")
    }

    /// Drops sessions not touched since `cutoff`. Returns how many went.
    pub fn prune_sessions(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn
            .execute(
                "DELETE FROM session_views WHERE updated_at < ?1",
                params![cutoff.timestamp()],
            )
            .context("storage: prune sessions")?;
        Ok(removed)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for (idx, sql) in migrations().iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS session_views (
  session_id TEXT PRIMARY KEY,
  views INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_views_updated_at ON session_views(updated_at);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("snapfeed").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_database_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        assert!(path.exists());
        store.close().unwrap();
    }

    #[test]
    fn session_views_count_per_session() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.increment_session_views("s1").unwrap(), 1);
        assert_eq!(store.increment_session_views("s1").unwrap(), 2);
        assert_eq!(store.increment_session_views("s2").unwrap(), 1);
        assert_eq!(store.session_views("s1").unwrap().unwrap().views, 2);
        assert!(store.session_views("missing").unwrap().is_none());
        assert!(store.increment_session_views("").is_err());
    }

    #[test]
    fn reopening_keeps_counts_and_skips_applied_migrations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        store.increment_session_views("s1").unwrap();
        store.close().unwrap();

        let store = Store::open(Options { path: Some(path) }).unwrap();
        assert_eq!(store.increment_session_views("s1").unwrap(), 2);
    }

    #[test]
    fn prune_removes_stale_sessions() {
        let store = Store::open_in_memory().unwrap();
        store.increment_session_views("old").unwrap();
        let removed = store
            .prune_sessions(Utc::now() + chrono::Duration::seconds(60))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.session_views("old").unwrap().is_none());
    }
}
