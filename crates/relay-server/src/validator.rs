//! Session validation against the interview-record store.
//!
//! The relay never creates sessions. It only asks whether a session id names
//! an existing interview before admitting a peer.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use r2d2::{ManageConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use relay_core::{RelayError, SessionId};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

/// Answers whether an interview session exists.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// `Ok(false)` for unknown sessions; `Err` when the store cannot answer.
    async fn session_exists(&self, session_id: &SessionId) -> Result<bool, RelayError>;
}

/// In-memory allow-list of session ids.
#[derive(Debug, Default)]
pub struct StaticSessionValidator {
    sessions: RwLock<HashSet<SessionId>>,
}

impl StaticSessionValidator {
    /// Create a validator that knows exactly `sessions`.
    pub fn new<I, S>(sessions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SessionId>,
    {
        Self {
            sessions: RwLock::new(sessions.into_iter().map(Into::into).collect()),
        }
    }

    /// Add a session. Returns `false` if it was already known.
    pub fn insert(&self, session_id: impl Into<SessionId>) -> bool {
        self.sessions.write().insert(session_id.into())
    }

    /// Forget a session. Returns `false` if it was not known.
    pub fn remove(&self, session_id: &SessionId) -> bool {
        self.sessions.write().remove(session_id)
    }
}

#[async_trait]
impl SessionValidator for StaticSessionValidator {
    async fn session_exists(&self, session_id: &SessionId) -> Result<bool, RelayError> {
        Ok(self.sessions.read().contains(session_id))
    }
}

/// Pool settings for [`SqliteSessionValidator`].
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Maximum pooled connections (default: 8).
    pub pool_size: u32,
    /// How long a lookup waits on a locked database, in milliseconds (default: 2000).
    pub busy_timeout_ms: u32,
    /// How long to wait for a free pooled connection (default: 5s).
    pub connection_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            busy_timeout_ms: 2_000,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

/// Applies the busy timeout to each new pooled connection.
#[derive(Debug)]
struct BusyTimeout(Duration);

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for BusyTimeout {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(self.0)
    }
}

/// Looks sessions up in the `interview_sessions` table of a `SQLite` store.
///
/// Connections are opened read-only and pooled, so a slow lookup in one
/// session does not hold up admission in another.
#[derive(Clone)]
pub struct SqliteSessionValidator {
    pool: Pool<SqliteConnectionManager>,
}

const SESSION_EXISTS_SQL: &str = "SELECT 1 FROM interview_sessions WHERE id = ?1 LIMIT 1";

impl SqliteSessionValidator {
    /// Open the store at `path` read-only with default pool settings.
    pub fn open(path: &Path) -> Result<Self, RelayError> {
        Self::open_with(path, &StoreConfig::default())
    }

    /// Open the store at `path` read-only.
    ///
    /// Fails straight away when the file cannot be opened.
    pub fn open_with(path: &Path, config: &StoreConfig) -> Result<Self, RelayError> {
        let open_err =
            |e: String| RelayError::Validator(format!("open {}: {e}", path.display()));
        let manager = SqliteConnectionManager::file(path).with_flags(
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        );
        drop(manager.connect().map_err(|e| open_err(e.to_string()))?);

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.connection_timeout)
            .connection_customizer(Box::new(BusyTimeout(Duration::from_millis(u64::from(
                config.busy_timeout_ms,
            )))))
            .build(manager)
            .map_err(|e| open_err(e.to_string()))?;
        info!(path = %path.display(), pool_size = config.pool_size, "session store opened");
        Ok(Self { pool })
    }
}

impl std::fmt::Debug for SqliteSessionValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.pool.state();
        f.debug_struct("SqliteSessionValidator")
            .field("max_size", &self.pool.max_size())
            .field("connections", &state.connections)
            .field("idle", &state.idle_connections)
            .finish()
    }
}

#[async_trait]
impl SessionValidator for SqliteSessionValidator {
    async fn session_exists(&self, session_id: &SessionId) -> Result<bool, RelayError> {
        let pool = self.pool.clone();
        let id = session_id.as_str().to_owned();
        let found = tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| RelayError::Validator(e.to_string()))?;
            conn.query_row(SESSION_EXISTS_SQL, [&id], |_| Ok(()))
                .optional()
                .map(|row| row.is_some())
                .map_err(|e| RelayError::Validator(e.to_string()))
        })
        .await
        .map_err(|e| RelayError::Validator(e.to_string()))??;
        debug!(session_id = %session_id, found, "session lookup");
        Ok(found)
    }
}
