//! SQLite-backed store.
//!
//! Records live in a single `kv` table keyed by BLOB. Every session owns its
//! own connection in WAL mode, so readers never block the writer and each
//! worker thread can write through its own handle. Scans page through the
//! table with keyset pagination; no read transaction is held between pages.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cimigrate_error::{MigrateError, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::debug;

use crate::keys::prefix_successor;
use crate::traits::{KvStore, ScanPage, SessionMetrics, StoreSession};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (\
    key BLOB PRIMARY KEY, \
    value BLOB NOT NULL\
) WITHOUT ROWID;";

const GET_SQL: &str = "SELECT value FROM kv WHERE key = ?1";
const UPSERT_SQL: &str =
    "INSERT INTO kv (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value";
const SCAN_SQL: &str = "SELECT key, value FROM kv \
    WHERE key >= ?1 AND (?2 IS NULL OR key > ?2) AND (?3 IS NULL OR key < ?3) \
    ORDER BY key LIMIT ?4";

/// A key-value store in a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteStore {
    /// Open an existing database.
    ///
    /// Fails with [`MigrateError::StoreUnavailable`] if the file does not
    /// exist or cannot be opened. The `kv` table is created if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MigrateError::unavailable(format!(
                "database {} does not exist",
                path.display()
            )));
        }
        let store = Self {
            path: path.to_path_buf(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        };
        store.open_connection(OpenFlags::SQLITE_OPEN_READ_WRITE)?;
        debug!(path = %path.display(), "opened sqlite store");
        Ok(store)
    }

    /// Create (or open) a database, creating the file if needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        };
        store.open_connection(OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE)?;
        debug!(path = %store.path.display(), "created sqlite store");
        Ok(store)
    }

    /// How long a session waits on a locked database before failing.
    #[must_use]
    pub const fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_connection(&self, flags: OpenFlags) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            flags | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| {
            MigrateError::unavailable(format!("cannot open {}: {e}", self.path.display()))
        })?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| MigrateError::unavailable(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| MigrateError::unavailable(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| MigrateError::unavailable(e.to_string()))?;
        Ok(conn)
    }
}

impl KvStore for SqliteStore {
    type Session = SqliteSession;

    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn open_session(&self) -> Result<Self::Session> {
        let conn = self.open_connection(OpenFlags::SQLITE_OPEN_READ_WRITE)?;
        Ok(SqliteSession {
            conn,
            metrics: SessionMetrics::default(),
        })
    }
}

/// A session holding one SQLite connection.
#[derive(Debug)]
pub struct SqliteSession {
    conn: Connection,
    metrics: SessionMetrics,
}

impl StoreSession for SqliteSession {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self
            .conn
            .prepare_cached(GET_SQL)
            .and_then(|mut stmt| {
                stmt.query_row(params![key], |row| row.get::<_, Vec<u8>>(0))
                    .optional()
            })
            .map_err(|e| MigrateError::store("get", e))?;
        self.metrics.record_get(value.as_deref());
        Ok(value)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.conn
            .prepare_cached(UPSERT_SQL)
            .and_then(|mut stmt| stmt.execute(params![key, value]))
            .map_err(|e| MigrateError::store("set", e))?;
        self.metrics.record_set(key, value);
        Ok(())
    }

    fn scan_page(
        &mut self,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<ScanPage> {
        let upper = prefix_successor(prefix);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let page = self
            .conn
            .prepare_cached(SCAN_SQL)
            .and_then(|mut stmt| {
                let rows = stmt.query_map(params![prefix, after, upper.as_deref(), limit], |row| {
                    Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?;
                rows.collect::<rusqlite::Result<ScanPage>>()
            })
            .map_err(|e| MigrateError::store("scan", e))?;
        self.metrics.record_scan(&page);
        Ok(page)
    }

    fn metrics(&self) -> SessionMetrics {
        self.metrics
    }
}
