//! SQLite backend for the `lastmile` durable retry queue.
//!
//! One table, `failed_events`, keyed by record id, with an ordering index on `enqueued_at`
//! (`timestamp`) and one on `attempt_count` (`retryCount`). The schema version lives in
//! `PRAGMA user_version`; upgrades only ever add.
//!
//! Every [`QueueBackend`] call runs as one SQLite transaction on the blocking pool, so the async
//! runtime never waits on disk I/O.

use async_trait::async_trait;
use lastmile::error::StoreError;
use lastmile::store::{QueueBackend, StoredRecord, COLLECTION_NAME, SCHEMA_VERSION, STORE_NAME};
use lastmile::Event;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    r#"
    CREATE TABLE IF NOT EXISTS failed_events (
        id              TEXT PRIMARY KEY NOT NULL,
        event           TEXT NOT NULL,
        enqueued_at     INTEGER NOT NULL,
        attempt_count   INTEGER NOT NULL DEFAULT 0,
        last_attempt_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS "timestamp" ON failed_events (enqueued_at);
    CREATE INDEX IF NOT EXISTS "retryCount" ON failed_events (attempt_count);
    "#,
)];

/// Durable queue backed by a single SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteBackend {
    /// Open (creating if needed) the database at `path` and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| classify(&e))?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| classify(&e))?;
        tracing::trace!(journal_mode = %mode, "journal mode set");
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open `analytics_events_db.sqlite3` inside `dir`.
    pub fn open_in(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open(dir.as_ref().join(format!("{}.sqlite3", STORE_NAME)))
    }

    /// Private database that vanishes with the process.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| classify(&e))?;
        Self::init(conn, None)
    }

    /// Database file, or `None` for an in-memory database.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<u32, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        current_version(&conn)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        run_migrations(&conn)?;
        tracing::debug!(store = STORE_NAME, collection = COLLECTION_NAME, ?path, "durable store opened");
        Ok(Self { conn: Arc::new(Mutex::new(conn)), path })
    }

    async fn with_tx<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let tx = conn.transaction().map_err(|e| classify(&e))?;
            let value = op(&tx)?;
            tx.commit().map_err(|e| classify(&e))?;
            Ok(value)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {}", e)))?
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    let current = current_version(conn)?;
    for (version, sql) in MIGRATIONS {
        if current < *version {
            conn.execute_batch(sql).map_err(|e| classify(&e))?;
            conn.pragma_update(None, "user_version", version).map_err(|e| classify(&e))?;
            tracing::info!(version = version, "applied migration");
        }
    }
    if current > SCHEMA_VERSION {
        tracing::warn!(current, known = SCHEMA_VERSION, "durable store written by a newer schema");
    }
    Ok(())
}

fn current_version(conn: &Connection) -> Result<u32, StoreError> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0)).map_err(|e| classify(&e))
}

fn classify(error: &rusqlite::Error) -> StoreError {
    match error.sqlite_error_code() {
        Some(ErrorCode::DiskFull) => StoreError::QuotaExceeded,
        Some(ErrorCode::CannotOpen | ErrorCode::PermissionDenied | ErrorCode::ReadOnly) => {
            StoreError::Unavailable(error.to_string())
        }
        Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase) => {
            StoreError::Corrupt(error.to_string())
        }
        _ => StoreError::Backend(error.to_string()),
    }
}

fn count_rows(tx: &Transaction<'_>) -> Result<usize, StoreError> {
    let count: i64 = tx
        .query_row("SELECT COUNT(*) FROM failed_events", [], |row| row.get(0))
        .map_err(|e| classify(&e))?;
    Ok(usize::try_from(count).unwrap_or(0))
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl QueueBackend for SqliteBackend {
    async fn insert_capped(
        &self,
        record: StoredRecord,
        max_records: usize,
    ) -> Result<usize, StoreError> {
        let payload = serde_json::to_string(&record.event)
            .map_err(|e| StoreError::Backend(format!("encode event: {}", e)))?;
        self.with_tx(move |tx| {
            let count = count_rows(tx)?;
            let overflow = (count + 1).saturating_sub(max_records);
            let evicted = if overflow > 0 {
                tx.execute(
                    "DELETE FROM failed_events WHERE id IN (
                         SELECT id FROM failed_events ORDER BY enqueued_at, rowid LIMIT ?1
                     )",
                    params![to_sql_int(overflow as u64)],
                )
                .map_err(|e| classify(&e))?
            } else {
                0
            };
            tx.execute(
                "INSERT INTO failed_events (id, event, enqueued_at, attempt_count, last_attempt_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    payload,
                    to_sql_int(record.enqueued_at),
                    record.attempt_count,
                    record.last_attempt_at.map(to_sql_int),
                ],
            )
            .map_err(|e| classify(&e))?;
            Ok(evicted)
        })
        .await
    }

    async fn list_eligible(
        &self,
        limit: usize,
        max_retries: u32,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        self.with_tx(move |tx| {
            let rows: Vec<(String, String, i64, u32, Option<i64>)> = {
                let mut stmt = tx
                    .prepare(
                        "SELECT id, event, enqueued_at, attempt_count, last_attempt_at
                         FROM failed_events
                         WHERE attempt_count < ?1
                         ORDER BY enqueued_at, rowid
                         LIMIT ?2",
                    )
                    .map_err(|e| classify(&e))?;
                let mapped = stmt
                    .query_map(params![max_retries, to_sql_int(limit as u64)], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                    })
                    .map_err(|e| classify(&e))?;
                mapped.collect::<Result<_, _>>().map_err(|e| classify(&e))?
            };

            let mut records = Vec::with_capacity(rows.len());
            for (id, payload, enqueued_at, attempt_count, last_attempt_at) in rows {
                match serde_json::from_str::<Event>(&payload) {
                    Ok(event) => records.push(StoredRecord {
                        id,
                        event,
                        enqueued_at: u64::try_from(enqueued_at).unwrap_or(0),
                        attempt_count,
                        last_attempt_at: last_attempt_at.and_then(|t| u64::try_from(t).ok()),
                    }),
                    Err(error) => {
                        tracing::warn!(record_id = %id, %error, "dropping undecodable record");
                        tx.execute("DELETE FROM failed_events WHERE id = ?1", params![id])
                            .map_err(|e| classify(&e))?;
                    }
                }
            }
            Ok(records)
        })
        .await
    }

    async fn increment_attempt(
        &self,
        id: &str,
        attempted_at: u64,
        max_retries: u32,
    ) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.with_tx(move |tx| {
            let current: Option<u32> = tx
                .query_row(
                    "SELECT attempt_count FROM failed_events WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| classify(&e))?;
            let Some(current) = current else {
                return Ok(false);
            };
            let next = current.saturating_add(1).min(max_retries);
            tx.execute(
                "UPDATE failed_events SET attempt_count = ?1, last_attempt_at = ?2 WHERE id = ?3",
                params![next, to_sql_int(attempted_at), id],
            )
            .map_err(|e| classify(&e))?;
            Ok(true)
        })
        .await
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.with_tx(move |tx| {
            let removed = tx
                .execute("DELETE FROM failed_events WHERE id = ?1", params![id])
                .map_err(|e| classify(&e))?;
            Ok(removed > 0)
        })
        .await
    }

    async fn remove_exhausted(&self, max_retries: u32) -> Result<usize, StoreError> {
        self.with_tx(move |tx| {
            tx.execute("DELETE FROM failed_events WHERE attempt_count >= ?1", params![max_retries])
                .map_err(|e| classify(&e))
        })
        .await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.with_tx(count_rows).await
    }
}
