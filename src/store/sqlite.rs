use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, Transaction};
use tokio::sync::Mutex;
use tracing::{error, info};

use super::{ConversationStore, StoreError};

const CREATE_CONVERSATIONS: &str = "
    CREATE TABLE IF NOT EXISTS conversations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        log_timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
        message_timestamp TEXT NOT NULL,
        message_text TEXT NOT NULL
    );
";

/// Conversation log in a single SQLite connection
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(classify)?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(classify)?;

        info!("SQLite conversation log opened at: {}", path.display());
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(classify)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }

    #[cfg(test)]
    pub async fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        conn.execute_batch(sql).map_err(classify)
    }

    #[cfg(test)]
    pub async fn query_i64(&self, sql: &str) -> Result<i64, StoreError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        conn.query_row(sql, [], |row| row.get(0)).map_err(classify)
    }
}

/// Run `op` in a transaction: commit on success, roll back on failure.
fn in_transaction<T>(
    conn: &mut Connection,
    op: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
) -> Result<T, StoreError> {
    let tx = conn.transaction().map_err(classify)?;
    match op(&tx) {
        Ok(value) => {
            // A failed commit rolls back when `tx` is dropped.
            tx.commit().map_err(classify)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback() {
                error!("Error during rollback: {}", rb);
            }
            Err(classify(e))
        }
    }
}

fn classify(err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StoreError::Constraint(Box::new(err)),
        Some(
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::FileLockingProtocolFailed,
        ) => StoreError::Connectivity(Box::new(err)),
        _ => StoreError::Statement(Box::new(err)),
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn create_schema(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        in_transaction(conn, |tx| tx.execute_batch(CREATE_CONVERSATIONS))
    }

    async fn insert(
        &self,
        message_timestamp: DateTime<Utc>,
        text: &str,
    ) -> Result<i64, StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        in_transaction(conn, |tx| {
            tx.execute(
                "INSERT INTO conversations (message_timestamp, message_text) VALUES (?1, ?2)",
                rusqlite::params![message_timestamp, text],
            )?;
            Ok(tx.last_insert_rowid())
        })
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))
            .map_err(classify)
    }

    #[cfg(test)]
    async fn recent(
        &self,
        limit: usize,
    ) -> Result<Vec<super::ConversationRecord>, StoreError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, log_timestamp, message_timestamp, message_text
                 FROM conversations
                 ORDER BY id DESC
                 LIMIT ?1",
            )
            .map_err(classify)?;

        let records = stmt
            .query_map(rusqlite::params![limit as i64], |row| {
                Ok(super::ConversationRecord {
                    id: row.get(0)?,
                    log_timestamp: row.get(1)?,
                    message_timestamp: row.get(2)?,
                    message_text: row.get(3)?,
                })
            })
            .map_err(classify)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)?;

        Ok(records)
    }

    async fn close(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await.take().ok_or(StoreError::Closed)?;
        conn.close().map_err(|(_, e)| classify(e))
    }
}
