use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgConnectOptions, PgConnection, Postgres};
use sqlx::{Connection, Transaction};
use tokio::sync::Mutex;
use tracing::error;

use super::{BoxError, ConversationStore, StoreError};
use crate::config::DatabaseConfig;

const CREATE_CONVERSATIONS: &str = "
    CREATE TABLE IF NOT EXISTS conversations (
        id SERIAL PRIMARY KEY,
        log_timestamp TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP,
        message_timestamp TIMESTAMPTZ NOT NULL,
        message_text TEXT NOT NULL
    )
";

/// Conversation log in a single PostgreSQL connection (no pool)
pub struct PostgresStore {
    conn: Mutex<Option<PgConnection>>,
}

impl PostgresStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let conn = PgConnection::connect_with(&connect_options(config))
            .await
            .map_err(classify)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }
}

/// Blank name, user, or password fall back to libpq defaults.
fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port);
    if !config.name.is_empty() {
        options = options.database(&config.name);
    }
    if !config.user.is_empty() {
        options = options.username(&config.user);
    }
    if !config.password.is_empty() {
        options = options.password(&config.password);
    }
    options
}

async fn finish<T>(
    tx: Transaction<'_, Postgres>,
    outcome: Result<T, sqlx::Error>,
) -> Result<T, StoreError> {
    match outcome {
        Ok(value) => {
            tx.commit().await.map_err(classify)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                error!("Error during rollback: {}", rb);
            }
            Err(classify(e))
        }
    }
}

fn classify(err: sqlx::Error) -> StoreError {
    let wrap: fn(BoxError) -> StoreError = match &err {
        sqlx::Error::Database(db) => {
            let code = db.code();
            let class = code.as_deref().map(|c| c.get(..2).unwrap_or(c));
            if matches!(
                db.kind(),
                ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation
            ) || class == Some("23")
            {
                StoreError::Constraint
            } else if matches!(class, Some("08") | Some("53") | Some("57")) {
                // connection exception, insufficient resources, operator intervention
                StoreError::Connectivity
            } else {
                StoreError::Statement
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Connectivity,
        _ => StoreError::Statement,
    };
    wrap(Box::new(err))
}

#[async_trait]
impl ConversationStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn create_schema(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        let mut tx = conn.begin().await.map_err(classify)?;
        let created = sqlx::query(CREATE_CONVERSATIONS)
            .execute(&mut *tx)
            .await
            .map(|_| ());
        finish(tx, created).await
    }

    async fn insert(
        &self,
        message_timestamp: DateTime<Utc>,
        text: &str,
    ) -> Result<i64, StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        let mut tx = conn.begin().await.map_err(classify)?;
        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO conversations (message_timestamp, message_text)
             VALUES ($1, $2)
             RETURNING id::BIGINT",
        )
        .bind(message_timestamp)
        .bind(text)
        .fetch_one(&mut *tx)
        .await;
        finish(tx, inserted).await
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM conversations")
            .fetch_one(&mut *conn)
            .await
            .map_err(classify)
    }

    #[cfg(test)]
    async fn recent(
        &self,
        limit: usize,
    ) -> Result<Vec<super::ConversationRecord>, StoreError> {
        use sqlx::Row;

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        let rows = sqlx::query(
            "SELECT id::BIGINT AS id, log_timestamp, message_timestamp, message_text
             FROM conversations
             ORDER BY id DESC
             LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await
        .map_err(classify)?;

        rows.iter()
            .map(|row| {
                Ok(super::ConversationRecord {
                    id: row.try_get("id")?,
                    log_timestamp: row.try_get("log_timestamp")?,
                    message_timestamp: row.try_get("message_timestamp")?,
                    message_text: row.try_get("message_text")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(classify)
    }

    async fn close(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await.take().ok_or(StoreError::Closed)?;
        conn.close().await.map_err(classify)
    }
}
