pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info};

use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::store::postgres::PostgresStore;
use crate::store::sqlite::SqliteStore;

/// Number of characters of message text echoed into the log after a save.
pub const PREVIEW_CHARS: usize = 50;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connection not available")]
    Unavailable,
    #[error("database connection already closed")]
    Closed,
    #[error("database connectivity failure: {0}")]
    Connectivity(#[source] BoxError),
    #[error("rejected by database constraint: {0}")]
    Constraint(#[source] BoxError),
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),
    #[error("database statement failed: {0}")]
    Statement(#[source] BoxError),
}

impl StoreError {
    /// Whether repeating the same operation could succeed without any change
    /// to its input.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connectivity(_))
    }
}

/// One logged text message as stored in the `conversations` table.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRecord {
    pub id: i64,
    pub log_timestamp: Option<DateTime<Utc>>,
    pub message_timestamp: DateTime<Utc>,
    pub message_text: String,
}

/// A single database connection holding the conversation log.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Backend name for log lines.
    fn backend(&self) -> &'static str;

    /// Create the `conversations` table if it is absent, in one transaction.
    async fn create_schema(&self) -> Result<(), StoreError>;

    /// Insert one row in its own transaction and return the assigned id.
    async fn insert(&self, message_timestamp: DateTime<Utc>, text: &str)
        -> Result<i64, StoreError>;

    async fn count(&self) -> Result<i64, StoreError>;

    /// Most recent records first.
    #[cfg(test)]
    async fn recent(&self, limit: usize) -> Result<Vec<ConversationRecord>, StoreError>;

    async fn close(&self) -> Result<(), StoreError>;
}

/// Open the configured backend. Failures are logged and reported as `None`.
pub async fn connect(config: &DatabaseConfig) -> Option<Arc<dyn ConversationStore>> {
    let opened: Result<Arc<dyn ConversationStore>, StoreError> = match config.backend {
        DatabaseBackend::Postgres => PostgresStore::connect(config)
            .await
            .map(|store| Arc::new(store) as Arc<dyn ConversationStore>),
        DatabaseBackend::Sqlite => SqliteStore::open(&config.path)
            .map(|store| Arc::new(store) as Arc<dyn ConversationStore>),
    };

    match opened {
        Ok(store) => {
            info!("Successfully connected to {} database at {}", store.backend(), config);
            Some(store)
        }
        Err(e) => {
            error!("Error connecting to {} database at {}: {}", config.backend, config, e);
            None
        }
    }
}

/// Create the conversations table if needed. Returns whether the table is
/// ready; failures are logged here and never propagated.
pub async fn ensure_schema(store: Option<&dyn ConversationStore>) -> bool {
    let Some(store) = store else {
        error!("Database connection not available for DB initialization.");
        return false;
    };

    match store.create_schema().await {
        Ok(()) => {
            info!("Table 'conversations' initialized successfully (created if not exists).");
            true
        }
        Err(e) => {
            error!("Error initializing database table: {}", e);
            false
        }
    }
}

/// Persist one message. Every failure is logged before it is returned, so
/// callers may discard the error.
pub async fn save(
    store: Option<&dyn ConversationStore>,
    message_timestamp: DateTime<Utc>,
    text: &str,
) -> Result<i64, StoreError> {
    let Some(store) = store else {
        error!("Database connection not available. Cannot save message.");
        return Err(StoreError::Unavailable);
    };

    if text.is_empty() {
        let err = StoreError::InvalidMessage("message text is empty");
        error!("Error saving message to database: {}", err);
        return Err(err);
    }

    match store.insert(message_timestamp, text).await {
        Ok(id) => {
            info!("Message saved to database: {}...", preview(text, PREVIEW_CHARS));
            Ok(id)
        }
        Err(e) => {
            error!(
                transient = e.is_transient(),
                "Error saving message to database: {}", e
            );
            Err(e)
        }
    }
}

/// The first `max_chars` characters of `text`.
pub fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
