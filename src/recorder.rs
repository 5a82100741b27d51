use std::sync::Arc;

use tracing::info;

use crate::platform::InboundEvent;
use crate::store::{self, ConversationStore};

/// What happened to one inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Stored under this id
    Saved(i64),
    /// Not a text message; nothing stored
    Ignored,
    /// A text message that could not be stored
    Failed { transient: bool },
}

/// Records inbound text messages into the conversation log.
/// Platform-agnostic: receives InboundEvent, never replies.
pub struct Recorder {
    store: Option<Arc<dyn ConversationStore>>,
}

impl Recorder {
    /// `None` runs the recorder in degraded mode, where every text message
    /// fails to save and is logged.
    pub fn new(store: Option<Arc<dyn ConversationStore>>) -> Self {
        Self { store }
    }

    pub async fn handle(&self, event: &InboundEvent) -> Outcome {
        let Some(text) = event.text() else {
            info!("Received non-text message from user {}", event.sender_label());
            return Outcome::Ignored;
        };

        info!("Received message at {}: {}", event.sent_at, text);
        info!("Message: {}", text);
        info!("Received at: {}", event.sent_at.format("%Y-%m-%d %H:%M:%S UTC"));

        match store::save(self.store.as_deref(), event.sent_at, text).await {
            Ok(id) => Outcome::Saved(id),
            Err(e) => Outcome::Failed {
                transient: e.is_transient(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Sender;
    use crate::store::sqlite::SqliteStore;
    use chrono::{DateTime, TimeZone, Utc};

    async fn recorder_with_store() -> (Recorder, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        assert!(store::ensure_schema(Some(&*store)).await);
        let recorder = Recorder::new(Some(store.clone() as Arc<dyn ConversationStore>));
        (recorder, store)
    }

    fn text_event(text: &str, sent_at: DateTime<Utc>) -> InboundEvent {
        InboundEvent {
            sender: Some(Sender {
                id: 42,
                name: Some("alice".to_string()),
            }),
            text: Some(text.to_string()),
            sent_at,
        }
    }

    #[tokio::test]
    async fn test_hello_is_stored_with_send_timestamp() {
        let (recorder, store) = recorder_with_store().await;
        let sent_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let outcome = recorder.handle(&text_event("hello", sent_at)).await;

        let rows = store.recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(outcome, Outcome::Saved(rows[0].id));
        assert_eq!(rows[0].message_text, "hello");
        assert_eq!(rows[0].message_timestamp, sent_at);
    }

    #[tokio::test]
    async fn test_non_text_event_produces_no_row() {
        let (recorder, store) = recorder_with_store().await;
        let sticker = InboundEvent {
            sender: Some(Sender { id: 7, name: None }),
            text: None,
            sent_at: Utc::now(),
        };
        let anonymous = InboundEvent {
            sender: None,
            text: Some(String::new()),
            sent_at: Utc::now(),
        };

        assert_eq!(recorder.handle(&sticker).await, Outcome::Ignored);
        assert_eq!(recorder.handle(&anonymous).await, Outcome::Ignored);
        assert_eq!(anonymous.sender_label(), "UnknownUser");
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_degraded_mode_fails_each_message() {
        let recorder = Recorder::new(None);
        let outcome = recorder.handle(&text_event("nobody listens", Utc::now())).await;
        assert_eq!(outcome, Outcome::Failed { transient: false });
    }

    #[tokio::test]
    async fn test_sequential_messages_stored_in_arrival_order() {
        let (recorder, store) = recorder_with_store().await;
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 3).unwrap();

        let first = recorder.handle(&text_event("one", t0)).await;
        let second = recorder.handle(&text_event("two", t1)).await;

        match (first, second) {
            (Outcome::Saved(a), Outcome::Saved(b)) => assert!(b > a),
            other => panic!("expected two saves, got {:?}", other),
        }
        let rows = store.recent(10).await.unwrap();
        let texts: Vec<_> = rows.iter().rev().map(|r| r.message_text.as_str()).collect();
        assert_eq!(texts, ["one", "two"]);
    }

    #[tokio::test]
    async fn test_concurrent_messages_share_one_connection() {
        let (recorder, store) = recorder_with_store().await;
        let recorder = Arc::new(recorder);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let recorder = recorder.clone();
                tokio::spawn(async move {
                    recorder
                        .handle(&text_event(&format!("msg {}", i), Utc::now()))
                        .await
                })
            })
            .collect();
        for handle in handles {
            assert!(matches!(handle.await.unwrap(), Outcome::Saved(_)));
        }

        assert_eq!(store.count().await.unwrap(), 8);
    }
}
