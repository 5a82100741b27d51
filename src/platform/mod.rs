pub mod telegram;

use chrono::{DateTime, Utc};

/// Who sent an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    /// Platform-specific user ID
    pub id: u64,
    /// Username if set, otherwise the display name
    pub name: Option<String>,
}

/// A message received from any platform
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub sender: Option<Sender>,
    /// The message text; `None` for stickers, photos and other non-text content
    pub text: Option<String>,
    /// When the platform says the message was sent
    pub sent_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Text content, treating an empty string as no text.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    /// Sender identifier for log lines.
    pub fn sender_label(&self) -> String {
        match &self.sender {
            Some(Sender {
                id,
                name: Some(name),
            }) => format!("{} ({})", id, name),
            Some(sender) => sender.id.to_string(),
            None => "UnknownUser".to_string(),
        }
    }
}
