use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{MessageEntity, MessageEntityKind};
use tracing::{debug, info};

use crate::platform::{InboundEvent, Sender};
use crate::recorder::{Outcome, Recorder};

/// A message is a command when its first entity is a bot command at offset 0.
fn starts_with_command(entities: Option<&[MessageEntity]>) -> bool {
    entities
        .and_then(|entities| entities.first())
        .is_some_and(|first| {
            first.offset == 0 && matches!(first.kind, MessageEntityKind::BotCommand)
        })
}

fn is_command(msg: &Message) -> bool {
    starts_with_command(msg.entities())
}

fn inbound_event(msg: &Message) -> InboundEvent {
    InboundEvent {
        sender: msg.from.as_ref().map(|user| Sender {
            id: user.id.0,
            name: user.username.clone().or_else(|| Some(user.first_name.clone())),
        }),
        text: msg.text().map(str::to_string),
        sent_at: msg.date,
    }
}

/// Run the Telegram receive loop until shutdown (Ctrl-C or dispatcher exit)
pub async fn run(bot: Bot, recorder: Arc<Recorder>) -> Result<()> {
    info!("Starting Telegram platform...");

    let handler = Update::filter_message()
        .filter(|msg: Message| !is_command(&msg))
        .endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![recorder])
        .default_handler(|upd| async move {
            debug!("Ignoring update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Telegram platform stopped");
    Ok(())
}

async fn handle_message(msg: Message, recorder: Arc<Recorder>) -> ResponseResult<()> {
    let event = inbound_event(&msg);
    match recorder.handle(&event).await {
        Outcome::Saved(id) => debug!("Logged message {} from {}", id, event.sender_label()),
        Outcome::Failed { transient } => {
            debug!(transient, "Message from {} was not logged", event.sender_label())
        }
        Outcome::Ignored => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_bot_command_is_command() {
        let entities = [MessageEntity::new(MessageEntityKind::BotCommand, 0, 6)];
        assert!(starts_with_command(Some(&entities[..])));
    }

    #[test]
    fn test_command_later_in_text_is_not_command() {
        let entities = [MessageEntity::new(MessageEntityKind::BotCommand, 4, 6)];
        assert!(!starts_with_command(Some(&entities[..])));
    }

    #[test]
    fn test_leading_formatting_is_not_command() {
        let entities = [
            MessageEntity::new(MessageEntityKind::Bold, 0, 4),
            MessageEntity::new(MessageEntityKind::BotCommand, 5, 6),
        ];
        assert!(!starts_with_command(Some(&entities[..])));
    }

    #[test]
    fn test_plain_text_is_not_command() {
        assert!(!starts_with_command(None));
        assert!(!starts_with_command(Some(&[][..])));
    }
}
