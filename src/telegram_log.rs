use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

const FLUSH_EVERY: Duration = Duration::from_secs(3);
const MAX_BUFFERED: usize = 20;
const MAX_CHARS: usize = 4000;

/// Forwards WARN and ERROR events to a Telegram chat.
pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl TelegramLogLayer {
    /// Must be called inside a tokio runtime.
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let chat_id = ChatId(chat_id);

        tokio::spawn(async move {
            let mut buffer: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(FLUSH_EVERY);

            loop {
                tokio::select! {
                    line = rx.recv() => match line {
                        Some(line) => {
                            buffer.push(line);
                            if buffer.len() >= MAX_BUFFERED {
                                flush(&bot, chat_id, &mut buffer).await;
                            }
                        }
                        None => {
                            flush(&bot, chat_id, &mut buffer).await;
                            break;
                        }
                    },
                    _ = interval.tick() => flush(&bot, chat_id, &mut buffer).await,
                }
            }
        });

        Self { tx }
    }
}

async fn flush(bot: &Bot, chat_id: ChatId, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let mut text = buffer.join("\n");
    buffer.clear();
    if text.chars().count() > MAX_CHARS {
        text = text.chars().take(MAX_CHARS).collect::<String>() + "…";
    }
    // eprintln: a tracing call here would feed back into this layer
    if let Err(e) = bot.send_message(chat_id, text).await {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

/// Chat line for an event, or `None` for levels that stay local.
fn format_line(level: Level, target: &str, message: &str) -> Option<String> {
    let icon = match level {
        Level::ERROR => "❌",
        Level::WARN => "⚠️",
        _ => return None,
    };
    Some(format!("{icon} {target}: {message}"))
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > Level::WARN {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if let Some(line) = format_line(*metadata.level(), metadata.target(), &visitor.message) {
            if self.tx.send(line).is_err() {
                eprintln!("Log channel closed, message dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_warnings_and_errors_are_forwarded() {
        assert_eq!(
            format_line(Level::ERROR, "chaosbot::digest", "boom").as_deref(),
            Some("❌ chaosbot::digest: boom")
        );
        assert_eq!(
            format_line(Level::WARN, "chaosbot::groq", "slow").as_deref(),
            Some("⚠️ chaosbot::groq: slow")
        );
        assert!(format_line(Level::INFO, "chaosbot", "hello").is_none());
        assert!(format_line(Level::DEBUG, "chaosbot", "hello").is_none());
    }
}
