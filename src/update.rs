//! Webhook payloads converted into what the worker acts on.

use serde_json::Value;
use teloxide::types::{CallbackQuery, CallbackQueryId, Message, Update, UpdateKind};
use tracing::debug;

/// What a user sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Voice { file_id: String },
    Audio { file_id: String, file_name: Option<String> },
    Unsupported,
}

#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub user_id: i64,
    pub message_id: i64,
    pub content: MessageContent,
    /// The untouched update, stored alongside captured items.
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct IncomingCallback {
    pub query_id: CallbackQueryId,
    pub user_id: i64,
    pub data: Option<String>,
    /// The bot message carrying the pressed button, if Telegram still has it.
    pub message: Option<CallbackMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackMessage {
    pub chat_id: i64,
    pub message_id: i64,
    /// Callback data of every button on the message, row by row.
    pub buttons: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum Incoming {
    Message(IncomingMessage),
    Callback(IncomingCallback),
}

/// Parse a webhook body. Returns `None` for updates the bot ignores.
///
/// The update must be decoded from the body, not from a `serde_json::Value`:
/// teloxide reads the kind key as a borrowed string.
pub fn parse_update(body: &[u8]) -> Option<Incoming> {
    let update: Update = match serde_json::from_slice(body) {
        Ok(update) => update,
        Err(e) => {
            debug!("Unparsable update: {e}");
            return None;
        }
    };
    let raw: Value = serde_json::from_slice(body).ok()?;

    match update.kind {
        UpdateKind::Message(msg) => Some(Incoming::Message(from_message(&msg, raw))),
        UpdateKind::CallbackQuery(query) => Some(Incoming::Callback(from_callback(&query, &raw))),
        UpdateKind::Error(_) => {
            debug!("Unknown update kind in {}", raw["update_id"]);
            None
        }
        _ => None,
    }
}

fn from_message(msg: &Message, raw: Value) -> IncomingMessage {
    let content = if let Some(text) = msg.text() {
        MessageContent::Text(text.to_string())
    } else if let Some(voice) = msg.voice() {
        MessageContent::Voice { file_id: voice.file.id.0.clone() }
    } else if let Some(audio) = msg.audio() {
        MessageContent::Audio {
            file_id: audio.file.id.0.clone(),
            file_name: audio.file_name.clone(),
        }
    } else {
        MessageContent::Unsupported
    };

    IncomingMessage {
        chat_id: msg.chat.id.0,
        user_id: msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(msg.chat.id.0),
        message_id: msg.id.0 as i64,
        content,
        raw,
    }
}

fn from_callback(query: &CallbackQuery, raw: &Value) -> IncomingCallback {
    IncomingCallback {
        query_id: query.id.clone(),
        user_id: query.from.id.0 as i64,
        data: query.data.clone(),
        message: callback_message(&raw["callback_query"]["message"]),
    }
}

// Read from the raw payload: inaccessible messages carry no keyboard.
fn callback_message(msg: &Value) -> Option<CallbackMessage> {
    let chat_id = msg["chat"]["id"].as_i64()?;
    let message_id = msg["message_id"].as_i64()?;
    let buttons = msg["reply_markup"]["inline_keyboard"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|button| button["callback_data"].as_str())
        .map(str::to_string)
        .collect();
    Some(CallbackMessage { chat_id, message_id, buttons })
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(raw: &Value) -> Option<Incoming> {
        parse_update(raw.to_string().as_bytes())
    }

    #[test]
    fn test_parse_text_message() {
        let raw = fixtures::text(1, 42, "купить молоко #неделя");
        let Some(Incoming::Message(msg)) = parse(&raw) else {
            panic!("expected a message");
        };
        assert_eq!(msg.chat_id, 42);
        assert_eq!(msg.user_id, 42);
        assert_eq!(msg.message_id, 101);
        assert_eq!(msg.content, MessageContent::Text("купить молоко #неделя".into()));
        assert_eq!(msg.raw, raw);
    }

    #[test]
    fn test_parse_voice_message() {
        let raw = fixtures::voice(2, 42, "voice-file-1");
        let Some(Incoming::Message(msg)) = parse(&raw) else {
            panic!("expected a message");
        };
        assert_eq!(msg.content, MessageContent::Voice { file_id: "voice-file-1".into() });
    }

    #[test]
    fn test_parse_location_is_unsupported() {
        let raw = fixtures::message(3, 42, json!({"location": {"latitude": 55.75, "longitude": 37.61}}));
        let Some(Incoming::Message(msg)) = parse(&raw) else {
            panic!("expected a message");
        };
        assert_eq!(msg.content, MessageContent::Unsupported);
    }

    #[test]
    fn test_parse_callback() {
        let raw = fixtures::callback(4, 42, "close:abc");
        let Some(Incoming::Callback(cb)) = parse(&raw) else {
            panic!("expected a callback");
        };
        assert_eq!(cb.query_id, CallbackQueryId("cbq-1".into()));
        assert_eq!(cb.user_id, 42);
        assert_eq!(cb.data.as_deref(), Some("close:abc"));
        assert!(cb.message.is_none());
    }

    #[test]
    fn test_parse_callback_keyboard() {
        let raw = fixtures::callback_on(6, 42, "close:b", &["close:a", "close:b"]);
        let Some(Incoming::Callback(cb)) = parse(&raw) else {
            panic!("expected a callback");
        };
        assert_eq!(
            cb.message,
            Some(CallbackMessage {
                chat_id: 42,
                message_id: 900,
                buttons: vec!["close:a".into(), "close:b".into()],
            })
        );
    }

    #[test]
    fn test_ignores_garbage() {
        assert!(parse_update(b"not json").is_none());
        assert!(parse(&json!({"hello": "world"})).is_none());
        assert!(parse(&json!({"update_id": 5, "poll": {"id": "p"}})).is_none());
    }
}
