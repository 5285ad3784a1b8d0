//! Telegram client using teloxide.

use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{CallbackQueryId, FileId, InlineKeyboardMarkup, MessageId, ReplyParameters};
use tracing::{info, warn};

/// Telegram rejects messages longer than 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4000;

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<i64, String> {
        let text = if text.chars().count() > MAX_MESSAGE_CHARS {
            let truncated: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
            format!("{truncated}…")
        } else {
            text.to_string()
        };

        let mut request = self.bot.send_message(ChatId(chat_id), text);

        if let Some(msg_id) = reply_to_message_id {
            let reply_params = ReplyParameters::new(MessageId(msg_id as i32));
            request = request.reply_parameters(reply_params);
        }
        if let Some(markup) = keyboard {
            request = request.reply_markup(markup);
        }

        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send to chat {chat_id}: {e}");
            warn!("{}", msg);
            msg
        })
    }

    /// Acknowledge an inline button press, optionally with a toast.
    pub async fn answer_callback_query(&self, query_id: CallbackQueryId, text: Option<&str>) -> Result<(), String> {
        let mut request = self.bot.answer_callback_query(query_id);
        if let Some(text) = text {
            request = request.text(text).show_alert(false);
        }

        request.await.map(|_| ()).map_err(|e| {
            let msg = format!("Failed to answer callback: {e}");
            warn!("{}", msg);
            msg
        })
    }

    /// Replace the inline keyboard of a sent message.
    pub async fn edit_keyboard(&self, chat_id: i64, message_id: i64, keyboard: InlineKeyboardMarkup) -> Result<(), String> {
        self.bot
            .edit_message_reply_markup(ChatId(chat_id), MessageId(message_id as i32))
            .reply_markup(keyboard)
            .await
            .map(|_| ())
            .map_err(|e| {
                let msg = format!("Failed to edit keyboard in chat {chat_id}: {e}");
                warn!("{}", msg);
                msg
            })
    }

    /// Download a file (voice, audio) by file_id.
    pub async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, String> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| format!("Failed to get file info: {e}"))?;

        let mut data = Vec::new();
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .map_err(|e| format!("Failed to download file: {e}"))?;

        info!("📥 Downloaded {} ({} bytes)", file.path, data.len());
        Ok(data)
    }
}
