//! Bot behavior: commands, captures and inline button callbacks.

use std::sync::Arc;

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::capture::{Capture, CaptureError, CaptureInput, CaptureRequest};
use crate::config::Config;
use crate::database::{CloseOutcome, Database, ItemFilter, ReopenOutcome};
use crate::digest::{self, DigestKind};
use crate::item::{Item, Kind, Source, truncate_chars};
use crate::telegram::TelegramClient;
use crate::update::{CallbackMessage, Incoming, IncomingCallback, IncomingMessage, MessageContent};

/// How many open tasks `/done` lists.
pub const DONE_LIST_LIMIT: usize = 10;

const BUTTON_TITLE_CHARS: usize = 32;

pub const HELP_TEXT: &str = "Х-2000 на связи. Пишите или наговаривайте всё, что в голове: задачи, идеи, мысли.

Горизонт задаётся тегом: #неделя #месяц #квартал #год

/done — последние открытые задачи
/today — задачи на неделю
/week — обзор квартала
/help — эта справка";

const ACCESS_DENIED: &str = "Доступ запрещён.";
const UNSUPPORTED: &str = "Пока понимаю только текст и голосовые.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Done,
    Today,
    Week,
    Unknown(String),
}

impl Command {
    /// Parse `/name[@bot] [args]`. Returns `None` for plain text.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.trim_start().strip_prefix('/')?.split_whitespace().next()?;
        let name = word.split('@').next().unwrap_or(word).to_lowercase();
        Some(match name.as_str() {
            "start" => Self::Start,
            "help" => Self::Help,
            "done" => Self::Done,
            "today" => Self::Today,
            "week" => Self::Week,
            _ => Self::Unknown(name),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Close(Uuid),
    Reopen(Uuid),
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        let (action, id) = data.split_once(':')?;
        let id = Uuid::parse_str(id).ok()?;
        match action {
            "close" => Some(Self::Close(id)),
            "reopen" => Some(Self::Reopen(id)),
            _ => None,
        }
    }

    pub fn data(&self) -> String {
        match self {
            Self::Close(id) => format!("close:{id}"),
            Self::Reopen(id) => format!("reopen:{id}"),
        }
    }

    pub fn item_id(&self) -> Uuid {
        match self {
            Self::Close(id) | Self::Reopen(id) => *id,
        }
    }
}

/// One button per item: close for open items, reopen for closed ones.
/// A single item gets a bare label; lists are numbered with titles.
pub fn item_keyboard(items: &[Item]) -> InlineKeyboardMarkup {
    let single = items.len() == 1;
    let rows = items
        .iter()
        .enumerate()
        .map(|(n, item)| {
            let (icon, verb, action) = if item.is_open() {
                ("✅", "Закрыть", CallbackAction::Close(item.id))
            } else {
                ("↩️", "Вернуть", CallbackAction::Reopen(item.id))
            };
            let label = if single {
                format!("{icon} {verb}")
            } else {
                format!("{icon} {}. {}", n + 1, truncate_chars(&item.display_title(), BUTTON_TITLE_CHARS))
            };
            vec![InlineKeyboardButton::callback(label, action.data())]
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
}

/// Confirmation sent in reply to a captured message.
pub fn capture_reply(item: &Item) -> String {
    let mut head = format!("📌 {}", item.kind.label());
    if let Some(horizon) = item.horizon {
        head.push_str(" · ");
        head.push_str(horizon.tag());
    }
    let mut text = format!("{head}\n{}", item.display_title());
    if let Some(summary) = item.summary.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        text.push_str("\n\n");
        text.push_str(summary);
    }
    text
}

/// Body of the `/done` message.
pub fn done_list(items: &[Item]) -> String {
    if items.is_empty() {
        return "Открытых задач нет 🎉".to_string();
    }
    let mut text = String::from("Последние открытые задачи:");
    for (n, item) in items.iter().enumerate() {
        text.push_str(&format!("\n{}. {}", n + 1, item.display_title()));
        if let Some(horizon) = item.horizon {
            text.push(' ');
            text.push_str(horizon.tag());
        }
    }
    text
}

fn close_answer(outcome: CloseOutcome) -> &'static str {
    match outcome {
        CloseOutcome::Closed => "✅ Закрыто",
        CloseOutcome::AlreadyClosed => "Уже закрыто",
        CloseOutcome::NotFound => "Не найдено",
    }
}

fn reopen_answer(outcome: ReopenOutcome) -> &'static str {
    match outcome {
        ReopenOutcome::Reopened => "↩️ Возвращено",
        ReopenOutcome::AlreadyOpen => "Уже открыто",
        ReopenOutcome::NotFound => "Не найдено",
    }
}

fn capture_failure_text(err: &CaptureError) -> Option<&'static str> {
    match err {
        CaptureError::Empty => None,
        CaptureError::EmptyTranscript => Some("Не удалось распознать речь."),
        CaptureError::Transcription(_) => Some("Не удалось расшифровать голосовое, попробуйте ещё раз."),
        CaptureError::Database(_) => Some("Не удалось сохранить, попробуйте позже."),
    }
}

pub struct BotHandler {
    config: Arc<Config>,
    db: Arc<Database>,
    telegram: Arc<TelegramClient>,
    capture: Arc<Capture>,
}

impl BotHandler {
    pub fn new(config: Arc<Config>, db: Arc<Database>, telegram: Arc<TelegramClient>, capture: Arc<Capture>) -> Self {
        Self { config, db, telegram, capture }
    }

    pub async fn handle(&self, incoming: Incoming) {
        match incoming {
            Incoming::Message(msg) => self.handle_message(msg).await,
            Incoming::Callback(cb) => self.handle_callback(cb).await,
        }
    }

    async fn reply(&self, msg: &IncomingMessage, text: &str, keyboard: Option<InlineKeyboardMarkup>) {
        // failures are already logged by the client
        let _ = self.telegram.send_message(msg.chat_id, text, Some(msg.message_id), keyboard).await;
    }

    async fn handle_message(&self, msg: IncomingMessage) {
        if !self.config.is_allowed(msg.user_id) {
            info!("🚫 Ignoring user {} (not allowed)", msg.user_id);
            self.reply(&msg, ACCESS_DENIED, None).await;
            return;
        }

        let input = match &msg.content {
            MessageContent::Text(text) => {
                if let Some(command) = Command::parse(text) {
                    self.handle_command(&msg, command).await;
                    return;
                }
                CaptureInput::Text(text.clone())
            }
            MessageContent::Voice { file_id } => match self.download(&msg, file_id).await {
                Some(bytes) => CaptureInput::Audio { bytes, filename: "voice.ogg".to_string() },
                None => return,
            },
            MessageContent::Audio { file_id, file_name } => match self.download(&msg, file_id).await {
                Some(bytes) => CaptureInput::Audio {
                    bytes,
                    filename: file_name.clone().unwrap_or_else(|| "audio.mp3".to_string()),
                },
                None => return,
            },
            MessageContent::Unsupported => {
                self.reply(&msg, UNSUPPORTED, None).await;
                return;
            }
        };

        let request = CaptureRequest {
            user_id: msg.user_id,
            chat_id: msg.chat_id,
            message_id: Some(msg.message_id),
            source: Source::Telegram,
            raw: Some(msg.raw.clone()),
            input,
        };

        match self.capture.capture(request).await {
            Ok(item) => {
                let keyboard = item_keyboard(std::slice::from_ref(&item));
                self.reply(&msg, &capture_reply(&item), Some(keyboard)).await;
            }
            Err(e) => {
                if matches!(e, CaptureError::Database(_)) {
                    error!("Capture failed for chat {}: {}", msg.chat_id, e);
                } else {
                    warn!("Capture failed for chat {}: {}", msg.chat_id, e);
                }
                if let Some(text) = capture_failure_text(&e) {
                    self.reply(&msg, text, None).await;
                }
            }
        }
    }

    async fn download(&self, msg: &IncomingMessage, file_id: &str) -> Option<Vec<u8>> {
        match self.telegram.download_file(file_id).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Voice download failed: {e}");
                self.reply(msg, "Не удалось скачать файл, попробуйте ещё раз.", None).await;
                None
            }
        }
    }

    async fn handle_command(&self, msg: &IncomingMessage, command: Command) {
        info!("⌨️ Command {:?} from {}", command, msg.user_id);
        match command {
            Command::Start | Command::Help | Command::Unknown(_) => self.reply(msg, HELP_TEXT, None).await,
            Command::Done => {
                let filter = ItemFilter::open()
                    .with_chat(msg.chat_id)
                    .with_kind(Kind::Task)
                    .with_limit(DONE_LIST_LIMIT);
                match self.db.list_items(&filter) {
                    Ok(items) => {
                        let keyboard = (!items.is_empty()).then(|| item_keyboard(&items));
                        self.reply(msg, &done_list(&items), keyboard).await;
                    }
                    Err(e) => error!("Failed to list tasks for chat {}: {}", msg.chat_id, e),
                }
            }
            Command::Today => self.send_digest(msg, DigestKind::Daily).await,
            Command::Week => self.send_digest(msg, DigestKind::Weekly).await,
        }
    }

    async fn send_digest(&self, msg: &IncomingMessage, kind: DigestKind) {
        match digest::compose(&self.db, kind, msg.chat_id, self.config.timezone) {
            Ok(Some(text)) => self.reply(msg, &text, None).await,
            Ok(None) => self.reply(msg, &kind.empty_text(), None).await,
            Err(e) => error!("Failed to build {} digest: {}", kind.as_str(), e),
        }
    }

    async fn handle_callback(&self, cb: IncomingCallback) {
        if !self.config.is_allowed(cb.user_id) {
            let _ = self.telegram.answer_callback_query(cb.query_id, Some(ACCESS_DENIED)).await;
            return;
        }

        let Some(action) = cb.data.as_deref().and_then(CallbackAction::parse) else {
            let _ = self.telegram.answer_callback_query(cb.query_id, None).await;
            return;
        };

        let answer = match action {
            CallbackAction::Close(id) => self.db.close_item(id, cb.user_id).map(close_answer),
            CallbackAction::Reopen(id) => self.db.reopen_item(id, cb.user_id).map(reopen_answer),
        };

        let answer = match answer {
            Ok(answer) => answer,
            Err(e) => {
                error!("Callback {:?} failed: {}", action, e);
                "Ошибка, попробуйте позже"
            }
        };
        let _ = self.telegram.answer_callback_query(cb.query_id, Some(answer)).await;

        if let Some(message) = cb.message {
            self.refresh_keyboard(&message).await;
        }
    }

    /// Redraw the buttons of a message from the current item states.
    async fn refresh_keyboard(&self, message: &CallbackMessage) {
        let mut items = Vec::new();
        for data in &message.buttons {
            let Some(action) = CallbackAction::parse(data) else {
                return;
            };
            match self.db.get_item(action.item_id()) {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to load item {}: {}", action.item_id(), e);
                    return;
                }
            }
        }
        if items.is_empty() {
            return;
        }
        let _ = self
            .telegram
            .edit_keyboard(message.chat_id, message.message_id, item_keyboard(&items))
            .await;
    }
}
