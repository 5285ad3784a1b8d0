//! Daily and weekly digests of open items.

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::fmt::Write as _;
use tracing::{info, warn};

use crate::database::{Database, DbError, ItemFilter};
use crate::item::{Horizon, Item, Kind};
use crate::telegram::TelegramClient;

/// Upper bound on items listed in one digest.
const MAX_ITEMS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestKind {
    /// Open `#неделя` tasks.
    Daily,
    /// Open `#квартал` tasks and ideas.
    Weekly,
}

impl DigestKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    pub fn horizon(&self) -> Horizon {
        match self {
            Self::Daily => Horizon::Week,
            Self::Weekly => Horizon::Quarter,
        }
    }

    /// Category name reported to Shortcuts. Weekly items are stored as
    /// `#квартал` but the Shortcuts contract calls the bucket `#3мес`.
    pub fn shortcuts_tag(&self) -> &'static str {
        match self {
            Self::Daily => self.horizon().tag(),
            Self::Weekly => "#3мес",
        }
    }

    pub fn kinds(&self) -> &'static [Kind] {
        match self {
            Self::Daily => &[Kind::Task],
            Self::Weekly => &[Kind::Task, Kind::Idea],
        }
    }

    /// Items belonging to this digest, optionally for one chat.
    pub fn filter(&self, chat_id: Option<i64>) -> ItemFilter {
        let mut filter = ItemFilter::open().with_horizon(self.horizon()).with_limit(MAX_ITEMS);
        for kind in self.kinds() {
            filter = filter.with_kind(*kind);
        }
        if let Some(chat_id) = chat_id {
            filter = filter.with_chat(chat_id);
        }
        filter
    }

    fn heading(&self, date: NaiveDate) -> String {
        match self {
            Self::Daily => format!("☀️ План на {}", date.format("%d.%m.%Y")),
            Self::Weekly => format!("🗓 Обзор недели · {}", date.format("%d.%m.%Y")),
        }
    }

    /// Reply when there is nothing to report.
    pub fn empty_text(&self) -> String {
        format!("По {} открытых записей нет 🎉", self.horizon().tag())
    }
}

/// Render a digest. Returns `None` when there is nothing to send.
pub fn render(kind: DigestKind, items: &[Item], date: NaiveDate) -> Option<String> {
    if items.is_empty() {
        return None;
    }

    let mut text = kind.heading(date);
    for section_kind in kind.kinds() {
        // oldest first
        let section: Vec<&Item> = items.iter().rev().filter(|i| i.kind == *section_kind).collect();
        if section.is_empty() {
            continue;
        }
        let label = match section_kind {
            Kind::Task => "Задачи",
            Kind::Idea => "Идеи",
            Kind::Note => "Мысли",
        };
        let _ = write!(text, "\n\n{} {}:", label, kind.horizon().tag());
        for (n, item) in section.iter().enumerate() {
            let _ = write!(text, "\n{}. {}", n + 1, item.display_title());
        }
    }
    Some(text)
}

/// Compose the digest for one chat.
pub fn compose(db: &Database, kind: DigestKind, chat_id: i64, tz: Tz) -> Result<Option<String>, DbError> {
    let items = db.list_items(&kind.filter(Some(chat_id)))?;
    let today = Utc::now().with_timezone(&tz).date_naive();
    Ok(render(kind, &items, today))
}

/// Send the digest to every chat with open items. Returns the number of messages sent.
pub async fn send_digests(
    db: &Database,
    telegram: &TelegramClient,
    kind: DigestKind,
    tz: Tz,
) -> Result<usize, DbError> {
    let chats = db.chats_with_open_items()?;
    let mut sent = 0;

    for chat_id in chats {
        let Some(text) = compose(db, kind, chat_id, tz)? else {
            continue;
        };
        match telegram.send_message(chat_id, &text, None, None).await {
            Ok(_) => sent += 1,
            Err(e) => warn!("Failed to deliver {} digest to {}: {}", kind.as_str(), chat_id, e),
        }
    }

    info!("📬 Sent {} {} digest(s)", sent, kind.as_str());
    Ok(sent)
}
