//! Captured items: tasks, ideas and notes with an optional planning horizon.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum stored title length, in characters.
pub const MAX_TITLE_CHARS: usize = 280;

/// What a capture turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Task,
    Idea,
    Note,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Task => "task",
            Kind::Idea => "idea",
            Kind::Note => "note",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "task" => Some(Kind::Task),
            "idea" => Some(Kind::Idea),
            "note" => Some(Kind::Note),
            _ => None,
        }
    }

    /// Russian label used in bot replies.
    pub fn label(&self) -> &'static str {
        match self {
            Kind::Task => "Задача",
            Kind::Idea => "Идея",
            Kind::Note => "Мысль",
        }
    }
}

/// Planning horizon tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Horizon {
    #[serde(rename = "#неделя")]
    Week,
    #[serde(rename = "#месяц")]
    Month,
    #[serde(rename = "#квартал")]
    Quarter,
    #[serde(rename = "#год")]
    Year,
}

impl Horizon {
    pub const ALL: [Horizon; 4] = [Horizon::Week, Horizon::Month, Horizon::Quarter, Horizon::Year];

    pub fn tag(&self) -> &'static str {
        match self {
            Horizon::Week => "#неделя",
            Horizon::Month => "#месяц",
            Horizon::Quarter => "#квартал",
            Horizon::Year => "#год",
        }
    }

    /// Parse a canonical tag. Aliases are not accepted here, see [`Horizon::detect`].
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_lowercase();
        Self::ALL.into_iter().find(|h| h.tag() == tag)
    }

    /// Find a horizon tag anywhere in free text.
    ///
    /// Legacy aliases win over canonical tags: `#3мес` means a quarter and
    /// `#полгода` is filed under the year.
    pub fn detect(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        if lower.contains("#3мес") {
            return Some(Horizon::Quarter);
        }
        if lower.contains("#полгода") {
            return Some(Horizon::Year);
        }
        Self::ALL.into_iter().find(|h| lower.contains(h.tag()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Open,
    Closed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" => Some(Status::Open),
            "closed" | "done" => Some(Status::Closed),
            _ => None,
        }
    }
}

/// Where a capture came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Telegram,
    Shortcuts,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Telegram => "telegram",
            Source::Shortcuts => "shortcuts",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "shortcuts" => Source::Shortcuts,
            _ => Source::Telegram,
        }
    }
}

/// A stored item.
#[derive(Debug, Clone, Serialize)]
pub struct Item {
    pub id: Uuid,
    pub telegram_user_id: i64,
    pub telegram_chat_id: i64,
    pub source_message_id: Option<i64>,
    pub source: Source,
    pub kind: Kind,
    #[serde(rename = "horizon_tag")]
    pub horizon: Option<Horizon>,
    pub text: String,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub title: Option<String>,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub raw_update: Option<serde_json::Value>,
}

impl Item {
    /// Title for lists: the stored title, else the first 80 characters of the text.
    pub fn display_title(&self) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => truncate_chars(self.text.trim(), 80),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == Status::Open
    }

    /// Spreadsheet tab this item is exported to.
    pub fn sheet_tab(&self) -> &'static str {
        match (self.kind, self.horizon) {
            (Kind::Idea, _) => "Идея",
            (Kind::Note, _) => "Мысли",
            (Kind::Task, Some(Horizon::Month)) => "Месяц",
            (Kind::Task, Some(Horizon::Quarter)) => "Квартал",
            (Kind::Task, Some(Horizon::Year)) => "Год",
            (Kind::Task, Some(Horizon::Week) | None) => "Неделя",
        }
    }
}

/// Fields for inserting a new item. Id, status and timestamps are assigned by the database.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub telegram_user_id: i64,
    pub telegram_chat_id: i64,
    pub source_message_id: Option<i64>,
    pub source: Source,
    pub kind: Kind,
    pub horizon: Option<Horizon>,
    pub text: String,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub title: Option<String>,
    pub raw_update: Option<serde_json::Value>,
}

/// Truncate to at most `max` characters, respecting UTF-8 boundaries.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(horizon: Option<Horizon>) -> Item {
        Item {
            id: Uuid::new_v4(),
            telegram_user_id: 1,
            telegram_chat_id: 1,
            source_message_id: None,
            source: Source::Telegram,
            kind: Kind::Task,
            horizon,
            text: "купить молоко".to_string(),
            transcript: None,
            summary: None,
            title: None,
            status: Status::Open,
            created_at: Utc::now(),
            closed_at: None,
            raw_update: None,
        }
    }

    #[test]
    fn test_detect_canonical_tags() {
        assert_eq!(Horizon::detect("сделать отчёт #неделя"), Some(Horizon::Week));
        assert_eq!(Horizon::detect("#МЕСЯЦ выучить"), Some(Horizon::Month));
        assert_eq!(Horizon::detect("план #квартал"), Some(Horizon::Quarter));
        assert_eq!(Horizon::detect("мечта #год"), Some(Horizon::Year));
        assert_eq!(Horizon::detect("без тега"), None);
    }

    #[test]
    fn test_detect_legacy_aliases() {
        assert_eq!(Horizon::detect("запустить проект #3мес"), Some(Horizon::Quarter));
        assert_eq!(Horizon::detect("переезд #полгода"), Some(Horizon::Year));
        // alias wins even when a canonical tag appears first
        assert_eq!(Horizon::detect("#неделя и #3мес"), Some(Horizon::Quarter));
    }

    #[test]
    fn test_from_tag_rejects_aliases() {
        assert_eq!(Horizon::from_tag("#квартал"), Some(Horizon::Quarter));
        assert_eq!(Horizon::from_tag("#3мес"), None);
        assert_eq!(Horizon::from_tag("week"), None);
    }

    #[test]
    fn test_horizon_serializes_as_tag() {
        let json = serde_json::to_string(&Horizon::Month).unwrap();
        assert_eq!(json, "\"#месяц\"");
    }

    #[test]
    fn test_sheet_tab_mapping() {
        assert_eq!(task(None).sheet_tab(), "Неделя");
        assert_eq!(task(Some(Horizon::Week)).sheet_tab(), "Неделя");
        assert_eq!(task(Some(Horizon::Month)).sheet_tab(), "Месяц");
        assert_eq!(task(Some(Horizon::Quarter)).sheet_tab(), "Квартал");
        assert_eq!(task(Some(Horizon::Year)).sheet_tab(), "Год");

        let mut idea = task(Some(Horizon::Year));
        idea.kind = Kind::Idea;
        assert_eq!(idea.sheet_tab(), "Идея");

        let mut note = task(None);
        note.kind = Kind::Note;
        assert_eq!(note.sheet_tab(), "Мысли");
    }

    #[test]
    fn test_display_title_falls_back_to_text() {
        let mut item = task(None);
        item.text = "я".repeat(100);
        assert_eq!(item.display_title().chars().count(), 80);

        item.title = Some("  ".to_string());
        assert_eq!(item.display_title().chars().count(), 80);

        item.title = Some("Купить молоко".to_string());
        assert_eq!(item.display_title(), "Купить молоко");
    }

    #[test]
    fn test_kind_and_status_parse() {
        assert_eq!(Kind::parse("IDEA"), Some(Kind::Idea));
        assert_eq!(Kind::parse("reminder"), None);
        assert_eq!(Status::parse("done"), Some(Status::Closed));
        assert_eq!(Status::parse("open"), Some(Status::Open));
    }
}
