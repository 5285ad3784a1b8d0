//! Persistent SQLite storage for captured items.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::item::{Horizon, Item, Kind, NewItem, Source, Status, MAX_TITLE_CHARS, truncate_chars};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database schema version {found} is newer than supported version {supported}")]
    UnsupportedSchemaVersion { found: u32, supported: u32 },

    #[error("unsupported database url '{0}' (expected sqlite://path)")]
    UnsupportedUrl(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Where the database lives, parsed from `DATABASE_URL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Memory,
    File(PathBuf),
}

impl DatabaseLocation {
    /// Accepts `sqlite://path`, `sqlite:path`, `file:path`, `sqlite::memory:` or a bare path.
    pub fn parse(url: &str) -> DbResult<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(DbError::UnsupportedUrl(url.to_string()));
        }
        if url == "sqlite::memory:" || url == ":memory:" {
            return Ok(Self::Memory);
        }
        let path = if let Some(rest) = url.strip_prefix("sqlite://") {
            rest
        } else if let Some(rest) = url.strip_prefix("sqlite:") {
            rest
        } else if let Some(rest) = url.strip_prefix("file:") {
            rest
        } else if url.contains("://") {
            return Err(DbError::UnsupportedUrl(url.to_string()));
        } else {
            url
        };
        // drop connection options such as ?mode=rwc
        let path = path.split('?').next().unwrap_or(path);
        if path.is_empty() {
            return Err(DbError::UnsupportedUrl(url.to_string()));
        }
        Ok(Self::File(PathBuf::from(path)))
    }
}

/// Result of closing an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    AlreadyClosed,
    NotFound,
}

/// Result of reopening an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReopenOutcome {
    Reopened,
    AlreadyOpen,
    NotFound,
}

/// Selection of items for lists, digests and exports.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub chat_id: Option<i64>,
    pub kinds: Vec<Kind>,
    pub horizons: Vec<Horizon>,
    pub status: Option<Status>,
    pub limit: Option<usize>,
}

impl ItemFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open() -> Self {
        Self::new().with_status(Status::Open)
    }

    pub fn with_chat(mut self, chat_id: i64) -> Self {
        self.chat_id = Some(chat_id);
        self
    }

    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn with_horizon(mut self, horizon: Horizon) -> Self {
        self.horizons.push(horizon);
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: r#"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            telegram_user_id INTEGER NOT NULL,
            telegram_chat_id INTEGER NOT NULL,
            source_message_id INTEGER,
            source TEXT NOT NULL DEFAULT 'telegram',
            kind TEXT NOT NULL DEFAULT 'task',
            horizon_tag TEXT,
            text TEXT NOT NULL,
            transcript TEXT,
            summary TEXT,
            title TEXT,
            status TEXT NOT NULL DEFAULT 'open',
            created_at TEXT NOT NULL,
            closed_at TEXT,
            raw_update TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_items_user ON items(telegram_user_id);
        CREATE INDEX IF NOT EXISTS idx_items_chat ON items(telegram_chat_id);
        CREATE INDEX IF NOT EXISTS idx_items_kind ON items(kind);
        CREATE INDEX IF NOT EXISTS idx_items_horizon ON items(horizon_tag);
        CREATE INDEX IF NOT EXISTS idx_items_status ON items(status);
        CREATE INDEX IF NOT EXISTS idx_items_created ON items(created_at);
    "#,
}];

const ITEM_COLUMNS: &str = "id, telegram_user_id, telegram_chat_id, source_message_id, source, kind, \
     horizon_tag, text, transcript, summary, title, status, created_at, closed_at, raw_update";

/// SQLite database for items.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(location: &DatabaseLocation) -> DbResult<Self> {
        match location {
            DatabaseLocation::Memory => Self::open_in_memory(),
            DatabaseLocation::File(path) => Self::with_path(path),
        }
    }

    /// Create a new in-memory database.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open (or create) a database file.
    pub fn with_path(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Self::init(Connection::open(path)?)?;
        info!("Opened database at {:?} ({} items)", path, db.count_items()?);
        Ok(db)
    }

    fn init(mut conn: Connection) -> DbResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        apply_migrations(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_item(&self, new: NewItem) -> DbResult<Item> {
        let item = Item {
            id: Uuid::new_v4(),
            telegram_user_id: new.telegram_user_id,
            telegram_chat_id: new.telegram_chat_id,
            source_message_id: new.source_message_id,
            source: new.source,
            kind: new.kind,
            horizon: new.horizon,
            text: new.text,
            transcript: new.transcript,
            summary: new.summary,
            title: new.title.map(|t| truncate_chars(t.trim(), MAX_TITLE_CHARS)),
            status: Status::Open,
            created_at: Utc::now(),
            closed_at: None,
            raw_update: new.raw_update,
        };

        let raw = item.raw_update.as_ref().map(|v| v.to_string());
        self.conn().execute(
            &format!(
                "INSERT INTO items ({ITEM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                item.id.to_string(),
                item.telegram_user_id,
                item.telegram_chat_id,
                item.source_message_id,
                item.source.as_str(),
                item.kind.as_str(),
                item.horizon.map(|h| h.tag()),
                item.text,
                item.transcript,
                item.summary,
                item.title,
                item.status.as_str(),
                format_ts(item.created_at),
                None::<String>,
                raw,
            ],
        )?;

        debug!("Stored item {} ({}, {:?})", item.id, item.kind.as_str(), item.horizon);
        Ok(item)
    }

    pub fn get_item(&self, id: Uuid) -> DbResult<Option<Item>> {
        let conn = self.conn();
        let item = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
                params![id.to_string()],
                row_to_item,
            )
            .optional()?;
        Ok(item)
    }

    /// Items matching the filter, newest first.
    pub fn list_items(&self, filter: &ItemFilter) -> DbResult<Vec<Item>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Value> = Vec::new();

        if let Some(chat_id) = filter.chat_id {
            args.push(Value::Integer(chat_id));
            clauses.push(format!("telegram_chat_id = ?{}", args.len()));
        }
        if let Some(status) = filter.status {
            args.push(Value::Text(status.as_str().to_string()));
            clauses.push(format!("status = ?{}", args.len()));
        }
        if !filter.kinds.is_empty() {
            let mut slots = Vec::new();
            for kind in &filter.kinds {
                args.push(Value::Text(kind.as_str().to_string()));
                slots.push(format!("?{}", args.len()));
            }
            clauses.push(format!("kind IN ({})", slots.join(", ")));
        }
        if !filter.horizons.is_empty() {
            let mut slots = Vec::new();
            for horizon in &filter.horizons {
                args.push(Value::Text(horizon.tag().to_string()));
                slots.push(format!("?{}", args.len()));
            }
            clauses.push(format!("horizon_tag IN ({})", slots.join(", ")));
        }

        let mut sql = format!("SELECT {ITEM_COLUMNS} FROM items");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(args), row_to_item)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Newest items across all chats.
    pub fn recent_items(&self, limit: usize) -> DbResult<Vec<Item>> {
        self.list_items(&ItemFilter::new().with_limit(limit))
    }

    /// Close an item. Only its author may close it.
    pub fn close_item(&self, id: Uuid, user_id: i64) -> DbResult<CloseOutcome> {
        let conn = self.conn();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM items WHERE id = ?1 AND telegram_user_id = ?2",
                params![id.to_string(), user_id],
                |row| row.get(0),
            )
            .optional()?;

        match status.as_deref().and_then(Status::parse) {
            None => Ok(CloseOutcome::NotFound),
            Some(Status::Closed) => Ok(CloseOutcome::AlreadyClosed),
            Some(Status::Open) => {
                conn.execute(
                    "UPDATE items SET status = 'closed', closed_at = ?1 WHERE id = ?2",
                    params![format_ts(Utc::now()), id.to_string()],
                )?;
                info!("✅ Closed item {}", id);
                Ok(CloseOutcome::Closed)
            }
        }
    }

    /// Reopen a closed item. Same ownership rule as [`Database::close_item`].
    pub fn reopen_item(&self, id: Uuid, user_id: i64) -> DbResult<ReopenOutcome> {
        let conn = self.conn();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM items WHERE id = ?1 AND telegram_user_id = ?2",
                params![id.to_string(), user_id],
                |row| row.get(0),
            )
            .optional()?;

        match status.as_deref().and_then(Status::parse) {
            None => Ok(ReopenOutcome::NotFound),
            Some(Status::Open) => Ok(ReopenOutcome::AlreadyOpen),
            Some(Status::Closed) => {
                conn.execute(
                    "UPDATE items SET status = 'open', closed_at = NULL WHERE id = ?1",
                    params![id.to_string()],
                )?;
                info!("↩️ Reopened item {}", id);
                Ok(ReopenOutcome::Reopened)
            }
        }
    }

    /// Chats that have at least one open item.
    pub fn chats_with_open_items(&self) -> DbResult<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT telegram_chat_id FROM items WHERE status = 'open' ORDER BY telegram_chat_id",
        )?;
        let chats = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(chats)
    }

    pub fn count_items(&self) -> DbResult<usize> {
        let count: i64 = self.conn().query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let current: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let latest = MIGRATIONS.last().map_or(0, |m| m.version);

    if current > latest {
        return Err(DbError::UnsupportedSchemaVersion { found: current, supported: latest });
    }
    if current == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;
    info!("Database schema migrated {} -> {}", current, latest);
    Ok(())
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<Item> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    let source: String = row.get(4)?;
    let kind: String = row.get(5)?;
    let horizon: Option<String> = row.get(6)?;
    let status: String = row.get(11)?;
    let created_at: String = row.get(12)?;
    let closed_at: Option<String> = row.get(13)?;
    let raw: Option<String> = row.get(14)?;

    Ok(Item {
        id,
        telegram_user_id: row.get(1)?,
        telegram_chat_id: row.get(2)?,
        source_message_id: row.get(3)?,
        source: Source::parse(&source),
        kind: Kind::parse(&kind).unwrap_or(Kind::Task),
        horizon: horizon.as_deref().and_then(Horizon::from_tag),
        text: row.get(7)?,
        transcript: row.get(8)?,
        summary: row.get(9)?,
        title: row.get(10)?,
        status: Status::parse(&status).unwrap_or(Status::Open),
        created_at: parse_ts(12, &created_at)?,
        closed_at: closed_at.as_deref().map(|s| parse_ts(13, s)).transpose()?,
        raw_update: raw.and_then(|r| serde_json::from_str(&r).ok()),
    })
}
