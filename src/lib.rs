//! Chaos H-2000: a Telegram bot that turns text and voice notes into tasks,
//! ideas and notes, with digests, a Google Sheets export and an HTTP API for
//! iOS Shortcuts.

pub mod bot;
pub mod capture;
pub mod config;
pub mod database;
pub mod digest;
pub mod error;
pub mod groq;
pub mod item;
pub mod scheduler;
pub mod server;
pub mod sheets;
pub mod state;
pub mod telegram;
pub mod telegram_log;
#[cfg(test)]
mod testing;
pub mod update;
pub mod worker;

pub use config::Config;
pub use database::Database;
pub use server::{create_router, serve};
pub use state::AppState;
