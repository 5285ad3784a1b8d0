//! Application state shared by the HTTP handlers, the worker and the scheduler.

use std::sync::Arc;
use std::time::Instant;

use teloxide::Bot;
use thiserror::Error;
use tracing::info;

use crate::bot::BotHandler;
use crate::capture::Capture;
use crate::config::Config;
use crate::database::{Database, DbError};
use crate::digest::{self, DigestKind};
use crate::groq::{GroqClient, GroqError, GroqModels};
use crate::sheets::{SheetsClient, SheetsError, SyncReport};
use crate::telegram::TelegramClient;
use crate::worker::JobSender;

/// Most items exported to the spreadsheet, newest first.
pub const SHEET_EXPORT_LIMIT: usize = 5000;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to build Groq client: {0}")]
    Groq(#[from] GroqError),

    #[error("failed to build Sheets client: {0}")]
    Sheets(#[from] SheetsError),
}

/// Failure of an on-demand or scheduled job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Google Sheets is not configured")]
    SheetsNotConfigured,

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Sheets(#[from] SheetsError),
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<Database>,
    pub groq: Arc<GroqClient>,
    pub telegram: Arc<TelegramClient>,
    pub capture: Arc<Capture>,
    /// Present only when the spreadsheet and credentials are configured.
    pub sheets: Option<Arc<SheetsClient>>,
    pub jobs: JobSender,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, db: Database, bot: Bot, jobs: JobSender) -> Result<Self, StateError> {
        let groq = GroqClient::new(
            config.groq_api_key.clone(),
            config.groq_base_url.clone(),
            GroqModels {
                transcribe: config.groq_transcribe_model.clone(),
                transcript_edit: config.groq_transcript_edit_model.clone(),
                summary: config.groq_summary_model.clone(),
            },
        )?;
        if !groq.has_key() {
            info!("GROQ_API_KEY not set, voice capture and summaries are disabled");
        }

        let sheets = match &config.sheets {
            Some(sheets) => Some(Arc::new(SheetsClient::new(
                sheets.service_account.clone(),
                sheets.spreadsheet_id.clone(),
            )?)),
            None => None,
        };

        let db = Arc::new(db);
        let groq = Arc::new(groq);
        let capture = Arc::new(Capture::new(db.clone(), groq.clone()));

        Ok(Self {
            config: Arc::new(config),
            db,
            groq,
            telegram: Arc::new(TelegramClient::new(bot)),
            capture,
            sheets,
            jobs,
            started_at: Instant::now(),
        })
    }

    pub fn bot_handler(&self) -> BotHandler {
        BotHandler::new(self.config.clone(), self.db.clone(), self.telegram.clone(), self.capture.clone())
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Export the newest items to the spreadsheet.
    pub async fn sync_sheets(&self) -> Result<SyncReport, JobError> {
        let sheets = self.sheets.as_ref().ok_or(JobError::SheetsNotConfigured)?;
        let items = self.db.recent_items(SHEET_EXPORT_LIMIT)?;
        Ok(sheets.sync_items(&items).await?)
    }

    /// Send a digest to every chat with open items. Returns the number of messages sent.
    pub async fn send_digest(&self, kind: DigestKind) -> Result<usize, JobError> {
        Ok(digest::send_digests(&self.db, &self.telegram, kind, self.config.timezone).await?)
    }
}
