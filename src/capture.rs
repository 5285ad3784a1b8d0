//! Turns raw input into stored items: transcription, cleanup,
//! classification and persistence.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::database::{Database, DbError};
use crate::groq::{Extract, GroqClient, GroqError};
use crate::item::{Item, NewItem, Source};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("nothing to capture")]
    Empty,

    #[error("transcription returned no text")]
    EmptyTranscript,

    #[error("transcription failed: {0}")]
    Transcription(#[source] GroqError),

    #[error(transparent)]
    Database(#[from] DbError),
}

#[derive(Debug, Clone)]
pub enum CaptureInput {
    Text(String),
    Audio { bytes: Vec<u8>, filename: String },
}

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub user_id: i64,
    pub chat_id: i64,
    pub message_id: Option<i64>,
    pub source: Source,
    pub raw: Option<serde_json::Value>,
    pub input: CaptureInput,
}

pub struct Capture {
    db: Arc<Database>,
    groq: Arc<GroqClient>,
}

impl Capture {
    pub fn new(db: Arc<Database>, groq: Arc<GroqClient>) -> Self {
        Self { db, groq }
    }

    pub async fn capture(&self, request: CaptureRequest) -> Result<Item, CaptureError> {
        let (text, transcript) = match request.input {
            CaptureInput::Text(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    return Err(CaptureError::Empty);
                }
                (text, None)
            }
            CaptureInput::Audio { bytes, filename } => {
                let transcript = self
                    .groq
                    .transcribe(bytes, &filename)
                    .await
                    .map_err(CaptureError::Transcription)?;
                if transcript.is_empty() {
                    return Err(CaptureError::EmptyTranscript);
                }
                let polished = match self.groq.polish_transcript(&transcript).await {
                    Ok(p) if !p.is_empty() => p,
                    Ok(_) => transcript.clone(),
                    Err(e) => {
                        warn!("Transcript polishing failed, keeping raw text: {e}");
                        transcript.clone()
                    }
                };
                (polished, Some(transcript))
            }
        };

        let extract = match self.groq.summarize_and_classify(&text).await {
            Ok(extract) => extract,
            Err(e) => {
                warn!("Summarization failed, using heuristics: {e}");
                Extract::heuristic(&text)
            }
        };

        let item = self.db.insert_item(NewItem {
            telegram_user_id: request.user_id,
            telegram_chat_id: request.chat_id,
            source_message_id: request.message_id,
            source: request.source,
            kind: extract.kind,
            horizon: extract.horizon,
            text,
            transcript,
            summary: extract.summary,
            title: extract.title,
            raw_update: request.raw,
        })?;

        info!(
            "📝 Captured {} {} for chat {}",
            item.kind.as_str(),
            item.horizon.map(|h| h.tag()).unwrap_or("-"),
            item.telegram_chat_id
        );
        Ok(item)
    }
}
