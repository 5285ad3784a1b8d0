//! Local stand-ins for the Telegram Bot API and Groq, served by axum on a
//! loopback port so handler tests exercise the real HTTP clients.

use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use teloxide::Bot;

pub const BOT_TOKEN: &str = "123456:TEST-token";

/// Bytes served for every file download.
pub const VOICE_BYTES: &[u8] = b"OggS-voice-note";

/// Bot API calls received so far, as `(method, payload)`.
#[derive(Clone, Default)]
pub struct Calls(Arc<Mutex<Vec<(String, Value)>>>);

impl Calls {
    fn push(&self, method: String, payload: Value) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push((method, payload));
    }

    /// Payloads sent to one method, in call order.
    pub fn of(&self, method: &str) -> Vec<Value> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(m, _)| m.eq_ignore_ascii_case(method))
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Text of the last `sendMessage`.
    pub fn last_text(&self) -> String {
        self.of("sendMessage")
            .last()
            .and_then(|p| p["text"].as_str().map(str::to_string))
            .unwrap_or_default()
    }

    /// Text of the last `answerCallbackQuery`.
    pub fn last_answer(&self) -> Option<String> {
        self.of("answerCallbackQuery")
            .last()
            .and_then(|p| p["text"].as_str().map(str::to_string))
    }
}

async fn listen(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{addr}")
}

async fn telegram_api(State(calls): State<Calls>, uri: Uri, body: Bytes) -> Response {
    let path = uri.path().trim_start_matches('/');
    if path.starts_with("file/") {
        return VOICE_BYTES.into_response();
    }

    let method = path.rsplit('/').next().unwrap_or_default().to_string();
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let result = match method.to_lowercase().as_str() {
        "sendmessage" | "editmessagereplymarkup" => json!({
            "message_id": 500,
            "date": 1_760_000_000,
            "chat": {"id": payload["chat_id"].as_i64().unwrap_or(0), "type": "private", "first_name": "Аня"},
            "text": payload["text"].as_str().unwrap_or("📌"),
        }),
        "getfile" => json!({
            "file_id": payload["file_id"],
            "file_unique_id": "u1",
            "file_size": VOICE_BYTES.len(),
            "file_path": "voice-1.oga",
        }),
        _ => json!(true),
    };
    calls.push(method, payload);
    Json(json!({"ok": true, "result": result})).into_response()
}

/// Start a fake Bot API. The returned bot talks to it.
pub async fn telegram() -> (Bot, Calls) {
    let calls = Calls::default();
    let url = listen(Router::new().fallback(telegram_api).with_state(calls.clone())).await;
    let bot = Bot::new(BOT_TOKEN).set_api_url(reqwest::Url::parse(&url).unwrap());
    (bot, calls)
}

/// Canned Groq answers. `None` makes that endpoint answer 500.
#[derive(Debug, Clone, Copy)]
pub struct GroqReplies {
    pub transcript: &'static str,
    pub polished: Option<&'static str>,
    pub extract: Option<&'static str>,
}

async fn groq_api(State(replies): State<GroqReplies>, uri: Uri, body: Bytes) -> Response {
    let content = match uri.path() {
        "/audio/transcriptions" => return Json(json!({"text": replies.transcript})).into_response(),
        "/chat/completions" => {
            let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
            // only summarization asks for a JSON object
            if request["response_format"].is_null() { replies.polished } else { replies.extract }
        }
        _ => return StatusCode::NOT_FOUND.into_response(),
    };

    match content {
        Some(content) => Json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        }))
        .into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "model overloaded").into_response(),
    }
}

/// Start a fake Groq API and return its base URL.
pub async fn groq(replies: GroqReplies) -> String {
    listen(Router::new().fallback(groq_api).with_state(replies)).await
}
