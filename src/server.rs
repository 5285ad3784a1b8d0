//! HTTP API: Telegram webhook, iOS Shortcuts endpoints and admin tools.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::capture::{CaptureInput, CaptureRequest};
use crate::database::ItemFilter;
use crate::digest::DigestKind;
use crate::error::{ApiError, ApiResult};
use crate::item::{Item, Kind, Source, Status};
use crate::state::AppState;
use crate::update::parse_update;
use crate::worker::Job;

pub const WEBHOOK_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";
pub const SHORTCUTS_TOKEN_HEADER: &str = "x-shortcuts-token";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 1000;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/telegram/webhook", post(telegram_webhook))
        .route("/shortcuts/reminders/daily", get(daily_reminders))
        .route("/shortcuts/reminders/weekly", get(weekly_reminders))
        .route("/shortcuts/capture", post(shortcuts_capture))
        .route("/admin/items", get(admin_items))
        .route("/admin/sheets/sync", post(admin_sheets_sync))
        .route("/admin/digest/{kind}", post(admin_digest))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(state: AppState, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = state.config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🌐 HTTP server listening on {}", addr);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Compare a request header with a configured token. An unset token answers 500.
fn require_token(headers: &HeaderMap, header: &str, expected: Option<&str>, var: &str) -> ApiResult<()> {
    let Some(expected) = expected else {
        return Err(ApiError::Internal(format!("{var} is not configured")));
    };
    let provided = headers.get(header).and_then(|v| v.to_str().ok());
    if provided == Some(expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

fn require_shortcuts(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    require_token(headers, SHORTCUTS_TOKEN_HEADER, state.config.shortcuts_token.as_deref(), "SHORTCUTS_TOKEN")
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    require_token(headers, ADMIN_TOKEN_HEADER, state.config.admin_token.as_deref(), "ADMIN_TOKEN")
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.uptime_seconds(),
    }))
}

async fn telegram_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult<Json<Value>> {
    if let Some(secret) = state.config.telegram_webhook_secret.as_deref() {
        let provided = headers.get(WEBHOOK_SECRET_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(secret) {
            warn!("Webhook call with a wrong secret token");
            return Err(ApiError::Unauthorized);
        }
    }

    // acknowledged and dropped; Telegram would redeliver on an error status
    let Some(incoming) = parse_update(&body) else {
        debug!("Ignoring update ({} bytes)", body.len());
        return Ok(Json(json!({"ok": true})));
    };

    match state.jobs.try_send(Job::Update(incoming)) {
        Ok(()) => Ok(Json(json!({"ok": true}))),
        Err(TrySendError::Full(_)) => Err(ApiError::ServiceUnavailable("job queue is full".into())),
        Err(TrySendError::Closed(_)) => Err(ApiError::ServiceUnavailable("worker is not running".into())),
    }
}

fn reminders(state: &AppState, kind: DigestKind) -> ApiResult<Json<Value>> {
    let items = state.db.list_items(&kind.filter(state.config.owner_chat_id))?;
    Ok(Json(json!({
        "kind": kind,
        "timezone": state.config.timezone.name(),
        "horizon": kind.shortcuts_tag(),
        "items": items,
    })))
}

async fn daily_reminders(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    require_shortcuts(&state, &headers)?;
    reminders(&state, DigestKind::Daily)
}

async fn weekly_reminders(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    require_shortcuts(&state, &headers)?;
    reminders(&state, DigestKind::Weekly)
}

#[derive(Debug, Deserialize)]
struct CaptureBody {
    text: String,
    chat_id: Option<i64>,
    user_id: Option<i64>,
}

async fn shortcuts_capture(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Item>)> {
    require_shortcuts(&state, &headers)?;

    let raw: Value = serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))?;
    let parsed: CaptureBody =
        serde_json::from_value(raw.clone()).map_err(|e| ApiError::BadRequest(format!("invalid body: {e}")))?;

    let chat_id = parsed
        .chat_id
        .or(state.config.owner_chat_id)
        .ok_or_else(|| ApiError::BadRequest("chat_id is required when OWNER_CHAT_ID is not set".into()))?;

    let item = state
        .capture
        .capture(CaptureRequest {
            user_id: parsed.user_id.unwrap_or(chat_id),
            chat_id,
            message_id: None,
            source: Source::Shortcuts,
            raw: Some(raw),
            input: CaptureInput::Text(parsed.text),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(item)))
}

#[derive(Debug, Default, Deserialize)]
struct ItemsQuery {
    status: Option<String>,
    kind: Option<String>,
    limit: Option<String>,
}

impl ItemsQuery {
    fn to_filter(&self) -> ApiResult<ItemFilter> {
        let mut filter = ItemFilter::new();
        if let Some(status) = self.status.as_deref().filter(|s| !s.is_empty()) {
            let status = Status::parse(status).ok_or_else(|| ApiError::BadRequest(format!("unknown status '{status}'")))?;
            filter = filter.with_status(status);
        }
        if let Some(kind) = self.kind.as_deref().filter(|s| !s.is_empty()) {
            let kind = Kind::parse(kind).ok_or_else(|| ApiError::BadRequest(format!("unknown kind '{kind}'")))?;
            filter = filter.with_kind(kind);
        }
        let limit = match self.limit.as_deref().filter(|s| !s.is_empty()) {
            Some(limit) => limit
                .parse::<usize>()
                .map_err(|_| ApiError::BadRequest(format!("invalid limit '{limit}'")))?
                .clamp(1, MAX_LIST_LIMIT),
            None => DEFAULT_LIST_LIMIT,
        };
        Ok(filter.with_limit(limit))
    }
}

async fn admin_items(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ItemsQuery>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let items = state.db.list_items(&query.to_filter()?)?;
    Ok(Json(json!({ "count": items.len(), "items": items })))
}

async fn admin_sheets_sync(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let report = state.sync_sheets().await?;
    Ok(Json(json!({ "ok": true, "report": report })))
}

async fn admin_digest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(kind): Path<String>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let kind = DigestKind::parse(&kind).ok_or_else(|| ApiError::NotFound(format!("digest '{kind}'")))?;
    let sent = state.send_digest(kind).await?;
    Ok(Json(json!({ "kind": kind, "sent": sent })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(name, value.parse().unwrap());
        h
    }

    #[test]
    fn test_require_token() {
        let h = headers(SHORTCUTS_TOKEN_HEADER, "s3cret");
        assert!(require_token(&h, SHORTCUTS_TOKEN_HEADER, Some("s3cret"), "SHORTCUTS_TOKEN").is_ok());
        assert!(matches!(
            require_token(&h, SHORTCUTS_TOKEN_HEADER, Some("other"), "SHORTCUTS_TOKEN"),
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            require_token(&HeaderMap::new(), SHORTCUTS_TOKEN_HEADER, Some("s3cret"), "SHORTCUTS_TOKEN"),
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            require_token(&h, SHORTCUTS_TOKEN_HEADER, None, "SHORTCUTS_TOKEN"),
            Err(ApiError::Internal(_))
        ));
    }

    #[test]
    fn test_items_query() {
        let q = ItemsQuery { status: Some("done".into()), kind: Some("idea".into()), limit: Some("5000".into()) };
        let filter = q.to_filter().unwrap();
        assert_eq!(filter.status, Some(Status::Closed));
        assert_eq!(filter.kinds, vec![Kind::Idea]);
        assert_eq!(filter.limit, Some(MAX_LIST_LIMIT));

        assert_eq!(ItemsQuery::default().to_filter().unwrap().limit, Some(DEFAULT_LIST_LIMIT));

        let bad = ItemsQuery { kind: Some("chore".into()), ..Default::default() };
        assert!(matches!(bad.to_filter(), Err(ApiError::BadRequest(_))));
        let bad = ItemsQuery { limit: Some("lots".into()), ..Default::default() };
        assert!(matches!(bad.to_filter(), Err(ApiError::BadRequest(_))));
    }
}
