//! Google Sheets export.
//!
//! Writes a full snapshot of items into one tab per horizon/kind using a
//! service account (OAuth2 JWT bearer flow) and the Sheets v4 REST API.

use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::item::{Item, truncate_chars};

pub const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const REQUIRED_TABS: [&str; 6] = ["Неделя", "Месяц", "Квартал", "Год", "Идея", "Мысли"];
pub const HEADERS: [&str; 3] = ["status", "title", "text"];

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const TOKEN_LIFETIME_SECS: i64 = 3600;
/// Refresh tokens this long before they expire.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("invalid base64 credentials: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid service account json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("jwt signing failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sheets API error {status}: {body}")]
    Api { status: u16, body: String },
}

/// The fields of a Google service-account key file we need.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_json(raw: &str) -> Result<Self, SheetsError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Decode base64 (standard alphabet, whitespace tolerated) and parse.
    pub fn from_base64(b64: &str) -> Result<Self, SheetsError> {
        let compact: String = b64.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = base64::engine::general_purpose::STANDARD.decode(compact)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Deserialize)]
struct SheetMeta {
    properties: Option<SheetProperties>,
}

#[derive(Deserialize)]
struct SheetProperties {
    #[serde(default)]
    title: String,
}

/// Outcome of a sync run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    pub tabs_updated: usize,
    pub tabs: Vec<String>,
    pub rows: usize,
}

/// Quote a tab name for an A1 range: `'Неделя'!A:Z`. Single quotes are doubled.
pub fn a1(tab: &str, range: &str) -> String {
    format!("'{}'!{}", tab.replace('\'', "''"), range)
}

/// Group items into rows per tab: `status | title | text`.
///
/// Every required tab is present, possibly with no rows, so stale rows are
/// cleared when a tab empties out.
pub fn rows_by_tab(items: &[Item]) -> BTreeMap<&'static str, Vec<Vec<String>>> {
    let mut grouped: BTreeMap<&'static str, Vec<Vec<String>>> =
        REQUIRED_TABS.iter().map(|tab| (*tab, Vec::new())).collect();

    for item in items {
        let title = match item.title.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => truncate_chars(item.text.trim(), 80),
        };
        grouped.entry(item.sheet_tab()).or_default().push(vec![
            item.status.as_str().to_string(),
            title,
            item.text.trim().to_string(),
        ]);
    }
    grouped
}

/// Tabs from `required` missing in `existing`, in `required` order.
pub fn missing_tabs<'a>(existing: &HashSet<String>, required: &[&'a str]) -> Vec<&'a str> {
    required.iter().copied().filter(|t| !existing.contains(*t)).collect()
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct SheetsClient {
    key: ServiceAccountKey,
    spreadsheet_id: String,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl SheetsClient {
    pub fn new(key: ServiceAccountKey, spreadsheet_id: String) -> Result<Self, SheetsError> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            key,
            spreadsheet_id,
            http,
            token: Mutex::new(None),
        })
    }

    /// Replace every tab's contents with the current snapshot.
    pub async fn sync_items(&self, items: &[Item]) -> Result<SyncReport, SheetsError> {
        info!("📊 Syncing {} items to spreadsheet {}", items.len(), self.spreadsheet_id);
        let token = self.access_token().await?;
        self.ensure_tabs(&token).await?;

        let grouped = rows_by_tab(items);
        let mut report = SyncReport { tabs_updated: 0, tabs: Vec::new(), rows: 0 };

        for (tab, rows) in grouped {
            self.clear(&token, tab).await?;

            let mut values: Vec<Vec<String>> = Vec::with_capacity(rows.len() + 1);
            values.push(HEADERS.iter().map(|h| h.to_string()).collect());
            report.rows += rows.len();
            values.extend(rows);
            self.write(&token, tab, values).await?;

            report.tabs_updated += 1;
            report.tabs.push(tab.to_string());
        }

        info!("📊 Sheet sync done: {} tabs, {} rows", report.tabs_updated, report.rows);
        Ok(report)
    }

    async fn access_token(&self) -> Result<String, SheetsError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now() + TOKEN_SLACK
        {
            return Ok(token.value.clone());
        }

        let assertion = self.signed_assertion()?;
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        let response = check_status(response).await?;
        let token: TokenResponse = response.json().await?;

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(TOKEN_LIFETIME_SECS as u64));
        debug!("Obtained Google access token (valid {}s)", lifetime.as_secs());
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    fn signed_assertion(&self) -> Result<String, SheetsError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())?;
        Ok(jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)?)
    }

    async fn ensure_tabs(&self, token: &str) -> Result<(), SheetsError> {
        let response = self
            .http
            .get(format!("{SHEETS_API}/{}", self.spreadsheet_id))
            .query(&[("fields", "sheets(properties(title))")])
            .bearer_auth(token)
            .send()
            .await?;
        let meta: SpreadsheetMeta = check_status(response).await?.json().await?;

        let existing: HashSet<String> = meta
            .sheets
            .into_iter()
            .filter_map(|s| s.properties.map(|p| p.title))
            .collect();
        let missing = missing_tabs(&existing, &REQUIRED_TABS);
        if missing.is_empty() {
            return Ok(());
        }

        info!("Creating missing sheet tabs: {:?}", missing);
        let requests: Vec<serde_json::Value> = missing
            .iter()
            .map(|title| serde_json::json!({"addSheet": {"properties": {"title": title}}}))
            .collect();
        let response = self
            .http
            .post(format!("{SHEETS_API}/{}:batchUpdate", self.spreadsheet_id))
            .bearer_auth(token)
            .json(&serde_json::json!({ "requests": requests }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn clear(&self, token: &str, tab: &str) -> Result<(), SheetsError> {
        let range = urlencoding::encode(&a1(tab, "A:Z")).into_owned();
        let response = self
            .http
            .post(format!("{SHEETS_API}/{}/values/{range}:clear", self.spreadsheet_id))
            .bearer_auth(token)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn write(&self, token: &str, tab: &str, values: Vec<Vec<String>>) -> Result<(), SheetsError> {
        let range = urlencoding::encode(&a1(tab, "A1")).into_owned();
        let response = self
            .http
            .put(format!("{SHEETS_API}/{}/values/{range}", self.spreadsheet_id))
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(token)
            .json(&serde_json::json!({ "values": values }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SheetsError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SheetsError::Api {
        status: status.as_u16(),
        body: truncate_chars(&body, 500),
    })
}
