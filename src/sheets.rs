//! Google Sheets export of every stored prospect.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::db::{Prospect, ProspectStore};

pub const HEADER: [&str; 7] = ["ID", "Logo", "Name", "Website", "Email", "Phone", "CreatedAt"];

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const TOKEN_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[async_trait]
pub trait SheetSink: Send + Sync {
    /// Replace everything in `range` with `rows`.
    async fn replace_range(&self, sheet_id: &str, range: &str, rows: Vec<Vec<String>>) -> Result<()>;
}

/// Sheet name as an A1 reference: single-quoted, embedded quotes doubled.
fn quoted_sheet(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

/// Header row followed by one row per prospect, in the given order.
pub fn build_rows(prospects: &[Prospect]) -> Vec<Vec<String>> {
    let mut rows = Vec::with_capacity(prospects.len() + 1);
    rows.push(HEADER.iter().map(|h| h.to_string()).collect());
    rows.extend(prospects.iter().map(|p| {
        vec![
            p.id.clone(),
            p.logo.clone().unwrap_or_default(),
            p.name.clone(),
            p.website.clone(),
            p.email.clone().unwrap_or_default(),
            p.phone.clone().unwrap_or_default(),
            p.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        ]
    }));
    rows
}

/// Republishes the whole prospect table into the configured sheet.
pub struct SyncJob {
    store: Arc<dyn ProspectStore>,
    sink: Arc<dyn SheetSink>,
    sheet_id: String,
    range: String,
}

impl SyncJob {
    pub fn new(store: Arc<dyn ProspectStore>, sink: Arc<dyn SheetSink>, sheet_id: String, range: String) -> Self {
        Self {
            store,
            sink,
            sheet_id,
            range,
        }
    }

    /// Returns the number of prospect rows written (header excluded).
    pub async fn run(&self) -> Result<usize> {
        let prospects = self.store.list_all().await.context("listing prospects")?;
        let rows = build_rows(&prospects);

        self.sink
            .replace_range(&self.sheet_id, &self.range, rows)
            .await
            .context("writing sheet")?;

        info!("📊 Google Sheet updated with {} prospects", prospects.len());
        Ok(prospects.len())
    }
}

/// Fields of a service-account key file we need.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    pub token_uri: String,
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    value: String,
    expires_at: i64,
}

pub struct GoogleSheetsSink {
    client: reqwest::Client,
    key: ServiceAccountKey,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleSheetsSink {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
        let key: ServiceAccountKey = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path))?;
        Self::new(key)
    }

    pub fn new(key: ServiceAccountKey) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            key,
            token: Mutex::new(None),
        })
    }

    fn signed_assertion(&self, now: i64) -> Result<String> {
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let signing_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())?;
        Ok(encode(&Header::new(Algorithm::RS256), &claims, &signing_key)?)
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        let now = Utc::now().timestamp();

        if let Some(token) = cached.as_ref() {
            if token.expires_at - TOKEN_REFRESH_MARGIN_SECS > now {
                return Ok(token.value.clone());
            }
        }

        debug!("Requesting Google access token for {}", self.key.client_email);
        let assertion = self.signed_assertion(now)?;
        let resp = self
            .client
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("token exchange failed ({}): {}", status, body));
        }

        let token: TokenResponse = resp.json().await?;
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: now + token.expires_in,
        });
        Ok(token.access_token)
    }

    async fn check(resp: reqwest::Response, action: &str) -> Result<()> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(anyhow!("Sheets {} failed ({}): {}", action, status, body))
    }
}

#[async_trait]
impl SheetSink for GoogleSheetsSink {
    async fn replace_range(&self, sheet_id: &str, range: &str, rows: Vec<Vec<String>>) -> Result<()> {
        let token = self.access_token().await?;

        let sheet = quoted_sheet(range);
        let clear_url = format!("{}/{}/values/{}:clear", SHEETS_API, sheet_id, urlencoding::encode(&sheet));
        let resp = self
            .client
            .post(&clear_url)
            .bearer_auth(&token)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        Self::check(resp, "clear").await?;

        let target = format!("{}!A1", sheet);
        let update_url = format!(
            "{}/{}/values/{}?valueInputOption=RAW",
            SHEETS_API,
            sheet_id,
            urlencoding::encode(&target)
        );
        let resp = self
            .client
            .put(&update_url)
            .bearer_auth(&token)
            .json(&serde_json::json!({
                "range": target,
                "majorDimension": "ROWS",
                "values": rows,
            }))
            .send()
            .await?;
        Self::check(resp, "update").await
    }
}
