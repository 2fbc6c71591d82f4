//! Best-effort lead log.
//!
//! Every generated report appends one row to a spreadsheet. Recording never
//! fails the pipeline: an unconfigured or unreachable store makes
//! [`LeadStore::record`] return `false`.
//!
//! The credentials file is normally a Google service-account key; an access
//! token is minted from it (spreadsheets scope) and reused until it nears
//! expiry. A file holding just `{"access_token": "..."}` is used as is.
//!
//! Row layout (fixed column order):
//!
//! | Column | Value |
//! |--------|-------|
//! | 1 | timestamp (`%Y-%m-%d %H:%M:%S`, UTC) |
//! | 2-6 | email, company, website, persona, report filename |
//! | 7.. | one cell per answer, ordered C, A, R, E, others, then by question id |
//! | last 3 | client IP, user agent, `Report Generated` |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::LeadsConfig;
use crate::models::{ReportRequest, SurveyAnswer};

pub const LEAD_STATUS: &str = "Report Generated";

/// Everything written for one generated report.
#[derive(Debug, Clone)]
pub struct LeadRecord<'a> {
    pub timestamp: DateTime<Utc>,
    pub request: &'a ReportRequest,
    pub report_filename: &'a str,
}

/// Answers in lead-column order.
pub fn ordered_answers(answers: &[SurveyAnswer]) -> Vec<&SurveyAnswer> {
    let mut sorted: Vec<&SurveyAnswer> = answers.iter().collect();
    sorted.sort_by(|a, b| {
        a.category()
            .rank()
            .cmp(&b.category().rank())
            .then_with(|| a.category.cmp(&b.category))
            .then_with(|| a.question_id.cmp(&b.question_id))
    });
    sorted
}

pub fn lead_row(record: &LeadRecord<'_>) -> Vec<String> {
    let req = record.request;
    let mut row = vec![
        record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        req.recipient().unwrap_or_default().to_string(),
        req.company_name.clone(),
        req.company_website.clone().unwrap_or_default(),
        req.persona.clone(),
        record.report_filename.to_string(),
    ];
    row.extend(
        ordered_answers(&req.answers)
            .into_iter()
            .map(|a| a.answer_text.clone()),
    );
    row.push(req.client.ip_address.clone().unwrap_or_default());
    row.push(req.client.user_agent.clone().unwrap_or_default());
    row.push(LEAD_STATUS.to_string());
    row
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    fn name(&self) -> &str;

    /// `true` only when the row was durably appended.
    async fn record(&self, record: &LeadRecord<'_>) -> bool;
}

/// Store used when no spreadsheet is configured.
pub struct DisabledLeadStore {
    reason: String,
}

impl DisabledLeadStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl LeadStore for DisabledLeadStore {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn record(&self, record: &LeadRecord<'_>) -> bool {
        debug!(
            company = %record.request.company_name,
            reason = %self.reason,
            "lead not recorded"
        );
        false
    }
}

// ============ Credentials ============

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Minted tokens are replaced this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_expires_in() -> u64 {
    3600
}

/// The JSON key downloaded for a Google service account.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// Contents of `[leads].credentials_file`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Credentials {
    /// A pre-minted OAuth token: `{"access_token": "..."}`.
    AccessToken { access_token: String },
    /// Tokens are minted with the JWT bearer grant and cached until shortly
    /// before they expire.
    ServiceAccount(ServiceAccountKey),
}

impl Credentials {
    pub fn access_token(token: impl Into<String>) -> Self {
        Credentials::AccessToken {
            access_token: token.into(),
        }
    }
}

pub fn read_credentials(path: &Path) -> Result<Credentials> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read credentials file: {}", path.display()))?;
    let creds: Credentials = serde_json::from_str(&content).with_context(|| {
        format!(
            "Credentials file is neither a service-account key nor an access token: {}",
            path.display()
        )
    })?;
    match &creds {
        Credentials::AccessToken { access_token } if access_token.trim().is_empty() => {
            bail!("credentials file has an empty access_token")
        }
        Credentials::ServiceAccount(key) if key.client_email.trim().is_empty() => {
            bail!("service-account key has an empty client_email")
        }
        _ => Ok(creds),
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

enum TokenSource {
    Static(String),
    ServiceAccount {
        key: ServiceAccountKey,
        signing_key: EncodingKey,
        cached: tokio::sync::Mutex<Option<CachedToken>>,
    },
}

async fn mint_token(
    client: &reqwest::Client,
    key: &ServiceAccountKey,
    signing_key: &EncodingKey,
) -> Result<CachedToken> {
    let iat = Utc::now().timestamp();
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: SHEETS_SCOPE,
        aud: &key.token_uri,
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
    };
    let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, signing_key)
        .context("Failed to sign token assertion")?;

    let resp = client
        .post(&key.token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
        .send()
        .await
        .context("Token request failed")?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("Token endpoint returned {}: {}", status, body);
    }
    let body: TokenResponse = resp.json().await.context("Invalid token response")?;
    debug!(client_email = %key.client_email, expires_in = body.expires_in, "sheets token minted");
    Ok(CachedToken {
        token: body.access_token,
        expires_at: Instant::now() + Duration::from_secs(body.expires_in),
    })
}

// ============ Google Sheets ============

/// Appends rows through the Sheets `values:append` endpoint.
pub struct SheetsLeadStore {
    client: reqwest::Client,
    append_url: String,
    auth: TokenSource,
}

impl SheetsLeadStore {
    pub fn new(config: &LeadsConfig, sheet_id: &str, credentials: Credentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        let auth = match credentials {
            Credentials::AccessToken { access_token } => TokenSource::Static(access_token),
            Credentials::ServiceAccount(key) => {
                let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
                    .context("Invalid service-account private_key")?;
                TokenSource::ServiceAccount {
                    key,
                    signing_key,
                    cached: tokio::sync::Mutex::new(None),
                }
            }
        };
        Ok(Self {
            client,
            append_url: format!(
                "{}/v4/spreadsheets/{}/values/{}:append",
                config.base_url.trim_end_matches('/'),
                sheet_id,
                config.range
            ),
            auth,
        })
    }

    async fn access_token(&self) -> Result<String> {
        match &self.auth {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::ServiceAccount {
                key,
                signing_key,
                cached,
            } => {
                let mut cached = cached.lock().await;
                if let Some(current) = cached
                    .as_ref()
                    .filter(|t| t.expires_at > Instant::now() + REFRESH_MARGIN)
                {
                    return Ok(current.token.clone());
                }
                let fresh = mint_token(&self.client, key, signing_key).await?;
                let token = fresh.token.clone();
                *cached = Some(fresh);
                Ok(token)
            }
        }
    }

    async fn append(&self, row: Vec<String>) -> Result<()> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .post(&self.append_url)
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(&token)
            .json(&serde_json::json!({ "values": [row] }))
            .send()
            .await
            .context("Sheets request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Sheets append returned {}: {}", status, body);
        }
        Ok(())
    }
}

#[async_trait]
impl LeadStore for SheetsLeadStore {
    fn name(&self) -> &str {
        "sheets"
    }

    async fn record(&self, record: &LeadRecord<'_>) -> bool {
        match self.append(lead_row(record)).await {
            Ok(()) => {
                info!(company = %record.request.company_name, "lead recorded");
                true
            }
            Err(e) => {
                warn!(error = %e, "lead recording failed");
                false
            }
        }
    }
}

/// Builds the configured store, or a disabled one when the sheet id or
/// credentials are missing. Never fails.
pub fn create_lead_store(config: &LeadsConfig) -> Arc<dyn LeadStore> {
    let Some(sheet_id) = config.sheet_id.as_deref().filter(|s| !s.trim().is_empty()) else {
        warn!("lead log disabled: GOOGLE_SHEETS_ID is not set");
        return Arc::new(DisabledLeadStore::new("GOOGLE_SHEETS_ID is not set"));
    };
    let store = read_credentials(&config.credentials_file)
        .and_then(|creds| SheetsLeadStore::new(config, sheet_id, creds));
    match store {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "lead log disabled");
            Arc::new(DisabledLeadStore::new(e.to_string()))
        }
    }
}
