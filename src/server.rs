//! HTTP surface over the report service.
//!
//! A thin JSON wrapper: every report endpoint is a composition over the
//! same [`ReportService`] state machine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/index/status` | Active retrieval tier and namespaces |
//! | `POST` | `/report/generate` | Generate, log lead, email; JSON with base64 PDF |
//! | `POST` | `/report/download` | Generate only; raw PDF body |
//! | `POST` | `/email/send` | Email a previously generated report |
//! | `POST` | `/ingest` | Acquire pages and rebuild an index namespace |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "company_name must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `generation_failed` (500), `send_failed` (500), `ingest_failed` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the survey front end
//! can be served from anywhere.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::chunk::Chunker;
use crate::config::Config;
use crate::coordinator::{ReportService, SendError};
use crate::ingest::{self, IngestReport};
use crate::models::ReportRequest;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReportService>,
    pub chunker: Arc<Chunker>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/index/status", get(handle_index_status))
        .route("/report/generate", post(handle_generate))
        .route("/report/download", post(handle_download))
        .route("/email/send", post(handle_email_send))
        .route("/ingest", post(handle_ingest))
        .layer(cors)
        .with_state(state)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config, service: Arc<ReportService>) -> anyhow::Result<()> {
    let state = AppState {
        service,
        chunker: Arc::new(Chunker::from_config(&config.chunking)?),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "report server listening");
    println!("Report server listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(code: &'static str, err: anyhow::Error) -> AppError {
    warn!(code, error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code,
        message: format!("{:#}", err),
    }
}

/// Fill client metadata from proxy headers when the body does not carry it.
fn with_client_headers(mut request: ReportRequest, headers: &HeaderMap) -> ReportRequest {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
    };
    if request.client.ip_address.is_none() {
        request.client.ip_address = header_str("x-forwarded-for").or_else(|| header_str("x-real-ip"));
    }
    if request.client.user_agent.is_none() {
        request.client.user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
    }
    request
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /index/status ============

#[derive(Serialize)]
struct NamespaceStatus {
    namespace: String,
    chunks: usize,
}

#[derive(Serialize)]
struct IndexStatusResponse {
    tier: String,
    namespaces: Vec<NamespaceStatus>,
    email_configured: bool,
}

async fn handle_index_status(State(state): State<AppState>) -> Json<IndexStatusResponse> {
    let index = state.service.index();
    Json(IndexStatusResponse {
        tier: index.tier().to_string(),
        namespaces: index
            .namespaces()
            .into_iter()
            .map(|(namespace, chunks)| NamespaceStatus { namespace, chunks })
            .collect(),
        email_configured: state.service.email_configured(),
    })
}

// ============ POST /report/generate ============

#[derive(Serialize)]
struct GenerateResponse {
    report_id: String,
    filename: String,
    pdf_base64: String,
    saved_path: Option<String>,
    email_sent: bool,
    email_status: String,
    lead_logged: bool,
    synthesis_degraded: bool,
}

async fn handle_generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ReportRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    request.validate().map_err(|e| bad_request(e.to_string()))?;
    let request = with_client_headers(request, &headers);

    let outcome = state
        .service
        .run(&request)
        .await
        .map_err(|e| internal("generation_failed", e))?;

    Ok(Json(GenerateResponse {
        report_id: outcome.report_id,
        filename: outcome.artifact_name,
        pdf_base64: base64::engine::general_purpose::STANDARD.encode(&outcome.artifact_bytes),
        saved_path: outcome.artifact_path.map(|p| p.display().to_string()),
        email_sent: outcome.email_sent,
        email_status: outcome.email_status,
        lead_logged: outcome.lead_logged,
        synthesis_degraded: outcome.synthesis_failure.is_some(),
    }))
}

// ============ POST /report/download ============

async fn handle_download(
    State(state): State<AppState>,
    Json(request): Json<ReportRequest>,
) -> Result<Response, AppError> {
    request.validate().map_err(|e| bad_request(e.to_string()))?;

    let generated = state
        .service
        .generate(&request)
        .await
        .map_err(|e| internal("generation_failed", e))?;

    let headers = [
        (header::CONTENT_TYPE, "application/pdf".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", generated.filename),
        ),
    ];
    Ok((headers, generated.bytes).into_response())
}

// ============ POST /email/send ============

#[derive(Deserialize)]
struct EmailSendRequest {
    filename: String,
    recipient_email: String,
    company_name: String,
    persona: String,
}

#[derive(Serialize)]
struct EmailSendResponse {
    email_sent: bool,
    email_status: String,
}

async fn handle_email_send(
    State(state): State<AppState>,
    Json(req): Json<EmailSendRequest>,
) -> Result<Json<EmailSendResponse>, AppError> {
    if req.recipient_email.trim().is_empty() {
        return Err(bad_request("recipient_email must not be empty"));
    }
    let status = state
        .service
        .send_existing(&req.filename, &req.recipient_email, &req.company_name, &req.persona)
        .await
        .map_err(|e| match e {
            SendError::InvalidName(_) => bad_request(e.to_string()),
            SendError::NotFound(_) => not_found(e.to_string()),
            SendError::Unreadable { .. } => internal("send_failed", e.into()),
        })?;

    Ok(Json(EmailSendResponse {
        email_sent: status.sent,
        email_status: status.status,
    }))
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    namespace: String,
    company: String,
    urls: Vec<String>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestReport>, AppError> {
    if req.namespace.trim().is_empty() {
        return Err(bad_request("namespace must not be empty"));
    }
    if req.urls.is_empty() {
        return Err(bad_request("urls must not be empty"));
    }
    let report = ingest::ingest_sites(
        state.service.acquirer(),
        &state.chunker,
        state.service.index(),
        req.namespace.trim(),
        &req.company,
        &req.urls,
    )
    .await
    .map_err(|e| internal("ingest_failed", e))?;
    Ok(Json(report))
}
