//! HTTP API for KnowVault
//!
//! ## Endpoint Map
//!
//! | Method | Path      | Description                                    |
//! |--------|-----------|------------------------------------------------|
//! | GET    | `/`       | Health check                                   |
//! | POST   | `/upload` | Multipart upload ingested into the tenant's documents |
//! | POST   | `/chat`   | One chat turn for a tenant                     |
//!
//! Failures are returned as `{"error": {"code", "message"}}` with a status
//! derived from the error kind.

use crate::error::{Error, ErrorKind, Result};
use crate::knowledge::{IngestionGateway, Source};
use crate::session::SessionGateway;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ingestion: Arc<IngestionGateway>,
    pub sessions: Arc<SessionGateway>,
    /// Root directory for uploaded files
    pub upload_dir: PathBuf,
    /// Session id used when a chat request omits one
    pub default_session_id: String,
}

/// Build the complete HTTP application
pub fn build_app(state: AppState, cors_origins: &[String], max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/upload", post(upload))
        .route("/chat", post(chat))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors(cors_origins))
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

/// API error detail
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl From<&Error> for ApiError {
    fn from(e: &Error) -> Self {
        Self {
            error: ApiErrorDetail {
                code: e.kind().code().to_string(),
                message: e.message(),
            },
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::IngestionFailure => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::GenerationFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = status_for(self.kind());
        if status.is_server_error() {
            tracing::error!(code = self.kind().code(), error = %self, "Request failed");
        }
        (status, Json(ApiError::from(&self))).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    message: String,
    version: String,
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "KnowVault API is running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct UploadResponse {
    status: String,
    filename: String,
    target_table: String,
    chunks_added: usize,
    skipped: bool,
}

#[derive(Default)]
struct UploadForm {
    file: Option<(String, Vec<u8>)>,
    user_id: String,
    session_id: String,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm> {
    let mut form = UploadForm::default();
    let bad = |e: axum::extract::multipart::MultipartError| {
        Error::Validation(format!("invalid multipart body: {}", e))
    };

    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(bad)?;
                form.file = Some((file_name, bytes.to_vec()));
            }
            "user_id" => form.user_id = field.text().await.map_err(bad)?,
            "session_id" => form.session_id = field.text().await.map_err(bad)?,
            _ => {}
        }
    }
    Ok(form)
}

/// Final path component of a client-supplied file name
fn safe_file_name(raw: &str) -> Result<String> {
    let normalized = raw.replace('\\', "/");
    Path::new(&normalized)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| Error::Validation("uploaded file needs a file name".to_string()))
}

async fn upload(State(state): State<AppState>, multipart: Multipart) -> Result<Json<UploadResponse>> {
    let form = read_upload_form(multipart).await?;
    let (raw_name, bytes) = form
        .file
        .ok_or_else(|| Error::Validation("missing 'file' field".to_string()))?;
    let filename = safe_file_name(&raw_name)?;

    // Claim the namespace before touching its upload directory.
    let namespace = state
        .ingestion
        .prepare(&form.user_id, &form.session_id)
        .await?;
    let dir = state.upload_dir.join(namespace.as_str());
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| Error::Ingestion(format!("cannot create {}: {}", dir.display(), e)))?;
    let path = dir.join(&filename);
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| Error::Ingestion(format!("cannot write {}: {}", path.display(), e)))?;

    tracing::info!(
        user_id = %form.user_id,
        session_id = %form.session_id,
        filename = %filename,
        bytes = bytes.len(),
        "Received upload"
    );

    let mut metadata = BTreeMap::new();
    metadata.insert("filename".to_string(), filename.clone());
    let outcome = state
        .ingestion
        .ingest(&Source::Path(path), &form.user_id, &form.session_id, metadata)
        .await?;

    Ok(Json(UploadResponse {
        status: "success".to_string(),
        filename,
        target_table: outcome.namespace.to_string(),
        chunks_added: outcome.chunks_added,
        skipped: outcome.skipped,
    }))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatResponse {
    response: String,
}

async fn chat(
    State(state): State<AppState>,
    request: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>> {
    let Json(request) = request.map_err(|e| Error::Validation(e.body_text()))?;
    let session_id = request
        .session_id
        .unwrap_or_else(|| state.default_session_id.clone());

    let response = state
        .sessions
        .respond(&request.message, &request.user_id, &session_id)
        .await?;
    Ok(Json(ChatResponse { response }))
}

// =============================================================================
// CORS
// =============================================================================

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(parsed)
    }
}
