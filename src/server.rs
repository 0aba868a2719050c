//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload` | Upload one file (multipart field `file`), parse and save it |
//! | `GET`  | `/api/data` | Return the most recently saved parse result |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Every failure is answered with a JSON body carrying a readable message:
//!
//! ```json
//! { "error": "unsupported file type" }
//! ```
//!
//! Status codes: 400 (missing file, invalid name, unsupported type),
//! 404 (no saved data), 409 (name taken under the `reject` policy),
//! 413 (body over `server.max_upload_bytes`), 500 (filesystem or parse errors).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::get::{latest_saved_data, RetrieveError};
use crate::ingest::{ingest_upload, IngestError};
use crate::models::ParsedContent;
use crate::storage::Storage;

/// Multipart field carrying the upload.
const FILE_FIELD: &str = "file";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    storage: Arc<Storage>,
}

/// Builds the router over an explicit storage layout.
pub fn router(storage: Storage, max_upload_bytes: usize) -> Router {
    let state = AppState {
        storage: Arc::new(storage),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/upload", post(handle_upload))
        .route("/api/data", get(handle_data))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Starts the HTTP server.
///
/// Creates the storage directories, binds to `[server].bind`, and serves
/// until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let storage = Storage::new(&config.storage);
    storage.ensure_dirs().await?;

    let app = router(storage, config.server.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        bind = %config.server.bind,
        uploads = %config.storage.upload_dir.display(),
        saved = %config.storage.saved_dir.display(),
        "upload server listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        let status = match &err {
            IngestError::Conflict(_) => StatusCode::CONFLICT,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        match &err {
            IngestError::UnsupportedType(name) | IngestError::InvalidName(name) => {
                tracing::warn!(file = %name, error = %err, "upload rejected")
            }
            _ if status.is_server_error() => tracing::error!(error = %err, "upload failed"),
            _ => tracing::warn!(error = %err, "upload rejected"),
        }
        AppError {
            status,
            message: err.to_string(),
        }
    }
}

impl From<RetrieveError> for AppError {
    fn from(err: RetrieveError) -> Self {
        let status = match err {
            RetrieveError::NoData => StatusCode::NOT_FOUND,
            _ => {
                tracing::error!(error = %err, "retrieval failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError {
            status,
            message: err.to_string(),
        }
    }
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

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    original_file_path: String,
    saved_file_path: String,
    content: ParsedContent,
}

/// Handler for `POST /upload`.
///
/// Takes the first `file` field and ignores the rest. A request that is not
/// multipart at all is treated like one without a file.
async fn handle_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let mut multipart = multipart.map_err(|_| IngestError::MissingFile)?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| AppError {
        status: e.status(),
        message: e.body_text(),
    })? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let data = field.bytes().await.map_err(|e| AppError {
            status: e.status(),
            message: e.body_text(),
        })?;
        upload = Some((file_name, data));
        break;
    }

    let (file_name, data) = upload.ok_or(IngestError::MissingFile)?;
    let outcome = ingest_upload(&state.storage, file_name.as_deref(), &data).await?;

    Ok(Json(UploadResponse {
        message: "file uploaded and processed successfully".to_string(),
        original_file_path: outcome.original_file_path.display().to_string(),
        saved_file_path: outcome.saved_file_path.display().to_string(),
        content: outcome.content,
    }))
}

// ============ GET /api/data ============

#[derive(Serialize)]
struct DataResponse {
    data: serde_json::Value,
}

/// Handler for `GET /api/data`.
async fn handle_data(State(state): State<AppState>) -> Result<Json<DataResponse>, AppError> {
    let saved = latest_saved_data(&state.storage).await?;
    Ok(Json(DataResponse { data: saved.data }))
}
