//! HTTP surface: `POST /process/`.
//!
//! The handler saves the upload, renders it to page images, runs the
//! [`InvoicePipeline`] and answers `201 Created` with the [`InvoiceData`]
//! JSON. Errors are mapped to status codes in one place, [`ApiError`]:
//!
//! | error                                   | status |
//! |-----------------------------------------|--------|
//! | bad upload, non-PDF, conversion failure | 403    |
//! | agent failure, provider not configured  | 502    |
//! | anything else                           | 500    |

use crate::error::InvoiceError;
use crate::extract::InvoicePipeline;
use crate::invoice::InvoiceData;
use crate::pipeline::render;
use crate::storage::{self, IMAGES_SUBDIR};
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Json, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Multipart field carrying the PDF.
pub const DOCUMENT_FIELD: &str = "document";
/// Accepted alias for [`DOCUMENT_FIELD`].
pub const FILE_FIELD_ALIAS: &str = "file";

/// Upload handling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Root for `pdf/` uploads and `pdf2img/` page images.
    pub uploads_root: PathBuf,
    /// Lower-case file extensions accepted for uploads.
    pub allowed_extensions: Vec<String>,
    /// Remove the upload and its page images once the request is answered.
    pub cleanup_temp_files: bool,
    /// Largest accepted request body in bytes.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            uploads_root: PathBuf::from("uploads"),
            allowed_extensions: vec!["pdf".to_string()],
            cleanup_temp_files: true,
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<InvoicePipeline>,
    pub server: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(pipeline: InvoicePipeline, server: ServerConfig) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            server: Arc::new(server),
        }
    }
}

/// Standard error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message describing what went wrong
    pub error: String,
}

/// [`InvoiceError`] as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub InvoiceError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            e if e.is_client_error() => StatusCode::FORBIDDEN,
            InvoiceError::AgentFailure { .. } | InvoiceError::ProviderNotConfigured { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<InvoiceError> for ApiError {
    fn from(err: InvoiceError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed ({}): {}", status, self.0);
        } else {
            info!("Request rejected ({}): {}", status, self.0);
        }
        let error_response = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(error_response)).into_response()
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let body_limit = state.server.max_upload_bytes;
    Router::new()
        .route("/process/", post(process_document))
        .route("/process", post(process_document))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Extract invoices from an uploaded PDF.
pub async fn process_document(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<InvoiceData>), ApiError> {
    let mut multipart = multipart.map_err(|e| InvoiceError::InvalidInput {
        reason: e.to_string(),
    })?;
    let (filename, bytes) = read_document(&mut multipart).await?;

    let pdf_path = storage::save_upload(
        &bytes,
        &filename,
        &state.server.uploads_root,
        &state.server.allowed_extensions,
    )
    .await?;

    let images_root = state.server.uploads_root.join(IMAGES_SUBDIR);
    let mut temp_paths = vec![pdf_path.clone()];
    let outcome =
        match render::convert_pdf(&pdf_path, &images_root, state.pipeline.config()).await {
            Ok(image_dir) => {
                temp_paths.push(image_dir.clone());
                state.pipeline.run(&image_dir).await
            }
            Err(e) => Err(e),
        };

    if state.server.cleanup_temp_files {
        tokio::spawn(async move { storage::cleanup_paths(&temp_paths).await });
    }

    let data = outcome?;
    info!("'{}': {} invoices extracted", filename, data.len());
    Ok((StatusCode::CREATED, Json(data)))
}

/// Find the document field and return its filename and contents.
async fn read_document(multipart: &mut Multipart) -> Result<(String, Vec<u8>), InvoiceError> {
    let invalid = |reason: String| InvoiceError::InvalidInput { reason };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| invalid(format!("Failed to read multipart field: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name != DOCUMENT_FIELD && name != FILE_FIELD_ALIAS {
            continue;
        }
        let filename = field.file_name().unwrap_or("").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| invalid(format!("Failed to read '{name}' field: {e}")))?;
        return Ok((filename, bytes.to_vec()));
    }

    Err(invalid(format!("missing '{DOCUMENT_FIELD}' file field")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;

    #[test]
    fn client_errors_are_forbidden() {
        let e = ApiError(InvoiceError::NotAPdf {
            file: "a.pdf".into(),
            magic: b"GIF8".to_vec(),
        });
        assert_eq!(e.status(), StatusCode::FORBIDDEN);

        let e = ApiError(InvoiceError::ConversionFailure {
            file: "a".into(),
            detail: "bad xref".into(),
        });
        assert_eq!(e.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn agent_failure_is_bad_gateway() {
        let e = ApiError(InvoiceError::AgentFailure {
            stage: Stage::Structuring,
            page: 1,
            retries: 3,
            detail: "429".into(),
        });
        assert_eq!(e.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn internal_is_server_error() {
        let response = ApiError(InvoiceError::Internal("boom".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn default_server_config() {
        let c = ServerConfig::default();
        assert_eq!(c.allowed_extensions, ["pdf"]);
        assert!(c.cleanup_temp_files);
    }
}
