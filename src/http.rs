//! HTTP upload endpoint for direct OCR, outside the mailbox flow.

use std::path::PathBuf;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tracing::{info, warn};

use crate::ocr::DocumentRecognizer;

/// Largest accepted upload.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Form field that carries the uploaded file.
const FILE_FIELD: &str = "file";

#[derive(Clone)]
pub struct HttpState {
    recognizer: DocumentRecognizer,
    scratch_dir: PathBuf,
}

/// Build the router: `POST /ocr/pdf`, `POST /ocr/image`, `GET /health`.
pub fn ocr_routes(recognizer: DocumentRecognizer, scratch_dir: impl Into<PathBuf>) -> Router {
    let state = HttpState {
        recognizer,
        scratch_dir: scratch_dir.into(),
    };

    Router::new()
        .route("/health", get(health))
        .route("/ocr/pdf", post(convert_pdf))
        .route("/ocr/image", post(convert_image))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mail-ocr"
    }))
}

async fn convert_pdf(State(state): State<HttpState>, multipart: Multipart) -> Response {
    let (name, bytes) = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(reason) => return bad_request(reason),
    };
    info!(file = ?name, bytes = bytes.len(), "Received document upload");

    // Deleted when `upload` drops, on every path out of this handler.
    let upload = match tempfile::Builder::new()
        .prefix("uploaded-")
        .suffix(".pdf")
        .tempfile_in(&state.scratch_dir)
    {
        Ok(file) => file,
        Err(e) => return bad_request(e),
    };
    if let Err(e) = tokio::fs::write(upload.path(), &bytes).await {
        return bad_request(e);
    }

    match state.recognizer.recognize_document(upload.path()).await {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => bad_request(e),
    }
}

async fn convert_image(State(state): State<HttpState>, multipart: Multipart) -> Response {
    let (name, bytes) = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(reason) => return bad_request(reason),
    };
    info!(file = ?name, bytes = bytes.len(), "Received image upload");

    match state.recognizer.recognize_image(&bytes).await {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => bad_request(e),
    }
}

/// The `file` field's original name and bytes.
async fn read_upload(mut multipart: Multipart) -> Result<(Option<String>, Bytes), String> {
    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let name = field.file_name().map(|s| s.to_string());
        let bytes = field.bytes().await.map_err(|e| e.to_string())?;
        if bytes.is_empty() {
            return Err("uploaded file is empty".into());
        }
        return Ok((name, bytes));
    }
    Err(format!("missing '{FILE_FIELD}' field"))
}

fn bad_request(reason: impl std::fmt::Display) -> Response {
    warn!(error = %reason, "Upload rejected");
    (
        StatusCode::BAD_REQUEST,
        format!("Error processing file: {reason}"),
    )
        .into_response()
}
