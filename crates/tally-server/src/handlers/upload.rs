//! Statement upload handler

use std::sync::Arc;

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{AppError, AppState, AuthUser, MAX_UPLOAD_SIZE};
use tally_core::{is_spreadsheet_filename, UploadedFile};

/// Query parameters for an upload
#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub bank_code: Option<String>,
}

/// Response for an accepted upload
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub batch_id: String,
    pub message: String,
}

/// POST /api/v1/transactions/upload?bank_code=X - Upload bank statements
///
/// Expects a multipart form with one or more `files` parts. Answers 202 as
/// soon as the batch exists; processing continues in the background.
pub async fn upload_transactions(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let bank_code = params
        .bank_code
        .filter(|code| !code.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("Missing bank_code query parameter"))?;

    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            too_large()
        } else {
            AppError::bad_request(&format!("Failed to read form field: {}", e))
        }
    })? {
        if field.name() != Some("files") {
            continue;
        }

        let filename = field.file_name().unwrap_or("").to_string();
        if !is_spreadsheet_filename(&filename) {
            return Err(AppError::bad_request(&format!(
                "File {} is not a valid Excel file",
                filename
            )));
        }

        let bytes = field.bytes().await.map_err(|e| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                too_large()
            } else {
                AppError::bad_request("Failed to read file data")
            }
        })?;

        if bytes.len() > MAX_UPLOAD_SIZE {
            return Err(too_large());
        }

        files.push(UploadedFile::new(filename, bytes.to_vec()));
    }

    upload_core(&state, &user_id, &bank_code, files)
}

/// Core upload logic - separated from multipart parsing for testability
pub fn upload_core(
    state: &AppState,
    user_id: &str,
    bank_code: &str,
    files: Vec<UploadedFile>,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    if files.is_empty() {
        return Err(AppError::bad_request("Must provide at least one file"));
    }

    let parser = state
        .parsers
        .get(bank_code)
        .map_err(AppError::from_core)?;

    let submission = state
        .orchestrator
        .execute(&files, parser.as_ref(), user_id)
        .map_err(AppError::from_core)?;

    info!(
        batch_id = %submission.batch_id,
        user_id,
        files = files.len(),
        items = submission.items,
        "Upload accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            message: format!(
                "Processing started. Use batch_id {} to check the status.",
                submission.batch_id
            ),
            batch_id: submission.batch_id,
        }),
    ))
}

fn too_large() -> AppError {
    AppError::payload_too_large(&format!(
        "File too large. Maximum size is {} MB",
        MAX_UPLOAD_SIZE / 1024 / 1024
    ))
}
