//! Batch status handler

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{AppError, AppState};
use tally_core::BatchStatusView;

/// GET /api/v1/transactions/batch/:batch_id - Processing status of a batch
pub async fn get_batch_status(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchStatusView>, AppError> {
    state
        .orchestrator
        .status(&batch_id)
        .map_err(AppError::from_core)?
        .map(Json)
        .ok_or_else(|| AppError::not_found(&format!("Batch {} not found", batch_id)))
}
