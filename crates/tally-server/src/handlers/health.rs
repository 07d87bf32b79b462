//! Health check handler

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;
use tally_core::ClassifierStatus;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy`, or `degraded` when the database or the model is unavailable
    pub status: &'static str,
    pub database: String,
    pub classifier: ClassifierStatus,
    pub publisher: &'static str,
}

/// GET /health - Service readiness
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let database = match state
        .db
        .conn()
        .and_then(|conn| Ok(conn.query_row("SELECT 1", [], |_| Ok(()))?))
    {
        Ok(()) => "healthy".to_string(),
        Err(e) => format!("unhealthy: {}", e),
    };

    let classifier = state.orchestrator.classifier().status();
    let status = if database == "healthy" && classifier.ready {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        database,
        classifier,
        publisher: state.orchestrator.publisher().name(),
    })
}
