//! Scheduler trigger

use axum::{extract::State, http::StatusCode, Json};
use cadence_core::RunSummary;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

use crate::auth::AppState;

/// Run one engine pass: due enrollments, then reply detection
///
/// GET /api/cron/campaigns
pub async fn run_campaigns(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RunSummary>, (StatusCode, Json<Value>)> {
    match state.engine.run_once().await {
        Ok(summary) => {
            info!(
                processed = summary.enrollments.processed,
                errors = summary.enrollments.errors,
                replies = summary.replies.replies_found,
                "Campaign run finished"
            );
            Ok(Json(summary))
        }
        Err(e) => {
            error!("Campaign run failed: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            ))
        }
    }
}
