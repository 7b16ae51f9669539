//! Campaign management handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use cadence_core::{CampaignError, EnrollOutcome, NewStep};
use cadence_storage::models::{
    Campaign, CampaignEnrollment, CampaignStats, CampaignStatus, CampaignStep, EnrollmentStatus,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::AppState;

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<T, ApiError>;

fn api_error(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

/// Map manager errors onto HTTP responses
pub fn campaign_error(e: CampaignError) -> ApiError {
    match e {
        CampaignError::NotFound
        | CampaignError::StepNotFound
        | CampaignError::EnrollmentNotFound => {
            api_error(StatusCode::NOT_FOUND, "not_found", e.to_string())
        }
        CampaignError::InvalidTransition { .. } => {
            api_error(StatusCode::CONFLICT, "invalid_transition", e.to_string())
        }
        CampaignError::NoSteps => api_error(StatusCode::CONFLICT, "no_steps", e.to_string()),
        CampaignError::InvalidStep(_)
        | CampaignError::InvalidOrder(_)
        | CampaignError::InvalidInput(_) => {
            api_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
        }
        CampaignError::Store(inner) => {
            error!("Campaign store error: {}", inner);
            let status = StatusCode::from_u16(inner.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            api_error(status, &inner.code().to_lowercase(), "Store operation failed")
        }
    }
}

/// Query parameters for listing
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl ListQuery {
    fn bounds(&self) -> (i64, i64) {
        (self.limit.clamp(1, 500), self.offset.max(0))
    }
}

/// Paged list response
#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: CampaignStatus,
}

#[derive(Debug, Deserialize)]
pub struct ReorderStepsRequest {
    pub step_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub contact_ids: Vec<Uuid>,
}

/// GET /api/v1/campaigns
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListResponse<Campaign>>> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            raw.parse::<CampaignStatus>()
                .map_err(|e| api_error(StatusCode::BAD_REQUEST, "validation_error", e))?,
        ),
        None => None,
    };
    let (limit, offset) = query.bounds();

    let data = state
        .manager
        .list_campaigns(status, limit, offset)
        .await
        .map_err(campaign_error)?;

    Ok(Json(ListResponse {
        data,
        limit,
        offset,
    }))
}

/// POST /api/v1/campaigns
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateCampaignRequest>,
) -> ApiResult<(StatusCode, Json<Campaign>)> {
    let campaign = state
        .manager
        .create_campaign(&input.name, input.description)
        .await
        .map_err(campaign_error)?;

    Ok((StatusCode::CREATED, Json(campaign)))
}

/// GET /api/v1/campaigns/:id
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Campaign>> {
    state
        .manager
        .get_campaign(id)
        .await
        .map(Json)
        .map_err(campaign_error)
}

/// DELETE /api/v1/campaigns/:id
pub async fn delete_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .manager
        .delete_campaign(id)
        .await
        .map_err(campaign_error)?;

    info!(campaign_id = %id, "Campaign deleted via API");
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/campaigns/:id/status
pub async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(input): Json<SetStatusRequest>,
) -> ApiResult<Json<Campaign>> {
    state
        .manager
        .set_status(id, input.status)
        .await
        .map(Json)
        .map_err(campaign_error)
}

/// GET /api/v1/campaigns/:id/steps
pub async fn list_steps(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<CampaignStep>>> {
    state
        .manager
        .list_steps(id)
        .await
        .map(Json)
        .map_err(campaign_error)
}

/// POST /api/v1/campaigns/:id/steps
pub async fn add_step(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(step): Json<NewStep>,
) -> ApiResult<(StatusCode, Json<CampaignStep>)> {
    let step = state
        .manager
        .add_step(id, step)
        .await
        .map_err(campaign_error)?;

    Ok((StatusCode::CREATED, Json(step)))
}

/// PUT /api/v1/campaigns/:id/steps
///
/// Replaces the order of the sequence; the body must list every step once.
pub async fn reorder_steps(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(input): Json<ReorderStepsRequest>,
) -> ApiResult<Json<Vec<CampaignStep>>> {
    state
        .manager
        .reorder_steps(id, &input.step_ids)
        .await
        .map(Json)
        .map_err(campaign_error)
}

/// DELETE /api/v1/campaigns/:id/steps/:step_id
pub async fn delete_step(
    State(state): State<Arc<AppState>>,
    Path((id, step_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    state
        .manager
        .delete_step(id, step_id)
        .await
        .map_err(campaign_error)?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/campaigns/:id/enrollments
pub async fn list_enrollments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListResponse<CampaignEnrollment>>> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            raw.parse::<EnrollmentStatus>()
                .map_err(|e| api_error(StatusCode::BAD_REQUEST, "validation_error", e))?,
        ),
        None => None,
    };
    let (limit, offset) = query.bounds();

    let data = state
        .manager
        .list_enrollments(id, status, limit, offset)
        .await
        .map_err(campaign_error)?;

    Ok(Json(ListResponse {
        data,
        limit,
        offset,
    }))
}

/// POST /api/v1/campaigns/:id/enrollments
pub async fn enroll_contacts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(input): Json<EnrollRequest>,
) -> ApiResult<Json<EnrollOutcome>> {
    state
        .manager
        .enroll_contacts(id, &input.contact_ids)
        .await
        .map(Json)
        .map_err(campaign_error)
}

/// DELETE /api/v1/campaigns/:id/enrollments/:enrollment_id
pub async fn unenroll(
    State(state): State<Arc<AppState>>,
    Path((id, enrollment_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<CampaignEnrollment>> {
    let enrollment = state
        .store
        .get_enrollment(enrollment_id)
        .await
        .map_err(|e| campaign_error(e.into()))?;

    match enrollment {
        Some(e) if e.campaign_id == id => {}
        _ => return Err(campaign_error(CampaignError::EnrollmentNotFound)),
    }

    state
        .manager
        .unenroll(enrollment_id)
        .await
        .map(Json)
        .map_err(campaign_error)
}

/// GET /api/v1/campaigns/:id/stats
pub async fn campaign_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CampaignStats>> {
    state
        .manager
        .campaign_stats(id)
        .await
        .map(Json)
        .map_err(campaign_error)
}
