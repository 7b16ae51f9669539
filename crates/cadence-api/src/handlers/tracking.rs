//! Tracking and unsubscribe endpoints hit from sent mail
//!
//! Whatever happens to the analytics write, the recipient still gets the
//! redirect, the pixel or the confirmation. Store failures are logged and
//! swallowed here.

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
};
use cadence_common::types::{EnrollmentId, StepId};
use cadence_storage::models::{CreateEvent, EnrollmentStatus, EventType};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::AppState;

/// 1x1 transparent GIF
pub const PIXEL_GIF: &[u8] = &[
    71, 73, 70, 56, 57, 97, 1, 0, 1, 0, 128, 0, 0, 0, 0, 0, 255, 255, 255, 33, 249, 4, 1, 0, 0, 0,
    0, 44, 0, 0, 0, 0, 1, 0, 1, 0, 0, 2, 1, 68, 0, 59,
];

/// Where a GET unsubscribe lands
pub const UNSUBSCRIBED_PAGE_PATH: &str = "/unsubscribed";

#[derive(Debug, Deserialize)]
pub struct ClickQuery {
    pub eid: Option<String>,
    pub sid: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenQuery {
    pub eid: Option<String>,
    pub sid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeQuery {
    pub eid: Option<String>,
}

fn parse_id(raw: Option<&str>) -> Option<Uuid> {
    raw.and_then(|s| Uuid::parse_str(s.trim()).ok())
}

fn found(location: HeaderValue) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// Append an engagement event if both ids name a known enrollment
async fn record_engagement(
    state: &AppState,
    enrollment_id: Option<EnrollmentId>,
    step_id: Option<StepId>,
    event_type: EventType,
    metadata: Option<serde_json::Value>,
) {
    let (Some(enrollment_id), Some(step_id)) = (enrollment_id, step_id) else {
        return;
    };

    match state.store.get_enrollment(enrollment_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            debug!(%enrollment_id, "Tracking hit for unknown enrollment");
            return;
        }
        Err(e) => {
            warn!(%enrollment_id, "Tracking lookup failed: {}", e);
            return;
        }
    }

    let result = state
        .store
        .append_event(CreateEvent {
            enrollment_id,
            step_id: Some(step_id),
            event_type,
            metadata,
        })
        .await;

    match result {
        Ok(_) => {
            state.metrics.track(&event_type.to_string());
            debug!(%enrollment_id, %step_id, event = %event_type, "Tracking event recorded");
        }
        Err(e) => warn!(%enrollment_id, event = %event_type, "Failed to record tracking event: {}", e),
    }
}

/// Record a click and redirect to the original link
///
/// GET /api/track/click?eid&sid&url
pub async fn click(State(state): State<Arc<AppState>>, Query(query): Query<ClickQuery>) -> Response {
    let Some(url) = query.url.filter(|u| !u.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing url").into_response();
    };
    let Ok(location) = HeaderValue::from_str(&url) else {
        return (StatusCode::BAD_REQUEST, "Invalid url").into_response();
    };

    record_engagement(
        &state,
        parse_id(query.eid.as_deref()),
        parse_id(query.sid.as_deref()),
        EventType::Clicked,
        Some(serde_json::json!({ "url": url })),
    )
    .await;

    found(location)
}

/// Record an open and return the tracking pixel
///
/// GET /api/track/open?eid&sid
pub async fn open(State(state): State<Arc<AppState>>, Query(query): Query<OpenQuery>) -> Response {
    record_engagement(
        &state,
        parse_id(query.eid.as_deref()),
        parse_id(query.sid.as_deref()),
        EventType::Opened,
        None,
    )
    .await;

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        PIXEL_GIF,
    )
        .into_response()
}

async fn unsubscribe_enrollment(state: &AppState, raw_eid: Option<&str>) {
    let Some(enrollment_id) = parse_id(raw_eid) else {
        debug!("Unsubscribe without a usable enrollment id");
        return;
    };

    match state
        .store
        .set_enrollment_status(enrollment_id, EnrollmentStatus::Unsubscribed, Utc::now())
        .await
    {
        Ok(true) => {
            state.metrics.track("unsubscribed");
            info!(%enrollment_id, "Enrollment unsubscribed");
        }
        Ok(false) => debug!(%enrollment_id, "Unsubscribe for inactive or unknown enrollment"),
        Err(e) => warn!(%enrollment_id, "Failed to unsubscribe: {}", e),
    }
}

/// Unsubscribe from a footer link, then show the confirmation page
///
/// GET /api/unsubscribe?eid
pub async fn unsubscribe_link(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UnsubscribeQuery>,
) -> Response {
    unsubscribe_enrollment(&state, query.eid.as_deref()).await;
    found(HeaderValue::from_static(UNSUBSCRIBED_PAGE_PATH))
}

/// One-click unsubscribe from a List-Unsubscribe-Post capable client
///
/// POST /api/unsubscribe?eid
pub async fn unsubscribe_one_click(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UnsubscribeQuery>,
) -> Response {
    unsubscribe_enrollment(&state, query.eid.as_deref()).await;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        "Unsubscribed",
    )
        .into_response()
}

/// GET /unsubscribed
pub async fn unsubscribed_page() -> Html<&'static str> {
    Html(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Unsubscribed</title></head>\
         <body style=\"font-family:sans-serif;text-align:center;padding:48px\">\
         <h1>You have been unsubscribed</h1>\
         <p>You will not receive further emails from this sequence.</p></body></html>",
    )
}
