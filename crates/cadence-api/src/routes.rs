//! API routes

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use cadence_core::{CLICK_PATH, OPEN_PATH, UNSUBSCRIBE_PATH};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{auth_middleware, AppState};
use crate::handlers::{campaigns, cron, health, metrics, tracking};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .with_state(state.clone());

    // Links, pixel and footer embedded in sent mail (no auth)
    let tracking_routes = Router::new()
        .route(CLICK_PATH, get(tracking::click))
        .route(OPEN_PATH, get(tracking::open))
        .route(
            UNSUBSCRIBE_PATH,
            get(tracking::unsubscribe_link).post(tracking::unsubscribe_one_click),
        )
        .route(
            tracking::UNSUBSCRIBED_PAGE_PATH,
            get(tracking::unsubscribed_page),
        )
        .route("/metrics", get(metrics::metrics))
        .with_state(state.clone());

    // Campaign routes
    let campaign_routes = Router::new()
        .route("/", get(campaigns::list_campaigns))
        .route("/", post(campaigns::create_campaign))
        .route("/:campaign_id", get(campaigns::get_campaign))
        .route("/:campaign_id", delete(campaigns::delete_campaign))
        .route("/:campaign_id/status", put(campaigns::set_status))
        .route("/:campaign_id/steps", get(campaigns::list_steps))
        .route("/:campaign_id/steps", post(campaigns::add_step))
        .route("/:campaign_id/steps", put(campaigns::reorder_steps))
        .route("/:campaign_id/steps/:step_id", delete(campaigns::delete_step))
        .route("/:campaign_id/enrollments", get(campaigns::list_enrollments))
        .route("/:campaign_id/enrollments", post(campaigns::enroll_contacts))
        .route(
            "/:campaign_id/enrollments/:enrollment_id",
            delete(campaigns::unenroll),
        )
        .route("/:campaign_id/stats", get(campaigns::campaign_stats));

    // Scheduler trigger and management API share the bearer secret
    let protected = Router::new()
        .route("/api/cron/campaigns", get(cron::run_campaigns))
        .nest("/api/v1/campaigns", campaign_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state);

    // Combine all routes
    Router::new()
        .nest("/health", health_routes)
        .merge(tracking_routes)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
}
