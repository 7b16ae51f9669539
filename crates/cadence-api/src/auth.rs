//! Shared state and shared-secret bearer authentication

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use cadence_core::{CampaignEngine, CampaignManager, EngineMetrics};
use cadence_storage::SequenceStore;
use std::sync::Arc;
use tracing::warn;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SequenceStore>,
    pub engine: Arc<CampaignEngine>,
    pub manager: CampaignManager,
    pub metrics: Arc<EngineMetrics>,
    /// Bearer secret for the scheduler trigger and management API.
    /// When unset every protected request is rejected.
    pub cron_secret: Option<String>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SequenceStore>,
        engine: Arc<CampaignEngine>,
        metrics: Arc<EngineMetrics>,
        cron_secret: Option<String>,
    ) -> Self {
        Self {
            manager: CampaignManager::new(store.clone()),
            store,
            engine,
            metrics,
            cron_secret,
        }
    }
}

/// Extract the bearer token from the Authorization header
pub fn extract_bearer(req: &Request) -> Option<&str> {
    req.headers()
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Compare without returning early on the first differing byte
fn secrets_match(given: &str, expected: &str) -> bool {
    let (a, b) = (given.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Reject requests that do not carry the configured secret
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.cron_secret.as_deref().filter(|s| !s.is_empty()) else {
        warn!(
            "No scheduler secret configured, rejecting {}",
            request.uri().path()
        );
        return Err(StatusCode::UNAUTHORIZED);
    };

    match extract_bearer(&request) {
        Some(given) if secrets_match(given, expected) => Ok(next.run(request).await),
        Some(_) => {
            warn!("Invalid bearer secret for {}", request.uri().path());
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!("Missing bearer secret in request to {}", request.uri().path());
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(auth: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/api/cron/campaigns");
        if let Some(value) = auth {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer(&request(Some("Bearer s3cret"))), Some("s3cret"));
        assert_eq!(extract_bearer(&request(Some("Basic abc"))), None);
        assert_eq!(extract_bearer(&request(None)), None);
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("s3cret", "s3cret"));
        assert!(!secrets_match("s3cret", "s3creT"));
        assert!(!secrets_match("s3c", "s3cret"));
    }
}
