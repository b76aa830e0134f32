//! HTTP handlers.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;
use tracing::{instrument, warn};

use super::identity::CallerIdentity;
use super::AppState;
use crate::ratelimit::RateLimitDecision;

/// Report the admission decision for the caller.
///
/// Only reached for admitted attempts; denials are answered by the
/// middleware. Lets a gateway use this service as an external authorizer
/// in front of recipe generation.
#[instrument(skip_all, fields(user = %identity.as_str()))]
pub async fn check_handler(
    Extension(identity): Extension<CallerIdentity>,
    Extension(decision): Extension<RateLimitDecision>,
) -> Json<RateLimitDecision> {
    Json(decision)
}

/// Liveness probe.
pub async fn healthz() -> &'static str {
    "ok"
}

/// Readiness probe: the store must answer a ping.
pub async fn readyz(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "store": "ok" }))).into_response(),
        Err(e) => {
            warn!(error = %e, "Readiness check failed, rate limiting is failing open");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "store": "unavailable", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
