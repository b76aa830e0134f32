//! Rate limit middleware.

use axum::{
    extract::{Request, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{debug, info};

use super::identity::{unauthenticated, CallerIdentity};
use super::AppState;
use crate::ratelimit::RateLimitDecision;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Consult the limiter before the wrapped handler runs.
///
/// Denied callers get a 429 and the handler never runs. Allowed requests
/// carry the [`RateLimitDecision`] as an extension. Both outcomes are
/// annotated with `X-RateLimit-*` headers.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(identity) = request.extensions().get::<CallerIdentity>().cloned() else {
        return unauthenticated();
    };

    let decision = state.limiter.check_limit(identity.as_str()).await;
    let limit = state.limiter.limit();

    if !decision.allowed {
        let retry_after = decision.retry_after_secs(state.clock.now_ms());
        info!(
            user = %identity.as_str(),
            reset = %decision.reset_header(),
            retry_after = retry_after,
            "Rate limit exceeded"
        );

        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Rate limit exceeded" })),
        )
            .into_response();
        apply_rate_limit_headers(response.headers_mut(), limit, &decision);
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(retry_after));
        return response;
    }

    debug!(user = %identity.as_str(), remaining = decision.remaining, "Request admitted");

    request.extensions_mut().insert(decision);
    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), limit, &decision);
    response
}

/// Write the quota headers for `decision`.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, limit: u64, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    if let Ok(reset) = HeaderValue::from_str(&decision.reset_header()) {
        headers.insert(X_RATELIMIT_RESET, reset);
    }
}
