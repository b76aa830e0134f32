//! Caller identity extraction.
//!
//! Authentication happens upstream. The gateway in front of this service
//! forwards the authenticated user id in a trusted header, which this
//! middleware lifts into a [`CallerIdentity`] request extension.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use super::AppState;

/// The authenticated user a request is made on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub String);

impl CallerIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Reject requests without a non-empty identity header, otherwise attach a [`CallerIdentity`].
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let identity = request
        .headers()
        .get(&state.identity_header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    match identity {
        Some(user_id) => {
            request.extensions_mut().insert(CallerIdentity(user_id));
            next.run(request).await
        }
        None => {
            warn!(
                path = %request.uri().path(),
                header = %state.identity_header,
                "Request rejected - no caller identity"
            );
            unauthenticated()
        }
    }
}

pub(crate) fn unauthenticated() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "User not authenticated" })),
    )
        .into_response()
}
