//! HTTP surface around the limiter.
//!
//! - `POST /v1/check`: records an attempt for the caller and returns the decision
//! - `GET /healthz`: liveness
//! - `GET /readyz`: store reachability
//!
//! [`protect`] wraps any other router with the same identity and rate
//! limit middleware, for services that embed the limiter directly.

mod identity;
mod middleware;
mod routes;
mod server;

use std::sync::Arc;

use axum::{
    http::HeaderName,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use identity::{identity_middleware, CallerIdentity};
pub use middleware::{
    apply_rate_limit_headers, rate_limit_middleware, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
};
pub use server::HttpServer;

use crate::error::{LimiterError, Result};
use crate::ratelimit::{Clock, RateLimiterBackend, SystemClock};
use crate::store::EventStore;

/// State shared by every handler and middleware.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<dyn RateLimiterBackend>,
    pub store: Arc<dyn EventStore>,
    /// Trusted header carrying the caller identity
    pub identity_header: HeaderName,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        limiter: Arc<dyn RateLimiterBackend>,
        store: Arc<dyn EventStore>,
        identity_header: &str,
    ) -> Result<Self> {
        let identity_header = HeaderName::from_bytes(identity_header.as_bytes()).map_err(|e| {
            LimiterError::Config(format!("Invalid identity header {:?}: {}", identity_header, e))
        })?;
        Ok(Self {
            limiter,
            store,
            identity_header,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Require a caller identity and a rate limit admission for every route in `routes`.
pub fn protect(routes: Router<AppState>, state: &AppState) -> Router<AppState> {
    routes
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            identity_middleware,
        ))
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    let checked = protect(
        Router::new().route("/v1/check", post(routes::check_handler)),
        &state,
    );

    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .merge(checked)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
