//! Rate limiter trait used by the HTTP layer.

use async_trait::async_trait;

use super::decision::RateLimitDecision;

/// Trait for per-user rate limiter implementations.
///
/// The HTTP middleware only depends on this trait, so it can run against
/// the store-backed limiter or any other implementation.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Record an attempt for `user_id` and decide whether it may proceed.
    ///
    /// Never fails: implementations decide how to degrade on their own.
    async fn check_limit(&self, user_id: &str) -> RateLimitDecision;

    /// Maximum attempts per window, reported as `X-RateLimit-Limit`.
    fn limit(&self) -> u64;
}
