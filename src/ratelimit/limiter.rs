//! Per-user sliding-window rate limiter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use super::backend::RateLimiterBackend;
use super::clock::{Clock, SystemClock};
use super::decision::RateLimitDecision;
use super::key::{AttemptToken, UserKey};
use super::window::SlidingWindow;
use crate::config::RateLimitingConfig;
use crate::error::Result;
use crate::store::{EventStore, Pipeline, ScoreBound, StoreError};

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "rate_limit:recipes";

/// Bounds how many attempts each user may make in a trailing window.
///
/// Every user's attempts live in a sorted set in the shared store, scored
/// by attempt time. A check prunes entries older than the window and
/// counts the rest in one atomic batch; admitted attempts are then recorded
/// with a key TTL refresh in a second batch. Denied attempts are never
/// recorded.
///
/// Holds no mutable state of its own and can be shared across all requests.
pub struct SlidingWindowLimiter {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    window: SlidingWindow,
    namespace: String,
}

impl SlidingWindowLimiter {
    /// Create a limiter over `store` using the system clock.
    pub fn new(store: Arc<dyn EventStore>, window: SlidingWindow) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            window,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Create a limiter from resolved configuration.
    pub fn from_config(store: Arc<dyn EventStore>, config: &RateLimitingConfig) -> Result<Self> {
        let window = SlidingWindow::new(config.limit, config.window_ms)?;
        Ok(Self::new(store, window).with_namespace(&config.namespace))
    }

    /// Replace the time source, mainly so tests can drive a manual clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Prefix for the per-user keys in the store.
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn window(&self) -> SlidingWindow {
        self.window
    }

    /// Store key for a user.
    pub fn key_for(&self, user_id: &str) -> UserKey {
        UserKey::new(&self.namespace, user_id)
    }

    /// Record an attempt for `user_id` and decide whether it may proceed.
    ///
    /// `user_id` must be a non-empty, stable identity. Store failures are
    /// logged and the attempt is allowed.
    pub async fn check_limit(&self, user_id: &str) -> RateLimitDecision {
        let key = self.key_for(user_id);
        let now = self.clock.now_ms();

        trace!(key = %key, now = now, "Checking rate limit");

        match self.try_check(&key, now).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    key = %key,
                    error = %e,
                    fail_open = true,
                    "Rate limit store unavailable, allowing request"
                );
                self.fail_open(now)
            }
        }
    }

    async fn try_check(
        &self,
        key: &UserKey,
        now: i64,
    ) -> std::result::Result<RateLimitDecision, StoreError> {
        let key_str = key.to_string_key();
        let window_start = self.window.window_start(now);

        let pruned = Pipeline::new()
            .remove_range_by_score(
                &key_str,
                ScoreBound::Unbounded,
                ScoreBound::Exclusive(window_start),
            )
            .count(&key_str);
        let mut replies = self.store.execute(&pruned).await?.into_iter();
        let count = match (replies.next(), replies.next()) {
            (Some(_removed), Some(count)) => count.into_integer()?.max(0) as u64,
            _ => {
                return Err(StoreError::Protocol(
                    "prune batch returned too few replies".to_string(),
                ))
            }
        };

        if self.window.is_full(count) {
            let oldest = self
                .store
                .execute(&Pipeline::new().range_with_scores(&key_str, 0, 0))
                .await?
                .into_iter()
                .next()
                .map(|reply| reply.into_scored())
                .transpose()?
                .and_then(|members| members.into_iter().next());

            if let Some((_, oldest_score)) = oldest {
                let reset = self.window.expiry_of(oldest_score);
                debug!(
                    key = %key,
                    count = count,
                    limit = self.window.limit(),
                    window_ms = self.window.window_ms(),
                    reset = reset,
                    "Rate limit exceeded"
                );
                return Ok(RateLimitDecision::deny(reset));
            }

            // The log emptied between the two batches, so capacity is free.
            debug!(key = %key, "Attempt log drained during check, admitting");
        }

        let token = AttemptToken::new(now);
        let record = Pipeline::new()
            .add(&key_str, token.as_str(), now)
            .expire(&key_str, self.window.ttl_secs());
        self.store.execute(&record).await?;

        let remaining = self.window.remaining_after_admit(count);
        trace!(key = %key, count = count + 1, remaining = remaining, "Attempt admitted");

        Ok(RateLimitDecision::allow(
            remaining,
            self.window.expiry_of(now),
        ))
    }

    fn fail_open(&self, now: i64) -> RateLimitDecision {
        RateLimitDecision::allow(self.window.limit(), self.window.expiry_of(now))
    }
}

#[async_trait]
impl RateLimiterBackend for SlidingWindowLimiter {
    async fn check_limit(&self, user_id: &str) -> RateLimitDecision {
        SlidingWindowLimiter::check_limit(self, user_id).await
    }

    fn limit(&self) -> u64 {
        self.window.limit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;
    use crate::store::{InMemoryStore, Reply};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct Harness {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryStore>,
        limiter: SlidingWindowLimiter,
    }

    fn harness(limit: u64, window_ms: u64) -> Harness {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let limiter =
            SlidingWindowLimiter::new(store.clone(), SlidingWindow::new(limit, window_ms).unwrap())
                .with_clock(clock.clone());
        Harness {
            clock,
            store,
            limiter,
        }
    }

    /// Replays canned replies, one batch per call.
    struct ScriptedStore {
        batches: Mutex<VecDeque<Vec<Reply>>>,
    }

    #[async_trait]
    impl EventStore for ScriptedStore {
        async fn execute(&self, _pipeline: &Pipeline) -> std::result::Result<Vec<Reply>, StoreError> {
            self.batches
                .lock()
                .pop_front()
                .ok_or_else(|| StoreError::Unavailable("script exhausted".to_string()))
        }

        async fn ping(&self) -> std::result::Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sequential_admission_is_bounded() {
        let h = harness(5, 10_000);

        let mut admitted = 0;
        for i in 0..20 {
            h.clock.set(i * 10);
            if h.limiter.check_limit("user").await.allowed {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let h = harness(3, 1000);

        let mut remaining = Vec::new();
        for t in [0, 100, 200] {
            h.clock.set(t);
            let decision = h.limiter.check_limit("user").await;
            assert!(decision.allowed);
            assert_eq!(decision.reset, t + 1000);
            remaining.push(decision.remaining);
        }
        assert_eq!(remaining, vec![2, 1, 0]);

        h.clock.set(300);
        let denied = h.limiter.check_limit("user").await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset, 1000);

        h.clock.set(1001);
        let decision = h.limiter.check_limit("user").await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let h = harness(2, 60_000);

        h.limiter.check_limit("alice").await;
        h.limiter.check_limit("alice").await;
        assert!(!h.limiter.check_limit("alice").await.allowed);

        let bob = h.limiter.check_limit("bob").await;
        assert!(bob.allowed);
        assert_eq!(bob.remaining, 1);
    }

    #[tokio::test]
    async fn test_remaining_decreases_to_zero() {
        let h = harness(4, 60_000);

        let mut previous = u64::MAX;
        for i in 0..4 {
            h.clock.set(i);
            let decision = h.limiter.check_limit("user").await;
            assert!(decision.allowed);
            assert!(decision.remaining <= previous);
            previous = decision.remaining;
        }
        assert_eq!(previous, 0);
    }

    #[tokio::test]
    async fn test_fails_open_when_store_is_down() {
        let h = harness(2, 60_000);
        h.store.set_unavailable(true);

        for t in 0..10 {
            h.clock.set(t);
            let decision = h.limiter.check_limit("user").await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 2);
            assert_eq!(decision.reset, t + 60_000);
        }
    }

    #[tokio::test]
    async fn test_enforcement_resumes_after_outage() {
        let h = harness(1, 60_000);
        h.store.set_unavailable(true);
        assert!(h.limiter.check_limit("user").await.allowed);

        h.store.set_unavailable(false);
        assert!(h.limiter.check_limit("user").await.allowed);
        assert!(!h.limiter.check_limit("user").await.allowed);
    }

    #[tokio::test]
    async fn test_denied_attempts_are_not_recorded() {
        let h = harness(2, 1000);
        let key = h.limiter.key_for("user").to_string_key();

        h.clock.set(0);
        h.limiter.check_limit("user").await;
        h.clock.set(500);
        h.limiter.check_limit("user").await;

        for t in [600, 700, 800, 900] {
            h.clock.set(t);
            assert!(!h.limiter.check_limit("user").await.allowed);
        }
        assert_eq!(h.store.members(&key).len(), 2);

        // Only the t=0 attempt has left the window.
        h.clock.set(1001);
        let decision = h.limiter.check_limit("user").await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);

        h.clock.set(1002);
        let denied = h.limiter.check_limit("user").await;
        assert!(!denied.allowed);
        assert_eq!(denied.reset, 1500);
    }

    #[tokio::test]
    async fn test_single_attempt_scenario() {
        let h = harness(1, 60_000);

        let first = h.limiter.check_limit("user").await;
        assert_eq!((first.allowed, first.remaining), (true, 0));

        h.clock.set(500);
        let second = h.limiter.check_limit("user").await;
        assert_eq!((second.allowed, second.remaining), (false, 0));
        assert_eq!(second.reset, 60_000);

        h.clock.set(60_001);
        let retried = h.limiter.check_limit("user").await;
        assert_eq!((retried.allowed, retried.remaining), (true, 0));
    }

    #[tokio::test]
    async fn test_same_millisecond_attempts_are_distinct() {
        let h = harness(10, 60_000);
        let key = h.limiter.key_for("user").to_string_key();

        for _ in 0..3 {
            h.limiter.check_limit("user").await;
        }

        let members = h.store.members(&key);
        assert_eq!(members.len(), 3);
        assert!(members.iter().all(|(_, score)| *score == 0));
    }

    #[tokio::test]
    async fn test_key_ttl_refreshed_on_admit() {
        let h = harness(5, 1500);
        let key = h.limiter.key_for("user").to_string_key();

        h.limiter.check_limit("user").await;
        assert_eq!(h.store.ttl_ms(&key), Some(2000));

        h.clock.advance(Duration::from_millis(1000));
        h.limiter.check_limit("user").await;
        assert_eq!(h.store.ttl_ms(&key), Some(2000));

        // Idle users' logs are evicted by the store.
        h.clock.advance(Duration::from_millis(2000));
        assert_eq!(h.store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_namespace_prefixes_keys() {
        let h = harness(5, 1000);
        let limiter = h.limiter.with_namespace("rate_limit:other");
        limiter.check_limit("42").await;

        assert_eq!(h.store.members("rate_limit:other:42").len(), 1);
        assert!(h.store.members("rate_limit:recipes:42").is_empty());
    }

    #[tokio::test]
    async fn test_drained_log_during_check_admits() {
        let store = Arc::new(ScriptedStore {
            batches: Mutex::new(VecDeque::from(vec![
                vec![Reply::Integer(0), Reply::Integer(1)],
                vec![Reply::Scored(Vec::new())],
                vec![Reply::Integer(1), Reply::Integer(1)],
            ])),
        });
        let limiter = SlidingWindowLimiter::new(store, SlidingWindow::new(1, 1000).unwrap())
            .with_clock(Arc::new(ManualClock::new(50)));

        let decision = limiter.check_limit("user").await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset, 1050);
    }

    #[tokio::test]
    async fn test_malformed_reply_fails_open() {
        let store = Arc::new(ScriptedStore {
            batches: Mutex::new(VecDeque::from(vec![vec![Reply::Integer(0)]])),
        });
        let limiter = SlidingWindowLimiter::new(store, SlidingWindow::new(3, 1000).unwrap())
            .with_clock(Arc::new(ManualClock::new(0)));

        let decision = limiter.check_limit("user").await;
        assert_eq!(decision, RateLimitDecision::allow(3, 1000));
    }

    #[tokio::test]
    async fn test_from_config_rejects_zero_limit() {
        let config = RateLimitingConfig {
            limit: 0,
            ..RateLimitingConfig::default()
        };
        let store = Arc::new(InMemoryStore::new());
        assert!(SlidingWindowLimiter::from_config(store, &config).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_burst_overshoot_is_bounded() {
        let limit = 5;
        let racers = 20;
        let h = harness(limit, 60_000);
        let limiter = Arc::new(h.limiter);
        let key = limiter.key_for("user").to_string_key();

        let handles: Vec<_> = (0..racers)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.check_limit("user").await })
            })
            .collect();
        let decisions: Vec<RateLimitDecision> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let admitted = decisions.iter().filter(|d| d.allowed).count();
        assert!(admitted >= limit as usize);
        // Every admitted attempt was recorded; none lost or merged.
        assert_eq!(h.store.members(&key).len(), admitted);

        // Once the burst settles the window is full, so a second burst is
        // denied outright and leaves the log untouched.
        let handles: Vec<_> = (0..racers)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.check_limit("user").await })
            })
            .collect();
        let decisions: Vec<RateLimitDecision> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert!(decisions.iter().all(|d| !d.allowed && d.remaining == 0));
        assert_eq!(h.store.members(&key).len(), admitted);
    }
}
