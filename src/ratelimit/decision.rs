//! The outcome of one rate limit check.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Whether an attempt may proceed, and the quota metadata to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    /// Whether this attempt may proceed
    pub allowed: bool,
    /// Further attempts permitted before the window fills
    pub remaining: u64,
    /// When capacity is next expected to free up, in epoch milliseconds
    pub reset: i64,
}

impl RateLimitDecision {
    pub fn allow(remaining: u64, reset: i64) -> Self {
        Self {
            allowed: true,
            remaining,
            reset,
        }
    }

    pub fn deny(reset: i64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset,
        }
    }

    /// The reset instant as a UTC timestamp.
    pub fn reset_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.reset)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// ISO-8601 rendering used for the `X-RateLimit-Reset` header.
    pub fn reset_header(&self) -> String {
        self.reset_at().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Whole seconds from `now_ms` until reset, rounded up.
    pub fn retry_after_secs(&self, now_ms: i64) -> u64 {
        let wait = self.reset.saturating_sub(now_ms).max(0) as u64;
        wait.div_ceil(1000)
    }
}
