//! Sliding window arithmetic.

use crate::error::{LimiterError, Result};

/// A fixed `limit` of attempts over a trailing window of `window_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindow {
    limit: u64,
    window_ms: u64,
}

impl SlidingWindow {
    /// Create a window, rejecting a zero limit or zero length.
    pub fn new(limit: u64, window_ms: u64) -> Result<Self> {
        if limit == 0 {
            return Err(LimiterError::Misconfigured("limit must be positive".to_string()));
        }
        if window_ms == 0 {
            return Err(LimiterError::Misconfigured(
                "window length must be positive".to_string(),
            ));
        }
        if window_ms > i64::MAX as u64 {
            return Err(LimiterError::Misconfigured(format!(
                "window length {}ms is out of range",
                window_ms
            )));
        }
        Ok(Self { limit, window_ms })
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Earliest score still inside the window ending at `now_ms`.
    pub fn window_start(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.window_ms as i64)
    }

    /// Instant at which an attempt recorded at `recorded_ms` leaves the window.
    pub fn expiry_of(&self, recorded_ms: i64) -> i64 {
        recorded_ms.saturating_add(self.window_ms as i64)
    }

    /// Key time-to-live in whole seconds, rounded up.
    pub fn ttl_secs(&self) -> u64 {
        self.window_ms.div_ceil(1000).max(1)
    }

    /// Whether `count` attempts already fill the window.
    pub fn is_full(&self, count: u64) -> bool {
        count >= self.limit
    }

    /// Attempts left after admitting one more on top of `count`.
    pub fn remaining_after_admit(&self, count: u64) -> u64 {
        self.limit.saturating_sub(count.saturating_add(1))
    }
}
