//! In-process event store.
//!
//! Mirrors the sorted-set semantics of the shared store closely enough to
//! exercise the limiter without a server: members are unique per key and
//! ordered by `(score, member)`, emptied sets disappear, and key expiry is
//! evaluated lazily against an injected [`Clock`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Command, EventStore, Pipeline, Reply, StoreError};
use crate::ratelimit::{Clock, SystemClock};

#[derive(Debug, Default)]
struct SortedSet {
    /// Kept sorted by (score, member)
    members: Vec<(String, i64)>,
    /// Absolute expiry in epoch milliseconds
    expires_at: Option<i64>,
}

impl SortedSet {
    fn add(&mut self, member: &str, score: i64) -> i64 {
        let existed = match self.members.iter().position(|(m, _)| m == member) {
            Some(idx) => {
                self.members.remove(idx);
                true
            }
            None => false,
        };
        let at = self
            .members
            .partition_point(|(m, s)| (*s, m.as_str()) < (score, member));
        self.members.insert(at, (member.to_string(), score));
        if existed {
            0
        } else {
            1
        }
    }

    fn range(&self, start: isize, stop: isize) -> Vec<(String, i64)> {
        let len = self.members.len() as isize;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if len == 0 || start > stop || start >= len {
            return Vec::new();
        }
        self.members[start as usize..=stop as usize].to_vec()
    }
}

/// An in-memory [`EventStore`] with fault injection.
pub struct InMemoryStore {
    sets: Mutex<HashMap<String, SortedSet>>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    /// Create a store whose key expiry follows the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store whose key expiry follows `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail (or succeed again) as if the store were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of a key's members in score order.
    pub fn members(&self, key: &str) -> Vec<(String, i64)> {
        let mut sets = self.sets.lock();
        self.evict_if_expired(&mut sets, key);
        sets.get(key).map(|s| s.members.clone()).unwrap_or_default()
    }

    /// Remaining time-to-live of a key in milliseconds, if it exists and has one.
    pub fn ttl_ms(&self, key: &str) -> Option<i64> {
        let mut sets = self.sets.lock();
        self.evict_if_expired(&mut sets, key);
        let now = self.clock.now_ms();
        sets.get(key)
            .and_then(|s| s.expires_at)
            .map(|at| at - now)
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        let now = self.clock.now_ms();
        let mut sets = self.sets.lock();
        sets.retain(|_, s| s.expires_at.map_or(true, |at| at > now));
        sets.len()
    }

    fn evict_if_expired(&self, sets: &mut HashMap<String, SortedSet>, key: &str) {
        let now = self.clock.now_ms();
        let expired = sets
            .get(key)
            .and_then(|s| s.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            sets.remove(key);
        }
    }

    fn apply(&self, sets: &mut HashMap<String, SortedSet>, command: &Command) -> Reply {
        match command {
            Command::Add { key, member, score } => {
                self.evict_if_expired(sets, key);
                let added = sets.entry(key.clone()).or_default().add(member, *score);
                Reply::Integer(added)
            }
            Command::RemoveRangeByScore { key, min, max } => {
                self.evict_if_expired(sets, key);
                let Some(set) = sets.get_mut(key) else {
                    return Reply::Integer(0);
                };
                let before = set.members.len();
                set.members
                    .retain(|(_, s)| !(min.admits_from_below(*s) && max.admits_from_above(*s)));
                let removed = (before - set.members.len()) as i64;
                if set.members.is_empty() {
                    sets.remove(key);
                }
                Reply::Integer(removed)
            }
            Command::Count { key } => {
                self.evict_if_expired(sets, key);
                Reply::Integer(sets.get(key).map_or(0, |s| s.members.len() as i64))
            }
            Command::RangeWithScores { key, start, stop } => {
                self.evict_if_expired(sets, key);
                Reply::Scored(
                    sets.get(key)
                        .map(|s| s.range(*start, *stop))
                        .unwrap_or_default(),
                )
            }
            Command::Expire { key, seconds } => {
                self.evict_if_expired(sets, key);
                let now = self.clock.now_ms();
                match sets.get_mut(key) {
                    Some(set) => {
                        set.expires_at = Some(now + (*seconds as i64) * 1000);
                        Reply::Integer(1)
                    }
                    None => Reply::Integer(0),
                }
            }
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn execute(&self, pipeline: &Pipeline) -> Result<Vec<Reply>, StoreError> {
        self.check_available()?;

        // One lock for the whole pipeline keeps the batch atomic.
        let mut sets = self.sets.lock();
        Ok(pipeline
            .commands()
            .iter()
            .map(|command| self.apply(&mut sets, command))
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}
