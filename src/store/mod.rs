//! Shared ordered-event store abstraction.
//!
//! The limiter never talks to a concrete database. It builds a [`Pipeline`]
//! of sorted-set commands and hands it to an [`EventStore`], which must run
//! the whole pipeline as one atomic batch and report one [`Reply`] per
//! command, in order.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::InMemoryStore;
pub use self::redis::RedisStore;

/// Errors that can occur talking to the event store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store did not respond within {0:?}")]
    Timeout(Duration),
    #[error("unexpected store reply: {0}")]
    Protocol(String),
}

/// One end of a score range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBound {
    Unbounded,
    Inclusive(i64),
    Exclusive(i64),
}

impl ScoreBound {
    /// Whether `score` lies on the allowed side of this bound when used as a minimum.
    pub fn admits_from_below(&self, score: i64) -> bool {
        match *self {
            ScoreBound::Unbounded => true,
            ScoreBound::Inclusive(min) => score >= min,
            ScoreBound::Exclusive(min) => score > min,
        }
    }

    /// Whether `score` lies on the allowed side of this bound when used as a maximum.
    pub fn admits_from_above(&self, score: i64) -> bool {
        match *self {
            ScoreBound::Unbounded => true,
            ScoreBound::Inclusive(max) => score <= max,
            ScoreBound::Exclusive(max) => score < max,
        }
    }
}

/// A single sorted-set command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Insert `member` with `score`, updating the score if the member exists.
    Add { key: String, member: String, score: i64 },
    /// Remove every member whose score lies within `[min, max]`.
    RemoveRangeByScore { key: String, min: ScoreBound, max: ScoreBound },
    /// Number of members in the set.
    Count { key: String },
    /// Members with scores by rank, `start..=stop`, lowest score first.
    /// Negative ranks count from the end.
    RangeWithScores { key: String, start: isize, stop: isize },
    /// Set the key's time-to-live.
    Expire { key: String, seconds: u64 },
}

/// Result of a single command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Integer(i64),
    Scored(Vec<(String, i64)>),
}

impl Reply {
    pub fn into_integer(self) -> Result<i64, StoreError> {
        match self {
            Reply::Integer(n) => Ok(n),
            other => Err(StoreError::Protocol(format!("expected integer, got {:?}", other))),
        }
    }

    pub fn into_scored(self) -> Result<Vec<(String, i64)>, StoreError> {
        match self {
            Reply::Scored(members) => Ok(members),
            other => Err(StoreError::Protocol(format!(
                "expected scored members, got {:?}",
                other
            ))),
        }
    }
}

/// An ordered list of commands executed as one atomic batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `member` into the sorted set at `key` with `score`.
    pub fn add(mut self, key: &str, member: &str, score: i64) -> Self {
        self.commands.push(Command::Add {
            key: key.to_string(),
            member: member.to_string(),
            score,
        });
        self
    }

    /// Remove members of `key` whose score lies between `min` and `max`.
    pub fn remove_range_by_score(mut self, key: &str, min: ScoreBound, max: ScoreBound) -> Self {
        self.commands.push(Command::RemoveRangeByScore {
            key: key.to_string(),
            min,
            max,
        });
        self
    }

    /// Number of members in `key`.
    pub fn count(mut self, key: &str) -> Self {
        self.commands.push(Command::Count { key: key.to_string() });
        self
    }

    /// Members of `key` by rank from `start` to `stop` inclusive, with scores.
    pub fn range_with_scores(mut self, key: &str, start: isize, stop: isize) -> Self {
        self.commands.push(Command::RangeWithScores {
            key: key.to_string(),
            start,
            stop,
        });
        self
    }

    /// Set the time-to-live of `key` in seconds.
    pub fn expire(mut self, key: &str, seconds: u64) -> Self {
        self.commands.push(Command::Expire {
            key: key.to_string(),
            seconds,
        });
        self
    }

    /// Commands in submission order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// A key-value store with sorted-set operations and atomic batches.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Run every command in `pipeline` atomically, returning one reply per command.
    async fn execute(&self, pipeline: &Pipeline) -> Result<Vec<Reply>, StoreError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Check that a store answered with exactly one reply per command.
pub(crate) fn expect_replies(pipeline: &Pipeline, replies: &[Reply]) -> Result<(), StoreError> {
    if replies.len() != pipeline.len() {
        return Err(StoreError::Protocol(format!(
            "expected {} replies, got {}",
            pipeline.len(),
            replies.len()
        )));
    }
    Ok(())
}
