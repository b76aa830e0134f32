//! Redis-backed event store.
//!
//! Pipelines are sent as `MULTI`/`EXEC` transactions over a shared
//! [`ConnectionManager`], which reconnects on its own after the server
//! restarts. Every batch is bounded by the configured response timeout.

use std::time::{Duration, Instant};

use ::redis::aio::{ConnectionManager, ConnectionManagerConfig};
use ::redis::{from_redis_value, Client, RedisError, Value};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{expect_replies, Command, EventStore, Pipeline, Reply, ScoreBound, StoreError};
use crate::config::StoreConfig;

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Unavailable(format!("timed out: {}", err))
        } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Protocol(err.to_string())
        }
    }
}

/// An [`EventStore`] backed by a Redis server.
///
/// The connection is established on first use, so the service can start
/// while the server is down and pick it up once it appears. Only one task
/// attempts to connect at a time; concurrent callers fail immediately
/// instead of queueing behind it, and a failed attempt is not retried until
/// one connect budget has passed.
pub struct RedisStore {
    client: Client,
    config: StoreConfig,
    connection: RwLock<Option<ConnectionManager>>,
    connecting: tokio::sync::Mutex<()>,
    last_failure: Mutex<Option<Instant>>,
}

impl RedisStore {
    /// Create a store for `config` without connecting yet.
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config: config.clone(),
            connection: RwLock::new(None),
            connecting: tokio::sync::Mutex::new(()),
            last_failure: Mutex::new(None),
        })
    }

    /// Create a store and connect immediately.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let store = Self::new(config)?;
        store.connection().await?;
        Ok(store)
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        if let Some(connection) = self.connection.read().clone() {
            return Ok(connection);
        }

        let Ok(_guard) = self.connecting.try_lock() else {
            return Err(StoreError::Unavailable(
                "connection attempt already in progress".to_string(),
            ));
        };

        // Another task may have connected while we waited for the guard.
        if let Some(connection) = self.connection.read().clone() {
            return Ok(connection);
        }

        let budget = self.config.connect_budget();
        if let Some(failed_at) = *self.last_failure.lock() {
            if failed_at.elapsed() < budget {
                return Err(StoreError::Unavailable(
                    "backing off after failed connection attempt".to_string(),
                ));
            }
        }

        let manager_config = ConnectionManagerConfig::new()
            .set_number_of_retries(self.config.retries)
            .set_connection_timeout(self.config.connect_timeout());

        match self
            .run(budget, self.client.get_connection_manager_with_config(manager_config))
            .await
        {
            Ok(connection) => {
                info!(url = %redact(&self.config.redis_url), "Connected to event store");
                *self.last_failure.lock() = None;
                *self.connection.write() = Some(connection.clone());
                Ok(connection)
            }
            Err(e) => {
                warn!(url = %redact(&self.config.redis_url), error = %e, "Failed to connect to event store");
                *self.last_failure.lock() = Some(Instant::now());
                Err(e)
            }
        }
    }

    async fn run<T: Send>(
        &self,
        limit: Duration,
        fut: impl std::future::Future<Output = Result<T, RedisError>> + Send,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(limit)),
        }
    }
}

fn bound(bound: ScoreBound, unbounded: &str) -> String {
    match bound {
        ScoreBound::Unbounded => unbounded.to_string(),
        ScoreBound::Inclusive(score) => score.to_string(),
        ScoreBound::Exclusive(score) => format!("({}", score),
    }
}

fn to_redis_pipeline(pipeline: &Pipeline) -> ::redis::Pipeline {
    let mut pipe = ::redis::pipe();
    pipe.atomic();
    for command in pipeline.commands() {
        match command {
            Command::Add { key, member, score } => {
                pipe.zadd(key, member, *score);
            }
            Command::RemoveRangeByScore { key, min, max } => {
                pipe.zrembyscore(key, bound(*min, "-inf"), bound(*max, "+inf"));
            }
            Command::Count { key } => {
                pipe.zcard(key);
            }
            Command::RangeWithScores { key, start, stop } => {
                pipe.zrange_withscores(key, *start, *stop);
            }
            Command::Expire { key, seconds } => {
                pipe.expire(key, *seconds as i64);
            }
        }
    }
    pipe
}

fn to_reply(command: &Command, value: &Value) -> Result<Reply, StoreError> {
    match command {
        Command::RangeWithScores { .. } => {
            let members: Vec<(String, f64)> = from_redis_value(value)?;
            Ok(Reply::Scored(
                members
                    .into_iter()
                    .map(|(member, score)| (member, score as i64))
                    .collect(),
            ))
        }
        _ => Ok(Reply::Integer(from_redis_value(value)?)),
    }
}

#[async_trait]
impl EventStore for RedisStore {
    async fn execute(&self, pipeline: &Pipeline) -> Result<Vec<Reply>, StoreError> {
        let pipe = to_redis_pipeline(pipeline);
        let mut connection = self.connection().await?;

        let values: Vec<Value> = self
            .run(self.config.response_timeout(), async move {
                pipe.query_async(&mut connection).await
            })
            .await?;

        debug!(commands = pipeline.len(), "Executed store pipeline");

        let replies = pipeline
            .commands()
            .iter()
            .zip(values.iter())
            .map(|(command, value)| to_reply(command, value))
            .collect::<Result<Vec<_>, _>>()?;
        expect_replies(pipeline, &replies)?;
        Ok(replies)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut connection = self.connection().await?;
        let _: String = self
            .run(self.config.response_timeout(), async move {
                ::redis::cmd("PING").query_async(&mut connection).await
            })
            .await?;
        Ok(())
    }
}

/// Strip credentials from a connection URL before logging it.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
