//! Configuration management for the recipe limiter.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{LimiterError, Result};
use crate::ratelimit::DEFAULT_NAMESPACE;

/// Prefix for structured environment overrides, e.g.
/// `RECIPE_LIMITER__RATE_LIMITING__LIMIT=5`.
pub const ENV_PREFIX: &str = "RECIPE_LIMITER";

/// Main configuration for the limiter service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Event store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Header carrying the authenticated caller identity
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            identity_header: default_identity_header(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 4000))
}

fn default_identity_header() -> String {
    "x-user-id".to_string()
}

/// Event store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Connection establishment timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Per-batch response timeout in milliseconds
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,

    /// Reconnect attempts before a call gives up
    #[serde(default = "default_retries")]
    pub retries: usize,
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Upper bound on one connection attempt including its retries.
    pub fn connect_budget(&self) -> Duration {
        let attempts = u32::try_from(self.retries)
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        self.connect_timeout()
            .checked_mul(attempts)
            .unwrap_or(Duration::MAX)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            connect_timeout_ms: default_connect_timeout(),
            response_timeout_ms: default_response_timeout(),
            retries: default_retries(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_connect_timeout() -> u64 {
    100
}

fn default_response_timeout() -> u64 {
    250
}

fn default_retries() -> usize {
    1
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Maximum admitted attempts per window
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Key prefix for per-user attempt logs
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_ms: default_window_ms(),
            namespace: default_namespace(),
        }
    }
}

fn default_limit() -> u64 {
    10
}

fn default_window_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl LimiterConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Resolve configuration once at startup.
    ///
    /// Sources, lowest precedence first: built-in defaults, the optional YAML
    /// file, `RECIPE_LIMITER__*` variables, then the legacy deployment
    /// variables (`RATE_LIMIT_RECIPES`, `RECIPE_RATE_LIMIT_WINDOW_MS`,
    /// `REDIS_URL`, `PORT`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }
        let mut config: LimiterConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.apply_legacy_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the variable names used by earlier deployments of the service.
    pub fn apply_legacy_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(limit) = lookup("RATE_LIMIT_RECIPES") {
            self.rate_limiting.limit = parse_var("RATE_LIMIT_RECIPES", &limit)?;
        }
        if let Some(window) = lookup("RECIPE_RATE_LIMIT_WINDOW_MS") {
            self.rate_limiting.window_ms = parse_var("RECIPE_RATE_LIMIT_WINDOW_MS", &window)?;
        }
        if let Some(url) = lookup("REDIS_URL") {
            self.store.redis_url = url;
        }
        if let Some(port) = lookup("PORT") {
            self.server.http_addr.set_port(parse_var("PORT", &port)?);
        }
        Ok(())
    }

    /// Reject settings the limiter cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.limit == 0 {
            return Err(LimiterError::Misconfigured(
                "rate_limiting.limit must be positive".to_string(),
            ));
        }
        if self.rate_limiting.window_ms == 0 {
            return Err(LimiterError::Misconfigured(
                "rate_limiting.window_ms must be positive".to_string(),
            ));
        }
        if self.rate_limiting.namespace.is_empty() {
            return Err(LimiterError::Config("rate_limiting.namespace must not be empty".to_string()));
        }
        if self.store.response_timeout_ms == 0 {
            warn!("store.response_timeout_ms is 0, every store call will time out and fail open");
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| LimiterError::Config(format!("Invalid {} value {:?}: {}", key, value, e)))
}
