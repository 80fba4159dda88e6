//! Application configuration structures.

use aegis_core::telemetry::TracingConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Cache facade behaviour.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Redis connection configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Retry/backoff policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "aegis-cache".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// How a read that finds a sliding window re-arms the entry's expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SlidingRefreshMode {
    /// The refresh call completes before the read returns; its failure fails the read.
    #[default]
    Inline,
    /// The refresh call is spawned and the payload is returned immediately.
    Background,
}

impl fmt::Display for SlidingRefreshMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => write!(f, "inline"),
            Self::Background => write!(f, "background"),
        }
    }
}

/// Cache facade configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Prefix prepended to every key, partitioning one store between instances.
    pub instance_name: String,
    /// Key prefixes whose operations get exactly one attempt.
    pub fail_fast_prefixes: Vec<String>,
    /// Sliding refresh behaviour on reads.
    pub sliding_refresh: SlidingRefreshMode,
    /// Upper bound for a single remote call, in milliseconds.
    pub operation_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            instance_name: String::new(),
            fail_fast_prefixes: vec!["UserClaimsCacheKey:".to_string()],
            sliding_refresh: SlidingRefreshMode::Inline,
            operation_timeout_ms: 5000,
        }
    }
}

impl CacheConfig {
    /// Returns the per-call timeout as a Duration.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL.
    pub url: String,
    /// Maximum number of pooled connections.
    pub pool_size: usize,
    /// Timeout for establishing a new connection, in seconds.
    pub connect_timeout_secs: u64,
    /// How long a caller may wait for a free connection, in milliseconds.
    pub wait_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            connect_timeout_secs: 5,
            wait_timeout_ms: 2000,
        }
    }
}

impl RedisConfig {
    /// Returns the connect timeout as a Duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Returns the pool wait timeout as a Duration.
    #[must_use]
    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts for a retried operation.
    pub max_retries: u32,
    /// Delay after the first failed attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Ceiling for any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

impl RetryConfig {
    /// Returns the base delay as a Duration.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Returns the delay ceiling as a Duration.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Emit JSON log lines.
    pub json_logs: bool,
    /// Report successful remote calls to the dependency sink.
    /// Failures are always reported.
    pub track_success: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            track_success: cfg!(debug_assertions),
        }
    }
}

impl ObservabilityConfig {
    /// Builds the tracing subscriber settings for this configuration.
    #[must_use]
    pub fn tracing_config(&self) -> TracingConfig {
        TracingConfig {
            json: self.json_logs,
            ..TracingConfig::with_level(&self.log_level)
        }
    }
}
