//! Store connection pool.
//!
//! A thin layer over `deadpool::managed`. Every physical connection gets an
//! id when it is opened. A connection reported as failed is detached from the
//! pool, so it can never be handed out again, and the pool opens a fresh one
//! on demand. Idle connections are returned as-is; a broken one is detected by
//! the next command, which is bounded by the operation timeout.

use crate::store::{RedisConnector, StoreConnection, StoreConnector};
use crate::telemetry::{DependencyTelemetry, TelemetryHandle, TracingTelemetry};
use crate::entry::EntryWrite;
use crate::script::AtomicSetScript;
use aegis_config::AppConfig;
use aegis_core::{CacheError, CacheResult, StoreError, StoreResult};
use aegis_resilience::{with_timeout, ConnectionSource};
use async_trait::async_trait;
use deadpool::managed::{self, Metrics, Object, Pool, PoolError, RecycleResult, TimeoutType};
use deadpool::Runtime;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Size and timing of a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum number of open connections.
    pub max_size: usize,
    /// Bound for opening a connection.
    pub connect_timeout: Duration,
    /// Bound for waiting on a free connection.
    pub wait_timeout: Duration,
    /// Bound for a single store command.
    pub operation_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 10,
            connect_timeout: Duration::from_secs(5),
            wait_timeout: Duration::from_secs(2),
            operation_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_size: config.redis.pool_size,
            connect_timeout: config.redis.connect_timeout(),
            wait_timeout: config.redis.wait_timeout(),
            operation_timeout: config.cache.operation_timeout(),
        }
    }
}

/// Pool occupancy snapshot.
pub type PoolStatus = managed::Status;

/// A pooled physical connection and its id.
pub struct ManagedConnection<T> {
    id: u64,
    inner: T,
}

/// `deadpool` manager opening connections through a [`StoreConnector`].
pub struct StoreManager<C> {
    connector: C,
    next_id: AtomicU64,
}

impl<C: StoreConnector> managed::Manager for StoreManager<C> {
    type Type = ManagedConnection<C::Connection>;
    type Error = StoreError;

    async fn create(&self) -> StoreResult<Self::Type> {
        let inner = self.connector.connect().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(connection_id = id, target_host = self.connector.target(), "Store connection opened");
        Ok(ManagedConnection { id, inner })
    }

    async fn recycle(&self, _conn: &mut Self::Type, _metrics: &Metrics) -> RecycleResult<StoreError> {
        Ok(())
    }
}

struct Shared {
    target: String,
    operation_timeout: Duration,
    telemetry: TelemetryHandle,
}

/// Connection pool shared by every clone of a cache.
pub struct ConnectionPool<C: StoreConnector> {
    pool: Pool<StoreManager<C>>,
    shared: Arc<Shared>,
}

impl<C: StoreConnector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: StoreConnector> ConnectionPool<C> {
    /// Creates a pool. Connections are opened lazily.
    pub fn new(connector: C, settings: &PoolSettings) -> CacheResult<Self> {
        let target = connector.target().to_string();
        let manager = StoreManager {
            connector,
            next_id: AtomicU64::new(0),
        };

        let pool = Pool::builder(manager)
            .max_size(settings.max_size)
            .wait_timeout(Some(settings.wait_timeout))
            .create_timeout(Some(settings.connect_timeout))
            .recycle_timeout(Some(settings.operation_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| CacheError::Configuration(format!("Failed to create pool: {}", e)))?;

        info!(target_host = %target, max_size = settings.max_size, "Store connection pool created");

        Ok(Self {
            pool,
            shared: Arc::new(Shared {
                target,
                operation_timeout: settings.operation_timeout,
                telemetry: TelemetryHandle::default(),
            }),
        })
    }

    /// Creates a pool from configuration, reporting to `sink` with the
    /// configured `observability.track_success`.
    pub fn with_config(connector: C, config: &AppConfig, sink: Arc<dyn DependencyTelemetry>) -> CacheResult<Self> {
        Ok(Self::new(connector, &PoolSettings::from_config(config))?
            .with_telemetry(sink, config.observability.track_success))
    }

    /// Reports every remote call to `sink`. Successful calls are reported only
    /// when `track_success` is set.
    #[must_use]
    pub fn with_telemetry(self, sink: Arc<dyn DependencyTelemetry>, track_success: bool) -> Self {
        Self {
            pool: self.pool,
            shared: Arc::new(Shared {
                target: self.shared.target.clone(),
                operation_timeout: self.shared.operation_timeout,
                telemetry: TelemetryHandle::new(sink, track_success),
            }),
        }
    }

    /// Store identity used in logs and telemetry.
    pub fn target(&self) -> &str {
        &self.shared.target
    }

    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Closes the pool. Pending and future borrows fail with
    /// [`StoreError::PoolClosed`].
    pub fn close(&self) {
        info!(target_host = %self.shared.target, "Closing store connection pool");
        self.pool.close();
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

impl ConnectionPool<RedisConnector> {
    /// Creates a Redis pool from configuration, logging remote calls through
    /// `tracing`.
    pub fn redis(config: &AppConfig) -> CacheResult<Self> {
        Self::redis_with_telemetry(config, Arc::new(TracingTelemetry))
    }

    /// Creates a Redis pool reporting remote calls to `sink`.
    pub fn redis_with_telemetry(config: &AppConfig, sink: Arc<dyn DependencyTelemetry>) -> CacheResult<Self> {
        let connector = RedisConnector::new(&config.redis.url)
            .map_err(|e| CacheError::Configuration(format!("Invalid Redis config: {}", e)))?;
        Self::with_config(connector, config, sink)
    }
}

#[async_trait]
impl<C: StoreConnector> ConnectionSource for ConnectionPool<C> {
    type Connection = PooledConnection<C>;
    type Error = StoreError;

    async fn borrow(&self) -> StoreResult<PooledConnection<C>> {
        let object = self.pool.get().await.map_err(pool_error)?;
        Ok(PooledConnection {
            object,
            shared: Arc::clone(&self.shared),
        })
    }

    fn report_failed(&self, connection: PooledConnection<C>, cause: &StoreError) {
        let id = connection.id();
        drop(Object::take(connection.object));
        warn!(connection_id = id, error = %cause, "Discarded failed store connection");
    }

    fn connection_id(&self, connection: &PooledConnection<C>) -> u64 {
        connection.id()
    }
}

fn pool_error(err: PoolError<StoreError>) -> StoreError {
    match err {
        PoolError::Backend(e) => e,
        PoolError::Timeout(TimeoutType::Wait) => {
            StoreError::timeout("timed out waiting for a free connection")
        }
        PoolError::Timeout(TimeoutType::Create) => StoreError::timeout("timed out opening a connection"),
        PoolError::Timeout(TimeoutType::Recycle) => StoreError::timeout("timed out recycling a connection"),
        PoolError::Closed => StoreError::PoolClosed,
        PoolError::NoRuntimeSpecified => StoreError::Internal("pool has no async runtime".to_string()),
        PoolError::PostCreateHook(e) => StoreError::Internal(e.to_string()),
    }
}

/// A connection borrowed for one attempt.
///
/// Returned to the pool on drop unless reported failed. Every command is
/// bounded by the operation timeout and reported to telemetry.
pub struct PooledConnection<C: StoreConnector> {
    object: Object<StoreManager<C>>,
    shared: Arc<Shared>,
}

impl<C: StoreConnector> PooledConnection<C> {
    pub fn id(&self) -> u64 {
        self.object.id
    }

    pub async fn read_fields(&mut self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        let started = Instant::now();
        let result = with_timeout(
            self.shared.operation_timeout,
            "HMGET",
            self.object.inner.read_fields(key, fields),
        )
        .await;
        self.finish("HMGET", started, &result);
        result
    }

    pub async fn expire(&mut self, key: &str, seconds: i64) -> StoreResult<bool> {
        let started = Instant::now();
        let result = with_timeout(
            self.shared.operation_timeout,
            "EXPIRE",
            self.object.inner.expire(key, seconds),
        )
        .await;
        self.finish("EXPIRE", started, &result);
        result
    }

    pub async fn delete(&mut self, key: &str) -> StoreResult<bool> {
        let started = Instant::now();
        let result = with_timeout(self.shared.operation_timeout, "DEL", self.object.inner.delete(key)).await;
        self.finish("DEL", started, &result);
        result
    }

    pub async fn set_entry(&mut self, key: &str, write: &EntryWrite, script: &AtomicSetScript) -> StoreResult<()> {
        let started = Instant::now();
        let result = with_timeout(
            self.shared.operation_timeout,
            "EVALSHA",
            self.object.inner.set_entry(key, write, script),
        )
        .await;
        self.finish("EVALSHA", started, &result);
        result
    }

    pub async fn ping(&mut self) -> StoreResult<()> {
        let started = Instant::now();
        let result = with_timeout(self.shared.operation_timeout, "PING", self.object.inner.ping()).await;
        self.finish("PING", started, &result);
        result
    }

    fn finish<T>(&self, operation: &'static str, started: Instant, result: &StoreResult<T>) {
        self.shared.telemetry.record(
            operation,
            &self.shared.target,
            self.id(),
            started.elapsed(),
            result,
        );
    }
}

impl<C: StoreConnector> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id())
            .field("target", &self.shared.target)
            .finish()
    }
}

impl<C: StoreConnector> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("ConnectionPool")
            .field("target", &self.shared.target)
            .field("size", &status.size)
            .field("available", &status.available)
            .field("telemetry", &self.shared.telemetry)
            .finish()
    }
}
