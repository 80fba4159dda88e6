//! Redis-compatible distributed cache.

use super::cache_keys::{AttemptMode, KeyPolicy};
use super::DistributedCacheInterface;
use crate::entry::{EntryMetadata, EntryOptions, EntryWrite, StoredEntry, ENTRY_FIELD_NAMES, MARKER_FIELD_NAMES};
use crate::pool::{ConnectionPool, PoolStatus, PooledConnection};
use crate::script::AtomicSetScript;
use crate::store::{RedisConnector, StoreConnector};
use crate::telemetry::{DependencyTelemetry, TracingTelemetry};
use crate::ttl;
use aegis_config::{AppConfig, SlidingRefreshMode};
use aegis_core::{CacheError, CacheResult, StoreResult};
use aegis_resilience::RetryPolicy;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Inner<C: StoreConnector> {
    pool: ConnectionPool<C>,
    keys: KeyPolicy,
    retry: RetryPolicy,
    sliding_refresh: SlidingRefreshMode,
    script: AtomicSetScript,
}

/// Cache-aside store over a pooled key-value server.
///
/// Cheap to clone; clones share the pool.
pub struct DistributedCache<C: StoreConnector> {
    inner: Arc<Inner<C>>,
}

impl<C: StoreConnector> Clone for DistributedCache<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl DistributedCache<RedisConnector> {
    /// Builds a Redis-backed cache and checks that the server answers.
    /// Remote calls are logged through `tracing`.
    ///
    /// The caller owns the returned cache's pool; call
    /// [`close`](Self::close) on shutdown.
    pub async fn connect(config: &AppConfig) -> CacheResult<Self> {
        Self::connect_with_telemetry(config, Arc::new(TracingTelemetry)).await
    }

    /// Like [`connect`](Self::connect), reporting remote calls to `sink`.
    pub async fn connect_with_telemetry(config: &AppConfig, sink: Arc<dyn DependencyTelemetry>) -> CacheResult<Self> {
        info!("Connecting distributed cache...");

        let cache = Self::new(ConnectionPool::redis_with_telemetry(config, sink)?, config);
        cache.ping(&CancellationToken::new()).await?;

        info!(target_host = cache.pool().target(), "Distributed cache connected");
        Ok(cache)
    }
}

impl<C: StoreConnector> DistributedCache<C> {
    /// Creates a cache over an existing pool.
    pub fn new(pool: ConnectionPool<C>, config: &AppConfig) -> Self {
        Self::with_policies(
            pool,
            KeyPolicy::from_config(&config.cache),
            RetryPolicy::new(
                config.retry.max_retries,
                config.retry.base_delay(),
                config.retry.max_delay(),
            ),
            config.cache.sliding_refresh,
        )
    }

    /// Creates a cache from its individual parts.
    pub fn with_policies(
        pool: ConnectionPool<C>,
        keys: KeyPolicy,
        retry: RetryPolicy,
        sliding_refresh: SlidingRefreshMode,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                keys,
                retry,
                sliding_refresh,
                script: AtomicSetScript::new(),
            }),
        }
    }

    /// The pool this cache borrows from.
    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.inner.pool
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.inner.pool.status()
    }

    /// Closes the pool shared by all clones of this cache.
    pub fn close(&self) {
        self.inner.pool.close();
    }

    /// Checks that the store answers.
    pub async fn ping(&self, cancel: &CancellationToken) -> CacheResult<()> {
        self.inner
            .retry
            .execute(&self.inner.pool, "PING", cancel, |conn| Box::pin(conn.ping()))
            .await
            .map_err(CacheError::from)
    }

    /// Gets the payload at `key`, or `None` on a miss.
    ///
    /// A hit on an entry with a sliding window re-arms its expiry.
    pub async fn get(&self, key: &str, cancel: &CancellationToken) -> CacheResult<Option<Vec<u8>>> {
        let instance_key = self.inner.keys.instance_key(key)?;

        let reply = self
            .run(key, "GET", cancel, |conn| {
                let instance_key = instance_key.clone();
                Box::pin(async move { conn.read_fields(&instance_key, &ENTRY_FIELD_NAMES).await })
            })
            .await?;
        let entry = StoredEntry::from_reply(reply).map_err(CacheError::Store)?;

        let Some(data) = entry.data else {
            debug!(key, "Cache miss");
            return Ok(None);
        };

        if let Some(ttl) = sliding_ttl(&entry.metadata) {
            match self.inner.sliding_refresh {
                SlidingRefreshMode::Inline => self.expire(key, &instance_key, ttl, cancel).await?,
                SlidingRefreshMode::Background => self.spawn_expire(key, instance_key, ttl),
            }
        }

        debug!(key, "Cache hit");
        Ok(Some(data))
    }

    /// Stores `value` at `key` with the given expiration.
    pub async fn set(
        &self,
        key: &str,
        value: &[u8],
        options: &EntryOptions,
        cancel: &CancellationToken,
    ) -> CacheResult<()> {
        let instance_key = self.inner.keys.instance_key(key)?;
        options.validate()?;

        let creation = Utc::now();
        let absolute = ttl::absolute_expiration(
            creation,
            options.absolute_expiration,
            options.absolute_expiration_relative_to_now,
        )?;
        let ttl_seconds = ttl::ttl_seconds(creation, absolute, options.sliding_expiration);
        let write = Arc::new(EntryWrite::new(
            absolute,
            options.sliding_expiration,
            ttl_seconds,
            value.to_vec(),
        )?);

        let inner = Arc::clone(&self.inner);
        self.run(key, "SET", cancel, |conn| {
            let instance_key = instance_key.clone();
            let write = Arc::clone(&write);
            let inner = Arc::clone(&inner);
            Box::pin(async move { conn.set_entry(&instance_key, &write, &inner.script).await })
        })
        .await?;

        debug!(key, ttl_seconds, "Cache entry stored");
        Ok(())
    }

    /// Re-arms the sliding window of `key`. Missing entries are ignored.
    pub async fn refresh(&self, key: &str, cancel: &CancellationToken) -> CacheResult<()> {
        let instance_key = self.inner.keys.instance_key(key)?;

        let reply = self
            .run(key, "REFRESH", cancel, |conn| {
                let instance_key = instance_key.clone();
                Box::pin(async move { conn.read_fields(&instance_key, &MARKER_FIELD_NAMES).await })
            })
            .await?;
        let metadata = EntryMetadata::from_reply(&reply).map_err(CacheError::Store)?;

        if let Some(ttl) = sliding_ttl(&metadata) {
            self.expire(key, &instance_key, ttl, cancel).await?;
        }
        Ok(())
    }

    /// Removes `key`. Missing entries are ignored.
    pub async fn remove(&self, key: &str, cancel: &CancellationToken) -> CacheResult<()> {
        let instance_key = self.inner.keys.instance_key(key)?;

        let existed = self
            .run(key, "REMOVE", cancel, |conn| {
                let instance_key = instance_key.clone();
                Box::pin(async move { conn.delete(&instance_key).await })
            })
            .await?;

        debug!(key, existed, "Cache entry removed");
        Ok(())
    }

    async fn expire(&self, key: &str, instance_key: &str, ttl: i64, cancel: &CancellationToken) -> CacheResult<()> {
        self.run(key, "EXPIRE", cancel, |conn| {
            let instance_key = instance_key.to_string();
            Box::pin(async move { conn.expire(&instance_key, ttl).await })
        })
        .await?;
        Ok(())
    }

    /// Re-arms the expiry off the caller's path. Failures are only logged.
    fn spawn_expire(&self, key: &str, instance_key: String, ttl: i64) {
        let cache = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            if let Err(e) = cache.expire(&key, &instance_key, ttl, &cancel).await {
                warn!(key = %key, error = %e, "Background sliding refresh failed");
            }
        });
    }

    /// Runs `op` with the attempt mode of `key`.
    async fn run<T, F>(&self, key: &str, operation: &'static str, cancel: &CancellationToken, op: F) -> CacheResult<T>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut PooledConnection<C>) -> BoxFuture<'c, StoreResult<T>> + Send,
    {
        let inner = &self.inner;
        let result = match inner.keys.attempt_mode(key) {
            AttemptMode::Retried => inner.retry.execute(&inner.pool, operation, cancel, op).await,
            AttemptMode::FailFast => inner.retry.execute_once(&inner.pool, operation, cancel, op).await,
        };
        result.map_err(CacheError::from)
    }
}

/// TTL to re-arm on access, when the entry has a sliding window.
fn sliding_ttl(metadata: &EntryMetadata) -> Option<i64> {
    metadata.sliding_expiration?;
    ttl::ttl_seconds(Utc::now(), metadata.absolute_expiration, metadata.sliding_expiration)
}

#[async_trait]
impl<C: StoreConnector> DistributedCacheInterface for DistributedCache<C> {
    async fn get(&self, key: &str, cancel: &CancellationToken) -> CacheResult<Option<Vec<u8>>> {
        DistributedCache::get(self, key, cancel).await
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        options: &EntryOptions,
        cancel: &CancellationToken,
    ) -> CacheResult<()> {
        DistributedCache::set(self, key, value, options, cancel).await
    }

    async fn refresh(&self, key: &str, cancel: &CancellationToken) -> CacheResult<()> {
        DistributedCache::refresh(self, key, cancel).await
    }

    async fn remove(&self, key: &str, cancel: &CancellationToken) -> CacheResult<()> {
        DistributedCache::remove(self, key, cancel).await
    }
}

impl<C: StoreConnector> std::fmt::Debug for DistributedCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedCache")
            .field("pool", &self.inner.pool)
            .field("keys", &self.inner.keys)
            .field("retry", &self.inner.retry)
            .field("sliding_refresh", &self.inner.sliding_refresh)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolSettings;
    use crate::store::{MemoryConnector, MemoryStore};
    use aegis_core::StoreError;
    use std::time::Duration;

    fn cache_with(store: &MemoryStore, config: &AppConfig) -> DistributedCache<MemoryConnector> {
        let pool = ConnectionPool::new(MemoryConnector::new(store.clone()), &PoolSettings::from_config(config))
            .unwrap();
        DistributedCache::new(pool, config)
    }

    fn cache(store: &MemoryStore) -> DistributedCache<MemoryConnector> {
        cache_with(store, &AppConfig::default())
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        let cancel = CancellationToken::new();
        let options = EntryOptions::new().with_absolute_expiration_relative_to_now(Duration::from_secs(60));

        cache.set("k1", b"v1", &options, &cancel).await.unwrap();
        assert_eq!(cache.get("k1", &cancel).await.unwrap(), Some(b"v1".to_vec()));

        cache.remove("k1", &cancel).await.unwrap();
        assert_eq!(cache.get("k1", &cancel).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_instance_prefix_is_applied() {
        let store = MemoryStore::new();
        let mut config = AppConfig::default();
        config.cache.instance_name = "svc:".to_string();
        let cache = cache_with(&store, &config);
        let cancel = CancellationToken::new();

        cache.set("k", b"v", &EntryOptions::new(), &cancel).await.unwrap();
        assert!(store.contains_key("svc:k"));
        assert!(!store.contains_key("k"));
    }

    #[tokio::test]
    async fn test_get_without_sliding_does_not_mutate() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        let cancel = CancellationToken::new();
        let options = EntryOptions::new().with_absolute_expiration_relative_to_now(Duration::from_secs(60));

        cache.set("k", b"v", &options, &cancel).await.unwrap();
        let before = store.commands();
        cache.get("k", &cancel).await.unwrap();
        assert_eq!(store.commands(), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_with_sliding_rearms_expiry() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        let cancel = CancellationToken::new();
        let options = EntryOptions::new().with_sliding_expiration(Duration::from_secs(10));

        cache.set("k", b"v", &options, &cancel).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(4)));

        let before = store.commands();
        assert!(cache.get("k", &cancel).await.unwrap().is_some());
        assert_eq!(store.commands(), before + 2);
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_set_without_expiration_persists() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        let cancel = CancellationToken::new();

        cache.set("k", b"v", &EntryOptions::new(), &cancel).await.unwrap();
        assert!(store.contains_key("k"));
        assert_eq!(store.ttl("k"), None);
    }

    #[tokio::test]
    async fn test_invalid_arguments_make_no_remote_call() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        let cancel = CancellationToken::new();

        assert!(matches!(cache.get("", &cancel).await, Err(CacheError::InvalidArgument(_))));

        let past = EntryOptions::new().with_absolute_expiration(Utc::now() - chrono::TimeDelta::seconds(1));
        assert!(matches!(
            cache.set("k", b"v", &past, &cancel).await,
            Err(CacheError::InvalidArgument(_))
        ));

        let zero = EntryOptions::new().with_sliding_expiration(Duration::ZERO);
        assert!(cache.set("k", b"v", &zero, &cancel).await.is_err());
        assert_eq!(store.commands(), 0);
    }

    #[tokio::test]
    async fn test_unrepresentable_expirations_make_no_remote_call() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        let cancel = CancellationToken::new();

        let far = chrono::TimeZone::with_ymd_and_hms(&Utc, 100_000, 1, 1, 0, 0, 0).unwrap();
        let rejected = [
            EntryOptions::new().with_absolute_expiration(far),
            EntryOptions::new().with_absolute_expiration_relative_to_now(Duration::from_secs(1_000_000_000_000)),
            EntryOptions::new().with_sliding_expiration(Duration::from_secs(u64::MAX)),
            EntryOptions::new().with_sliding_expiration(Duration::from_millis(500)),
            EntryOptions::new().with_absolute_expiration_relative_to_now(Duration::from_millis(500)),
        ];

        for options in &rejected {
            assert!(matches!(
                cache.set("k", b"v", options, &cancel).await,
                Err(CacheError::InvalidArgument(_))
            ));
        }
        assert_eq!(store.commands(), 0);
        assert!(!store.contains_key("k"));
    }

    #[tokio::test]
    async fn test_refresh_missing_key_is_noop() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        let cancel = CancellationToken::new();

        cache.refresh("absent", &cancel).await.unwrap();
        assert_eq!(store.commands(), 1);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_store_error() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        store.put_field("k", "absexp", "tomorrow");
        store.put_field("k", "data", "v");

        let err = cache.get("k", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CacheError::Store(StoreError::UnexpectedReply(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        store.fail_next(2, StoreError::timeout("injected"));

        let result = cache.get("Product:1", &CancellationToken::new()).await;
        assert_eq!(result.unwrap(), None);
        assert_eq!(store.commands(), 3);
        assert_eq!(store.connections_opened(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        store.fail_always(StoreError::Busy("LOADING".into()));

        let err = cache.remove("Product:1", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::RetriesExhausted { attempts: 3, source: StoreError::Busy(_) }
        ));
        assert_eq!(store.commands(), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        store.fail_always(StoreError::Authentication("WRONGPASS".into()));

        let err = cache.get("Product:1", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CacheError::Store(StoreError::Authentication(_))));
        assert_eq!(store.commands(), 1);
    }

    #[tokio::test]
    async fn test_fail_fast_key_makes_one_attempt() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        store.fail_always(StoreError::timeout("injected"));

        let err = cache
            .get("UserClaimsCacheKey:abc", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Unavailable(StoreError::Timeout(_))));
        assert_eq!(store.commands(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_borrowing() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(cache.get("k", &cancel).await, Err(CacheError::Cancelled)));
        assert_eq!(store.connections_opened(), 0);
    }

    #[tokio::test]
    async fn test_sync_variants_are_not_supported() {
        let store = MemoryStore::new();
        let cache = cache(&store);

        assert!(matches!(cache.get_sync("k"), Err(CacheError::NotSupported(_))));
        assert!(matches!(
            cache.set_sync("k", b"v", &EntryOptions::new()),
            Err(CacheError::NotSupported(_))
        ));
        assert!(matches!(cache.refresh_sync("k"), Err(CacheError::NotSupported(_))));
        assert!(matches!(cache.remove_sync("k"), Err(CacheError::NotSupported(_))));
        assert_eq!(store.commands(), 0);
    }

    #[tokio::test]
    async fn test_ping_and_close() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        let cancel = CancellationToken::new();

        cache.ping(&cancel).await.unwrap();
        cache.close();
        assert!(matches!(
            cache.get("k", &cancel).await,
            Err(CacheError::Store(StoreError::PoolClosed))
        ));
    }
}
