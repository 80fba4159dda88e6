//! # Aegis Cache
//!
//! Resilient distributed cache client for Redis-compatible stores.
//!
//! Entries are stored as one hash per key holding the payload and its
//! expiration markers, written atomically by a server-side script. Reads on
//! entries with a sliding window re-arm their expiry. Transient store failures
//! are retried on fresh connections with exponential backoff, except for keys
//! configured as fail-fast, which get exactly one attempt.
//!
//! ```no_run
//! use aegis_cache::{CacheExt, DistributedCache, EntryOptions};
//! use aegis_config::AppConfig;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> aegis_core::CacheResult<()> {
//! let cache = DistributedCache::connect(&AppConfig::default()).await?;
//! let cancel = CancellationToken::new();
//! let options = EntryOptions::new().with_sliding_expiration(Duration::from_secs(300));
//!
//! cache.set_string("greeting", "hello", &options, &cancel).await?;
//! assert_eq!(cache.get_string("greeting", &cancel).await?.as_deref(), Some("hello"));
//! cache.close();
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod entry;
pub mod pool;
pub mod script;
pub mod store;
pub mod telemetry;
pub mod ttl;

pub use cache::{AttemptMode, CacheExt, DistributedCache, DistributedCacheInterface, KeyPolicy};
pub use entry::EntryOptions;
pub use pool::{ConnectionPool, PoolSettings, PoolStatus, PooledConnection};
pub use script::AtomicSetScript;
pub use store::{MemoryConnector, MemoryStore, RedisConnector, StoreConnection, StoreConnector};
pub use telemetry::{CallOutcome, DependencyCall, DependencyTelemetry, MetricsTelemetry, TracingTelemetry};
