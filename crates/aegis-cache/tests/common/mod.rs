//! Common test infrastructure for cache integration tests.

#![allow(dead_code)]

use aegis_cache::{ConnectionPool, DependencyCall, DependencyTelemetry, DistributedCache, MemoryConnector, MemoryStore};
use aegis_config::AppConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// A cache over an in-memory store the test can inspect and break.
pub struct TestCache {
    pub cache: DistributedCache<MemoryConnector>,
    pub store: MemoryStore,
    pub telemetry: Arc<RecordingTelemetry>,
}

impl TestCache {
    /// Creates a cache with default configuration.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Creates a cache with the given configuration.
    pub fn with_config(config: AppConfig) -> Self {
        let store = MemoryStore::new();
        let telemetry = Arc::new(RecordingTelemetry::default());
        let pool = ConnectionPool::with_config(MemoryConnector::new(store.clone()), &config, telemetry.clone())
            .expect("Failed to create pool");

        Self {
            cache: DistributedCache::new(pool, &config),
            store,
            telemetry,
        }
    }
}

/// Configuration used by the integration tests.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.cache.operation_timeout_ms = 1_000;
    config.retry.max_retries = 3;
    config.retry.base_delay_ms = 100;
    config.retry.max_delay_ms = 2_000;
    config.observability.track_success = true;
    config
}

/// Telemetry sink keeping every reported call.
#[derive(Default)]
pub struct RecordingTelemetry {
    calls: Mutex<Vec<DependencyCall>>,
}

impl RecordingTelemetry {
    pub fn calls(&self) -> Vec<DependencyCall> {
        self.calls.lock().clone()
    }

    /// Connection ids used by calls of `operation`, in order.
    pub fn connection_ids(&self, operation: &str) -> Vec<u64> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.operation == operation)
            .map(|call| call.connection_id)
            .collect()
    }
}

impl DependencyTelemetry for RecordingTelemetry {
    fn track_dependency(&self, call: &DependencyCall) {
        self.calls.lock().push(call.clone());
    }
}

/// Pause long enough for spawned tasks to run.
pub const TICK: Duration = Duration::from_millis(10);
