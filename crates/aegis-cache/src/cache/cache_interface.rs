//! Cache interface trait for abstracted distributed caching.

use crate::entry::EntryOptions;
use aegis_core::{CacheError, CacheResult};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Distributed cache storing opaque byte payloads.
///
/// Object safe, so hosts can hold an `Arc<dyn DistributedCacheInterface>`.
/// Every operation can be cancelled through its token. A miss is `Ok(None)`,
/// never an error.
#[async_trait]
pub trait DistributedCacheInterface: Send + Sync {
    /// Get a payload, re-arming its sliding window if it has one.
    async fn get(&self, key: &str, cancel: &CancellationToken) -> CacheResult<Option<Vec<u8>>>;

    /// Store a payload with the given expiration.
    async fn set(
        &self,
        key: &str,
        value: &[u8],
        options: &EntryOptions,
        cancel: &CancellationToken,
    ) -> CacheResult<()>;

    /// Re-arm the sliding window of an entry without reading its payload.
    ///
    /// Missing entries are ignored.
    async fn refresh(&self, key: &str, cancel: &CancellationToken) -> CacheResult<()>;

    /// Delete an entry. Missing entries are ignored.
    async fn remove(&self, key: &str, cancel: &CancellationToken) -> CacheResult<()>;

    /// Blocking variants would stall an async runtime and are not offered.
    fn get_sync(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        Err(CacheError::NotSupported("get_sync"))
    }

    fn set_sync(&self, _key: &str, _value: &[u8], _options: &EntryOptions) -> CacheResult<()> {
        Err(CacheError::NotSupported("set_sync"))
    }

    fn refresh_sync(&self, _key: &str) -> CacheResult<()> {
        Err(CacheError::NotSupported("refresh_sync"))
    }

    fn remove_sync(&self, _key: &str) -> CacheResult<()> {
        Err(CacheError::NotSupported("remove_sync"))
    }
}

/// Extension trait with typed methods for convenience.
#[async_trait]
pub trait CacheExt: DistributedCacheInterface {
    /// Get a UTF-8 string.
    async fn get_string(&self, key: &str, cancel: &CancellationToken) -> CacheResult<Option<String>> {
        match self.get(key, cancel).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| CacheError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Set a UTF-8 string.
    async fn set_string(
        &self,
        key: &str,
        value: &str,
        options: &EntryOptions,
        cancel: &CancellationToken,
    ) -> CacheResult<()> {
        self.set(key, value.as_bytes(), options, cancel).await
    }

    /// Get a JSON-encoded value.
    async fn get_json<T: serde::de::DeserializeOwned + Send>(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> CacheResult<Option<T>> {
        match self.get(key, cancel).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Set a value as JSON.
    async fn set_json<T: serde::Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        options: &EntryOptions,
        cancel: &CancellationToken,
    ) -> CacheResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, &bytes, options, cancel).await
    }
}

// Blanket implementation for all DistributedCacheInterface implementations
impl<T: DistributedCacheInterface + ?Sized> CacheExt for T {}
