//! Timeout wrapper for store calls.

use aegis_core::{StoreError, StoreResult};
use std::future::Future;
use std::time::Duration;

/// Bounds a single store call.
///
/// An elapsed timer becomes [`StoreError::Timeout`], which the classifier
/// treats as transient.
pub async fn with_timeout<Fut, T>(duration: Duration, operation: &str, call: Fut) -> StoreResult<T>
where
    Fut: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(duration, call).await.map_err(|_| {
        StoreError::Timeout(format!("{} did not complete within {:?}", operation, duration))
    })?
}
