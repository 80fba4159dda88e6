//! Backing store abstraction.
//!
//! The cache speaks to its store through four commands: a multi-field hash
//! read, an expiry update, a delete and the atomic set script. A connector
//! opens connections that the pool owns.

mod memory;
mod redis;

pub use self::memory::{MemoryConnection, MemoryConnector, MemoryStore};
pub use self::redis::{RedisConnection, RedisConnector};

use crate::entry::EntryWrite;
use crate::script::AtomicSetScript;
use aegis_core::StoreResult;
use async_trait::async_trait;

/// A single physical connection to the backing store.
#[async_trait]
pub trait StoreConnection: Send + 'static {
    /// Reads `fields` of the hash at `key`. Missing fields come back as `None`.
    async fn read_fields(&mut self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<Vec<u8>>>>;

    /// Sets the TTL of `key`. Returns false when the key does not exist.
    async fn expire(&mut self, key: &str, seconds: i64) -> StoreResult<bool>;

    /// Deletes `key`. Returns false when it did not exist.
    async fn delete(&mut self, key: &str) -> StoreResult<bool>;

    /// Writes an entry through the atomic set script.
    async fn set_entry(&mut self, key: &str, write: &EntryWrite, script: &AtomicSetScript) -> StoreResult<()>;

    /// Round-trips a no-op command.
    async fn ping(&mut self) -> StoreResult<()>;
}

/// Opens connections to a backing store.
#[async_trait]
pub trait StoreConnector: Send + Sync + 'static {
    type Connection: StoreConnection;

    /// Opens a new connection.
    async fn connect(&self) -> StoreResult<Self::Connection>;

    /// Identity of the store, reported to telemetry. Never contains credentials.
    fn target(&self) -> &str;
}
