//! Redis store.

use super::{StoreConnection, StoreConnector};
use crate::entry::EntryWrite;
use crate::script::AtomicSetScript;
use aegis_core::{StoreError, StoreResult};
use async_trait::async_trait;
use deadpool::managed::Manager as _;
use redis::aio::MultiplexedConnection;
use tracing::debug;
use url::Url;

/// Opens multiplexed Redis connections.
pub struct RedisConnector {
    manager: deadpool_redis::Manager,
    target: String,
}

impl RedisConnector {
    /// Creates a connector for `url`. No connection is opened yet.
    pub fn new(url: &str) -> StoreResult<Self> {
        let manager = deadpool_redis::Manager::new(url).map_err(StoreError::from)?;
        Ok(Self {
            manager,
            target: describe_target(url),
        })
    }
}

#[async_trait]
impl StoreConnector for RedisConnector {
    type Connection = RedisConnection;

    async fn connect(&self) -> StoreResult<RedisConnection> {
        let inner = self.manager.create().await?;
        debug!(target_host = %self.target, "Opened Redis connection");
        Ok(RedisConnection { inner })
    }

    fn target(&self) -> &str {
        &self.target
    }
}

/// `host:port` (or socket path) of a Redis URL, without credentials.
fn describe_target(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => match (parsed.host_str(), parsed.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => format!("{}:6379", host),
            _ => parsed.path().to_string(),
        },
        Err(_) => "redis".to_string(),
    }
}

/// One multiplexed Redis connection.
pub struct RedisConnection {
    inner: MultiplexedConnection,
}

#[async_trait]
impl StoreConnection for RedisConnection {
    async fn read_fields(&mut self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        let values = redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async::<Vec<Option<Vec<u8>>>>(&mut self.inner)
            .await?;
        Ok(values)
    }

    async fn expire(&mut self, key: &str, seconds: i64) -> StoreResult<bool> {
        let applied = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async::<bool>(&mut self.inner)
            .await?;
        Ok(applied)
    }

    async fn delete(&mut self, key: &str) -> StoreResult<bool> {
        let deleted = redis::cmd("DEL")
            .arg(key)
            .query_async::<i64>(&mut self.inner)
            .await?;
        Ok(deleted > 0)
    }

    async fn set_entry(&mut self, key: &str, write: &EntryWrite, script: &AtomicSetScript) -> StoreResult<()> {
        let mut invocation = script.script().prepare_invoke();
        invocation
            .key(key)
            .arg(write.absolute_ticks)
            .arg(write.sliding_ticks)
            .arg(write.ttl_seconds)
            .arg(write.data.as_slice());

        let marker = invocation.invoke_async::<i64>(&mut self.inner).await?;
        if marker != 1 {
            return Err(StoreError::unexpected_reply(format!(
                "set script returned {}",
                marker
            )));
        }
        Ok(())
    }

    async fn ping(&mut self) -> StoreResult<()> {
        redis::cmd("PING").query_async::<String>(&mut self.inner).await?;
        Ok(())
    }
}
