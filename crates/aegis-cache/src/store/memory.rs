//! In-process store for local development and tests.
//!
//! Behaves like the subset of Redis the cache uses: hash entries, key TTLs
//! driven by the tokio clock, `PERSIST` on writes without a TTL. Faults can be
//! injected to exercise the retry and fail-fast paths.

use super::{StoreConnection, StoreConnector};
use crate::entry::{EntryWrite, ABSOLUTE_EXPIRATION, DATA, SLIDING_EXPIRATION};
use crate::script::AtomicSetScript;
use aegis_core::{StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Record {
    fields: HashMap<String, Vec<u8>>,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_next: u32,
    fail_always: bool,
    error: Option<StoreError>,
    latency: Duration,
    refuse_connections: u32,
}

impl Faults {
    fn take_command_failure(&mut self) -> Option<StoreError> {
        if self.fail_always {
            return self.error.clone();
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return self.error.clone();
        }
        None
    }
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<String, Record>,
    faults: Faults,
    commands: u64,
    connections_opened: u64,
}

impl State {
    /// Returns the live record at `key`, dropping it first if it expired.
    fn live(&mut self, key: &str) -> Option<&mut Record> {
        let expired = self
            .records
            .get(key)
            .and_then(|record| record.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.records.remove(key);
        }
        self.records.get_mut(key)
    }

    fn expire(&mut self, key: &str, seconds: i64) -> bool {
        if self.live(key).is_none() {
            return false;
        }
        if seconds <= 0 {
            self.records.remove(key);
            return true;
        }
        if let Some(record) = self.records.get_mut(key) {
            let seconds = u64::try_from(seconds).unwrap_or_default();
            record.expires_at = Instant::now().checked_add(Duration::from_secs(seconds));
        }
        true
    }
}

/// Shared state of an in-memory store. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` commands with `error`.
    pub fn fail_next(&self, count: u32, error: StoreError) {
        let mut state = self.state.lock();
        state.faults.fail_next = count;
        state.faults.error = Some(error);
    }

    /// Fails every command with `error` until [`MemoryStore::clear_faults`].
    pub fn fail_always(&self, error: StoreError) {
        let mut state = self.state.lock();
        state.faults.fail_always = true;
        state.faults.error = Some(error);
    }

    /// Delays every command by `latency` before it runs.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().faults.latency = latency;
    }

    /// Refuses the next `count` connection attempts.
    pub fn refuse_connections(&self, count: u32) {
        self.state.lock().faults.refuse_connections = count;
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        self.state.lock().faults = Faults::default();
    }

    /// Number of data commands received, including failed ones. `PING` is not counted.
    pub fn commands(&self) -> u64 {
        self.state.lock().commands
    }

    /// Number of connections opened so far.
    pub fn connections_opened(&self) -> u64 {
        self.state.lock().connections_opened
    }

    /// Returns true if `key` holds a live entry.
    pub fn contains_key(&self, key: &str) -> bool {
        self.state.lock().live(key).is_some()
    }

    /// Remaining lifetime of `key`, or `None` when it is missing or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.state.lock();
        let expires_at = state.live(key)?.expires_at?;
        Some(expires_at.saturating_duration_since(Instant::now()))
    }

    /// Raw value of one hash field.
    pub fn field(&self, key: &str, field: &str) -> Option<Vec<u8>> {
        self.state.lock().live(key)?.fields.get(field).cloned()
    }

    /// Overwrites one hash field without touching the TTL.
    pub fn put_field(&self, key: &str, field: &str, value: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .records
            .entry(key.to_string())
            .or_default()
            .fields
            .insert(field.to_string(), value.into());
    }

    /// Runs one data command, applying injected faults first.
    async fn command<T>(&self, apply: impl FnOnce(&mut State) -> T + Send) -> StoreResult<T> {
        self.state.lock().commands += 1;
        self.inject_faults().await?;
        Ok(apply(&mut self.state.lock()))
    }

    /// Waits out the injected latency, then fails if a fault is armed.
    async fn inject_faults(&self) -> StoreResult<()> {
        let (latency, failure) = {
            let mut state = self.state.lock();
            (state.faults.latency, state.faults.take_command_failure())
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Connector handing out connections to a [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    store: MemoryStore,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self) -> StoreResult<MemoryConnection> {
        let mut state = self.store.state.lock();
        if state.faults.refuse_connections > 0 {
            state.faults.refuse_connections -= 1;
            return Err(StoreError::connection("connection refused"));
        }
        state.connections_opened += 1;
        Ok(MemoryConnection {
            store: self.store.clone(),
        })
    }

    fn target(&self) -> &str {
        "memory"
    }
}

/// A connection to a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryConnection {
    store: MemoryStore,
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn read_fields(&mut self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        self.store
            .command(|state| match state.live(key) {
                Some(record) => fields
                    .iter()
                    .map(|field| record.fields.get(*field).cloned())
                    .collect(),
                None => vec![None; fields.len()],
            })
            .await
    }

    async fn expire(&mut self, key: &str, seconds: i64) -> StoreResult<bool> {
        self.store.command(|state| state.expire(key, seconds)).await
    }

    async fn delete(&mut self, key: &str) -> StoreResult<bool> {
        self.store
            .command(|state| {
                let existed = state.live(key).is_some();
                state.records.remove(key);
                existed
            })
            .await
    }

    async fn set_entry(&mut self, key: &str, write: &EntryWrite, _script: &AtomicSetScript) -> StoreResult<()> {
        self.store
            .command(|state| {
                let record = state.records.entry(key.to_string()).or_default();
                record.fields.insert(
                    ABSOLUTE_EXPIRATION.name.to_string(),
                    write.absolute_ticks.to_string().into_bytes(),
                );
                record.fields.insert(
                    SLIDING_EXPIRATION.name.to_string(),
                    write.sliding_ticks.to_string().into_bytes(),
                );
                record.fields.insert(DATA.name.to_string(), write.data.clone());

                match write.ttl() {
                    Some(seconds) => {
                        state.expire(key, seconds);
                    }
                    None => record_persist(state, key),
                }
            })
            .await
    }

    async fn ping(&mut self) -> StoreResult<()> {
        self.store.inject_faults().await
    }
}

fn record_persist(state: &mut State, key: &str) {
    if let Some(record) = state.records.get_mut(key) {
        record.expires_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ENTRY_FIELD_NAMES;

    async fn connect(store: &MemoryStore) -> MemoryConnection {
        MemoryConnector::new(store.clone()).connect().await.unwrap()
    }

    fn write(ttl: Option<i64>, data: &[u8]) -> EntryWrite {
        EntryWrite::new(None, None, ttl, data.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_set_then_read() {
        let store = MemoryStore::new();
        let mut conn = connect(&store).await;
        let script = AtomicSetScript::new();

        conn.set_entry("k", &write(None, b"v"), &script).await.unwrap();
        let fields = conn.read_fields("k", &ENTRY_FIELD_NAMES).await.unwrap();

        assert_eq!(fields[0].as_deref(), Some(&b"-1"[..]));
        assert_eq!(fields[2].as_deref(), Some(&b"v"[..]));
        assert_eq!(store.commands(), 2);
    }

    #[tokio::test]
    async fn test_missing_key_reads_as_nils() {
        let store = MemoryStore::new();
        let mut conn = connect(&store).await;
        let fields = conn.read_fields("absent", &ENTRY_FIELD_NAMES).await.unwrap();
        assert_eq!(fields, vec![None, None, None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expires_entry() {
        let store = MemoryStore::new();
        let mut conn = connect(&store).await;
        let script = AtomicSetScript::new();

        conn.set_entry("k", &write(Some(10), b"v"), &script).await.unwrap();
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!store.contains_key("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_without_ttl_persists() {
        let store = MemoryStore::new();
        let mut conn = connect(&store).await;
        let script = AtomicSetScript::new();

        conn.set_entry("k", &write(Some(10), b"old"), &script).await.unwrap();
        conn.set_entry("k", &write(None, b"new"), &script).await.unwrap();

        assert_eq!(store.ttl("k"), None);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(store.field("k", DATA.name), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_non_positive_expire_deletes() {
        let store = MemoryStore::new();
        let mut conn = connect(&store).await;
        let script = AtomicSetScript::new();

        conn.set_entry("k", &write(None, b"v"), &script).await.unwrap();
        assert!(conn.expire("k", 0).await.unwrap());
        assert!(!store.contains_key("k"));
        assert!(!conn.expire("k", 5).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let store = MemoryStore::new();
        let mut conn = connect(&store).await;
        store.put_field("k", DATA.name, "v");

        assert!(conn.delete("k").await.unwrap());
        assert!(!conn.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_next_then_recover() {
        let store = MemoryStore::new();
        let mut conn = connect(&store).await;
        store.fail_next(2, StoreError::timeout("injected"));

        assert!(conn.delete("k").await.is_err());
        assert!(conn.delete("k").await.is_err());
        assert!(conn.delete("k").await.is_ok());
        assert_eq!(store.commands(), 3);
    }

    #[tokio::test]
    async fn test_fail_always_until_cleared() {
        let store = MemoryStore::new();
        let mut conn = connect(&store).await;
        store.fail_always(StoreError::Busy("injected".into()));

        for _ in 0..5 {
            assert!(matches!(conn.delete("k").await, Err(StoreError::Busy(_))));
        }
        store.clear_faults();
        assert!(conn.delete("k").await.is_ok());
    }

    #[tokio::test]
    async fn test_refused_connections() {
        let store = MemoryStore::new();
        let connector = MemoryConnector::new(store.clone());
        store.refuse_connections(1);

        assert!(matches!(connector.connect().await, Err(StoreError::Connection(_))));
        assert!(connector.connect().await.is_ok());
        assert_eq!(store.connections_opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let store = MemoryStore::new();
        let mut conn = connect(&store).await;
        store.set_latency(Duration::from_millis(250));

        let started = Instant::now();
        conn.delete("k").await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_sees_faults_but_is_not_counted() {
        let store = MemoryStore::new();
        let mut conn = connect(&store).await;
        store.set_latency(Duration::from_millis(250));

        let started = Instant::now();
        conn.ping().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(250));

        store.fail_always(StoreError::timeout("injected"));
        assert!(matches!(conn.ping().await, Err(StoreError::Timeout(_))));
        assert_eq!(store.commands(), 0);
    }
}
