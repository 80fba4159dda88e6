//! End-to-end cache behaviour against the in-memory store.

mod common;

use aegis_cache::{CacheExt, DistributedCacheInterface, EntryOptions};
use aegis_config::SlidingRefreshMode;
use aegis_core::{CacheError, StoreError};
use chrono::{TimeDelta, Utc};
use common::{test_config, TestCache};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_set_get_remove_scenario() {
    let test = TestCache::new();
    let cancel = CancellationToken::new();
    let options = EntryOptions::new().with_absolute_expiration_relative_to_now(Duration::from_secs(60));

    assert_ok!(test.cache.set("k1", b"v1", &options, &cancel).await);
    assert_eq!(assert_ok!(test.cache.get("k1", &cancel).await), Some(b"v1".to_vec()));
    assert_eq!(test.store.ttl("k1"), Some(Duration::from_secs(60)));

    assert_ok!(test.cache.remove("k1", &cancel).await);
    assert_eq!(assert_ok!(test.cache.get("k1", &cancel).await), None);
}

#[tokio::test]
async fn test_empty_key_is_rejected() {
    let test = TestCache::new();
    let cancel = CancellationToken::new();

    assert_err!(test.cache.get("", &cancel).await);
    assert_err!(test.cache.set("", b"v", &EntryOptions::new(), &cancel).await);
    assert_eq!(test.store.commands(), 0);
}

#[tokio::test]
async fn test_remove_missing_key_is_not_an_error() {
    let test = TestCache::new();
    test.cache.remove("never-set", &CancellationToken::new()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sliding_window_is_extended_by_reads() {
    let test = TestCache::new();
    let cancel = CancellationToken::new();
    let options = EntryOptions::new().with_sliding_expiration(Duration::from_secs(5));

    test.cache.set("session", b"data", &options, &cancel).await.unwrap();

    for _ in 0..4 {
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(test.cache.get("session", &cancel).await.unwrap().is_some());
    }

    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(test.cache.get("session", &cancel).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_extends_sliding_window() {
    let test = TestCache::new();
    let cancel = CancellationToken::new();
    let options = EntryOptions::new().with_sliding_expiration(Duration::from_secs(5));

    test.cache.set("k", b"v", &options, &cancel).await.unwrap();
    tokio::time::advance(Duration::from_secs(4)).await;
    test.cache.refresh("k", &cancel).await.unwrap();
    tokio::time::advance(Duration::from_secs(4)).await;

    assert!(test.store.contains_key("k"));
}

#[tokio::test(start_paused = true)]
async fn test_absolute_expiration_is_not_extended() {
    let test = TestCache::new();
    let cancel = CancellationToken::new();
    let options = EntryOptions::new().with_absolute_expiration_relative_to_now(Duration::from_secs(5));

    test.cache.set("k", b"v", &options, &cancel).await.unwrap();
    tokio::time::advance(Duration::from_secs(3)).await;
    assert!(test.cache.get("k", &cancel).await.unwrap().is_some());
    test.cache.refresh("k", &cancel).await.unwrap();

    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(test.cache.get("k", &cancel).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_sliding_capped_by_absolute() {
    let test = TestCache::new();
    let cancel = CancellationToken::new();
    let options = EntryOptions::new()
        .with_absolute_expiration_relative_to_now(Duration::from_secs(3))
        .with_sliding_expiration(Duration::from_secs(60));

    test.cache.set("k", b"v", &options, &cancel).await.unwrap();
    assert_eq!(test.store.ttl("k"), Some(Duration::from_secs(3)));
}

#[tokio::test]
async fn test_read_rearms_to_remaining_absolute_lifetime() {
    let test = TestCache::new();
    let cancel = CancellationToken::new();
    let options = EntryOptions::new()
        .with_absolute_expiration(Utc::now() + TimeDelta::seconds(20))
        .with_sliding_expiration(Duration::from_secs(30));

    test.cache.set("k", b"v", &options, &cancel).await.unwrap();
    assert_eq!(test.cache.get("k", &cancel).await.unwrap(), Some(b"v".to_vec()));

    let ttl = test.store.ttl("k").unwrap();
    assert!(ttl <= Duration::from_secs(20) && ttl > Duration::from_secs(15), "ttl was {:?}", ttl);

    test.cache.refresh("k", &cancel).await.unwrap();
    let ttl = test.store.ttl("k").unwrap();
    assert!(ttl <= Duration::from_secs(20) && ttl > Duration::from_secs(15), "ttl was {:?}", ttl);
}

#[tokio::test(start_paused = true)]
async fn test_background_sliding_refresh() {
    let mut config = test_config();
    config.cache.sliding_refresh = SlidingRefreshMode::Background;
    let test = TestCache::with_config(config);
    let cancel = CancellationToken::new();
    let options = EntryOptions::new().with_sliding_expiration(Duration::from_secs(10));

    test.cache.set("k", b"v", &options, &cancel).await.unwrap();
    tokio::time::advance(Duration::from_secs(8)).await;

    assert_eq!(test.cache.get("k", &cancel).await.unwrap(), Some(b"v".to_vec()));
    // Let the spawned refresh run.
    tokio::time::sleep(common::TICK).await;

    let ttl = test.store.ttl("k").unwrap();
    assert!(ttl > Duration::from_secs(9), "ttl was {:?}", ttl);
}

#[tokio::test]
async fn test_concurrent_traffic_on_distinct_keys() {
    let test = Arc::new(TestCache::new());
    let options = EntryOptions::new().with_absolute_expiration_relative_to_now(Duration::from_secs(60));

    let mut handles = Vec::new();
    for worker in 0..8 {
        let test = Arc::clone(&test);
        let options = options.clone();
        handles.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            for i in 0..25 {
                let key = format!("worker{}:item{}", worker, i);
                let value = format!("{}-{}", worker, i);
                test.cache.set(&key, value.as_bytes(), &options, &cancel).await.unwrap();
                let read = test.cache.get(&key, &cancel).await.unwrap();
                assert_eq!(read.as_deref(), Some(value.as_bytes()));
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert!(test.cache.pool_status().size <= 10);
}

#[tokio::test]
async fn test_overwrite_replaces_all_fields() {
    let test = TestCache::new();
    let cancel = CancellationToken::new();

    let sliding = EntryOptions::new().with_sliding_expiration(Duration::from_secs(30));
    test.cache.set("k", b"old", &sliding, &cancel).await.unwrap();
    test.cache.set("k", b"new", &EntryOptions::new(), &cancel).await.unwrap();

    assert_eq!(test.cache.get("k", &cancel).await.unwrap(), Some(b"new".to_vec()));
    assert_eq!(test.store.ttl("k"), None);
    assert_eq!(test.store.field("k", "sldexp"), Some(b"-1".to_vec()));
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct UserClaims {
    subject: String,
    roles: Vec<String>,
}

#[tokio::test]
async fn test_typed_helpers_through_trait_object() {
    let test = TestCache::new();
    let cache: Arc<dyn DistributedCacheInterface> = Arc::new(test.cache.clone());
    let cancel = CancellationToken::new();
    let claims = UserClaims {
        subject: "abc".to_string(),
        roles: vec!["admin".to_string()],
    };

    cache
        .set_json("UserClaimsCacheKey:abc", &claims, &EntryOptions::new(), &cancel)
        .await
        .unwrap();
    let read: Option<UserClaims> = cache.get_json("UserClaimsCacheKey:abc", &cancel).await.unwrap();
    assert_eq!(read, Some(claims));

    cache.set_string("greeting", "hello", &EntryOptions::new(), &cancel).await.unwrap();
    assert_eq!(cache.get_string("greeting", &cancel).await.unwrap().as_deref(), Some("hello"));
}

#[tokio::test]
async fn test_invalid_payload_for_typed_read() {
    let test = TestCache::new();
    let cancel = CancellationToken::new();

    test.cache.set("k", &[0xff, 0xfe], &EntryOptions::new(), &cancel).await.unwrap();
    assert!(matches!(
        test.cache.get_string("k", &cancel).await,
        Err(CacheError::Serialization(_))
    ));
    assert!(matches!(
        test.cache.get_json::<UserClaims>("k", &cancel).await,
        Err(CacheError::Serialization(_))
    ));
}

#[tokio::test]
async fn test_telemetry_sees_every_command() {
    let test = TestCache::new();
    let cancel = CancellationToken::new();
    let options = EntryOptions::new().with_sliding_expiration(Duration::from_secs(30));

    test.cache.set("k", b"v", &options, &cancel).await.unwrap();
    test.cache.get("k", &cancel).await.unwrap();
    test.cache.remove("k", &cancel).await.unwrap();

    let operations: Vec<_> = test.telemetry.calls().iter().map(|call| call.operation).collect();
    assert_eq!(operations, vec!["EVALSHA", "HMGET", "EXPIRE", "DEL"]);
    assert!(test.telemetry.calls().iter().all(|call| call.target == "memory"));
}

#[tokio::test]
async fn test_successes_are_not_reported_unless_tracked() {
    let mut config = test_config();
    config.observability.track_success = false;
    let test = TestCache::with_config(config);
    let cancel = CancellationToken::new();

    test.cache.set("k", b"v", &EntryOptions::new(), &cancel).await.unwrap();
    test.cache.get("k", &cancel).await.unwrap();
    assert!(test.telemetry.calls().is_empty());

    test.store.fail_next(1, StoreError::Protocol("ERR injected".into()));
    assert!(test.cache.get("k", &cancel).await.is_err());

    let calls = test.telemetry.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].operation, "HMGET");
    assert!(calls[0].error.is_some());
}
