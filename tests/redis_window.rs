//! Tests against a live Redis server.
//!
//! Run with `cargo test -- --ignored` and point `WINDOWGATE_TEST_REDIS_URL`
//! at a disposable instance (defaults to `redis://127.0.0.1:6379`).

#![cfg(feature = "redis")]

use std::sync::Arc;

use futures::future::join_all;

use windowgate::config::StoreConfig;
use windowgate::ratelimit::{AdmissionMode, SlidingWindowLimiter, WindowConfig};
use windowgate::store::{Batch, RedisWindowStore, Ttl, WindowStore};

async fn connect() -> Arc<RedisWindowStore> {
    let mut config = StoreConfig::default();
    if let Ok(url) = std::env::var("WINDOWGATE_TEST_REDIS_URL") {
        config.url = url;
    }
    Arc::new(RedisWindowStore::connect(&config).await.unwrap())
}

/// A prefix no other test run will use.
fn unique_prefix(test: &str) -> String {
    format!("windowgate-test:{}:{:x}:", test, rand::random::<u64>())
}

#[tokio::test]
#[ignore]
async fn test_batch_round_trip() {
    let store = connect().await;
    let key = format!("{}batch", unique_prefix("batch"));

    let reply = store
        .execute(
            Batch::new(&key)
                .add(100, "a")
                .add(200, "b")
                .add(300, "c")
                .set_expiry(10_000)
                .trim(200)
                .cardinality()
                .time_to_live(),
        )
        .await
        .unwrap();

    assert_eq!(reply.len(), 7);
    assert_eq!(reply.cardinality_at(5).unwrap(), 1);
    assert!(matches!(reply.ttl_at(6).unwrap(), Ttl::Expires(ms) if ms <= 10_000));

    store.execute(Batch::new(&key).delete()).await.unwrap();
    let reply = store.execute(Batch::new(&key).time_to_live()).await.unwrap();
    assert_eq!(reply.ttl_at(0).unwrap(), Ttl::Absent);
}

#[tokio::test]
#[ignore]
async fn test_limiter_against_redis() {
    let store = connect().await;
    let config = WindowConfig::new(60_000, 3, unique_prefix("limiter")).unwrap();
    let limiter = SlidingWindowLimiter::new(store, config).unwrap();

    for expected in (0..3).rev() {
        let d = limiter.consume_one("user").await.unwrap();
        assert!(d.allowed);
        assert_eq!(d.remaining, expected);
    }
    assert!(!limiter.consume_one("user").await.unwrap().allowed);

    limiter.reset("user").await.unwrap();
    assert_eq!(limiter.check("user").await.unwrap().remaining, 3);
    limiter.reset("user").await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_atomic_admission_against_redis() {
    let store = connect().await;
    let config = WindowConfig::new(60_000, 4, unique_prefix("atomic"))
        .unwrap()
        .with_mode(AdmissionMode::Atomic);
    let limiter = Arc::new(SlidingWindowLimiter::new(store, config).unwrap());

    let handles = (0..20).map(|_| {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.consume_one("hot").await })
    });
    let admitted = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .filter(|d| d.allowed)
        .count();

    assert_eq!(admitted, 4);
    limiter.reset("hot").await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_unreachable_redis_is_store_unavailable() {
    let config = StoreConfig {
        url: "redis://127.0.0.1:1".to_string(),
        connection_timeout_ms: 200,
        ..StoreConfig::default()
    };
    let err = RedisWindowStore::connect(&config).await.unwrap_err();
    assert!(matches!(
        err,
        windowgate::error::QuotaError::StoreUnavailable(_)
    ));
}
