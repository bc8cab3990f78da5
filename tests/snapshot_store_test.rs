//! Checkout snapshot store behavior: TTL expiry, session indexing, and the
//! expired-equals-missing contract.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::line_item;
use marketplace_checkout_api::{
    cache::InMemoryCache,
    services::checkout_snapshot::{CheckoutData, CheckoutSnapshotStore},
    services::pricing::{PricingConfig, PricingEngine, VolumeTier},
};

fn store_with_ttl(ttl: Duration) -> CheckoutSnapshotStore {
    CheckoutSnapshotStore::new(Arc::new(InMemoryCache::new()), ttl, 5)
}

fn snapshot(user_id: Uuid, session_id: &str, ttl: Duration) -> CheckoutData {
    let engine = PricingEngine::new(PricingConfig {
        iva_rate: dec!(0.15),
        volume_tiers: vec![VolumeTier {
            min_quantity: 5,
            percentage: dec!(5),
        }],
        shipping_cost: dec!(5.00),
        single_seller_shipping_share: dec!(80),
        multi_seller_shipping_share: dec!(40),
    });
    let items = vec![line_item(2, dec!(10.00), Uuid::new_v4())];
    let pricing = engine.compute_totals(&items, None).unwrap();
    let created_at = Utc::now();

    CheckoutData {
        session_id: session_id.to_string(),
        user_id,
        items,
        shipping_details: serde_json::json!({"line1": "123 Test Street"}),
        billing_details: serde_json::json!({"line1": "123 Test Street"}),
        pricing,
        coupon_code: None,
        created_at,
        expires_at: created_at + ChronoDuration::from_std(ttl).unwrap(),
    }
}

#[tokio::test]
async fn store_and_retrieve_roundtrip() {
    let ttl = Duration::from_secs(1800);
    let store = store_with_ttl(ttl);
    let user = Uuid::new_v4();
    let data = snapshot(user, "sess-1", ttl);

    let key = store.store(&data).await.unwrap();
    assert_eq!(key, "sess-1");

    let loaded = store.retrieve(&key).await.unwrap().unwrap();
    assert_eq!(loaded, data);
}

#[tokio::test]
async fn expired_snapshot_reads_as_missing() {
    let ttl = Duration::from_millis(60);
    let store = store_with_ttl(ttl);
    let data = snapshot(Uuid::new_v4(), "sess-exp", ttl);

    store.store(&data).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    // Identical to a session that never existed.
    assert!(store.retrieve("sess-exp").await.unwrap().is_none());
    assert!(store.retrieve("sess-never").await.unwrap().is_none());
}

#[tokio::test]
async fn reads_do_not_extend_ttl() {
    let ttl = Duration::from_millis(200);
    let store = store_with_ttl(ttl);
    let data = snapshot(Uuid::new_v4(), "sess-fixed", ttl);
    store.store(&data).await.unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(store.retrieve("sess-fixed").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(store.retrieve("sess-fixed").await.unwrap().is_none());
}

#[tokio::test]
async fn delete_removes_snapshot() {
    let ttl = Duration::from_secs(1800);
    let store = store_with_ttl(ttl);
    let data = snapshot(Uuid::new_v4(), "sess-del", ttl);
    store.store(&data).await.unwrap();

    store.delete("sess-del").await.unwrap();
    assert!(store.retrieve("sess-del").await.unwrap().is_none());
}

#[tokio::test]
async fn session_index_keeps_five_most_recent() {
    let ttl = Duration::from_secs(1800);
    let store = store_with_ttl(ttl);
    let user = Uuid::new_v4();

    for i in 0..7 {
        let data = snapshot(user, &format!("sess-{}", i), ttl);
        store.store(&data).await.unwrap();
    }

    let sessions = store.sessions_for_user(user).await.unwrap();
    assert_eq!(sessions.len(), 5);
    assert_eq!(sessions[0], "sess-6");
    assert_eq!(sessions[4], "sess-2");
}

#[tokio::test]
async fn session_index_survives_concurrent_checkouts() {
    let ttl = Duration::from_secs(1800);
    let store = Arc::new(store_with_ttl(ttl));
    let user = Uuid::new_v4();

    let mut handles = Vec::new();
    for i in 0..5 {
        let store = store.clone();
        let data = snapshot(user, &format!("conc-{}", i), ttl);
        handles.push(tokio::spawn(async move { store.store(&data).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // No concurrently-added key is lost.
    let sessions = store.sessions_for_user(user).await.unwrap();
    assert_eq!(sessions.len(), 5);
}

#[tokio::test]
async fn index_is_per_user() {
    let ttl = Duration::from_secs(1800);
    let store = store_with_ttl(ttl);
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    store.store(&snapshot(alice, "sess-a", ttl)).await.unwrap();
    store.store(&snapshot(bob, "sess-b", ttl)).await.unwrap();

    assert_eq!(store.sessions_for_user(alice).await.unwrap(), vec!["sess-a"]);
    assert_eq!(store.sessions_for_user(bob).await.unwrap(), vec!["sess-b"]);
}
