//! Integration Tests: cache persistence and restart behavior
//!
//! These tests verify:
//! 1. Persisted query entries survive a restart, opted-out entries do not
//! 2. File-backed storage round-trips the snapshot and connection flags
//! 3. Cached balances are served without a provider call while fresh
//! 4. Storage failures never reach the consumer API

use beeconnect::{
    balance_key, create_client, App, ClientConfig, ClientPlugin, Connector, FileStorage, MemoryConnector,
    MemoryProvider, MemoryStorage, PersistOptions, PersistedClient, QueryKey, SessionStatus, Storage,
    SyncStoragePersister,
};
use beeconnect::persist::ClientStorage;
use once_cell::sync::Lazy;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner())
}

const HOUR_MS: u64 = 60 * 60 * 1000;

/// Test: persist:false entries are absent after restart, default entries survive unchanged
#[test]
fn opted_out_entries_do_not_survive_restart() {
    let storage = Arc::new(MemoryStorage::new());
    let kept = QueryKey::entity("balance").field("address", "0xaa").field("chainId", 1);
    let dropped = QueryKey::entity("quote").field("pair", "eth-usd").no_persist();
    let ephemeral = QueryKey::entity("gas");

    {
        let client = create_client(ClientConfig::new().with_storage(storage.clone()));
        client.query_cache().set(kept.clone(), json!("1.25"), HOUR_MS);
        client.query_cache().set(dropped.clone(), json!({"price": 1800}), HOUR_MS);
        client.query_cache().set(ephemeral.clone(), json!(12), 0);
        assert!(client.query_cache().get(&dropped).is_some());
    }

    let restarted = create_client(ClientConfig::new().with_storage(storage));
    let cache = restarted.query_cache();
    assert_eq!(cache.get(&kept).map(|e| e.data), Some(json!("1.25")));
    assert!(cache.get(&dropped).is_none());
    assert!(cache.get(&ephemeral).is_none());
}

/// Test: a snapshot written with another buster is discarded and removed
#[test]
fn buster_mismatch_discards_snapshot() {
    let storage = Arc::new(MemoryStorage::new());
    let key = QueryKey::entity("balance").field("address", "0xaa");

    let v1 = PersistOptions::default().with_buster("v1");
    let client = create_client(ClientConfig::new().with_storage(storage.clone()).with_persist_options(v1));
    client.query_cache().set(key.clone(), json!("2.0"), HOUR_MS);
    assert!(storage.raw("beeconnect.cache").is_some());

    let v2 = PersistOptions::default().with_buster("v2");
    let restarted = create_client(ClientConfig::new().with_storage(storage.clone()).with_persist_options(v2));
    assert!(restarted.query_cache().get(&key).is_none());
    assert!(storage.raw("beeconnect.cache").is_none());
}

/// Test: snapshots older than max_age are discarded
#[test]
fn expired_snapshot_is_discarded() {
    let storage = Arc::new(MemoryStorage::new());
    let key = QueryKey::entity("balance").field("address", "0xaa");
    let stale = PersistedClient {
        timestamp: chrono::Utc::now().timestamp_millis() - 2 * HOUR_MS as i64,
        buster: String::new(),
        client_state: serde_json::from_value(json!({
            "queries": [{
                "queryKey": [{"entity": "balance", "address": "0xaa"}],
                "data": "9.0",
                "cacheTime": 48 * HOUR_MS,
                "dataUpdatedAt": chrono::Utc::now().timestamp_millis(),
            }]
        }))
        .expect("snapshot"),
    };
    assert!(ClientStorage::new(storage.clone()).set_item("cache", &stale));

    let options = PersistOptions::default().with_max_age(HOUR_MS);
    let client = create_client(ClientConfig::new().with_storage(storage.clone()).with_persist_options(options));
    assert!(client.query_cache().get(&key).is_none());
    assert!(storage.raw("beeconnect.cache").is_none());
}

/// Test: file-backed restart restores flags and serves the cached balance without a provider call
#[tokio::test]
async fn file_storage_restart_serves_cached_balance() {
    let _guard = lock_env();
    let dir = TempDir::new().expect("tempdir");
    std::env::set_var("BEECONNECT_ROOT", dir.path());

    let wei = 1_500_000_000_000_000_000u128;
    {
        let provider = Arc::new(MemoryProvider::with_account("0xAA", 1).with_balance("0xaa", 1, wei));
        let connector: Arc<dyn Connector> = Arc::new(MemoryConnector::new("injected", Some(provider.clone())));
        let storage = Arc::new(FileStorage::open("persist-test").expect("storage"));
        let client = create_client(ClientConfig::new().with_connector(connector.clone()).with_storage(storage));
        client.connect(connector, None).await.expect("connect");
        assert_eq!(client.state().assets.as_deref(), Some("1.5"));
        assert_eq!(provider.balance_calls(), 1);
    }

    let storage = Arc::new(FileStorage::open("persist-test").expect("storage"));
    assert!(storage.path().starts_with(dir.path()));
    let provider = Arc::new(MemoryProvider::with_account("0xAA", 1).authorized());
    let connector: Arc<dyn Connector> = Arc::new(MemoryConnector::new("injected", Some(provider.clone())));
    let client = create_client(
        ClientConfig::new()
            .with_connector(connector)
            .with_storage(storage)
            .with_stale_time(HOUR_MS)
            .with_auto_connect(true),
    );
    assert!(client.query_cache().get(&balance_key("0xaa", 1)).is_some());

    let app = App::new("persist-test");
    app.use_plugin(ClientPlugin::new(client.clone()));
    app.ready().await;

    let state = client.state();
    assert_eq!(state.session.status, SessionStatus::Connected);
    assert_eq!(state.assets.as_deref(), Some("1.5"));
    assert_eq!(provider.balance_calls(), 0);

    std::env::remove_var("BEECONNECT_ROOT");
}

/// Test: write failures degrade persistence without affecting the session
#[tokio::test]
async fn write_failures_are_absorbed() {
    let storage = Arc::new(MemoryStorage::new());
    storage.fail_writes(true);
    let persister = Arc::new(SyncStoragePersister::new(ClientStorage::new(storage.clone())));
    let provider = Arc::new(MemoryProvider::with_account("0xAA", 1).with_balance("0xaa", 1, 1));
    let connector: Arc<dyn Connector> = Arc::new(MemoryConnector::new("injected", Some(provider)));
    let client = create_client(
        ClientConfig::new()
            .with_connector(connector.clone())
            .with_storage(storage.clone())
            .with_persister(persister.clone()),
    );

    let result = client.connect(connector, None).await.expect("connect despite storage failure");
    assert_eq!(result.address, "0xaa");
    assert_eq!(client.state().assets.as_deref(), Some("0.000000000000000001"));
    assert!(persister.is_degraded());
    assert!(storage.keys().is_empty());
}

/// Test: unreadable storage starts with an empty cache and no stored session
#[tokio::test]
async fn read_failures_start_empty() {
    let storage = Arc::new(MemoryStorage::new());
    storage.insert_raw("beeconnect.connected", "true");
    storage.insert_raw("beeconnect.cache", "{not json");
    storage.fail_reads(true);

    let client = create_client(ClientConfig::new().with_storage(storage.clone()));
    assert_eq!(client.auto_connect().await, None);
    assert_eq!(client.session().status, SessionStatus::Disconnected);

    storage.fail_reads(false);
    let client = create_client(ClientConfig::new().with_storage(storage.clone()));
    assert!(client.persist_handle().is_some());
    assert_eq!(storage.get("beeconnect.cache").ok().flatten().as_deref(), Some("{not json"));
}
