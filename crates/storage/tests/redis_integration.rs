//! Integration tests for RedisStore.
//! Run with: SESSIONVAULT_TEST_REDIS_URL=... cargo test -p sessionvault-storage -- --ignored redis_

#![allow(clippy::unwrap_used, reason = "integration test code")]

use std::time::Duration;

use sessionvault_core::{SessionRecord, SessionSource, SessionUpdate};
use sessionvault_storage::{
    RedisStore, SessionBackend, SessionCoordinator, StorageConfig, DEFAULT_CREDS_FILE,
};
use tempfile::TempDir;

async fn create_redis_store() -> RedisStore {
    let url = std::env::var("SESSIONVAULT_TEST_REDIS_URL")
        .expect("SESSIONVAULT_TEST_REDIS_URL must be set for RedisStore integration tests");
    RedisStore::connect(&url, 4, Duration::from_millis(50), Duration::from_secs(10))
        .await
        .expect("Failed to connect to Redis")
}

fn unique_id(prefix: &str) -> String {
    format!("{prefix}-{}", std::process::id())
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn redis_save_get_update_delete() {
    let store = create_redis_store().await;
    let id = unique_id("redis-crud");
    let record = SessionRecord::new(&id, 9, SessionSource::Web);
    store.save(&record).await.unwrap();

    assert_eq!(store.get(&id).await.unwrap().unwrap(), record);

    store
        .update(&id, &SessionUpdate { detected: Some(true), ..Default::default() })
        .await
        .unwrap();
    let loaded = store.get(&id).await.unwrap().unwrap();
    assert!(loaded.detected && loaded.detected_at.is_some());

    store.delete(&id).await.unwrap();
    assert!(store.get(&id).await.unwrap().is_none());
    store.close().await;
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn redis_credential_batch_flushes_on_delay() {
    let store = create_redis_store().await;
    let id = unique_id("redis-batch");

    store.save_credentials(&id, "pre-key-1", b"a").await.unwrap();
    store.save_credentials(&id, "pre-key-2", b"b").await.unwrap();

    // Queued but readable immediately (read-your-write from the batch).
    assert_eq!(store.get_credentials(&id, "pre-key-1").await.unwrap().unwrap(), b"a");

    tokio::time::sleep(Duration::from_millis(150)).await;
    // Batch has hit the server by now.
    assert!(store.has_credentials(&id).await.unwrap());
    assert_eq!(store.get_credentials(&id, "pre-key-2").await.unwrap().unwrap(), b"b");

    store.delete_credentials(&id).await.unwrap();
    assert!(!store.has_credentials(&id).await.unwrap());
    store.close().await;
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn sweep_spares_sessions_with_disk_only_credentials() {
    let url = std::env::var("SESSIONVAULT_TEST_REDIS_URL")
        .expect("SESSIONVAULT_TEST_REDIS_URL must be set for RedisStore integration tests");
    let dir = TempDir::new().unwrap();
    let mut cfg = StorageConfig::new(dir.path());
    cfg.redis_url = Some(url);
    cfg.orphan_grace = Duration::from_millis(0);
    cfg.orphan_sweep_enabled = false;
    let coord = SessionCoordinator::connect(cfg).await.unwrap();

    let id = unique_id("redis-disk-creds");
    coord.save_session(&SessionRecord::new(&id, 9, SessionSource::Web), None).await;

    // Credentials saved during a document-store outage live on disk only;
    // the document store knows the session but holds no blobs for it.
    let session_dir = dir.path().join(&id);
    std::fs::create_dir_all(&session_dir).unwrap();
    std::fs::write(session_dir.join(DEFAULT_CREDS_FILE), b"disk-only").unwrap();

    coord.run_orphan_sweep().await;
    assert!(
        coord.get_session(&id).await.is_some(),
        "session with on-disk credentials must survive the sweep"
    );

    coord.completely_delete_session(&id).await;
    coord.close().await;
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn redis_credential_batch_force_flushes_on_size() {
    let store = create_redis_store().await;
    let id = unique_id("redis-batch-size");

    // Batch size is 4: the fourth write forces a flush with no delay.
    for i in 0..4 {
        store
            .save_credentials(&id, &format!("key-{i}"), format!("v{i}").as_bytes())
            .await
            .unwrap();
    }
    assert!(store.has_credentials(&id).await.unwrap());

    store.delete_credentials(&id).await.unwrap();
    store.close().await;
}
