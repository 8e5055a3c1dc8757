//! Integration tests for PgStore.
//! Run with: SESSIONVAULT_TEST_DATABASE_URL=... cargo test -p sessionvault-storage -- --ignored pg_

#![allow(clippy::unwrap_used, reason = "integration test code")]

use sessionvault_core::{ConnectionStatus, SessionRecord, SessionSource, SessionUpdate};
use sessionvault_storage::{PgStore, SessionBackend};

async fn create_pg_store() -> PgStore {
    let url = std::env::var("SESSIONVAULT_TEST_DATABASE_URL")
        .expect("SESSIONVAULT_TEST_DATABASE_URL must be set for PgStore integration tests");
    PgStore::new(&url).await.expect("Failed to connect to PostgreSQL")
}

fn unique_id(prefix: &str) -> String {
    format!("{prefix}-{}", std::process::id())
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn pg_save_is_an_upsert() {
    let store = create_pg_store().await;
    let id = unique_id("pg-upsert");
    let mut record = SessionRecord::new(&id, 7, SessionSource::Telegram);
    store.save(&record).await.unwrap();

    record.phone_number = Some("42".to_string());
    store.save(&record).await.unwrap();

    let loaded = store.get(&id).await.unwrap().unwrap();
    assert_eq!(loaded.phone_number.as_deref(), Some("42"));

    store.delete(&id).await.unwrap();
    assert!(store.get(&id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn pg_partial_update_keeps_unset_fields() {
    let store = create_pg_store().await;
    let id = unique_id("pg-partial");
    let mut record = SessionRecord::new(&id, 7, SessionSource::Telegram);
    record.phone_number = Some("111".to_string());
    store.save(&record).await.unwrap();

    store
        .update(
            &id,
            &SessionUpdate {
                is_connected: Some(true),
                connection_status: Some(ConnectionStatus::Connected),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let loaded = store.get(&id).await.unwrap().unwrap();
    assert!(loaded.is_connected);
    assert_eq!(loaded.connection_status, ConnectionStatus::Connected);
    assert_eq!(loaded.phone_number.as_deref(), Some("111"));

    store.delete(&id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn pg_rows_with_unrecognized_source_survive_deletion() {
    let store = create_pg_store().await;
    let id = unique_id("pg-bad-source");
    let mut record = SessionRecord::new(&id, 7, SessionSource::Telegram);
    record.is_connected = true;
    record.connection_status = ConnectionStatus::Connected;
    store.save(&record).await.unwrap();

    // Corrupt the source column out-of-band; reads default such rows to
    // web, and deletion must treat them the same way.
    let url = std::env::var("SESSIONVAULT_TEST_DATABASE_URL").unwrap();
    let pool = sqlx::PgPool::connect(&url).await.unwrap();
    sqlx::query("UPDATE sessions SET source = 'legacy' WHERE session_id = $1")
        .bind(&id)
        .execute(&pool)
        .await
        .unwrap();

    store.delete(&id).await.unwrap();
    let loaded =
        store.get(&id).await.unwrap().expect("row with unknown source must survive deletion");
    assert!(!loaded.is_connected);
    assert_eq!(loaded.connection_status, ConnectionStatus::Disconnected);

    // Restore a recognized source so the row can be cleaned up for real.
    sqlx::query("UPDATE sessions SET source = 'telegram' WHERE session_id = $1")
        .bind(&id)
        .execute(&pool)
        .await
        .unwrap();
    store.delete(&id).await.unwrap();
    pool.close().await;
    store.close().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn pg_web_rows_survive_deletion_as_disconnected() {
    let store = create_pg_store().await;
    let id = unique_id("pg-web");
    let mut record = SessionRecord::new(&id, 7, SessionSource::Web);
    record.is_connected = true;
    record.connection_status = ConnectionStatus::Connected;
    store.save(&record).await.unwrap();

    store.delete(&id).await.unwrap();

    let loaded = store.get(&id).await.unwrap().expect("web row must survive deletion");
    assert!(!loaded.is_connected);
    assert_eq!(loaded.connection_status, ConnectionStatus::Disconnected);

    // The adapter deliberately offers no hard delete for web rows; the
    // test database keeps the disconnected marker row.
    store.close().await;
}
