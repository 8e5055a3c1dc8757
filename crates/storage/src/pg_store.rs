//! PostgreSQL backend using sqlx.
//!
//! Mirrors the session record into fixed columns; every write is an
//! upsert-by-primary-key, so there is no read-modify-write race. Metadata
//! only: credential blobs live in the document store and on disk. When
//! reachable this backend is authoritative for bulk listing.
//!
//! Deletion policy: rows with `source = 'web'` are never physically
//! deleted. Any delete request for such a row is rewritten into a
//! disconnect update; only `telegram` rows are removed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sessionvault_core::{
    ConnectionStatus, SessionRecord, SessionSource, SessionUpdate, PG_POOL_ACQUIRE_TIMEOUT_SECS,
    PG_POOL_IDLE_TIMEOUT_SECS, PG_POOL_MAX_CONNECTIONS,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::warn;

use crate::error::StorageError;
use crate::traits::{Result, SessionBackend};

pub(crate) const SESSION_COLUMNS: &str =
    "session_id, owner_id, phone_number, is_connected, connection_status,
     reconnect_attempts, source, detected, detected_at, credentials_ref,
     created_at, updated_at";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(PG_POOL_MAX_CONNECTIONS)
            .acquire_timeout(std::time::Duration::from_secs(PG_POOL_ACQUIRE_TIMEOUT_SECS))
            .idle_timeout(std::time::Duration::from_secs(PG_POOL_IDLE_TIMEOUT_SECS))
            .test_before_acquire(true)
            .connect(database_url)
            .await?;
        run_migrations(&pool).await?;
        tracing::info!("PgStore initialized");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            owner_id BIGINT NOT NULL,
            phone_number TEXT,
            is_connected BOOLEAN NOT NULL DEFAULT FALSE,
            connection_status TEXT NOT NULL DEFAULT 'disconnected',
            reconnect_attempts INTEGER NOT NULL DEFAULT 0,
            source TEXT NOT NULL,
            detected BOOLEAN NOT NULL DEFAULT FALSE,
            detected_at TIMESTAMPTZ,
            credentials_ref TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_source ON sessions (source)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sessions_owner ON sessions (owner_id)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

fn parse_status(s: &str) -> ConnectionStatus {
    s.parse().unwrap_or_else(|_| {
        warn!(invalid_status = %s, "corrupt connection_status in DB, defaulting to disconnected");
        ConnectionStatus::Disconnected
    })
}

fn parse_source(s: &str) -> SessionSource {
    // Conservative default: web rows are exempt from hard deletion, so a
    // corrupt source must not downgrade a row into the deletable class.
    s.parse().unwrap_or_else(|_| {
        warn!(invalid_source = %s, "corrupt source in DB, defaulting to web");
        SessionSource::Web
    })
}

pub(crate) fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<SessionRecord> {
    let status = parse_status(&row.try_get::<String, _>("connection_status")?);
    let source = parse_source(&row.try_get::<String, _>("source")?);
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    Ok(SessionRecord {
        session_id: row.try_get("session_id")?,
        owner_id: row.try_get("owner_id")?,
        phone_number: row.try_get("phone_number")?,
        is_connected: row.try_get("is_connected")?,
        connection_status: status,
        reconnect_attempts: u32::try_from(row.try_get::<i32, _>("reconnect_attempts")?)
            .unwrap_or(0),
        source,
        detected: row.try_get("detected")?,
        detected_at: row.try_get("detected_at")?,
        credentials_ref: row.try_get("credentials_ref")?,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl SessionBackend for PgStore {
    async fn save(&self, record: &SessionRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO sessions ({SESSION_COLUMNS})
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
             ON CONFLICT (session_id) DO UPDATE SET
               owner_id = EXCLUDED.owner_id,
               phone_number = EXCLUDED.phone_number,
               is_connected = EXCLUDED.is_connected,
               connection_status = EXCLUDED.connection_status,
               reconnect_attempts = EXCLUDED.reconnect_attempts,
               source = EXCLUDED.source,
               detected = EXCLUDED.detected,
               detected_at = EXCLUDED.detected_at,
               credentials_ref = EXCLUDED.credentials_ref,
               updated_at = EXCLUDED.updated_at"
        ))
        .bind(&record.session_id)
        .bind(record.owner_id)
        .bind(&record.phone_number)
        .bind(record.is_connected)
        .bind(record.connection_status.as_str())
        .bind(i32::try_from(record.reconnect_attempts).map_err(|e| {
            StorageError::DataCorruption {
                context: "reconnect_attempts exceeds i32::MAX".into(),
                source: Box::new(e),
            }
        })?)
        .bind(record.source.as_str())
        .bind(record.detected)
        .bind(record.detected_at)
        .bind(&record.credentials_ref)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    async fn update(&self, session_id: &str, update: &SessionUpdate) -> Result<()> {
        // Single statement with COALESCE per field: unset fields keep their
        // stored value, no read-modify-write round trip.
        let result = sqlx::query(
            "UPDATE sessions SET
               phone_number = COALESCE($2, phone_number),
               is_connected = COALESCE($3, is_connected),
               connection_status = COALESCE($4, connection_status),
               reconnect_attempts = COALESCE($5, reconnect_attempts),
               detected = COALESCE($6, detected),
               detected_at = CASE
                 WHEN $6 IS NULL THEN detected_at
                 WHEN $6 THEN NOW()
                 ELSE NULL
               END,
               credentials_ref = COALESCE($7, credentials_ref),
               updated_at = NOW()
             WHERE session_id = $1",
        )
        .bind(session_id)
        .bind(&update.phone_number)
        .bind(update.is_connected)
        .bind(update.connection_status.map(|s| s.as_str()))
        .bind(update.reconnect_attempts.map(|v| i32::try_from(v).unwrap_or(i32::MAX)))
        .bind(update.detected)
        .bind(&update.credentials_ref)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(session_id.to_owned()));
        }
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        // Web rows are rewritten into a disconnect update instead of a row
        // delete; only telegram rows go away physically. The disconnect
        // branch is the catch-all so a row with unrecognized source text
        // stays exempt, matching the read-side default in `parse_source`.
        sqlx::query(
            "UPDATE sessions SET
               is_connected = FALSE,
               connection_status = 'disconnected',
               updated_at = NOW()
             WHERE session_id = $1 AND source <> 'telegram'",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        sqlx::query("DELETE FROM sessions WHERE session_id = $1 AND source = 'telegram'")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }

    // Metadata only: the relational store never holds credential blobs.

    async fn save_credentials(&self, _: &str, _: &str, _: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn get_credentials(&self, _: &str, _: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn delete_credentials(&self, _: &str) -> Result<()> {
        Ok(())
    }

    async fn has_credentials(&self, _: &str) -> Result<bool> {
        Ok(false)
    }

    fn name(&self) -> &'static str {
        "relational"
    }
}
