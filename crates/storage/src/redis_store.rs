//! Document-store backend on Redis: the primary network-backed store for
//! both metadata and credential blobs.
//!
//! One long-lived multiplexed connection. A periodic health ping declares
//! disconnection only after a few consecutive failures (one slow round trip
//! must not flap the flag); a reconnect loop with capped exponential
//! backoff brings the connection back, resetting the attempt counter on
//! success. Every CRUD call checks the connected flag first and fails soft
//! while down.
//!
//! Key space:
//! - `sv:session:<id>`  JSON metadata document
//! - `sv:sessions`      index set of known session ids
//! - `sv:creds:<id>`    hash of sanitized filename -> blob
//!
//! High-frequency small credential writes (one-time key material) are
//! queued per session and flushed as one pipelined hash upsert once a
//! batch-size or batch-delay threshold fires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use sessionvault_core::{
    SessionRecord, SessionUpdate, HEALTH_CHECK_FAILURE_THRESHOLD, RECONNECT_BACKOFF_BASE_MS,
    RECONNECT_BACKOFF_CAP_MS,
};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::traits::{sanitize_key, Result, SessionBackend};

const SESSION_PREFIX: &str = "sv:session:";
const SESSION_INDEX: &str = "sv:sessions";
const CREDS_PREFIX: &str = "sv:creds:";

fn session_key(id: &str) -> String {
    format!("{SESSION_PREFIX}{id}")
}

fn creds_key(id: &str) -> String {
    format!("{CREDS_PREFIX}{id}")
}

#[derive(Debug, Default)]
struct CredBatch {
    items: Vec<(String, Vec<u8>)>,
    timer: Option<JoinHandle<()>>,
}

struct RedisInner {
    client: redis::Client,
    conn: RwLock<Option<MultiplexedConnection>>,
    connected: AtomicBool,
    reconnecting: AtomicBool,
    ping_failures: AtomicU32,
    batches: Mutex<HashMap<String, CredBatch>>,
    batch_size: usize,
    batch_delay: Duration,
}

#[derive(Clone)]
pub struct RedisStore {
    inner: Arc<RedisInner>,
    health_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RedisStore {
    /// Connect and spawn the health-check task. Fails only on an invalid
    /// URL or an unreachable server at startup; later outages degrade soft.
    pub async fn connect(
        url: &str,
        batch_size: usize,
        batch_delay: Duration,
        health_interval: Duration,
    ) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let inner = Arc::new(RedisInner {
            client,
            conn: RwLock::new(Some(conn)),
            connected: AtomicBool::new(true),
            reconnecting: AtomicBool::new(false),
            ping_failures: AtomicU32::new(0),
            batches: Mutex::new(HashMap::new()),
            batch_size,
            batch_delay,
        });
        info!("RedisStore connected");

        let health = tokio::spawn(Self::health_loop(Arc::clone(&inner), health_interval));
        Ok(Self { inner, health_task: Arc::new(Mutex::new(Some(health))) })
    }

    /// Flush pending credential batches and stop the health task.
    pub async fn close(&self) {
        if let Some(task) = self.health_task.lock().await.take() {
            task.abort();
        }
        let ids: Vec<String> = self.inner.batches.lock().await.keys().cloned().collect();
        for id in ids {
            Self::flush_credential_batch(&self.inner, &id).await;
        }
    }

    fn connection_alive(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Clone out the shared connection, failing soft when down.
    async fn conn(&self) -> Result<MultiplexedConnection> {
        Self::conn_of(&self.inner).await
    }

    async fn conn_of(inner: &RedisInner) -> Result<MultiplexedConnection> {
        if !inner.connected.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("document store"));
        }
        inner
            .conn
            .read()
            .await
            .clone()
            .ok_or(StorageError::Unavailable("document store"))
    }

    async fn health_loop(inner: Arc<RedisInner>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if inner.reconnecting.load(Ordering::SeqCst) {
                continue;
            }
            let Ok(mut conn) = Self::conn_of(&inner).await else {
                Self::spawn_reconnect(&inner);
                continue;
            };
            match redis::cmd("PING").query_async::<String>(&mut conn).await {
                Ok(_) => {
                    inner.ping_failures.store(0, Ordering::SeqCst);
                },
                Err(e) => {
                    let failures = inner.ping_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    warn!(failures, error = %e, "document store health ping failed");
                    if failures >= HEALTH_CHECK_FAILURE_THRESHOLD {
                        inner.connected.store(false, Ordering::SeqCst);
                        Self::spawn_reconnect(&inner);
                    }
                },
            }
        }
    }

    fn spawn_reconnect(inner: &Arc<RedisInner>) {
        if inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                let backoff = RECONNECT_BACKOFF_BASE_MS
                    .saturating_mul(1_u64 << attempt.min(16))
                    .min(RECONNECT_BACKOFF_CAP_MS);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                match inner.client.get_multiplexed_async_connection().await {
                    Ok(conn) => {
                        *inner.conn.write().await = Some(conn);
                        inner.connected.store(true, Ordering::SeqCst);
                        inner.ping_failures.store(0, Ordering::SeqCst);
                        inner.reconnecting.store(false, Ordering::SeqCst);
                        info!(attempt, "document store reconnected");
                        return;
                    },
                    Err(e) => {
                        attempt = attempt.saturating_add(1);
                        warn!(attempt, error = %e, "document store reconnect failed");
                    },
                }
            }
        });
    }

    /// Drain and write one session's queued credential pairs as a single
    /// pipelined hash upsert. Failures are logged and the items dropped;
    /// the caller never blocks on this path.
    async fn flush_credential_batch(inner: &Arc<RedisInner>, session_id: &str) {
        let items = {
            let mut batches = inner.batches.lock().await;
            match batches.remove(session_id) {
                Some(batch) => {
                    if let Some(timer) = batch.timer {
                        timer.abort();
                    }
                    batch.items
                },
                None => return,
            }
        };
        if items.is_empty() {
            return;
        }
        let mut conn = match Self::conn_of(inner).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(session_id, count = items.len(), error = %e,
                      "dropping credential batch, document store down");
                return;
            },
        };
        let key = creds_key(session_id);
        let mut pipe = redis::pipe();
        for (field, value) in &items {
            pipe.hset(&key, field, value.as_slice());
        }
        if let Err(e) = pipe.exec_async(&mut conn).await {
            warn!(session_id, count = items.len(), error = %e,
                  "credential batch flush failed, items dropped");
        } else {
            debug!(session_id, count = items.len(), "credential batch flushed");
        }
    }
}

#[async_trait]
impl SessionBackend for RedisStore {
    async fn save(&self, record: &SessionRecord) -> Result<()> {
        let mut conn = self.conn().await?;
        let doc = serde_json::to_string(record)?;
        redis::pipe()
            .set(session_key(&record.session_id), doc)
            .sadd(SESSION_INDEX, &record.session_id)
            .exec_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.get(session_key(session_id)).await?;
        match raw {
            Some(doc) => match serde_json::from_str(&doc) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    warn!(session_id, error = %e, "corrupt session document, treating as absent");
                    Ok(None)
                },
            },
            None => Ok(None),
        }
    }

    async fn update(&self, session_id: &str, update: &SessionUpdate) -> Result<()> {
        let Some(mut record) = self.get(session_id).await? else {
            return Err(StorageError::NotFound(session_id.to_owned()));
        };
        update.apply(&mut record);
        self.save(&record).await
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        if let Some(batch) = self.inner.batches.lock().await.remove(session_id) {
            if let Some(timer) = batch.timer {
                timer.abort();
            }
        }
        let mut conn = self.conn().await?;
        redis::pipe()
            .del(session_key(session_id))
            .del(creds_key(session_id))
            .srem(SESSION_INDEX, session_id)
            .exec_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<SessionRecord>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.smembers(SESSION_INDEX).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| session_key(id)).collect();
        let docs: Vec<Option<String>> = conn.mget(&keys).await?;
        let mut out = Vec::with_capacity(docs.len());
        for (id, doc) in ids.iter().zip(docs) {
            match doc {
                Some(doc) => match serde_json::from_str(&doc) {
                    Ok(record) => out.push(record),
                    Err(e) => {
                        warn!(session_id = %id, error = %e, "corrupt session document, skipping");
                    },
                },
                // Index entry without a document: stale, ignore.
                None => debug!(session_id = %id, "dangling index entry"),
            }
        }
        Ok(out)
    }

    fn is_connected(&self) -> bool {
        self.connection_alive()
    }

    async fn save_credentials(
        &self,
        session_id: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<()> {
        if !self.connection_alive() {
            return Err(StorageError::Unavailable("document store"));
        }
        let field = sanitize_key(filename);
        let should_flush = {
            let mut batches = self.inner.batches.lock().await;
            let batch = batches.entry(session_id.to_owned()).or_default();
            batch.items.retain(|(f, _)| f != &field);
            batch.items.push((field, data.to_vec()));
            let full = batch.items.len() >= self.inner.batch_size;
            if !full && batch.timer.is_none() {
                let inner = Arc::clone(&self.inner);
                let id = session_id.to_owned();
                let delay = self.inner.batch_delay;
                batch.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    Self::flush_credential_batch(&inner, &id).await;
                }));
            }
            full
        };
        if should_flush {
            // Size bound exceeded: force-flush now so the queue cannot grow
            // without limit under bursty key generation.
            Self::flush_credential_batch(&self.inner, session_id).await;
        }
        Ok(())
    }

    async fn get_credentials(
        &self,
        session_id: &str,
        filename: &str,
    ) -> Result<Option<Vec<u8>>> {
        let field = sanitize_key(filename);
        // Read-your-write: a blob still sitting in the batch queue wins
        // over whatever the server has.
        {
            let batches = self.inner.batches.lock().await;
            if let Some(batch) = batches.get(session_id) {
                if let Some((_, data)) = batch.items.iter().rev().find(|(f, _)| f == &field) {
                    return Ok(Some(data.clone()));
                }
            }
        }
        let mut conn = self.conn().await?;
        let data: Option<Vec<u8>> = conn.hget(creds_key(session_id), &field).await?;
        Ok(data)
    }

    async fn delete_credentials(&self, session_id: &str) -> Result<()> {
        if let Some(batch) = self.inner.batches.lock().await.remove(session_id) {
            if let Some(timer) = batch.timer {
                timer.abort();
            }
        }
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(creds_key(session_id)).await?;
        Ok(())
    }

    async fn has_credentials(&self, session_id: &str) -> Result<bool> {
        {
            let batches = self.inner.batches.lock().await;
            if batches.get(session_id).is_some_and(|b| !b.items.is_empty()) {
                return Ok(true);
            }
        }
        let mut conn = self.conn().await?;
        let len: u64 = conn.hlen(creds_key(session_id)).await?;
        Ok(len > 0)
    }

    fn name(&self) -> &'static str {
        "document"
    }
}
