//! The storage coordinator: composes the three backend adapters, the read
//! cache and the write buffer, and exposes the public operation set.
//!
//! Writes go network-first (document and relational attempted
//! independently), with the filesystem used only when both fail. Reads go
//! cache, then backends in fallback order, repopulating the cache on
//! success. No backend error ever escapes a public method: failures are
//! logged and the call degrades to `false`/`None`/empty.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sessionvault_core::{ConnectionStatus, SessionRecord, SessionSource, SessionUpdate};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::buffer::WriteBuffer;
use crate::cache::SessionCache;
use crate::config::{PrimaryBackend, StorageConfig};
use crate::error::StorageError;
use crate::file_store::{FileStore, DEFAULT_CREDS_FILE};
use crate::pg_store::PgStore;
use crate::reconciler;
use crate::redis_store::RedisStore;
use crate::traits::SessionBackend;

/// Backend outages are expected and ride through the fallback chain;
/// only non-transient failures are worth a warning.
fn log_backend_failure(op: &'static str, backend: &'static str, session_id: &str, e: &StorageError) {
    if e.is_transient() {
        debug!(session_id, backend, op, error = %e, "transient backend failure");
    } else {
        warn!(session_id, backend, op, error = %e, "backend failure");
    }
}

pub(crate) struct CoordinatorInner {
    pub(crate) config: StorageConfig,
    pub(crate) redis: Option<RedisStore>,
    pub(crate) pg: Option<PgStore>,
    pub(crate) file: FileStore,
    pub(crate) cache: Mutex<SessionCache>,
    pub(crate) buffer: Mutex<WriteBuffer>,
    closed: AtomicBool,
}

/// Owned coordinator instance with an explicit `connect`/`close` lifecycle.
/// Construct once at startup and inject into dependents; cloning shares
/// the same underlying state.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<CoordinatorInner>,
    background: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SessionCoordinator {
    /// Build backends from `config` and spawn background tasks. A network
    /// backend that fails to connect at startup is disabled with a warning
    /// rather than failing construction; only an unusable filesystem root
    /// is fatal.
    pub async fn connect(config: StorageConfig) -> anyhow::Result<Self> {
        let file = FileStore::new(&config.sessions_root).await?;

        let redis = match &config.redis_url {
            Some(url) => match RedisStore::connect(
                url,
                config.cred_batch_size,
                config.cred_batch_delay,
                config.health_check_interval,
            )
            .await
            {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!(error = %e, "document store unavailable at startup, disabled");
                    None
                },
            },
            None => None,
        };

        let pg = match &config.database_url {
            Some(url) => match PgStore::new(url).await {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!(error = %e, "relational store unavailable at startup, disabled");
                    None
                },
            },
            None => None,
        };

        let inner = Arc::new(CoordinatorInner {
            cache: Mutex::new(SessionCache::new(config.cache_max_entries, config.cache_ttl)),
            buffer: Mutex::new(WriteBuffer::new()),
            redis,
            pg,
            file,
            config,
            closed: AtomicBool::new(false),
        });

        let background = if inner.config.orphan_sweep_enabled {
            reconciler::spawn_tasks(&inner)
        } else {
            Vec::new()
        };

        info!(
            document = inner.redis.is_some(),
            relational = inner.pg.is_some(),
            root = %inner.config.sessions_root.display(),
            "session coordinator ready"
        );
        Ok(Self { inner, background: Arc::new(Mutex::new(background)) })
    }

    /// Flush buffered work and stop background tasks. Safe to call twice.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.background.lock().await.drain(..) {
            task.abort();
        }
        self.flush_all().await;
        if let Some(redis) = &self.inner.redis {
            redis.close().await;
        }
        if let Some(pg) = &self.inner.pg {
            pg.close().await;
        }
        info!("session coordinator closed");
    }

    /// Save a full record, with optional credential blob. Network backends
    /// are attempted independently; the filesystem only when both fail.
    /// Never errors: total backend failure returns `false`.
    pub async fn save_session(
        &self,
        record: &SessionRecord,
        credentials: Option<&[u8]>,
    ) -> bool {
        if record.session_id.is_empty() {
            error!("save_session called without a session id");
            return false;
        }
        let inner = &self.inner;

        let mut doc_ok = false;
        if let Some(redis) = &inner.redis {
            match redis.save(record).await {
                Ok(()) => doc_ok = true,
                Err(e) => log_backend_failure("save", "document", &record.session_id, &e),
            }
        }
        let mut rel_ok = false;
        if let Some(pg) = &inner.pg {
            match pg.save(record).await {
                Ok(()) => rel_ok = true,
                Err(e) => log_backend_failure("save", "relational", &record.session_id, &e),
            }
        }
        let mut file_ok = false;
        if !doc_ok && !rel_ok {
            match inner.file.save(record).await {
                Ok(()) => file_ok = true,
                Err(e) => warn!(session_id = %record.session_id, error = %e,
                                "filesystem save failed"),
            }
        }

        if let Some(data) = credentials {
            let mut stored = false;
            if doc_ok {
                if let Some(redis) = &inner.redis {
                    match redis
                        .save_credentials(&record.session_id, DEFAULT_CREDS_FILE, data)
                        .await
                    {
                        Ok(()) => stored = true,
                        Err(e) => warn!(session_id = %record.session_id, error = %e,
                                        "document store credential save failed"),
                    }
                }
            }
            if !stored {
                if let Err(e) = inner
                    .file
                    .save_credentials(&record.session_id, DEFAULT_CREDS_FILE, data)
                    .await
                {
                    warn!(session_id = %record.session_id, error = %e,
                          "filesystem credential save failed");
                }
            }
        }

        let ok = doc_ok || rel_ok || file_ok;
        if ok {
            inner.cache.lock().await.insert(record.clone());
        }
        ok
    }

    /// Cache hit within TTL, else backends in fallback order, repopulating
    /// the cache on success. `None` when absent everywhere.
    pub async fn get_session(&self, session_id: &str) -> Option<SessionRecord> {
        if session_id.is_empty() {
            error!("get_session called without a session id");
            return None;
        }
        if let Some(record) = self.inner.cache.lock().await.get(session_id) {
            return Some(record);
        }
        self.inner.read_through(session_id).await
    }

    /// Buffered update: merged into the session's single pending update,
    /// flush timer (re)scheduled. Durability is NOT guaranteed at return
    /// time; use [`update_session_immediate`] when it must be.
    ///
    /// [`update_session_immediate`]: SessionCoordinator::update_session_immediate
    pub async fn update_session(&self, session_id: &str, update: SessionUpdate) -> bool {
        if session_id.is_empty() {
            error!("update_session called without a session id");
            return false;
        }
        if self.inner.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut buffer = self.inner.buffer.lock().await;
        buffer.merge(session_id, update);
        let timer = tokio::spawn({
            let inner = Arc::clone(&self.inner);
            let id = session_id.to_owned();
            async move {
                tokio::time::sleep(inner.config.flush_interval).await;
                inner.flush_session(&id).await;
            }
        });
        buffer.set_timer(session_id, timer);
        true
    }

    /// Synchronous write for state transitions that must be durable before
    /// the caller proceeds. Any pending buffered fields for the session are
    /// folded in first so the stored state is the full merge.
    pub async fn update_session_immediate(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> bool {
        if session_id.is_empty() {
            error!("update_session_immediate called without a session id");
            return false;
        }
        if self.inner.closed.load(Ordering::SeqCst) {
            return false;
        }
        let merged = {
            let mut buffer = self.inner.buffer.lock().await;
            match buffer.take(session_id) {
                Some(mut pending) => {
                    pending.merge(update);
                    pending
                },
                None => update,
            }
        };
        self.inner.apply_update(session_id, &merged).await
    }

    /// Remove the session from every backend. The relational adapter
    /// rewrites web-session deletes into disconnect updates internally.
    pub async fn delete_session(&self, session_id: &str) {
        self.completely_delete_session(session_id).await;
    }

    /// Remove credentials and document-store metadata but keep the user:
    /// the relational row is updated to a disconnected state, not removed.
    pub async fn delete_session_keep_user(&self, session_id: &str) {
        if session_id.is_empty() {
            error!("delete_session_keep_user called without a session id");
            return;
        }
        let inner = &self.inner;
        inner.evict(session_id).await;

        if let Some(redis) = &inner.redis {
            if let Err(e) = redis.delete(session_id).await {
                warn!(session_id, error = %e, "document store delete failed");
            }
        }
        let disconnect = SessionUpdate::connected(ConnectionStatus::Disconnected);
        if let Some(pg) = &inner.pg {
            match pg.update(session_id, &disconnect).await {
                Ok(()) | Err(StorageError::NotFound(_)) => {},
                Err(e) => warn!(session_id, error = %e, "relational disconnect failed"),
            }
        }
        if let Err(e) = inner.file.delete_credentials(session_id).await {
            warn!(session_id, error = %e, "filesystem credential delete failed");
        }
        match inner.file.update(session_id, &disconnect).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {},
            Err(e) => warn!(session_id, error = %e, "filesystem disconnect failed"),
        }
    }

    /// Purge the session everywhere. Web rows in the relational backend
    /// become disconnected updates, never row deletes.
    pub async fn completely_delete_session(&self, session_id: &str) {
        if session_id.is_empty() {
            error!("completely_delete_session called without a session id");
            return;
        }
        self.inner.evict(session_id).await;
        self.inner.remove_everywhere(session_id).await;
    }

    /// Bulk listing: relational store is authoritative when reachable,
    /// else the document store, else a filesystem scan.
    pub async fn get_all_sessions(&self) -> Vec<SessionRecord> {
        let inner = &self.inner;
        if let Some(pg) = &inner.pg {
            if pg.is_connected() {
                match pg.get_all().await {
                    Ok(records) => return records,
                    Err(e) => warn!(error = %e, "relational bulk listing failed"),
                }
            }
        }
        if let Some(redis) = &inner.redis {
            if redis.is_connected() {
                match redis.get_all().await {
                    Ok(records) => return records,
                    Err(e) => warn!(error = %e, "document bulk listing failed"),
                }
            }
        }
        match inner.file.get_all().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "filesystem bulk listing failed");
                Vec::new()
            },
        }
    }

    /// Connected web sessions that were never claimed by the controlling
    /// process, excluding anything younger than the detection grace period
    /// (those may still be mid-handshake).
    pub async fn get_undetected_web_sessions(&self) -> Vec<SessionRecord> {
        let grace = chrono::Duration::from_std(self.inner.config.detection_grace)
            .unwrap_or_else(|_| chrono::Duration::seconds(5));
        let now = Utc::now();
        self.get_all_sessions()
            .await
            .into_iter()
            .filter(|r| {
                r.source == SessionSource::Web
                    && r.connection_status == ConnectionStatus::Connected
                    && r.is_connected
                    && !r.detected
                    && r.age(now) >= grace
            })
            .collect()
    }

    /// Flip the detected flag, immediately. Maintains the invariant that
    /// `detected_at` is set exactly when `detected` is true.
    pub async fn mark_session_as_detected(&self, session_id: &str, detected: bool) -> bool {
        self.update_session_immediate(
            session_id,
            SessionUpdate { detected: Some(detected), ..Default::default() },
        )
        .await
    }

    /// Drain the write buffer, applying every pending update now.
    pub async fn flush_all(&self) {
        let pending = self.inner.buffer.lock().await.drain();
        for (id, update) in pending {
            self.inner.apply_update(&id, &update).await;
        }
    }

    /// Number of sessions with a pending buffered update. Test hook and
    /// shutdown diagnostics.
    pub async fn pending_updates(&self) -> usize {
        self.inner.buffer.lock().await.len()
    }

    /// Run one orphan reconciliation pass now and return the number of
    /// sessions torn down. Admin hook; the background task uses the same
    /// path on its own schedule.
    pub async fn run_orphan_sweep(&self) -> usize {
        reconciler::sweep(&self.inner).await
    }
}

impl CoordinatorInner {
    fn network_order(&self) -> Vec<&dyn SessionBackend> {
        let doc = self.redis.as_ref().map(|r| r as &dyn SessionBackend);
        let rel = self.pg.as_ref().map(|p| p as &dyn SessionBackend);
        let mut out: Vec<&dyn SessionBackend> = Vec::with_capacity(2);
        match self.config.primary {
            PrimaryBackend::Document => {
                out.extend(doc);
                out.extend(rel);
            },
            PrimaryBackend::Relational => {
                out.extend(rel);
                out.extend(doc);
            },
        }
        out
    }

    /// Backends the orphan sweep lists candidates from.
    pub(crate) fn sweep_sources(&self) -> Vec<&dyn SessionBackend> {
        let mut out = self.network_order();
        out.push(&self.file as &dyn SessionBackend);
        out
    }

    /// Read in fallback order and repopulate the cache on success.
    pub(crate) async fn read_through(&self, session_id: &str) -> Option<SessionRecord> {
        let mut backends = self.network_order();
        backends.push(&self.file as &dyn SessionBackend);
        for backend in backends {
            match backend.get(session_id).await {
                Ok(Some(record)) => {
                    self.cache.lock().await.insert(record.clone());
                    return Some(record);
                },
                Ok(None) => {},
                Err(e) => log_backend_failure("get", backend.name(), session_id, &e),
            }
        }
        None
    }

    /// Flush one session's pending buffered update, if still present.
    pub(crate) async fn flush_session(&self, session_id: &str) {
        let update = self.buffer.lock().await.take(session_id);
        if let Some(update) = update {
            self.apply_update(session_id, &update).await;
        }
    }

    /// One physical write per backend: network stores independently, the
    /// filesystem only when both fail. Cache entry is patched in place.
    pub(crate) async fn apply_update(&self, session_id: &str, update: &SessionUpdate) -> bool {
        if update.is_empty() {
            return true;
        }
        let mut net_ok = false;
        for backend in self.network_order() {
            match backend.update(session_id, update).await {
                Ok(()) => net_ok = true,
                Err(StorageError::NotFound(_)) => {
                    debug!(session_id, backend = backend.name(),
                           "update for session unknown to backend");
                },
                Err(e) => log_backend_failure("update", backend.name(), session_id, &e),
            }
        }
        let mut ok = net_ok;
        if !net_ok {
            match self.file.update(session_id, update).await {
                Ok(()) => ok = true,
                Err(StorageError::NotFound(_)) => {
                    debug!(session_id, "update for session unknown to filesystem");
                },
                Err(e) => warn!(session_id, error = %e, "filesystem update failed"),
            }
        }
        if ok {
            self.cache.lock().await.apply(session_id, update);
        }
        ok
    }

    /// Drop cache and buffer state for a session.
    pub(crate) async fn evict(&self, session_id: &str) {
        self.buffer.lock().await.take(session_id);
        self.cache.lock().await.remove(session_id);
    }

    /// Delete across all backends, isolating per-backend failures. The
    /// relational adapter applies its web-row exemption internally.
    pub(crate) async fn remove_everywhere(&self, session_id: &str) {
        if let Some(redis) = &self.redis {
            if let Err(e) = redis.delete(session_id).await {
                warn!(session_id, error = %e, "document store delete failed");
            }
        }
        if let Some(pg) = &self.pg {
            if let Err(e) = pg.delete(session_id).await {
                warn!(session_id, error = %e, "relational store delete failed");
            }
        }
        if let Err(e) = self.file.delete(session_id).await {
            warn!(session_id, error = %e, "filesystem delete failed");
        }
    }

    /// Whether valid credential material exists anywhere. Credentials can
    /// live in the document store, on disk, or both (saves during a
    /// document-store outage land on disk only), so `Some(false)` requires
    /// certainty that every location that could hold them holds nothing.
    pub(crate) async fn credentials_exist(&self, session_id: &str) -> Option<bool> {
        let mut doc_unknown = false;
        if let Some(redis) = &self.redis {
            if redis.is_connected() {
                match redis.has_credentials(session_id).await {
                    Ok(true) => return Some(true),
                    Ok(false) => {},
                    Err(e) => {
                        warn!(session_id, error = %e, "credential check failed");
                        doc_unknown = true;
                    },
                }
            } else {
                // Configured but down: whatever it holds is unknowable.
                doc_unknown = true;
            }
        }
        match self.file.has_credentials(session_id).await {
            Ok(true) => Some(true),
            Ok(false) if doc_unknown => None,
            Ok(false) => Some(false),
            Err(e) => {
                warn!(session_id, error = %e, "filesystem credential check failed");
                None
            },
        }
    }
}
