//! Orphan reconciliation: metadata with no valid credentials gets torn
//! down across every backend.
//!
//! Runs on a long periodic interval plus one delayed run shortly after
//! startup. Sessions younger than the grace period are never touched,
//! regardless of credential state — they may still be pairing.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::coordinator::CoordinatorInner;

pub(crate) fn spawn_tasks(inner: &Arc<CoordinatorInner>) -> Vec<JoinHandle<()>> {
    let startup = tokio::spawn({
        let inner = Arc::clone(inner);
        async move {
            tokio::time::sleep(inner.config.orphan_startup_delay).await;
            let removed = sweep(&inner).await;
            debug!(removed, "startup orphan sweep done");
        }
    });
    let periodic = tokio::spawn({
        let inner = Arc::clone(inner);
        async move {
            let mut ticker = tokio::time::interval(inner.config.orphan_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval fires immediately once; the startup task covers that.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = sweep(&inner).await;
                debug!(removed, "periodic orphan sweep done");
            }
        }
    });
    vec![startup, periodic]
}

/// One full reconciliation pass. Returns the number of sessions torn down.
pub(crate) async fn sweep(inner: &CoordinatorInner) -> usize {
    let grace = match chrono::Duration::from_std(inner.config.orphan_grace) {
        Ok(grace) => grace,
        Err(_) => return 0,
    };
    let now = Utc::now();

    // Candidates: every session any backend knows about, old enough.
    let mut candidates: BTreeSet<String> = BTreeSet::new();
    for backend in inner.sweep_sources() {
        match backend.get_all().await {
            Ok(records) => {
                for record in records {
                    if record.age(now) >= grace {
                        candidates.insert(record.session_id);
                    }
                }
            },
            Err(e) => {
                warn!(backend = backend.name(), error = %e, "orphan sweep listing failed");
            },
        }
    }
    // Plus filesystem directories old enough by mtime: these may hold
    // credentials for sessions no metadata store remembers.
    match inner.file.sessions_older_than(inner.config.orphan_grace).await {
        Ok(ids) => candidates.extend(ids),
        Err(e) => warn!(error = %e, "orphan sweep directory scan failed"),
    }

    let mut removed = 0;
    for session_id in candidates {
        match inner.credentials_exist(&session_id).await {
            Some(false) => {
                info!(session_id = %session_id, "orphan session, tearing down");
                inner.evict(&session_id).await;
                inner.remove_everywhere(&session_id).await;
                removed += 1;
            },
            Some(true) => {},
            // Credential state unknowable right now: leave it alone, the
            // next sweep will see it again.
            None => debug!(session_id = %session_id, "orphan check inconclusive, skipped"),
        }
    }
    removed
}
