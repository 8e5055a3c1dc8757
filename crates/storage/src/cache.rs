//! TTL-bounded read cache for session records.
//!
//! Plain map owned by the coordinator behind its own mutex; the cache has
//! no interior locking and no I/O. Eviction removes TTL-expired entries
//! first, then oldest-by-last-write entries until under the size cap.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sessionvault_core::SessionRecord;

#[derive(Debug, Clone)]
struct CacheEntry {
    record: SessionRecord,
    written_at: Instant,
}

#[derive(Debug)]
pub struct SessionCache {
    entries: HashMap<String, CacheEntry>,
    max_entries: usize,
    ttl: Duration,
}

impl SessionCache {
    #[must_use]
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self { entries: HashMap::new(), max_entries, ttl }
    }

    /// Fresh entry or nothing. An expired entry is dropped on the spot so
    /// it can never be served again.
    pub fn get(&mut self, session_id: &str) -> Option<SessionRecord> {
        match self.entries.get(session_id) {
            Some(entry) if entry.written_at.elapsed() < self.ttl => Some(entry.record.clone()),
            Some(_) => {
                self.entries.remove(session_id);
                None
            },
            None => None,
        }
    }

    /// Insert or refresh. At most one entry per session id.
    pub fn insert(&mut self, record: SessionRecord) {
        let id = record.session_id.clone();
        self.entries.insert(id, CacheEntry { record, written_at: Instant::now() });
        if self.entries.len() > self.max_entries {
            self.evict();
        }
    }

    /// Patch a resident entry in place after a successful backend write.
    /// Leaves `written_at` alone: TTL measures distance from the last
    /// full record, not from partial patches.
    pub fn apply(&mut self, session_id: &str, update: &sessionvault_core::SessionUpdate) {
        if let Some(entry) = self.entries.get_mut(session_id) {
            update.apply(&mut entry.record);
        }
    }

    pub fn remove(&mut self, session_id: &str) {
        self.entries.remove(session_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.written_at.elapsed() < ttl);

        while self.entries.len() > self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.written_at)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    self.entries.remove(&id);
                },
                None => break,
            }
        }
    }
}
