//! Storage backend trait abstraction.
//!
//! One async trait implemented by all three adapters (document store,
//! relational store, filesystem). The coordinator depends only on this
//! surface and decides fallback order; adapters never see each other.

use async_trait::async_trait;
use sessionvault_core::{SessionRecord, SessionUpdate};

use crate::error::StorageError;

pub type Result<T> = std::result::Result<T, StorageError>;

/// CRUD surface shared by every backend adapter.
///
/// # Thread safety
///
/// Implementations must be `Send + Sync`; connection flags mutated by
/// background health tasks are atomics, never bare booleans.
///
/// # Failure semantics
///
/// Adapters return errors, they never log-and-swallow: isolation of
/// failures (fall through to the next backend) is the coordinator's job.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Upsert the full record by `session_id`.
    async fn save(&self, record: &SessionRecord) -> Result<()>;

    /// Fetch a record. `Ok(None)` when absent.
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// Apply a partial update to an existing record.
    async fn update(&self, session_id: &str, update: &SessionUpdate) -> Result<()>;

    /// Remove the record. Adapters may rewrite this internally (the
    /// relational store turns deletes of web sessions into disconnect
    /// updates). Idempotent: absent records are not an error.
    async fn delete(&self, session_id: &str) -> Result<()>;

    /// All records this backend knows about.
    async fn get_all(&self) -> Result<Vec<SessionRecord>>;

    /// Whether the backend currently believes it can serve calls.
    /// Cheap flag read, no I/O.
    fn is_connected(&self) -> bool;

    /// Store one credential blob under `(session_id, filename)`.
    /// Filenames are sanitized by the adapter before use as a storage key.
    async fn save_credentials(&self, session_id: &str, filename: &str, data: &[u8])
        -> Result<()>;

    /// Fetch one credential blob. `Ok(None)` when absent.
    async fn get_credentials(&self, session_id: &str, filename: &str)
        -> Result<Option<Vec<u8>>>;

    /// Remove every credential blob for the session.
    async fn delete_credentials(&self, session_id: &str) -> Result<()>;

    /// Whether any valid credential material exists for the session.
    async fn has_credentials(&self, session_id: &str) -> Result<bool>;

    /// Human-readable adapter name for logging.
    fn name(&self) -> &'static str;
}

/// Normalize a credential filename (or session id) into the safe charset
/// `[A-Za-z0-9._-]` used as a storage key by every adapter.
#[must_use]
pub fn sanitize_key(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_passes_safe_chars_through() {
        assert_eq!(sanitize_key("pre-key-1.json"), "pre-key-1.json");
        assert_eq!(sanitize_key("app_state_v2"), "app_state_v2");
    }

    #[test]
    fn sanitize_replaces_unsafe_chars() {
        assert_eq!(sanitize_key("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_key("creds über\n"), "creds__ber_");
    }
}
