//! Storage coordination layer for sessionvault
//!
//! Persists per-connection session metadata and credential blobs across
//! three independent backends (Redis document store, PostgreSQL, local
//! filesystem), failing over transparently between them. A TTL-bounded
//! read cache and a per-session write buffer sit in front of the backends;
//! an orphan reconciler sweeps metadata that has lost its credentials.
//!
//! This is a library consumed in-process: it exposes no network API of
//! its own.

mod buffer;
mod cache;
mod config;
mod coordinator;
mod error;
mod file_store;
mod pg_store;
mod reconciler;
mod redis_store;
mod traits;

pub use config::{PrimaryBackend, StorageConfig};
pub use coordinator::SessionCoordinator;
pub use error::StorageError;
pub use file_store::{FileStore, DEFAULT_CREDS_FILE, METADATA_FILE};
pub use pg_store::PgStore;
pub use redis_store::RedisStore;
pub use traits::{sanitize_key, SessionBackend};
