//! Shared constants for sessionvault.
//!
//! Centralizes tunables that were previously duplicated across modules.
//! Flush intervals and cache TTLs are configuration, not derived behavior;
//! these are only the defaults.

/// Cache: maximum resident entries before size-based eviction.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 500;

/// Cache: per-entry time to live in milliseconds.
pub const DEFAULT_CACHE_TTL_MS: u64 = 120_000;

/// Write buffer: delay between a buffered update and its physical write.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1_000;

/// Minimum age before a web session may be reported as undetected.
/// Avoids flagging sessions that are still mid-handshake.
pub const DEFAULT_DETECTION_GRACE_MS: u64 = 5_000;

/// Minimum age before the orphan reconciler may tear a session down.
pub const DEFAULT_ORPHAN_GRACE_MS: u64 = 300_000;

/// Interval between orphan reconciliation sweeps.
pub const DEFAULT_ORPHAN_INTERVAL_MS: u64 = 3_600_000;

/// Delay before the one-shot startup reconciliation sweep.
pub const DEFAULT_ORPHAN_STARTUP_DELAY_MS: u64 = 30_000;

/// Document store: credential writes queued before a forced batch flush.
pub const DEFAULT_CRED_BATCH_SIZE: usize = 10;

/// Document store: maximum delay before a queued credential batch flushes.
pub const DEFAULT_CRED_BATCH_DELAY_MS: u64 = 500;

/// Document store: interval between health pings.
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 10_000;

/// Document store: consecutive ping failures before declaring disconnection.
pub const HEALTH_CHECK_FAILURE_THRESHOLD: u32 = 3;

/// Document store: base reconnect backoff in milliseconds (doubles per attempt).
pub const RECONNECT_BACKOFF_BASE_MS: u64 = 1_000;

/// Document store: cap on the exponential reconnect backoff.
pub const RECONNECT_BACKOFF_CAP_MS: u64 = 60_000;

/// PostgreSQL connection pool: maximum connections.
pub const PG_POOL_MAX_CONNECTIONS: u32 = 10;

/// PostgreSQL connection pool: acquire timeout in seconds.
pub const PG_POOL_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// PostgreSQL connection pool: idle timeout in seconds.
pub const PG_POOL_IDLE_TIMEOUT_SECS: u64 = 300;

/// Filesystem backend: attempts for a failed remove before giving up.
pub const FS_REMOVE_RETRIES: u32 = 3;

/// Filesystem backend: pause between remove retries in milliseconds.
pub const FS_REMOVE_RETRY_DELAY_MS: u64 = 100;
