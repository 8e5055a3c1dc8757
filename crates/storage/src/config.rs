//! Storage configuration, fixed at construction time. No hot reload.

use std::path::PathBuf;
use std::time::Duration;

use sessionvault_core::{
    env_parse_with_default, DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_TTL_MS,
    DEFAULT_CRED_BATCH_DELAY_MS, DEFAULT_CRED_BATCH_SIZE, DEFAULT_DETECTION_GRACE_MS,
    DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_HEALTH_CHECK_INTERVAL_MS, DEFAULT_ORPHAN_GRACE_MS,
    DEFAULT_ORPHAN_INTERVAL_MS, DEFAULT_ORPHAN_STARTUP_DELAY_MS,
};

/// Which network backend is tried first on reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimaryBackend {
    #[default]
    Document,
    Relational,
}

/// Everything the coordinator needs to build its backends and tasks.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Document store URL (`redis://..`). `None` disables the backend.
    pub redis_url: Option<String>,
    /// Relational store URL (`postgres://..`). `None` disables the backend.
    pub database_url: Option<String>,
    /// Root directory for the filesystem backend. Always active; it is the
    /// last-resort fallback when both network backends are down.
    pub sessions_root: PathBuf,
    pub primary: PrimaryBackend,

    pub cache_max_entries: usize,
    pub cache_ttl: Duration,
    pub flush_interval: Duration,

    /// Minimum age before a web session counts as undetected.
    pub detection_grace: Duration,

    pub orphan_grace: Duration,
    pub orphan_interval: Duration,
    pub orphan_startup_delay: Duration,
    /// Disables the background reconciler task (tests drive sweeps manually).
    pub orphan_sweep_enabled: bool,

    pub cred_batch_size: usize,
    pub cred_batch_delay: Duration,
    pub health_check_interval: Duration,
}

impl StorageConfig {
    /// Filesystem-only configuration rooted at `sessions_root`.
    pub fn new(sessions_root: impl Into<PathBuf>) -> Self {
        Self {
            redis_url: None,
            database_url: None,
            sessions_root: sessions_root.into(),
            primary: PrimaryBackend::default(),
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            cache_ttl: Duration::from_millis(DEFAULT_CACHE_TTL_MS),
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            detection_grace: Duration::from_millis(DEFAULT_DETECTION_GRACE_MS),
            orphan_grace: Duration::from_millis(DEFAULT_ORPHAN_GRACE_MS),
            orphan_interval: Duration::from_millis(DEFAULT_ORPHAN_INTERVAL_MS),
            orphan_startup_delay: Duration::from_millis(DEFAULT_ORPHAN_STARTUP_DELAY_MS),
            orphan_sweep_enabled: true,
            cred_batch_size: DEFAULT_CRED_BATCH_SIZE,
            cred_batch_delay: Duration::from_millis(DEFAULT_CRED_BATCH_DELAY_MS),
            health_check_interval: Duration::from_millis(DEFAULT_HEALTH_CHECK_INTERVAL_MS),
        }
    }

    /// Configuration from `SESSIONVAULT_*` environment variables, with the
    /// compiled defaults for anything unset or unparseable.
    pub fn from_env(sessions_root: impl Into<PathBuf>) -> Self {
        let mut cfg = Self::new(sessions_root);
        cfg.redis_url = std::env::var("SESSIONVAULT_REDIS_URL").ok().filter(|v| !v.is_empty());
        cfg.database_url =
            std::env::var("SESSIONVAULT_DATABASE_URL").ok().filter(|v| !v.is_empty());
        if let Ok(primary) = std::env::var("SESSIONVAULT_PRIMARY") {
            match primary.as_str() {
                "relational" | "postgres" => cfg.primary = PrimaryBackend::Relational,
                "document" | "redis" => cfg.primary = PrimaryBackend::Document,
                other => {
                    tracing::warn!(value = %other, "unknown SESSIONVAULT_PRIMARY, using document");
                },
            }
        }
        cfg.cache_max_entries =
            env_parse_with_default("SESSIONVAULT_CACHE_MAX_ENTRIES", DEFAULT_CACHE_MAX_ENTRIES);
        cfg.cache_ttl = Duration::from_millis(env_parse_with_default(
            "SESSIONVAULT_CACHE_TTL_MS",
            DEFAULT_CACHE_TTL_MS,
        ));
        cfg.flush_interval = Duration::from_millis(env_parse_with_default(
            "SESSIONVAULT_FLUSH_INTERVAL_MS",
            DEFAULT_FLUSH_INTERVAL_MS,
        ));
        cfg.detection_grace = Duration::from_millis(env_parse_with_default(
            "SESSIONVAULT_DETECTION_GRACE_MS",
            DEFAULT_DETECTION_GRACE_MS,
        ));
        cfg.orphan_grace = Duration::from_millis(env_parse_with_default(
            "SESSIONVAULT_ORPHAN_GRACE_MS",
            DEFAULT_ORPHAN_GRACE_MS,
        ));
        cfg.orphan_interval = Duration::from_millis(env_parse_with_default(
            "SESSIONVAULT_ORPHAN_INTERVAL_MS",
            DEFAULT_ORPHAN_INTERVAL_MS,
        ));
        cfg
    }
}
