use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted metadata for one logical bot connection.
///
/// `session_id` is the primary key across every backend. Timestamps are
/// monotonic per session per backend: writers bump `updated_at`, never
/// rewind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub owner_id: i64,
    pub phone_number: Option<String>,
    pub is_connected: bool,
    pub connection_status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub source: SessionSource,
    pub detected: bool,
    /// Set exactly when `detected` is true.
    pub detected_at: Option<DateTime<Utc>>,
    /// Opaque backend-specific credential storage key.
    pub credentials_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Fresh record in the initial (disconnected) state.
    #[must_use]
    pub fn new(session_id: impl Into<String>, owner_id: i64, source: SessionSource) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            owner_id,
            phone_number: None,
            is_connected: false,
            connection_status: ConnectionStatus::Disconnected,
            reconnect_attempts: 0,
            source,
            detected: false,
            detected_at: None,
            credentials_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Age of the record relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Connection state as reported by the external connection manager.
///
/// The storage layer only persists whatever state it is told; transitions
/// are driven entirely by the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Pairing,
    Error,
}

impl ConnectionStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match *self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Pairing => "pairing",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(Self::Disconnected),
            "connecting" => Ok(Self::Connecting),
            "connected" => Ok(Self::Connected),
            "pairing" => Ok(Self::Pairing),
            "error" => Ok(Self::Error),
            _ => Err(anyhow::anyhow!("Invalid connection status: {}", s)),
        }
    }
}

/// Where the session was created from. Drives deletion policy: `Web`
/// rows in the relational backend are never physically deleted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    Telegram,
    Web,
}

impl SessionSource {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match *self {
            Self::Telegram => "telegram",
            Self::Web => "web",
        }
    }
}

impl std::str::FromStr for SessionSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "telegram" => Ok(Self::Telegram),
            "web" => Ok(Self::Web),
            _ => Err(anyhow::anyhow!("Invalid session source: {}", s)),
        }
    }
}

/// Partial update against a `SessionRecord`.
///
/// All fields optional; merging is last-write-wins per field, which is what
/// the coordinator's write buffer relies on to coalesce bursty updates into
/// one physical write per flush window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub phone_number: Option<String>,
    pub is_connected: Option<bool>,
    pub connection_status: Option<ConnectionStatus>,
    pub reconnect_attempts: Option<u32>,
    pub detected: Option<bool>,
    pub credentials_ref: Option<String>,
}

impl SessionUpdate {
    /// Fold `newer` into `self`, field by field. Fields absent in `newer`
    /// keep their current value.
    pub fn merge(&mut self, newer: Self) {
        if let Some(v) = newer.phone_number {
            self.phone_number = Some(v);
        }
        if let Some(v) = newer.is_connected {
            self.is_connected = Some(v);
        }
        if let Some(v) = newer.connection_status {
            self.connection_status = Some(v);
        }
        if let Some(v) = newer.reconnect_attempts {
            self.reconnect_attempts = Some(v);
        }
        if let Some(v) = newer.detected {
            self.detected = Some(v);
        }
        if let Some(v) = newer.credentials_ref {
            self.credentials_ref = Some(v);
        }
    }

    /// Apply to a record in place, bumping `updated_at` and keeping the
    /// `detected`/`detected_at` invariant.
    pub fn apply(&self, record: &mut SessionRecord) {
        if let Some(v) = &self.phone_number {
            record.phone_number = Some(v.clone());
        }
        if let Some(v) = self.is_connected {
            record.is_connected = v;
        }
        if let Some(v) = self.connection_status {
            record.connection_status = v;
        }
        if let Some(v) = self.reconnect_attempts {
            record.reconnect_attempts = v;
        }
        if let Some(v) = self.detected {
            record.detected = v;
            record.detected_at = v.then(Utc::now);
        }
        if let Some(v) = &self.credentials_ref {
            record.credentials_ref = Some(v.clone());
        }
        record.updated_at = Utc::now();
    }

    /// True when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn connected(status: ConnectionStatus) -> Self {
        Self {
            is_connected: Some(status == ConnectionStatus::Connected),
            connection_status: Some(status),
            ..Self::default()
        }
    }
}
