//! Typed error enum for the storage layer.
//!
//! Backend adapters return `StorageError` so the coordinator can match on
//! specific failure modes (transient connectivity, corrupt data, backend
//! down) instead of downcasting opaque boxes. No variant of this enum ever
//! escapes a public coordinator method.

use thiserror::Error;

/// Storage-layer error with variants covering every expected failure mode.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Session not found where one was required.
    #[error("not found: session {0}")]
    NotFound(String),

    /// Backend is known-down; the call was rejected before any I/O.
    #[error("backend unavailable: {0}")]
    Unavailable(&'static str),

    /// SQL / connection / timeout failure in the relational store.
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// Document-store command or connection failure.
    #[error("document store error: {0}")]
    DocumentStore(#[source] redis::RedisError),

    /// Filesystem failure in the file backend.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored metadata or credentials could not be decoded. Reads treat
    /// this as absent data rather than crashing.
    #[error("data corruption: {context}")]
    DataCorruption {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StorageError {
    /// Whether this error is likely transient (worth retrying / falling
    /// through to the next backend without marking anything degraded).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(e) => matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)),
            Self::DocumentStore(e) => e.is_timeout() || e.is_connection_dropped(),
            Self::Unavailable(_) => true,
            _ => false,
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("unknown".into()),
            _ => Self::Database(err),
        }
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        Self::DocumentStore(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::DataCorruption {
            context: "JSON serialization/deserialization".to_owned(),
            source: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_errors_are_transient() {
        assert!(StorageError::Unavailable("document store").is_transient());
        assert!(StorageError::Database(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn data_errors_are_not_transient() {
        assert!(!StorageError::NotFound("s1".to_owned()).is_transient());
        assert!(!StorageError::Io(std::io::Error::other("disk gone")).is_transient());
        let corrupt: StorageError =
            serde_json::from_str::<i32>("not json").unwrap_err().into();
        assert!(!corrupt.is_transient());
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(StorageError::from(sqlx::Error::RowNotFound), StorageError::NotFound(_)));
    }
}
