//! Error types.
//!
//! Matching itself never fails: empty input, ambiguity, invalid hints and an
//! unreachable store all surface inside `MatchOutcome`. Only operations that
//! write human decisions (`confirm`) or read administrative data (`stats`)
//! return these errors.

use crate::models::CanonicalId;
use thiserror::Error;

/// Failures of a mapping store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend cannot be reached (connection refused, pool exhausted, timeout)
    #[error("mapping store unavailable: {0}")]
    Unavailable(String),

    /// Backend rejected the operation but a retry may succeed
    /// (serialization failure, deadlock)
    #[error("transient mapping store failure: {0}")]
    Transient(String),

    #[error("mapping store query failed: {0}")]
    Query(String),

    #[error("mapping store data could not be decoded: {0}")]
    Serialization(String),

    #[error("mapping store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Transient(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Protocol(_) => StoreError::Unavailable(e.to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => StoreError::Transient(e.to_string()),
                // too_many_connections, cannot_connect_now, admin_shutdown
                Some("53300") | Some("57P03") | Some("57P01") => {
                    StoreError::Unavailable(e.to_string())
                }
                _ => StoreError::Query(e.to_string()),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Serialization(e.to_string())
            }
            _ => StoreError::Query(e.to_string()),
        }
    }
}

/// Errors returned by [`crate::service::MatchingService`].
#[derive(Debug, Error)]
pub enum MatchingError {
    /// `confirm` targeted an id that is not in the current registry.
    /// The store is left unchanged.
    #[error("canonical id {canonical_id} is not in the current registry")]
    DataConflict { canonical_id: CanonicalId },

    #[error("source name must not be empty")]
    EmptySourceName,

    #[error("confirming actor must not be empty")]
    EmptyActor,

    /// No mapping store is attached, or it is in its failure cooldown.
    #[error("mapping store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
