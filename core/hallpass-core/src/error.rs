//! Error types for hallpass-core operations.

use std::path::PathBuf;

/// All errors that can occur in hallpass-core operations.
///
/// The first three variants are user-facing scan outcomes ("scan again during
/// class", "see the teacher"); the rest surface infrastructure problems.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    // ─────────────────────────────────────────────────────────────────────
    // Scan resolution errors (user-facing, no state was written)
    // ─────────────────────────────────────────────────────────────────────
    #[error("no active class period right now")]
    NoActivePeriod,

    #[error("code {code} is not registered for {period}")]
    UnregisteredCode { period: String, code: String },

    #[error("invalid scan code: {0}")]
    InvalidCode(String),

    // ─────────────────────────────────────────────────────────────────────
    // Identity errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("malformed unique id: {0}")]
    InvalidUniqueId(String),

    // ─────────────────────────────────────────────────────────────────────
    // Persistence errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("persistence unavailable: {context}: {source}")]
    PersistenceUnavailable {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A conditional write lost to a concurrent writer on the same record.
    /// Callers retry; this never reaches a scanning station as-is.
    #[error("conditional write conflict on {0}")]
    WriteConflict(String),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("schedule configuration malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PassError {
    /// True for errors a scanning station should show to the student rather
    /// than report as a system fault.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            PassError::NoActivePeriod
                | PassError::UnregisteredCode { .. }
                | PassError::InvalidCode(_)
        )
    }
}

/// Convenience type alias for Results using PassError.
pub type Result<T> = std::result::Result<T, PassError>;
