//! Error types for the Nube client core

use thiserror::Error;

/// Errors surfaced by the object-store gateway
///
/// The gateway performs no internal retries; every failure is returned to the
/// caller after the terminal state transition has been recorded.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No object exists at the given path key. Expected and caller-recoverable.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The caller-supplied path key is unusable (empty key or empty name).
    #[error("invalid path key: {0}")]
    InvalidKey(String),

    /// The transfer failed mid-upload.
    #[error("transfer failed for {key}: {cause}")]
    Transfer { key: String, cause: String },

    /// Any other store failure, passed through.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by the notification token manager
#[derive(Error, Debug)]
pub enum MessagingError {
    /// Push messaging is unavailable in the current environment. Permanent
    /// for the session.
    #[error("push messaging is not supported in this environment")]
    UnsupportedEnvironment,

    /// The backend rejected or failed token issuance.
    #[error("token fetch failed: {0}")]
    TokenFetch(String),

    /// Any other messaging failure, passed through.
    #[error("messaging backend error: {0}")]
    Backend(String),
}
