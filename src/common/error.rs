//! Error types for quire

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Transport errors (retryable) ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Backend busy: {0}")]
    Busy(String),

    // === Concurrency errors ===
    #[error("Lock busy: {0}")]
    LockBusy(String),

    #[error("Revision mismatch on {uri}: expected {expected}, current {current}")]
    RevisionMismatch {
        uri: String,
        expected: u64,
        current: u64,
    },

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // === Hierarchy / consistency errors ===
    #[error("Missing parent for {0}")]
    MissingParent(String),

    #[error("Existing children under {0}")]
    ExistingChildren(String),

    #[error("Alias collision: {alias} already resolves to {holder}")]
    AliasCollision { alias: String, holder: String },

    // === Validation errors ===
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Authorization ===
    #[error("Access denied on {uri}: {reason}")]
    AccessDenied { uri: String, reason: String },

    // === Addressing ===
    #[error("No endpoint assignable for {0}")]
    NoEndpoint(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a transport-level error worth retrying?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ConnectionFailed(_) | Error::Busy(_)
        )
    }

    /// Optimistic-concurrency family: callers commonly retry the whole
    /// logical operation on these.
    pub fn is_concurrency(&self) -> bool {
        matches!(
            self,
            Error::LockBusy(_)
                | Error::RevisionMismatch { .. }
                | Error::DuplicateKey(_)
                | Error::NotFound(_)
        )
    }

    /// Hierarchy/consistency family.
    pub fn is_hierarchy(&self) -> bool {
        matches!(
            self,
            Error::MissingParent(_) | Error::ExistingChildren(_) | Error::AliasCollision { .. }
        )
    }

    /// Validation family: rejected before any backend call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidQuery(_) | Error::InvalidUri(_) | Error::InvalidConfig(_)
        )
    }
}

// Implement From for common error types
impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}
