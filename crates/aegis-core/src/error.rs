//! Unified error types for the cache client.
//!
//! Two layers of errors exist:
//!
//! - [`StoreError`] describes a single failed call against the backing store.
//!   It carries enough shape for the retry layer to classify it as transient
//!   or fatal.
//! - [`CacheError`] is what callers of the cache facade see. Store failures
//!   are wrapped verbatim so the root cause is never lost.

use thiserror::Error;

/// Error produced by a single backing-store call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The call (or connection attempt) did not complete in time.
    #[error("Store call timed out: {0}")]
    Timeout(String),

    /// The server is temporarily unable to serve the request
    /// (loading dataset, busy script, failover in progress).
    #[error("Store is busy: {0}")]
    Busy(String),

    /// The connection was refused, dropped, or hit an I/O error.
    #[error("Store connection failed: {0}")]
    Connection(String),

    /// The server rejected our credentials.
    #[error("Store authentication failed: {0}")]
    Authentication(String),

    /// The server rejected the command itself.
    #[error("Store protocol error: {0}")]
    Protocol(String),

    /// The server answered with something we cannot decode.
    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),

    /// The connection pool has been closed by its owner.
    #[error("Connection pool is closed")]
    PoolClosed,

    /// Client-side failure unrelated to the network.
    #[error("Internal store client error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "STORE_TIMEOUT",
            Self::Busy(_) => "STORE_BUSY",
            Self::Connection(_) => "STORE_CONNECTION",
            Self::Authentication(_) => "STORE_AUTHENTICATION",
            Self::Protocol(_) => "STORE_PROTOCOL",
            Self::UnexpectedReply(_) => "STORE_UNEXPECTED_REPLY",
            Self::PoolClosed => "STORE_POOL_CLOSED",
            Self::Internal(_) => "STORE_INTERNAL",
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout<T: Into<String>>(message: T) -> Self {
        Self::Timeout(message.into())
    }

    /// Creates a connection error.
    #[must_use]
    pub fn connection<T: Into<String>>(message: T) -> Self {
        Self::Connection(message.into())
    }

    /// Creates an unexpected-reply error.
    #[must_use]
    pub fn unexpected_reply<T: Into<String>>(message: T) -> Self {
        Self::UnexpectedReply(message.into())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        use redis::ErrorKind;

        if err.is_timeout() {
            return Self::Timeout(err.to_string());
        }
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            return Self::Connection(err.to_string());
        }

        match err.kind() {
            ErrorKind::BusyLoadingError
            | ErrorKind::TryAgain
            | ErrorKind::ClusterDown
            | ErrorKind::MasterDown => Self::Busy(err.to_string()),
            ErrorKind::AuthenticationFailed => Self::Authentication(err.to_string()),
            ErrorKind::IoError => Self::Connection(err.to_string()),
            ErrorKind::TypeError => Self::UnexpectedReply(err.to_string()),
            // A long-running script answers everything else with -BUSY.
            _ if err.code() == Some("BUSY") => Self::Busy(err.to_string()),
            _ => Self::Protocol(err.to_string()),
        }
    }
}

/// Error returned by the public cache surface.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The caller passed an invalid key or invalid entry options.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The caller used a synchronous entry point.
    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),

    /// Every attempt failed with a transient error.
    #[error("Cache operation failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        source: StoreError,
    },

    /// A fail-fast key hit a transient error; it was not retried.
    #[error("Cache store unavailable: {0}")]
    Unavailable(#[source] StoreError),

    /// The store failed with a non-retryable error.
    #[error("Cache store error: {0}")]
    Store(#[source] StoreError),

    /// The caller cancelled the operation.
    #[error("Cache operation cancelled")]
    Cancelled,

    /// The cache could not be built from its configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A typed helper could not encode or decode a value.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::NotSupported(_) => "NOT_SUPPORTED",
            Self::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            Self::Unavailable(_) => "STORE_UNAVAILABLE",
            Self::Store(_) => "STORE_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument<T: Into<String>>(message: T) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Checks if the failure came from a transient store condition.
    ///
    /// A caller may choose to try again later; the cache itself already did
    /// whatever retrying its policy allows.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. } | Self::Unavailable(_))
    }

    /// Returns the store error behind this failure, if any.
    #[must_use]
    pub const fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::RetriesExhausted { source, .. } => Some(source),
            Self::Unavailable(source) | Self::Store(source) => Some(source),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
