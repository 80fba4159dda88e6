//! Failure classification.
//!
//! The retry executor never inspects error types itself. It asks
//! [`classify`] whether a failure is worth another attempt, and the answer is
//! plain data.

use aegis_core::StoreError;

/// Whether a failure may succeed if attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeouts, busy servers, broken connections.
    Transient,
    /// Everything else: bad credentials, rejected commands, garbled replies.
    Fatal,
}

/// Implemented by errors the retry executor can reason about.
pub trait Classify {
    /// Returns the failure kind of this error.
    fn failure_kind(&self) -> FailureKind;
}

/// A classified failure carrying its cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure<E> {
    /// Safe to retry on another connection.
    Transient(E),
    /// Must be surfaced immediately.
    Fatal(E),
}

impl<E> Failure<E> {
    /// Returns true for transient failures.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns the underlying cause.
    pub const fn cause(&self) -> &E {
        match self {
            Self::Transient(e) | Self::Fatal(e) => e,
        }
    }

    /// Unwraps the underlying cause.
    pub fn into_cause(self) -> E {
        match self {
            Self::Transient(e) | Self::Fatal(e) => e,
        }
    }
}

/// Tags an error as transient or fatal.
pub fn classify<E: Classify>(error: E) -> Failure<E> {
    match error.failure_kind() {
        FailureKind::Transient => Failure::Transient(error),
        FailureKind::Fatal => Failure::Fatal(error),
    }
}

impl Classify for StoreError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) | Self::Busy(_) | Self::Connection(_) => FailureKind::Transient,
            Self::Authentication(_)
            | Self::Protocol(_)
            | Self::UnexpectedReply(_)
            | Self::PoolClosed
            | Self::Internal(_) => FailureKind::Fatal,
        }
    }
}
