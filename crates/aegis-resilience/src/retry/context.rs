//! Per-operation retry state and the connection seam it works against.

use crate::Classify;
use async_trait::async_trait;
use std::fmt;

/// Something that lends connections and can be told one of them is broken.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    /// The borrowed connection handle.
    type Connection: Send;
    /// Error produced by borrowing or by a call on a connection.
    type Error: Classify + fmt::Display + fmt::Debug + Send;

    /// Borrows a connection, waiting or connecting if needed.
    async fn borrow(&self) -> Result<Self::Connection, Self::Error>;

    /// Marks `connection` unusable. It must never be lent out again.
    fn report_failed(&self, connection: Self::Connection, cause: &Self::Error);

    /// Stable identity of a connection, for logs and tests.
    fn connection_id(&self, connection: &Self::Connection) -> u64;
}

/// State of one logical operation across its attempts.
///
/// Holds the connection borrowed for the current attempt so that a failure
/// is reported against exactly that connection.
pub struct RetryContext<C> {
    operation: &'static str,
    attempt: u32,
    connection: Option<C>,
}

impl<C> RetryContext<C> {
    /// Creates a context for `operation` with no attempt made yet.
    pub const fn new(operation: &'static str) -> Self {
        Self {
            operation,
            attempt: 0,
            connection: None,
        }
    }

    /// Name of the operation, used in logs.
    pub const fn operation(&self) -> &'static str {
        self.operation
    }

    /// Number of the current attempt, starting at 1.
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Starts the next attempt and returns its number.
    ///
    /// A connection still held from the previous attempt is released.
    pub fn begin_attempt(&mut self) -> u32 {
        self.connection = None;
        self.attempt += 1;
        self.attempt
    }

    /// Stores the connection borrowed for this attempt.
    pub fn attach(&mut self, connection: C) -> &mut C {
        self.connection.insert(connection)
    }

    /// Takes the connection of this attempt out of the context.
    pub fn take_connection(&mut self) -> Option<C> {
        self.connection.take()
    }

    /// Returns true while a connection is held.
    pub const fn has_connection(&self) -> bool {
        self.connection.is_some()
    }
}

impl<C> fmt::Debug for RetryContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryContext")
            .field("operation", &self.operation)
            .field("attempt", &self.attempt)
            .field("has_connection", &self.connection.is_some())
            .finish()
    }
}
