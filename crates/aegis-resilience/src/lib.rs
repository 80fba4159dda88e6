//! # Aegis Resilience
//!
//! Resilience patterns for the Aegis cache client.
//! Provides failure classification, exponential backoff, a connection-aware
//! retry executor, and per-call timeouts.

pub mod classify;
pub mod retry;
pub mod timeout;

pub use classify::*;
pub use retry::*;
pub use timeout::*;
