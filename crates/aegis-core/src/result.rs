//! Result type aliases for Aegis.

use crate::{CacheError, StoreError};

/// A specialized `Result` type for public cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// A specialized `Result` type for a single backing-store call.
pub type StoreResult<T> = Result<T, StoreError>;
