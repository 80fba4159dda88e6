//! # Aegis Core
//!
//! Core types shared by every Aegis crate: the store and cache error
//! taxonomies, result aliases, and the tracing bootstrap used by hosts.

pub mod error;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use result::*;
