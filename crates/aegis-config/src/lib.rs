//! # Aegis Config
//!
//! Configuration management for the Aegis cache client.
//! Supports layered configuration from files and environment variables,
//! validation of every section, and runtime refresh.

mod app_config;
mod loader;
mod validation;

pub use app_config::*;
pub use loader::*;
pub use validation::*;
