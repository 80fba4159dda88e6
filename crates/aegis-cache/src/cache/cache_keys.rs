//! Key partitioning and fail-fast classification.

use aegis_config::CacheConfig;
use aegis_core::{CacheError, CacheResult};

/// How many attempts an operation on a key may make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptMode {
    /// Governed by the retry policy.
    Retried,
    /// Exactly one attempt; errors surface immediately.
    FailFast,
}

/// Maps caller keys to store keys and picks their attempt mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPolicy {
    instance_name: String,
    fail_fast_prefixes: Vec<String>,
}

impl KeyPolicy {
    pub fn new(instance_name: impl Into<String>, fail_fast_prefixes: Vec<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            fail_fast_prefixes,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.instance_name.clone(), config.fail_fast_prefixes.clone())
    }

    /// Prefix prepended to every key.
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Store key for a caller key. Empty keys are rejected.
    pub fn instance_key(&self, key: &str) -> CacheResult<String> {
        if key.is_empty() {
            return Err(CacheError::invalid_argument("cache key must not be empty"));
        }
        Ok(format!("{}{}", self.instance_name, key))
    }

    /// Attempt mode of a caller key, matched before the instance prefix is applied.
    pub fn attempt_mode(&self, key: &str) -> AttemptMode {
        if self
            .fail_fast_prefixes
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()))
        {
            AttemptMode::FailFast
        } else {
            AttemptMode::Retried
        }
    }
}
