//! Expiration arithmetic.
//!
//! Turns the caller's expiration options into the absolute instant stored
//! with an entry and the whole-second TTL handed to the store. Nothing here
//! touches a connection.

use crate::entry::instant_to_ticks;
use aegis_core::{CacheError, CacheResult};
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Resolves the absolute expiration of an entry created at `creation`.
///
/// An explicit instant must lie strictly after `creation`. A relative
/// duration, when present, wins over the explicit instant. The resolved
/// instant must fall within years 0001 to 9999.
pub fn absolute_expiration(
    creation: DateTime<Utc>,
    explicit: Option<DateTime<Utc>>,
    relative_to_now: Option<Duration>,
) -> CacheResult<Option<DateTime<Utc>>> {
    if let Some(at) = explicit {
        if at <= creation {
            return Err(CacheError::invalid_argument(format!(
                "absolute expiration {} must be after the creation time {}",
                at, creation
            )));
        }
    }

    let resolved = match relative_to_now {
        Some(relative) => {
            let delta = TimeDelta::from_std(relative).map_err(|_| {
                CacheError::invalid_argument("relative expiration is out of range")
            })?;
            Some(
                creation
                    .checked_add_signed(delta)
                    .ok_or_else(|| CacheError::invalid_argument("relative expiration is out of range"))?,
            )
        }
        None => explicit,
    };

    match resolved {
        Some(at) if instant_to_ticks(at).is_none() => Err(CacheError::invalid_argument(format!(
            "absolute expiration {} is out of range",
            at
        ))),
        _ => Ok(resolved),
    }
}

/// Seconds the store should keep an entry alive, measured from `now`.
///
/// With both inputs the smaller remaining duration wins. Fractions of a
/// second are truncated toward zero. `None` means the entry never expires.
/// A result of zero or less means the entry is already due.
pub fn ttl_seconds(
    now: DateTime<Utc>,
    absolute: Option<DateTime<Utc>>,
    sliding: Option<Duration>,
) -> Option<i64> {
    let sliding = sliding.map(|window| i64::try_from(window.as_secs()).unwrap_or(i64::MAX));
    let absolute = absolute.map(|at| (at - now).num_seconds());

    match (absolute, sliding) {
        (Some(absolute), Some(sliding)) => Some(absolute.min(sliding)),
        (Some(absolute), None) => Some(absolute),
        (None, Some(sliding)) => Some(sliding),
        (None, None) => None,
    }
}
