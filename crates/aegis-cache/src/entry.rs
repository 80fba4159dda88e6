//! Entry options and the on-store layout of an entry.
//!
//! Every entry is one hash holding three fields. [`ENTRY_FIELDS`] is the only
//! place their names and script argument positions are defined: the read path
//! asks for fields in this order and the update script is rendered from it.

use aegis_core::{CacheError, CacheResult, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Marker value meaning "this field carries no value".
pub const NOT_PRESENT: i64 = -1;

/// One hash field of a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryField {
    /// Field name inside the hash.
    pub name: &'static str,
    /// 1-based `ARGV` index the update script reads the value from.
    pub script_arg: usize,
}

/// Absolute expiration, in ticks.
pub const ABSOLUTE_EXPIRATION: EntryField = EntryField {
    name: "absexp",
    script_arg: 1,
};

/// Sliding window, in ticks.
pub const SLIDING_EXPIRATION: EntryField = EntryField {
    name: "sldexp",
    script_arg: 2,
};

/// Payload bytes.
pub const DATA: EntryField = EntryField {
    name: "data",
    script_arg: 4,
};

/// `ARGV` index of the TTL passed to the update script.
pub const TTL_SCRIPT_ARG: usize = 3;

/// All fields of an entry, in read order.
pub const ENTRY_FIELDS: [EntryField; 3] = [ABSOLUTE_EXPIRATION, SLIDING_EXPIRATION, DATA];

/// Field names read by a full lookup.
pub const ENTRY_FIELD_NAMES: [&str; 3] = [ABSOLUTE_EXPIRATION.name, SLIDING_EXPIRATION.name, DATA.name];

/// Field names read when only expiration metadata is needed.
pub const MARKER_FIELD_NAMES: [&str; 2] = [ABSOLUTE_EXPIRATION.name, SLIDING_EXPIRATION.name];

const TICKS_PER_SECOND: i64 = 10_000_000;
const NANOS_PER_TICK: i64 = 100;
/// Ticks between 0001-01-01 and the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
/// Ticks of 9999-12-31T23:59:59.9999999Z, the last representable instant.
pub const MAX_TICKS: i64 = 3_155_378_975_999_999_999;
/// Longest sliding window, in seconds, whose tick count fits an `i64`.
pub const MAX_SLIDING_SECONDS: u64 = (i64::MAX / TICKS_PER_SECOND) as u64;

/// Converts an instant to 100-nanosecond ticks since 0001-01-01 UTC.
///
/// Returns `None` outside years 0001 to 9999.
pub fn instant_to_ticks(at: DateTime<Utc>) -> Option<i64> {
    let ticks = at
        .timestamp()
        .checked_mul(TICKS_PER_SECOND)?
        .checked_add(i64::from(at.timestamp_subsec_nanos()) / NANOS_PER_TICK)?
        .checked_add(UNIX_EPOCH_TICKS)?;
    (0..=MAX_TICKS).contains(&ticks).then_some(ticks)
}

/// Converts ticks since 0001-01-01 UTC back to an instant.
pub fn ticks_to_instant(ticks: i64) -> Option<DateTime<Utc>> {
    let since_epoch = ticks.checked_sub(UNIX_EPOCH_TICKS)?;
    let seconds = since_epoch.div_euclid(TICKS_PER_SECOND);
    let nanos = since_epoch.rem_euclid(TICKS_PER_SECOND) * NANOS_PER_TICK;
    DateTime::from_timestamp(seconds, u32::try_from(nanos).ok()?)
}

/// Converts a duration to 100-nanosecond ticks. `None` when it does not fit.
pub fn duration_to_ticks(duration: Duration) -> Option<i64> {
    i64::try_from(duration.as_nanos() / NANOS_PER_TICK as u128).ok()
}

/// Converts ticks to a duration. Negative counts have no duration.
pub fn ticks_to_duration(ticks: i64) -> Option<Duration> {
    let ticks = u64::try_from(ticks).ok()?;
    let seconds = ticks / TICKS_PER_SECOND as u64;
    let nanos = (ticks % TICKS_PER_SECOND as u64) * NANOS_PER_TICK as u64;
    Some(Duration::new(seconds, u32::try_from(nanos).ok()?))
}

/// Expiration settings for a single write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryOptions {
    /// Fixed instant after which the entry is gone.
    pub absolute_expiration: Option<DateTime<Utc>>,
    /// Lifetime measured from the moment of the write. Overrides
    /// `absolute_expiration`. At least one second.
    pub absolute_expiration_relative_to_now: Option<Duration>,
    /// Inactivity window, re-armed by every read. At least one second and at
    /// most [`MAX_SLIDING_SECONDS`].
    pub sliding_expiration: Option<Duration>,
}

impl EntryOptions {
    /// Options with no expiration at all.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_absolute_expiration(mut self, at: DateTime<Utc>) -> Self {
        self.absolute_expiration = Some(at);
        self
    }

    #[must_use]
    pub fn with_absolute_expiration_relative_to_now(mut self, lifetime: Duration) -> Self {
        self.absolute_expiration_relative_to_now = Some(lifetime);
        self
    }

    #[must_use]
    pub fn with_sliding_expiration(mut self, window: Duration) -> Self {
        self.sliding_expiration = Some(window);
        self
    }

    /// Rejects durations shorter than a second, which would expire the entry
    /// on write, and sliding windows too long to store.
    pub fn validate(&self) -> CacheResult<()> {
        if self
            .absolute_expiration_relative_to_now
            .is_some_and(|lifetime| lifetime < MIN_DURATION)
        {
            return Err(CacheError::invalid_argument(
                "relative absolute expiration must be at least one second",
            ));
        }
        if let Some(window) = self.sliding_expiration {
            if window < MIN_DURATION {
                return Err(CacheError::invalid_argument(
                    "sliding expiration must be at least one second",
                ));
            }
            if window.as_secs() > MAX_SLIDING_SECONDS {
                return Err(CacheError::invalid_argument(format!(
                    "sliding expiration must not exceed {} seconds",
                    MAX_SLIDING_SECONDS
                )));
            }
        }
        Ok(())
    }
}

const MIN_DURATION: Duration = Duration::from_secs(1);

/// Values written by the update script for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryWrite {
    /// Absolute expiration in ticks, or [`NOT_PRESENT`].
    pub absolute_ticks: i64,
    /// Sliding window in ticks, or [`NOT_PRESENT`].
    pub sliding_ticks: i64,
    /// TTL in seconds, or [`NOT_PRESENT`] to clear any expiry.
    pub ttl_seconds: i64,
    /// Payload.
    pub data: Vec<u8>,
}

impl EntryWrite {
    /// Encodes one write. Instants outside years 0001 to 9999 and windows that
    /// do not fit in ticks are argument errors.
    pub fn new(
        absolute: Option<DateTime<Utc>>,
        sliding: Option<Duration>,
        ttl_seconds: Option<i64>,
        data: Vec<u8>,
    ) -> CacheResult<Self> {
        let absolute_ticks = match absolute {
            Some(at) => instant_to_ticks(at).ok_or_else(|| {
                CacheError::invalid_argument(format!("absolute expiration {} is out of range", at))
            })?,
            None => NOT_PRESENT,
        };
        let sliding_ticks = match sliding {
            Some(window) => duration_to_ticks(window)
                .ok_or_else(|| CacheError::invalid_argument("sliding expiration is out of range"))?,
            None => NOT_PRESENT,
        };

        Ok(Self {
            absolute_ticks,
            sliding_ticks,
            ttl_seconds: ttl_seconds.unwrap_or(NOT_PRESENT),
            data,
        })
    }

    /// TTL to apply, if any.
    pub const fn ttl(&self) -> Option<i64> {
        if self.ttl_seconds == NOT_PRESENT {
            None
        } else {
            Some(self.ttl_seconds)
        }
    }
}

/// Expiration metadata read back from the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    pub absolute_expiration: Option<DateTime<Utc>>,
    pub sliding_expiration: Option<Duration>,
}

impl EntryMetadata {
    /// Parses the two marker fields, in [`MARKER_FIELD_NAMES`] order.
    pub fn parse(absolute: Option<&[u8]>, sliding: Option<&[u8]>) -> StoreResult<Self> {
        let absolute = match parse_marker(ABSOLUTE_EXPIRATION, absolute)? {
            Some(ticks) => Some(ticks_to_instant(ticks).ok_or_else(|| {
                StoreError::unexpected_reply(format!(
                    "field '{}' holds an out-of-range instant: {}",
                    ABSOLUTE_EXPIRATION.name, ticks
                ))
            })?),
            None => None,
        };
        let sliding = match parse_marker(SLIDING_EXPIRATION, sliding)? {
            Some(ticks) => Some(ticks_to_duration(ticks).ok_or_else(|| {
                StoreError::unexpected_reply(format!(
                    "field '{}' holds a negative window: {}",
                    SLIDING_EXPIRATION.name, ticks
                ))
            })?),
            None => None,
        };

        Ok(Self {
            absolute_expiration: absolute,
            sliding_expiration: sliding,
        })
    }

    /// Parses a marker-only lookup reply.
    pub fn from_reply(reply: &[Option<Vec<u8>>]) -> StoreResult<Self> {
        match reply {
            [absolute, sliding] => Self::parse(absolute.as_deref(), sliding.as_deref()),
            other => Err(reply_length_error(MARKER_FIELD_NAMES.len(), other.len())),
        }
    }
}

/// A full entry read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub metadata: EntryMetadata,
    /// `None` when the entry does not exist.
    pub data: Option<Vec<u8>>,
}

impl StoredEntry {
    /// Parses a full lookup reply, in [`ENTRY_FIELD_NAMES`] order.
    pub fn from_reply(reply: Vec<Option<Vec<u8>>>) -> StoreResult<Self> {
        let [absolute, sliding, data]: [Option<Vec<u8>>; 3] = reply
            .try_into()
            .map_err(|other: Vec<_>| reply_length_error(ENTRY_FIELD_NAMES.len(), other.len()))?;

        Ok(Self {
            metadata: EntryMetadata::parse(absolute.as_deref(), sliding.as_deref())?,
            data,
        })
    }
}

fn parse_marker(field: EntryField, raw: Option<&[u8]>) -> StoreResult<Option<i64>> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    let value = std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.trim().parse::<i64>().ok())
        .ok_or_else(|| {
            StoreError::unexpected_reply(format!(
                "field '{}' is not an integer: {:?}",
                field.name,
                String::from_utf8_lossy(raw)
            ))
        })?;

    Ok((value != NOT_PRESENT).then_some(value))
}

fn reply_length_error(expected: usize, actual: usize) -> StoreError {
    StoreError::unexpected_reply(format!("expected {} fields, got {}", expected, actual))
}
