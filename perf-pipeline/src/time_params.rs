//! Inbound time parameters and the validated [`TimeRange`].

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Latest accepted instant, 9999-12-31T23:59:59Z. Every accepted value
/// lies in `0..=MAX_EPOCH_SECS`, so spans and millisecond conversions of a
/// [`TimeRange`] cannot overflow.
pub const MAX_EPOCH_SECS: i64 = 253_402_300_799;

/// A time value as it arrives from the caller: a JSON number or a numeric
/// string, in seconds or (13 digits) milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TimestampParam {
    Number(i64),
    Text(String),
}

impl From<i64> for TimestampParam {
    fn from(v: i64) -> Self {
        TimestampParam::Number(v)
    }
}

impl From<&str> for TimestampParam {
    fn from(v: &str) -> Self {
        TimestampParam::Text(v.to_string())
    }
}

/// Cut a 13-digit millisecond string down to its leading 10 digits
/// (seconds). Other strings are returned trimmed; blank input gives `None`.
pub fn normalize_timestamp_str(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" || trimmed == "undefined" {
        return None;
    }
    if trimmed.len() == 13 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Some(trimmed[..10].to_string());
    }
    Some(trimmed.to_string())
}

impl TimestampParam {
    /// Resolve to epoch seconds within `0..=MAX_EPOCH_SECS`.
    pub fn to_epoch_secs(&self, field: &'static str) -> Result<i64, ValidationError> {
        let secs = self.raw_secs(field)?;
        check_bounds(field, secs)
    }

    fn raw_secs(&self, field: &'static str) -> Result<i64, ValidationError> {
        match self {
            // 13-digit numbers are milliseconds, same as their string form.
            TimestampParam::Number(n) if (1_000_000_000_000..10_000_000_000_000).contains(n) => {
                Ok(n / 1000)
            }
            TimestampParam::Number(n) => Ok(*n),
            TimestampParam::Text(s) => {
                let normalized =
                    normalize_timestamp_str(s).ok_or(ValidationError::MissingTimestamp { field })?;
                normalized
                    .parse::<i64>()
                    .map_err(|_| ValidationError::MalformedTimestamp {
                        field,
                        value: s.clone(),
                    })
            }
        }
    }
}

fn check_bounds(field: &'static str, secs: i64) -> Result<i64, ValidationError> {
    if (0..=MAX_EPOCH_SECS).contains(&secs) {
        Ok(secs)
    } else {
        Err(ValidationError::TimestampOutOfRange { field, value: secs })
    }
}

/// Resolve an optional parameter, reporting which field was missing.
pub fn require_secs(
    param: Option<&TimestampParam>,
    field: &'static str,
) -> Result<i64, ValidationError> {
    param
        .ok_or(ValidationError::MissingTimestamp { field })?
        .to_epoch_secs(field)
}

// ------------------------------------------------------------------ //
//  TimeRange                                                          //
// ------------------------------------------------------------------ //

/// A validated `[start, end]` window in epoch seconds, with
/// `0 <= start < end <= now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeRange {
    start: i64,
    end: i64,
}

impl TimeRange {
    /// Check `start < end`, `end <= now` and that both lie in the
    /// supported epoch window.
    pub fn new(start: i64, end: i64, now: i64) -> Result<Self, ValidationError> {
        check_bounds("start_time", start)?;
        check_bounds("end_time", end)?;
        if start >= end {
            return Err(ValidationError::StartNotBeforeEnd { start, end });
        }
        if end > now {
            return Err(ValidationError::EndInFuture { end, now });
        }
        Ok(Self { start, end })
    }

    /// As [`TimeRange::new`], additionally capping the span at `max_days`.
    pub fn with_max_span(
        start: i64,
        end: i64,
        now: i64,
        max_days: i64,
    ) -> Result<Self, ValidationError> {
        let range = Self::new(start, end, now)?;
        if range.span_secs() > max_days.saturating_mul(SECONDS_PER_DAY) {
            return Err(ValidationError::SpanTooLong {
                span_secs: range.span_secs(),
                max_days,
            });
        }
        Ok(range)
    }

    /// The `secs` seconds ending at `end`.
    pub fn trailing(end: i64, secs: i64, now: i64) -> Result<Self, ValidationError> {
        let start = end
            .checked_sub(secs)
            .ok_or(ValidationError::TimestampOutOfRange {
                field: "start_time",
                value: end,
            })?;
        Self::new(start, end, now)
    }

    /// `[center - half, center + half]`, with the end clamped to `now`.
    pub fn around(center: i64, half: i64, now: i64) -> Result<Self, ValidationError> {
        let out_of_range = ValidationError::TimestampOutOfRange {
            field: "range",
            value: half,
        };
        let start = center.checked_sub(half).ok_or(out_of_range.clone())?;
        let end = center.checked_add(half).ok_or(out_of_range)?;
        Self::new(start, end.min(now), now)
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn span_secs(&self) -> i64 {
        self.end - self.start
    }

    pub fn start_millis(&self) -> i64 {
        self.start * 1000
    }

    pub fn end_millis(&self) -> i64 {
        self.end * 1000
    }
}

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
