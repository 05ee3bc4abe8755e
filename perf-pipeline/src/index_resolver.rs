//! Date-sharded index resolution.
//!
//! Metric documents are written to one index per day (or month, or year),
//! named `<prefix><date>`. A query only has to hit the shards its time range
//! touches; this module computes that list.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDate, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Starts before this local hour also search the previous day's shard.
const ROLLOVER_HOUR: u32 = 8;

/// How the index family is partitioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Granularity {
    Day,
    Month,
    Year,
    /// Anything unrecognised; resolves to a single wildcard shard.
    Other(String),
}

impl Granularity {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" => Granularity::Day,
            "month" | "monthly" => Granularity::Month,
            "year" | "years" | "yearly" => Granularity::Year,
            _ => Granularity::Other(name.to_string()),
        }
    }
}

impl From<String> for Granularity {
    fn from(s: String) -> Self {
        Granularity::parse(&s)
    }
}

impl From<Granularity> for String {
    fn from(g: Granularity) -> Self {
        g.to_string()
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Day => f.write_str("day"),
            Granularity::Month => f.write_str("month"),
            Granularity::Year => f.write_str("year"),
            Granularity::Other(s) => f.write_str(s),
        }
    }
}

/// Shard resolver bound to the time zone the indices are named in.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexResolver {
    /// `None` uses the host's local zone.
    offset: Option<FixedOffset>,
}

impl IndexResolver {
    pub fn local() -> Self {
        Self { offset: None }
    }

    pub fn fixed(offset: FixedOffset) -> Self {
        Self {
            offset: Some(offset),
        }
    }

    /// Build from a configured offset in seconds east of UTC. Out-of-range
    /// offsets fall back to the local zone.
    pub fn from_offset_secs(secs: Option<i32>) -> Self {
        match secs.and_then(FixedOffset::east_opt) {
            Some(offset) => Self::fixed(offset),
            None => Self::local(),
        }
    }

    pub fn resolve(
        &self,
        start_ms: i64,
        end_ms: i64,
        prefix: &str,
        granularity: &Granularity,
    ) -> Vec<String> {
        match self.offset {
            Some(offset) => resolve_in(&offset, start_ms, end_ms, prefix, granularity),
            None => resolve_in(&Local, start_ms, end_ms, prefix, granularity),
        }
    }
}

/// Compute the ascending, duplicate-free shard list covering
/// `[start_ms, end_ms]` as seen from `tz`. Never empty: when nothing can be
/// computed the prefix wildcard is returned.
pub fn resolve_in<Tz: TimeZone>(
    tz: &Tz,
    start_ms: i64,
    end_ms: i64,
    prefix: &str,
    granularity: &Granularity,
) -> Vec<String> {
    let shards = match granularity {
        Granularity::Day => day_shards(tz, start_ms, end_ms, prefix),
        Granularity::Month => month_shards(tz, start_ms, end_ms, prefix),
        Granularity::Year => year_shards(tz, start_ms, end_ms, prefix),
        Granularity::Other(_) => Vec::new(),
    };

    if shards.is_empty() {
        vec![wildcard(prefix)]
    } else {
        shards
    }
}

pub fn wildcard(prefix: &str) -> String {
    format!("{prefix}*")
}

/// Path segment for a search over `shards`, relative to the engine base.
pub fn search_path(shards: &[String]) -> String {
    format!("{}/_search/", shards.join(","))
}

fn at<Tz: TimeZone>(tz: &Tz, ms: i64) -> Option<DateTime<Tz>> {
    tz.timestamp_millis_opt(ms).single()
}

fn day_shards<Tz: TimeZone>(tz: &Tz, start_ms: i64, end_ms: i64, prefix: &str) -> Vec<String> {
    let (Some(start), Some(end)) = (at(tz, start_ms), at(tz, end_ms)) else {
        return Vec::new();
    };

    let first = if start.hour() < ROLLOVER_HOUR {
        match at(tz, start_ms - MILLIS_PER_DAY) {
            Some(shifted) => shifted.date_naive(),
            None => return Vec::new(),
        }
    } else {
        start.date_naive()
    };
    let last = end.date_naive();

    let mut shards = Vec::new();
    let mut day = first;
    while day <= last {
        shards.push(format!("{prefix}{}", day.format("%Y.%m.%d")));
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    shards
}

fn month_shards<Tz: TimeZone>(tz: &Tz, start_ms: i64, end_ms: i64, prefix: &str) -> Vec<String> {
    let (Some(start), Some(end)) = (at(tz, start_ms), at(tz, end_ms)) else {
        return Vec::new();
    };

    let mut months = BTreeSet::new();
    let mut cursor = NaiveDate::from_ymd_opt(start.year(), start.month(), 1);
    let last = (end.year(), end.month());
    while let Some(month) = cursor {
        if (month.year(), month.month()) > last {
            break;
        }
        months.insert(format!("{prefix}{}", month.format("%Y.%m")));
        cursor = month.checked_add_months(chrono::Months::new(1));
    }
    months.into_iter().collect()
}

fn year_shards<Tz: TimeZone>(tz: &Tz, start_ms: i64, end_ms: i64, prefix: &str) -> Vec<String> {
    let (Some(start), Some(end)) = (at(tz, start_ms), at(tz, end_ms)) else {
        return Vec::new();
    };
    (start.year()..=end.year())
        .map(|year| format!("{prefix}{year}.*"))
        .collect()
}
