//! Interval arithmetic and calendar-day windows.
//!
//! Everything here is pure. Instants are Unix milliseconds; the business
//! time zone is a fixed UTC offset supplied by the caller.

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, Utc};
use serde::Serializer;

use crate::model::{Ms, Span};

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

pub fn add_minutes(ts: Ms, minutes: i64) -> Ms {
    ts.saturating_add(minutes.saturating_mul(MINUTE_MS))
}

/// Half-open overlap test: touching intervals do not overlap.
pub fn overlaps(start_a: Ms, end_a: Ms, start_b: Ms, end_b: Ms) -> bool {
    start_a < end_b && end_a > start_b
}

/// Local calendar-day bounds, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub day_start: Ms,
    /// 23:59:59.999 local time.
    pub day_end: Ms,
}

impl DayRange {
    pub fn as_span(&self) -> Span {
        Span::new(self.day_start, self.day_end.saturating_add(1))
    }
}

pub fn day_range(ts: Ms, offset: FixedOffset) -> DayRange {
    let offset_ms = Ms::from(offset.local_minus_utc()) * 1000;
    // Saturates at the ends of the i64 range instead of wrapping.
    let local = ts.saturating_add(offset_ms);
    let day_start = local.div_euclid(DAY_MS).saturating_mul(DAY_MS).saturating_sub(offset_ms);
    DayRange {
        day_start,
        day_end: day_start.saturating_add(DAY_MS - 1),
    }
}

/// `2026-03-01T10:00:00.000Z`, the same shape a browser's `toISOString` gives.
pub fn format_iso(ts: Ms) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ts) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => ts.to_string(),
    }
}

pub fn serialize_iso<S: Serializer>(ts: &Ms, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_iso(*ts))
}

/// Accepts integer milliseconds, RFC 3339 with an offset, or a naive
/// `YYYY-MM-DDTHH:MM[:SS]` read in the business time zone.
pub fn parse_timestamp(s: &str, offset: FixedOffset) -> Option<Ms> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<Ms>() {
        return Some(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .and_then(|naive| naive.and_local_timezone(offset).single())
        .map(|dt| dt.timestamp_millis())
}
