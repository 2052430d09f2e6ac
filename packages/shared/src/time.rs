//! Time-related utilities with clock abstraction for testability.
//!
//! The chat backend stamps messages with a local date-time without an offset
//! (JST). Depending on how it is serialized the value arrives as an ISO-8601
//! string, as a compact `yyyyMMddHHmmss` string, or as an array of numbers.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Utc};

/// Offset of Japan Standard Time from UTC.
const JST_OFFSET_HOURS: i64 = 9;

/// Clock trait for dependency injection and testing
pub trait Clock: Send + Sync {
    /// Current local date-time in JST
    fn now_jst(&self) -> NaiveDateTime;
}

/// System clock implementation (uses actual system time)
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_jst(&self) -> NaiveDateTime {
        jst_now()
    }
}

/// Fixed clock implementation for testing (returns a fixed time)
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    fixed_time: NaiveDateTime,
}

impl FixedClock {
    /// Create a new fixed clock with the given date-time
    pub fn new(fixed_time: NaiveDateTime) -> Self {
        Self { fixed_time }
    }
}

impl Clock for FixedClock {
    fn now_jst(&self) -> NaiveDateTime {
        self.fixed_time
    }
}

/// Current local date-time in JST
pub fn jst_now() -> NaiveDateTime {
    Utc::now().naive_utc() + TimeDelta::hours(JST_OFFSET_HOURS)
}

/// Parse a server timestamp given as a string.
///
/// Accepts ISO-8601 local date-times (`2024-05-01T12:34:56`, optionally with
/// a fractional part) and the compact `20240501123456` form.
pub fn parse_server_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(dt) = value.parse::<NaiveDateTime>() {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(dt);
    }
    if value.len() >= 14 && value.chars().all(|c| c.is_ascii_digit()) {
        return NaiveDateTime::parse_from_str(&value[..14], "%Y%m%d%H%M%S").ok();
    }
    None
}

/// Build a date-time from `[year, month, day, hour, minute, second, nanos]`.
///
/// Trailing components may be omitted; hour/minute/second/nanos default to 0.
pub fn datetime_from_parts(parts: &[i64]) -> Option<NaiveDateTime> {
    let component = |index: usize| parts.get(index).copied().unwrap_or(0);
    if parts.len() < 3 {
        return None;
    }
    let year = i32::try_from(component(0)).ok()?;
    let month = u32::try_from(component(1)).ok()?;
    let day = u32::try_from(component(2)).ok()?;
    let hour = u32::try_from(component(3)).ok()?;
    let minute = u32::try_from(component(4)).ok()?;
    let second = u32::try_from(component(5)).ok()?;
    let nanos = u32::try_from(component(6)).ok()?;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_nano_opt(hour, minute, second, nanos)
}

/// Format a date-time as `HH:MM` for chat display
pub fn format_clock_time(dt: &NaiveDateTime) -> String {
    dt.format("%H:%M").to_string()
}
