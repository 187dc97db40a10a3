//! crates/compliance_core/src/dates.rs
//!
//! Civil-date arithmetic and display helpers. Every function here is pure and
//! total: malformed input yields `None` or a placeholder, never a panic.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::fmt::Write;

/// Display pattern used when none is configured (`31.12.2025`).
pub const DEFAULT_DATE_FORMAT: &str = "%d.%m.%Y";

/// Shown in place of a date that is missing or cannot be read.
pub const PLACEHOLDER: &str = "-";

/// Whole days from `today` to `date`, both taken as local civil dates.
///
/// Working on civil dates rather than instants keeps day boundaries in the
/// viewer's timezone, so a DST shift or a UTC offset cannot move the result by one.
/// Negative means the date is already past.
pub fn days_until(date: NaiveDate, today: NaiveDate) -> i64 {
    (date - today).num_days()
}

/// Reads a civil date from `YYYY-MM-DD`, or takes the written date part of an
/// ISO-8601 / RFC 3339 timestamp.
pub fn parse_civil_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.date_naive());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.date())
}

/// [`days_until`] for raw input; `None` when the input is not a date.
pub fn days_until_str(raw: &str, today: NaiveDate) -> Option<i64> {
    parse_civil_date(raw).map(|date| days_until(date, today))
}

/// True when `pattern` is a usable strftime pattern.
pub fn is_valid_pattern(pattern: &str) -> bool {
    let mut out = String::new();
    write!(out, "{}", NaiveDate::MIN.format(pattern)).is_ok()
}

/// Formats a stored date for display; [`PLACEHOLDER`] for null or unreadable input.
pub fn format_local(raw: Option<&str>, pattern: &str) -> String {
    raw.and_then(parse_civil_date)
        .map(|date| format_date(date, pattern))
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

/// Formats a civil date; [`PLACEHOLDER`] if the pattern is unusable.
pub fn format_date(date: NaiveDate, pattern: &str) -> String {
    let mut out = String::new();
    match write!(out, "{}", date.format(pattern)) {
        Ok(()) => out,
        Err(_) => PLACEHOLDER.to_string(),
    }
}

/// Formats an instant as a civil date in the host's local timezone.
pub fn format_local_timestamp(ts: Option<DateTime<Utc>>, pattern: &str) -> String {
    ts.map(|ts| format_date(ts.with_timezone(&Local).date_naive(), pattern))
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

/// `1234.5` + `nok` -> `1234.50 NOK`.
pub fn format_amount(amount: Decimal, currency: &str) -> String {
    format!("{:.2} {}", amount.round_dp(2), currency.trim().to_uppercase())
}
