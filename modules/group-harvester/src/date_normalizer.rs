//! Turns the dates a feed displays ("2 hrs ago", "Yesterday at 9:14 PM",
//! "Monday, March 3, 2025 at 10:15 AM") into absolute UTC timestamps.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

static RELATIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+)\s*([a-z]+)\s+ago\b").expect("valid regex"));

static WEEKDAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(mon|tues|wednes|thurs|fri|satur|sun)day,?\s+").expect("valid regex")
});

static AT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+at\s+").expect("valid regex"));

const DATETIME_FORMATS: &[&str] = &[
    "%B %d, %Y %I:%M %p",
    "%B %d, %Y %H:%M",
    "%d %B %Y %I:%M %p",
    "%d %B %Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%B %d, %Y", "%d %B %Y", "%Y-%m-%d", "%m/%d/%Y"];

/// Normalize a displayed date relative to `now`. Returns `None` when nothing
/// usable can be read; never panics.
pub fn normalize(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(ts) = relative(raw, now) {
        return Some(ts);
    }

    if raw.to_lowercase().contains("yesterday") {
        return now.checked_sub_signed(Duration::days(1));
    }

    absolute(raw)
}

fn relative(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let caps = RELATIVE_RE.captures(raw)?;
    let amount: i64 = caps[1].parse().ok()?;
    let unit = unit_seconds(&caps[2])?;
    let offset = Duration::try_seconds(amount.checked_mul(unit)?)?;
    now.checked_sub_signed(offset)
}

fn unit_seconds(unit: &str) -> Option<i64> {
    let unit = unit.to_ascii_lowercase();
    if unit.starts_with("min") {
        Some(60)
    } else if unit.starts_with("hr") || unit.starts_with("hour") {
        Some(3_600)
    } else if unit.starts_with("day") {
        Some(86_400)
    } else {
        None
    }
}

fn absolute(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    let cleaned = WEEKDAY_RE.replace(raw, "");
    let cleaned = AT_RE.replace_all(&cleaned, " ");
    let cleaned = cleaned.trim();

    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(cleaned, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(cleaned, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}
