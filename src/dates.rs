//! Human-oriented date tokens.
//!
//! Every content-index row carries `created`/`modified` strings such as
//! `2024 Jan 05 Friday`, derived once from the epoch timestamps at write
//! time. Query-side dates are rendered as a prefix of the same shape
//! (`2024 Jan 05`, `2024 Jan`, `2024`) so they match as phrases.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, NaiveDate, TimeZone};

const TOKEN_FORMAT: &str = "%Y %b %d %A";
const DAY_FORMAT: &str = "%Y %b %d";
const MONTH_FORMAT: &str = "%Y %b";

/// Full formats tried, in order, when parsing a free-form date.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%Y %b %d",
    "%b %d %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%B %d, %Y",
    "%d %b %Y",
    "%d %B %Y",
];

/// Seconds since the Unix epoch, clamped to zero for pre-epoch clocks.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Convert a `SystemTime` into epoch seconds.
pub fn system_time_secs(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// Index-time token for an epoch timestamp in local time.
pub fn date_token(epoch_secs: i64) -> String {
    match Local.timestamp_opt(epoch_secs, 0).single() {
        Some(dt) => format_token(&dt),
        None => String::new(),
    }
}

pub fn format_token<Tz: TimeZone>(dt: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    dt.format(TOKEN_FORMAT).to_string()
}

/// Query-side token for a single calendar day.
pub fn day_token(date: NaiveDate) -> String {
    date.format(DAY_FORMAT).to_string()
}

/// Best-effort parse of a free-form date into a query-side token.
///
/// Recognizes full dates in common layouts and `month year` pairs.
/// Returns `None` when nothing matches.
pub fn parse_date_token(value: &str) -> Option<String> {
    let cleaned = value.trim().trim_end_matches('.');
    if cleaned.is_empty() {
        return None;
    }

    // "january 2024" / "jan 2024" / "2024 jan": pin to the first of the
    // month and render only year and month. Tried first so a trailing
    // year is never split into a day and a two-digit year.
    for format in ["%B %Y %d", "%b %Y %d", "%Y %B %d", "%Y %b %d"] {
        let padded = format!("{cleaned} 1");
        if let Ok(date) = NaiveDate::parse_from_str(&padded, format)
            && plausible(date)
        {
            return Some(date.format(MONTH_FORMAT).to_string());
        }
    }

    DATE_FORMATS
        .iter()
        .filter_map(|format| NaiveDate::parse_from_str(cleaned, format).ok())
        .find(|date| plausible(*date))
        .map(day_token)
}

/// Four-digit years only; shorter ones come from misread input.
fn plausible(date: NaiveDate) -> bool {
    use chrono::Datelike;
    (1000..=9999).contains(&date.year())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn token_has_year_month_day_weekday() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap();
        assert_eq!(format_token(&dt), "2024 Jan 05 Friday");
    }

    #[test]
    fn day_token_is_prefix_of_index_token() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let dt = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        assert!(format_token(&dt).starts_with(&day_token(date)));
    }

    #[test]
    fn local_token_is_nonempty() {
        assert!(!date_token(1_700_000_000).is_empty());
    }

    #[test]
    fn parses_iso_and_written_dates() {
        assert_eq!(
            parse_date_token("2024-03-09").as_deref(),
            Some("2024 Mar 09")
        );
        assert_eq!(
            parse_date_token("march 9, 2024").as_deref(),
            Some("2024 Mar 09")
        );
        assert_eq!(
            parse_date_token("9 Mar 2024").as_deref(),
            Some("2024 Mar 09")
        );
    }

    #[test]
    fn parses_month_and_year() {
        assert_eq!(
            parse_date_token("january 2024").as_deref(),
            Some("2024 Jan")
        );
        assert_eq!(parse_date_token("2024 feb").as_deref(), Some("2024 Feb"));
        assert_eq!(parse_date_token("jan 2024").as_deref(), Some("2024 Jan"));
        assert_eq!(
            parse_date_token("March 2025").as_deref(),
            Some("2025 Mar")
        );
        assert_eq!(parse_date_token("Dec 2023").as_deref(), Some("2023 Dec"));
    }

    #[test]
    fn short_years_are_rejected() {
        assert_eq!(parse_date_token("march 9 24"), None);
    }

    #[test]
    fn unparseable_returns_none() {
        assert_eq!(parse_date_token("last sprint"), None);
        assert_eq!(parse_date_token(""), None);
    }

    #[test]
    fn system_time_roundtrip() {
        let t = UNIX_EPOCH + std::time::Duration::from_secs(42);
        assert_eq!(system_time_secs(t), 42);
    }
}
