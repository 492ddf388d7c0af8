use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

/// Exact formats tried before scanning free text.
const EXACT_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%A, %B %d, %Y",
];

/// Parse a date out of free-form text.
///
/// Accepts ISO and US numeric dates, spelled-out or abbreviated month names
/// in either order, ordinal suffixes, and surrounding words such as a
/// weekday or a time ("Join us Saturday, March 8th, 2025 at 6pm").
pub fn normalize_date(s: &str) -> Option<NaiveDate> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }

    for fmt in EXACT_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date);
        }
    }

    scan_iso(trimmed)
        .or_else(|| scan_month_first(trimmed))
        .or_else(|| scan_day_first(trimmed))
        .or_else(|| scan_numeric(trimmed))
}

/// [`normalize_date`] rendered as `YYYY-MM-DD`.
pub fn normalize_date_str(s: &str) -> Option<String> {
    normalize_date(s).map(|d| d.format("%Y-%m-%d").to_string())
}

fn scan_iso(s: &str) -> Option<NaiveDate> {
    static ISO_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})(?:\b|T)").expect("valid regex")
    });

    ISO_RE.captures_iter(s).find_map(|caps| {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    })
}

fn scan_month_first(s: &str) -> Option<NaiveDate> {
    static MONTH_FIRST_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b([a-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b")
            .expect("valid regex")
    });

    MONTH_FIRST_RE.captures_iter(s).find_map(|caps| {
        let month = month_token_to_number(&caps[1].to_ascii_lowercase())?;
        let day = caps[2].parse().ok()?;
        let year = caps[3].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    })
}

fn scan_day_first(s: &str) -> Option<NaiveDate> {
    static DAY_FIRST_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+(?:of\s+)?([a-z]{3,9})\.?,?\s+(\d{4})\b")
            .expect("valid regex")
    });

    DAY_FIRST_RE.captures_iter(s).find_map(|caps| {
        let day = caps[1].parse().ok()?;
        let month = month_token_to_number(&caps[2].to_ascii_lowercase())?;
        let year = caps[3].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    })
}

/// US-style `M/D/YYYY` or `M/D/YY` anywhere in the text.
fn scan_numeric(s: &str) -> Option<NaiveDate> {
    static NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4}|\d{2})\b").expect("valid regex")
    });

    NUMERIC_RE.captures_iter(s).find_map(|caps| {
        let month = caps[1].parse().ok()?;
        let day = caps[2].parse().ok()?;
        let mut year: i32 = caps[3].parse().ok()?;
        if year < 100 {
            year += 2000;
        }
        NaiveDate::from_ymd_opt(year, month, day)
    })
}

/// Convert a lowercase month token to a month number (1-12).
fn month_token_to_number(token: &str) -> Option<u32> {
    match token {
        "jan" | "january" => Some(1),
        "feb" | "february" => Some(2),
        "mar" | "march" => Some(3),
        "apr" | "april" => Some(4),
        "may" => Some(5),
        "jun" | "june" => Some(6),
        "jul" | "july" => Some(7),
        "aug" | "august" => Some(8),
        "sep" | "sept" | "september" => Some(9),
        "oct" | "october" => Some(10),
        "nov" | "november" => Some(11),
        "dec" | "december" => Some(12),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn parses_exact_formats() {
        assert_eq!(normalize_date("2025-03-08"), ymd(2025, 3, 8));
        assert_eq!(normalize_date("03/08/2025"), ymd(2025, 3, 8));
        assert_eq!(normalize_date("March 8, 2025"), ymd(2025, 3, 8));
        assert_eq!(normalize_date("Mar 8, 2025"), ymd(2025, 3, 8));
        assert_eq!(normalize_date("8 March 2025"), ymd(2025, 3, 8));
    }

    #[test]
    fn parses_dates_inside_text() {
        assert_eq!(
            normalize_date("Join us on Saturday, March 8th, 2025 at 6pm"),
            ymd(2025, 3, 8)
        );
        assert_eq!(normalize_date("Sept. 21st 2024, doors at 7"), ymd(2024, 9, 21));
        assert_eq!(normalize_date("the 3rd of October, 2026"), ymd(2026, 10, 3));
        assert_eq!(normalize_date("Starts 2025-11-02T18:00:00"), ymd(2025, 11, 2));
        assert_eq!(normalize_date("Date: 6/14/25"), ymd(2025, 6, 14));
    }

    #[test]
    fn skips_words_that_are_not_months() {
        assert_eq!(
            normalize_date("Marching band 12 2025 then May 3, 2025"),
            ymd(2025, 5, 3)
        );
    }

    #[test]
    fn rejects_invalid_or_missing_dates() {
        assert_eq!(normalize_date(""), None);
        assert_eq!(normalize_date("TBD"), None);
        assert_eq!(normalize_date("February 30, 2025"), None);
        assert_eq!(normalize_date("13/45/2025"), None);
    }

    #[test]
    fn renders_iso_string() {
        assert_eq!(
            normalize_date_str("December 31, 2025"),
            Some("2025-12-31".to_string())
        );
        assert_eq!(normalize_date_str("soon"), None);
    }
}
