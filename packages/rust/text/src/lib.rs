//! Text normalization for extracted records and fetched pages.
//!
//! - whitespace cleanup and length trimming ([`clean_text`], [`trim_len`])
//! - fuzzy date parsing ([`normalize_date`])
//! - visible-text extraction from HTML ([`html_to_text`], [`page_title`])

mod date;
mod html;

use std::sync::LazyLock;

use regex::Regex;

use eventharvest_shared::{ExtractedRecord, Field};

pub use date::{normalize_date, normalize_date_str};
pub use html::{html_to_text, page_title};

/// Collapse every whitespace run to a single space and trim.
/// Returns `None` when nothing is left.
pub fn clean_text(s: &str) -> Option<String> {
    static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

    let cleaned = WS_RE.replace_all(s, " ");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Truncate to at most `max` characters on a char boundary.
pub fn trim_len(s: &str, max: usize) -> String {
    truncate_chars(s, max).to_string()
}

/// Borrowing variant of [`trim_len`], used for prompt snippets.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Clean every field of a record in place: collapse whitespace, render the
/// event date as `YYYY-MM-DD` (dropping it if unparseable), and trim each
/// value to its column length.
pub fn normalize_record(record: &mut ExtractedRecord) {
    record.map_values(|field, value| {
        let cleaned = clean_text(value)?;
        let cleaned = if field == Field::EventDate {
            normalize_date_str(&cleaned)?
        } else {
            cleaned
        };
        Some(match field.max_len() {
            Some(max) => trim_len(&cleaned, max),
            None => cleaned,
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_collapses_whitespace() {
        assert_eq!(
            clean_text("  Spring\n\n  Gala\t2025 "),
            Some("Spring Gala 2025".into())
        );
        assert_eq!(clean_text(" \n\t "), None);
        assert_eq!(clean_text(""), None);
    }

    #[test]
    fn trim_len_respects_char_boundaries() {
        assert_eq!(trim_len("abcdef", 3), "abc");
        assert_eq!(trim_len("abc", 10), "abc");
        assert_eq!(trim_len("café au lait", 4), "café");
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
        assert_eq!(truncate_chars("", 5), "");
    }

    #[test]
    fn normalize_record_cleans_and_trims() {
        let mut record = ExtractedRecord::new();
        record.set(Field::EventName, "  Annual \n Gala ");
        record.set(Field::EventDate, "Saturday, March 8th, 2025");
        record.set(Field::VenueZip, "60601-1234-5678-9999-0000");
        record.set(Field::DressCode, "   ");
        record.set(Field::Description, "x".repeat(600));

        normalize_record(&mut record);

        assert_eq!(record.get(Field::EventName), Some("Annual Gala"));
        assert_eq!(record.get(Field::EventDate), Some("2025-03-08"));
        assert_eq!(record.get(Field::VenueZip).map(str::len), Some(20));
        assert_eq!(record.get(Field::DressCode), None);
        assert_eq!(record.get(Field::Description).map(str::len), Some(600));
    }

    #[test]
    fn normalize_record_drops_unparseable_date() {
        let mut record = ExtractedRecord::new();
        record.set(Field::EventDate, "to be announced");
        normalize_record(&mut record);
        assert_eq!(record.get(Field::EventDate), None);
    }
}
