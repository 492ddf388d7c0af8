//! Identity keys for deduplication.
//!
//! A key is the SHA-256 of the normalized key parts joined positionally with
//! U+001F, so `("a b", "c")` and `("a", "b c")` never collide.

use sha2::{Digest, Sha256};

/// Separator between normalized parts.
const PART_SEPARATOR: &str = "\u{1f}";

/// Length of the stored key in hex characters.
const KEY_LEN: usize = 64;

/// Compute the identity key of an ordered list of parts.
///
/// Each part is lowercased, trimmed and has internal whitespace runs
/// collapsed, so case and spacing variants map to the same key.
pub fn identity(parts: &[&str]) -> String {
    let normalized: Vec<String> = parts.iter().map(|p| normalize_part(p)).collect();
    let mut hasher = Sha256::new();
    hasher.update(normalized.join(PART_SEPARATOR).as_bytes());
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(KEY_LEN);
    hex
}

/// Organizer key: `(name, website)`.
pub fn organizer_identity(name: &str, website: Option<&str>) -> String {
    identity(&[name, website.unwrap_or_default()])
}

/// Event key: `(name, date, venue_name)`.
pub fn event_identity(name: &str, date: Option<&str>, venue_name: Option<&str>) -> String {
    identity(&[
        name,
        date.unwrap_or_default(),
        venue_name.unwrap_or_default(),
    ])
}

fn normalize_part(part: &str) -> String {
    part.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
