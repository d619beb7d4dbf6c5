//! Text patterns used when validating model payloads.
//!
//! Free-text fields produced by the reasoning service are checked for URL
//! leakage and sentence structure before a payload is accepted.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Raw URL with scheme, or a bare `www.` host.
    pub static ref RAW_URL_PATTERN: Regex = Regex::new(
        r"(?i)\b(?:https?://|www\.)[^\s]+"
    ).unwrap();

    /// End of a sentence: terminal punctuation followed by whitespace or end of text.
    static ref SENTENCE_END_PATTERN: Regex = Regex::new(
        r"[.!?]+(?:\s|$)"
    ).unwrap();
}

/// Check if text contains a raw URL.
///
/// Bare domains ("shop.example.com") are allowed; schemes and `www.` prefixes are not.
pub fn contains_raw_url(text: &str) -> bool {
    RAW_URL_PATTERN.is_match(text)
}

/// Approximate the number of sentences in a text.
///
/// Trailing text without terminal punctuation counts as one more sentence.
pub fn sentence_count(text: &str) -> usize {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0;
    }

    let mut count = 0;
    let mut last_end = 0;
    for m in SENTENCE_END_PATTERN.find_iter(trimmed) {
        count += 1;
        last_end = m.end();
    }

    if !trimmed[last_end..].trim().is_empty() {
        count += 1;
    }

    count
}
