//! Small helpers shared by the pipeline stages.
//!
//! - Log-safe truncation of model output and response bodies
//! - JSON error classification for truncated model replies
//! - Date strings used when rendering prompts
//! - Word-level matching for region codes

use chrono::{Local, NaiveDate};

/// Truncate a string for logging purposes.
///
/// Long strings are cut at a char boundary at or below `max` bytes and get
/// an ellipsis plus the number of dropped bytes appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// When the model stops at its token budget the array is cut off and the
/// parse fails with an EOF error rather than a syntax error.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Today's date in the long form used inside prompts ("January 14, 2026").
pub fn today_long() -> String {
    long_date(Local::now().date_naive())
}

pub fn long_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

/// Today's date as `YYYY-MM-DD`.
pub fn today_iso() -> String {
    Local::now().date_naive().to_string()
}

/// Case-insensitive whole-word phrase match.
///
/// Both sides are split into alphanumeric words; the phrase matches when its
/// words appear consecutively in `haystack`. "kent" does not match
/// "Kentucky" and "DE" does not match "Design".
///
/// # Examples
///
/// ```ignore
/// assert!(contains_phrase("200 Main St, New Castle, DE", "new castle"));
/// assert!(!contains_phrase("Louisville, Kentucky", "kent"));
/// ```
pub fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    let wanted: Vec<String> = words(phrase).collect();
    if wanted.is_empty() {
        return false;
    }
    let found: Vec<String> = words(haystack).collect();
    found.windows(wanted.len()).any(|window| window == wanted.as_slice())
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}
