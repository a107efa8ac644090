//! Turn free-text model replies into JSON records.
//!
//! Models asked for "JSON only" still wrap the array in code fences, put a
//! sentence in front of it, or leave a trailing comma before a closing
//! bracket. [`parse_records`] undoes those three things, in that order, and
//! then parses. It never retries and never invents records: a reply that
//! still does not parse is a [`PipelineError::MalformedOutput`].

use crate::error::{PipelineError, Result};
use crate::models::Record;
use crate::utils::{looks_truncated, truncate_for_log};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument, warn};

/// How much of the offending text a `MalformedOutput` error carries.
pub const PREVIEW_CHARS: usize = 500;

/// Reason prefix for replies cut off mid-JSON (usually the token budget).
pub const TRUNCATED_REASON: &str = "truncated JSON";

/// Opening fence, optional language tag, then everything up to the closing
/// fence (or end of text when the reply was cut off).
static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[ \t]*\r?\n?(.*?)(?:```|\z)")
        .expect("code fence pattern is valid")
});

/// Parse a model reply into records.
///
/// An array yields one record per object element; non-object elements are
/// dropped with a warning. A lone object yields a single record.
#[instrument(level = "debug", skip_all, fields(bytes = raw.len()))]
pub fn parse_records(raw: &str) -> Result<Vec<Record>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::MalformedOutput {
            reason: "empty response".to_string(),
            preview: String::new(),
        });
    }

    let unfenced = strip_code_fence(trimmed).unwrap_or(trimmed);
    let candidate = extract_json_region(unfenced).unwrap_or(unfenced);
    let repaired = remove_trailing_commas(candidate);

    let value: Value = serde_json::from_str(&repaired).map_err(|e| {
        let reason = if looks_truncated(&e) {
            format!("{TRUNCATED_REASON}: {e}")
        } else {
            e.to_string()
        };
        PipelineError::MalformedOutput {
            reason,
            preview: truncate_for_log(&repaired, PREVIEW_CHARS),
        }
    })?;

    match value {
        Value::Array(items) => {
            let total = items.len();
            let records: Vec<Record> = items
                .into_iter()
                .enumerate()
                .filter_map(|(i, item)| match item {
                    Value::Object(map) => Some(Record::new(map)),
                    other => {
                        warn!(index = i, value = %truncate_for_log(&other.to_string(), 120), "Dropping non-object array element");
                        None
                    }
                })
                .collect();
            debug!(total, kept = records.len(), "Parsed model output");
            Ok(records)
        }
        Value::Object(map) => {
            debug!("Model returned a single object; treating as one record");
            Ok(vec![Record::new(map)])
        }
        other => Err(PipelineError::MalformedOutput {
            reason: "expected a JSON array or object".to_string(),
            preview: truncate_for_log(&other.to_string(), PREVIEW_CHARS),
        }),
    }
}

/// Whether `err` is a parse failure caused by a cut-off reply.
pub fn is_truncated(err: &PipelineError) -> bool {
    matches!(err, PipelineError::MalformedOutput { reason, .. } if reason.starts_with(TRUNCATED_REASON))
}

/// Inner text of the first fenced code block, without the language tag.
pub fn strip_code_fence(text: &str) -> Option<&str> {
    let caps = CODE_FENCE.captures(text)?;
    caps.get(2).map(|m| m.as_str().trim())
}

/// Locate the JSON payload inside surrounding prose.
///
/// The text is cut into top-level bracketed regions (`[...]` or `{...}`,
/// brackets inside JSON strings ignored). Among the regions that parse, the
/// first array holding objects (or nothing) wins, then the longest array of
/// anything, then the first object. Citation markers such as `[1]` are
/// regions too and lose to a real result array.
///
/// Returns `None` when the whole text is already one region, or has no
/// brackets at all. An opener that never closes yields the rest of the text
/// so the parse error reports truncation.
pub fn extract_json_region(text: &str) -> Option<&str> {
    let mut regions: Vec<&str> = Vec::new();
    let mut unterminated = None;
    let mut pos = 0;
    while let Some(offset) = text[pos..].find(['[', '{']) {
        let start = pos + offset;
        match balanced_end(text, start) {
            Some(end) => {
                if start == 0 && end == text.len() {
                    return None;
                }
                regions.push(&text[start..end]);
                pos = end;
            }
            None => {
                unterminated = Some(start);
                break;
            }
        }
    }

    let parsed: Vec<(&str, Value)> = regions
        .iter()
        .filter_map(|region| Some((*region, parse_region(region)?)))
        .collect();

    let records_array = parsed.iter().find(|(_, value)| {
        matches!(value, Value::Array(items) if items.is_empty() || items.iter().any(Value::is_object))
    });
    if let Some((region, _)) = records_array {
        return Some(*region);
    }
    if let Some(start) = unterminated {
        return Some(&text[start..]);
    }

    let longest_array = parsed
        .iter()
        .filter(|(_, value)| value.is_array())
        .max_by_key(|(region, _)| region.len());
    let first_object = parsed.iter().find(|(_, value)| value.is_object());
    longest_array
        .or(first_object)
        .map(|(region, _)| *region)
        .or_else(|| regions.first().copied())
}

fn parse_region(region: &str) -> Option<Value> {
    serde_json::from_str(&remove_trailing_commas(region)).ok()
}

/// Byte offset one past the bracket closing the one opened at `start`.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Drop every comma that is followed, ignoring whitespace, by `}` or `]`.
/// Commas inside string literals are left alone.
pub fn remove_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(c);
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = text[i + 1..].trim_start().chars().next();
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(records: &[Record]) -> Vec<Value> {
        records
            .iter()
            .map(|r| serde_json::to_value(r).unwrap())
            .collect()
    }

    #[test]
    fn test_plain_array_matches_direct_parse() {
        let text = r#"[{"name": "Acme Design", "city": "Dover"}, {"name": "Blue Hen Architects", "city": "Newark", "nested": [1, [2]]}]"#;
        let direct: Vec<Value> = serde_json::from_str(text).unwrap();
        assert_eq!(values(&parse_records(text).unwrap()), direct);
    }

    #[test]
    fn test_fenced_with_language_tag() {
        let plain = r#"[{"name": "Acme Design", "city": "Dover"}]"#;
        let fenced = format!("```json\n{plain}\n```");
        assert_eq!(
            values(&parse_records(&fenced).unwrap()),
            values(&parse_records(plain).unwrap())
        );
    }

    #[test]
    fn test_fenced_without_language_tag() {
        let fenced = "```\n[{\"name\": \"Acme\"}]\n```";
        assert_eq!(values(&parse_records(fenced).unwrap()), vec![json!({"name": "Acme"})]);
    }

    #[test]
    fn test_scenario_preamble_fence_and_trailing_comma() {
        let text = "Here you go:\n```json\n[{\"name\": \"Acme Design\", \"website\": \"https://acme.example\", \"city\": \"Dover\"},]\n```";
        let records = parse_records(text).unwrap();
        assert_eq!(
            values(&records),
            vec![json!({"name": "Acme Design", "website": "https://acme.example", "city": "Dover"})]
        );
    }

    #[test]
    fn test_trailing_commas_parse_like_clean_json() {
        let dirty = r#"[{"name": "Acme", "tags": ["LVT", "Carpet",],}, {"name": "Bayhealth",},]"#;
        let clean = r#"[{"name": "Acme", "tags": ["LVT", "Carpet"]}, {"name": "Bayhealth"}]"#;
        let expected: Vec<Value> = serde_json::from_str(clean).unwrap();
        assert_eq!(values(&parse_records(dirty).unwrap()), expected);
    }

    #[test]
    fn test_trailing_comma_inside_string_is_kept() {
        let text = r#"[{"description": "phases: design, ]permits"}]"#;
        let records = parse_records(text).unwrap();
        assert_eq!(
            records[0].text("description").as_deref(),
            Some("phases: design, ]permits")
        );
    }

    #[test]
    fn test_prose_around_array_with_nested_arrays() {
        let text = "I found [3] candidates. Results:\n[{\"name\": \"Acme\", \"flooring_tags\": [\"LVT\", \"Tile\"]}]\nLet me know [if] you need more.";
        let records = parse_records(text).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text("flooring_tags").as_deref(), Some("LVT Tile"));
    }

    #[test]
    fn test_single_object_becomes_one_record() {
        let records = parse_records(r#"{"name": "Acme", "city": "Dover"}"#).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text("name").as_deref(), Some("Acme"));
    }

    #[test]
    fn test_object_inside_prose() {
        let records = parse_records("Sure! {\"name\": \"Acme\"} Hope that helps.").unwrap();
        assert_eq!(values(&records), vec![json!({"name": "Acme"})]);
    }

    #[test]
    fn test_non_object_elements_are_dropped() {
        let records = parse_records(r#"[{"name": "Acme"}, "stray", 42, null, {"name": "Bayhealth"}]"#).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_empty_array_is_zero_records() {
        assert!(parse_records("[]").unwrap().is_empty());
        assert!(parse_records("No results found: []").unwrap().is_empty());
    }

    #[test]
    fn test_empty_input_is_malformed() {
        match parse_records("   \n ") {
            Err(PipelineError::MalformedOutput { reason, .. }) => assert_eq!(reason, "empty response"),
            other => panic!("expected MalformedOutput, got {other:?}"),
        }
    }

    #[test]
    fn test_unparseable_text_is_malformed_with_preview() {
        let text = format!("I could not find any firms. {}", "x".repeat(1000));
        match parse_records(&text) {
            Err(PipelineError::MalformedOutput { preview, .. }) => {
                assert!(preview.starts_with("I could not find any firms."));
                assert!(preview.contains("…(+"));
            }
            other => panic!("expected MalformedOutput, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_reply_is_reported_as_truncated() {
        let text = "```json\n[{\"name\": \"Acme\"}, {\"name\": \"Bay";
        match parse_records(text) {
            Err(e @ PipelineError::MalformedOutput { .. }) => assert!(is_truncated(&e)),
            other => panic!("expected MalformedOutput, got {other:?}"),
        }
        assert!(!is_truncated(&parse_records("nothing useful").unwrap_err()));
    }

    #[test]
    fn test_leading_citation_marker_before_array() {
        let records = parse_records("[1] Sources checked. Results:\n[{\"name\": \"Acme\"}]").unwrap();
        assert_eq!(values(&records), vec![json!({"name": "Acme"})]);
    }

    #[test]
    fn test_array_of_scalars_in_prose_is_zero_records() {
        assert!(parse_records("Results: [\"Acme\", \"Bay\"]").unwrap().is_empty());
    }

    #[test]
    fn test_wrapper_object_is_one_record() {
        let records = parse_records(r#"{"firms": [{"name": "Acme"}]}"#).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].has("firms"));
    }

    #[test]
    fn test_truncated_after_citation_is_still_truncated() {
        let err = parse_records("[2] Partial list: [{\"name\": \"Acme\"}, {\"name\": \"Ba").unwrap_err();
        assert!(is_truncated(&err));
    }

    #[test]
    fn test_extract_json_region() {
        assert_eq!(extract_json_region("[1, 2]"), None);
        assert_eq!(extract_json_region("no json here"), None);
        assert_eq!(extract_json_region("see [1]: [{\"a\": 1}] ok"), Some("[{\"a\": 1}]"));
        assert_eq!(extract_json_region("x {\"a\": \"]\"} y"), Some("{\"a\": \"]\"}"));
        assert_eq!(extract_json_region("cut: [{\"a\": 1"), Some("[{\"a\": 1"));
    }

    #[test]
    fn test_scalar_json_is_malformed() {
        assert!(matches!(
            parse_records("42"),
            Err(PipelineError::MalformedOutput { .. })
        ));
    }

    #[test]
    fn test_strip_code_fence_variants() {
        assert_eq!(strip_code_fence("```json\n[1]\n```"), Some("[1]"));
        assert_eq!(strip_code_fence("```[1]```"), Some("[1]"));
        assert_eq!(strip_code_fence("no fence here"), None);
    }

    #[test]
    fn test_remove_trailing_commas() {
        assert_eq!(remove_trailing_commas("[1, 2 ,\n ]"), "[1, 2 \n ]");
        assert_eq!(remove_trailing_commas(r#"{"a": "x,}"}"#), r#"{"a": "x,}"}"#);
        assert_eq!(remove_trailing_commas(r#"{"a": "q\"",}"#), r#"{"a": "q\""}"#);
    }
}
