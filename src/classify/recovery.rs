//! Tolerant parsing of the capability's JSON array response.
//!
//! Long batches can come back truncated mid-object. Recovery trims to the
//! last complete top-level object and re-closes the array. This is a lossy
//! heuristic, not a guaranteed-safe parser: an array that closes exactly at
//! a batch boundary can silently drop a well-formed final item, so recovered
//! vs. expected counts are always logged for monitoring.

use serde_json::Value;
use tracing::{error, warn};

use super::client::ClassificationResult;

/// Strip a leading markdown code fence (```json ... ```), if present.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let mut inner = &trimmed[3..];
    if let Some(rest) = inner.strip_prefix("json") {
        inner = rest;
    }
    match inner.find("```") {
        Some(end) => inner[..end].trim(),
        None => inner.trim(),
    }
}

fn parse_array(s: &str) -> Option<Vec<Value>> {
    serde_json::from_str::<Vec<Value>>(s).ok()
}

/// Parse the raw response into wire results, attempting truncation recovery
/// when the text is not a valid array as-is. Returns an empty vec when
/// nothing can be salvaged — the caller treats that as a loud zero-result
/// batch, never a crash.
pub fn parse_results(raw: &str, expected: usize) -> Vec<ClassificationResult> {
    let text = strip_fences(raw);

    let values = match parse_array(text) {
        Some(v) => v,
        None => match recover_truncated(text) {
            Some(v) => {
                warn!(
                    recovered = v.len(),
                    expected, "recovered items from truncated classification response"
                );
                v
            }
            None => {
                let tail: String = text.chars().rev().take(300).collect::<Vec<_>>().iter().rev().collect();
                error!(expected, tail = %tail, "classification response unparseable, no recovery possible");
                return Vec::new();
            }
        },
    };

    let total = values.len();
    let mut results = Vec::with_capacity(total);
    for value in values {
        match serde_json::from_value::<ClassificationResult>(value) {
            Ok(r) => results.push(r),
            Err(e) => warn!(error = %e, "dropping malformed classification object"),
        }
    }
    if results.len() < total {
        warn!(kept = results.len(), total, "some classification objects were malformed");
    }
    results
}

/// Locate the last complete top-level object, trim trailing separators, and
/// re-close the array.
fn recover_truncated(text: &str) -> Option<Vec<Value>> {
    let last_brace = text.rfind('}')?;
    let mut candidate = text[..=last_brace].trim_end().trim_end_matches(',').to_string();
    if !candidate.starts_with('[') {
        candidate.insert(0, '[');
    }
    candidate.push(']');
    parse_array(&candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_array_parses_in_full() {
        let raw = r#"[{"id": 1, "relevance_score": 80}, {"id": 2, "relevance_score": 60}]"#;
        let out = parse_results(raw, 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, 1);
    }

    #[test]
    fn markdown_fences_are_stripped() {
        let raw = "```json\n[{\"id\": 5}]\n```";
        let out = parse_results(raw, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, 5);
    }

    #[test]
    fn truncated_array_recovers_complete_objects() {
        // Third object cut off mid-field.
        let raw = r#"[{"id": 1, "relevance_score": 80}, {"id": 2, "relevance_score": 60}, {"id": 3, "relev"#;
        let out = parse_results(raw, 3);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].id, 2);
    }

    #[test]
    fn truncation_after_trailing_comma_recovers() {
        let raw = r#"[{"id": 1}, {"id": 2},"#;
        let out = parse_results(raw, 2);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn garbage_yields_zero_results() {
        assert!(parse_results("the model apologizes", 4).is_empty());
    }

    #[test]
    fn malformed_objects_are_dropped_individually() {
        // id is mandatory; the second object lacks it.
        let raw = r#"[{"id": 1}, {"relevance_score": 50}]"#;
        let out = parse_results(raw, 2);
        assert_eq!(out.len(), 1);
    }
}
