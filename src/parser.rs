//! Structured response parsing.
//!
//! Model replies are free-form text with an embedded JSON payload, often
//! wrapped in prose or markdown fences. [`parse`] extracts the largest
//! well-formed JSON object span, validates the caller's required fields, and
//! reports any contract violation as [`Error::MalformedResponse`]. Pure
//! functions only; no network or disk access.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Candidate `{` starts examined when hunting for a payload in raw text.
const MAX_BRACE_STARTS: usize = 32;

/// Extract the structured payload from `raw` and validate `required` fields.
///
/// Unrecognized extra fields are kept in the returned mapping and ignored by
/// callers. A required field that is absent, `null`, or non-scalar (an array
/// or nested object), like a structurally unparseable payload, is a
/// `MalformedResponse`; callers treat all of these uniformly as an unusable
/// reply, so every malformed shape fails here and earns the same retry.
pub fn parse(raw: &str, required: &[&str]) -> Result<Map<String, Value>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::malformed("empty response"));
    }

    let payload = extract_object(trimmed)
        .ok_or_else(|| Error::malformed("no well-formed JSON object in response"))?;

    for field in required {
        match payload.get(*field) {
            None => {
                return Err(Error::malformed(format!("missing required field `{field}`")));
            }
            Some(Value::Null) => {
                return Err(Error::malformed(format!("required field `{field}` is null")));
            }
            Some(Value::Array(_)) | Some(Value::Object(_)) => {
                return Err(Error::malformed(format!(
                    "required field `{field}` is not scalar"
                )));
            }
            Some(_) => {}
        }
    }

    Ok(payload)
}

/// Read a field as text, coercing scalars the way lenient models emit them.
pub fn field_str(payload: &Map<String, Value>, field: &str) -> Result<String> {
    match payload.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(other) => Err(Error::malformed(format!(
            "field `{field}` is not scalar: {other}"
        ))),
        None => Err(Error::malformed(format!("missing required field `{field}`"))),
    }
}

/// Find the largest well-formed JSON object span in `text`.
fn extract_object(text: &str) -> Option<Map<String, Value>> {
    let mut best: Option<(usize, Map<String, Value>)> = None;

    for span in candidate_spans(text) {
        let span = span.trim();
        if best.as_ref().is_some_and(|(len, _)| span.len() <= *len) {
            continue;
        }
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(span) {
            best = Some((span.len(), map));
        }
    }

    best.map(|(_, map)| map)
}

/// Candidate spans, in decreasing likelihood: fenced blocks first, then
/// brace-delimited spans shrunk from the right.
fn candidate_spans(text: &str) -> Vec<&str> {
    let mut spans = fenced_spans(text);

    let starts: Vec<usize> = text
        .char_indices()
        .filter(|(_, c)| *c == '{')
        .map(|(i, _)| i)
        .take(MAX_BRACE_STARTS)
        .collect();
    let ends: Vec<usize> = text
        .char_indices()
        .filter(|(_, c)| *c == '}')
        .map(|(i, _)| i)
        .collect();

    for &start in &starts {
        // Widest span for this start wins first; narrower ones still get
        // considered when trailing prose contains stray braces.
        for &end in ends.iter().rev() {
            if end > start {
                spans.push(&text[start..=end]);
            }
        }
    }

    spans
}

/// Contents of markdown code fences, ```json fences first.
fn fenced_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("```") {
        let after_ticks = &rest[open + 3..];
        // Skip the language tag line if present
        let content_start = after_ticks
            .find('\n')
            .map(|i| i + 1)
            .unwrap_or(after_ticks.len());
        let content = &after_ticks[content_start..];
        match content.find("```") {
            Some(close) => {
                spans.push(&content[..close]);
                rest = &content[close + 3..];
            }
            None => break,
        }
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const ANSWER_FIELDS: &[&str] = &["reasoning", "answer", "confidence"];

    #[test]
    fn test_parse_bare_object() {
        let raw = r#"{"reasoning": "count the seats", "answer": "8人", "confidence": "high"}"#;
        let payload = parse(raw, ANSWER_FIELDS).unwrap();
        assert_eq!(payload["answer"], "8人");
    }

    #[test]
    fn test_parse_with_surrounding_prose() {
        let raw = "Sure, here is my analysis.\n\n\
                   {\"reasoning\": \"r\", \"answer\": \"8人\", \"confidence\": \"high\"}\n\n\
                   Let me know if you need more detail.";
        let payload = parse(raw, ANSWER_FIELDS).unwrap();
        assert_eq!(payload["answer"], "8人");
    }

    #[test]
    fn test_parse_json_code_fence() {
        let raw = "```json\n{\"verdict\": \"Correct\", \"error_reason\": \"\"}\n```";
        let payload = parse(raw, &["verdict"]).unwrap();
        assert_eq!(payload["verdict"], "Correct");
    }

    #[test]
    fn test_parse_generic_code_fence() {
        let raw = "```\n{\"verdict\": \"Incorrect\", \"error_reason\": \"off by one\"}\n```";
        let payload = parse(raw, &["verdict", "error_reason"]).unwrap();
        assert_eq!(payload["error_reason"], "off by one");
    }

    #[test]
    fn test_parse_prefers_largest_span() {
        // A stray braced aside before the real payload
        let raw = "{note} then the result: {\"answer\": \"42\", \"reasoning\": \"because\", \"confidence\": \"low\"}";
        let payload = parse(raw, ANSWER_FIELDS).unwrap();
        assert_eq!(payload["answer"], "42");
    }

    #[test]
    fn test_parse_trailing_braces_in_prose() {
        let raw = "{\"answer\": \"x\", \"reasoning\": \"r\", \"confidence\": \"low\"} as in {set} notation}";
        let payload = parse(raw, ANSWER_FIELDS).unwrap();
        assert_eq!(payload["answer"], "x");
    }

    #[test]
    fn test_missing_required_field_is_malformed() {
        // Valid JSON, but the answer field is absent
        let raw = r#"{"reasoning": "thought hard", "confidence": "high"}"#;
        let err = parse(raw, ANSWER_FIELDS).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
        assert!(err.to_string().contains("answer"));
    }

    #[test]
    fn test_non_scalar_required_field_is_malformed() {
        let raw = r#"{"reasoning": "r", "answer": ["8人"], "confidence": "low"}"#;
        let err = parse(raw, ANSWER_FIELDS).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
        assert!(err.to_string().contains("answer"));

        let raw = r#"{"verdict": {"value": "Correct"}}"#;
        assert!(matches!(
            parse(raw, &["verdict"]),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_null_required_field_is_malformed() {
        let raw = r#"{"reasoning": "r", "answer": null, "confidence": "low"}"#;
        assert!(matches!(
            parse(raw, ANSWER_FIELDS),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_unparseable_payload_is_malformed() {
        assert!(matches!(
            parse("the answer is eight", ANSWER_FIELDS),
            Err(Error::MalformedResponse(_))
        ));
        assert!(matches!(
            parse("{\"answer\": ", ANSWER_FIELDS),
            Err(Error::MalformedResponse(_))
        ));
        assert!(matches!(parse("  ", ANSWER_FIELDS), Err(Error::MalformedResponse(_))));
    }

    #[test]
    fn test_extra_fields_are_kept_and_ignored() {
        let raw = r#"{"reasoning": "r", "answer": "a", "confidence": "low", "mood": "optimistic"}"#;
        let payload = parse(raw, ANSWER_FIELDS).unwrap();
        assert_eq!(payload["mood"], "optimistic");
    }

    #[test]
    fn test_field_str_coercions() {
        let payload = parse(
            r#"{"answer": 8, "sure": true, "reasoning": "r"}"#,
            &["answer"],
        )
        .unwrap();
        assert_eq!(field_str(&payload, "answer").unwrap(), "8");
        assert_eq!(field_str(&payload, "sure").unwrap(), "true");
        assert!(field_str(&payload, "absent").is_err());
    }

    #[test]
    fn test_unfenced_and_fenced_agree() {
        let body = r#"{"verdict": "Uncertain", "error_reason": "ambiguous premise"}"#;
        let plain = parse(body, &["verdict"]).unwrap();
        let fenced = parse(&format!("```json\n{body}\n```"), &["verdict"]).unwrap();
        assert_eq!(plain, fenced);
    }

    proptest! {
        // Re-parsing an accepted payload yields an identical mapping.
        #[test]
        fn parse_is_idempotent(
            entries in proptest::collection::btree_map("[a-z]{1,8}", "[^\\x00]{0,40}", 1..6)
        ) {
            let mut map = Map::new();
            for (k, v) in &entries {
                map.insert(k.clone(), Value::String(v.clone()));
            }
            let required: Vec<&str> = entries.keys().map(|k| k.as_str()).collect();

            let serialized = serde_json::to_string(&Value::Object(map.clone())).unwrap();
            let first = parse(&serialized, &required).unwrap();
            prop_assert_eq!(&first, &map);

            let reserialized = serde_json::to_string(&Value::Object(first.clone())).unwrap();
            let second = parse(&reserialized, &required).unwrap();
            prop_assert_eq!(second, first);
        }
    }
}
