//! Locating a JSON summary inside free-form generator output.
//!
//! Models wrap their JSON in prose, markdown fences, or both. Extraction
//! tries, in order:
//!
//! 1. strict parse of the whole (trimmed) text;
//! 2. a balanced-brace scan that finds each top-level `{ … }` span, aware of
//!    string literals and escapes, and parses the first one that is valid;
//! 3. the same two strategies after stripping markdown code fences.
//!
//! Every strategy returns `None` on no match; nothing here panics or errors.

use serde_json::{Map, Value};

use crate::models::{ImplementationStep, Summary};

/// Find the first JSON object in `text`.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    strict_parse(text)
        .or_else(|| balanced_scan(text))
        .or_else(|| {
            let stripped = strip_code_fences(text);
            if stripped == text {
                return None;
            }
            strict_parse(&stripped).or_else(|| balanced_scan(&stripped))
        })
}

fn strict_parse(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Byte ranges of the balanced `{ … }` span opened by each `{`, in order of
/// the opening brace, so enclosing spans come before the ones they contain.
fn brace_spans(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut start = 0;

    while let Some(offset) = bytes[start..].iter().position(|&b| b == b'{') {
        let open = start + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut close = None;

        for (i, &b) in bytes.iter().enumerate().skip(open) {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }

        if let Some(end) = close {
            spans.push((open, end + 1));
        }
        // Nested '{' get their own span in case the enclosing one fails to parse.
        start = open + 1;
    }

    spans
}

fn balanced_scan(text: &str) -> Option<Map<String, Value>> {
    brace_spans(text)
        .into_iter()
        .find_map(|(start, end)| strict_parse(&text[start..end]))
}

/// Remove markdown fence lines (```` ``` ```` and ```` ```json ````).
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Map an extracted object onto a [`Summary`].
///
/// Returns `None` when the object has neither a usable title nor a
/// description; anything else is filled with defaults.
pub fn summary_from_object(map: &Map<String, Value>) -> Option<Summary> {
    let title = string_field(map, &["title", "name"]);
    let description = string_field(map, &["description", "summary"]);

    if title.is_none() && description.is_none() {
        return None;
    }

    let steps = map
        .get("implementation_steps")
        .or_else(|| map.get("steps"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| step_from_value(i, item))
                .collect()
        })
        .unwrap_or_default();

    Some(Summary {
        title: title.unwrap_or_else(|| "Untitled".to_string()),
        description: description.unwrap_or_default(),
        implementation_steps: steps,
    })
}

/// Extract and map in one go.
pub fn parse_summary(text: &str) -> Option<Summary> {
    extract_json_object(text).and_then(|map| summary_from_object(&map))
}

fn string_field(map: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| map.get(*name))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn step_from_value(index: usize, value: &Value) -> Option<ImplementationStep> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(ImplementationStep::new(
            format!("Step {}", index + 1),
            s.trim(),
        )),
        Value::Object(obj) => {
            let step = string_field(obj, &["step", "title", "name"]);
            let description = string_field(obj, &["description", "details", "action"]);
            match (step, description) {
                (None, None) => None,
                (step, description) => Some(ImplementationStep::new(
                    step.unwrap_or_else(|| format!("Step {}", index + 1)),
                    description.unwrap_or_default(),
                )),
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_json() {
        let summary = parse_summary(
            r#"{"title": "MFA", "description": "Require MFA.", "implementation_steps": [{"step": "Enroll", "description": "Enroll users"}]}"#,
        )
        .unwrap();
        assert_eq!(summary.title, "MFA");
        assert_eq!(summary.implementation_steps[0].step, "Enroll");
    }

    #[test]
    fn test_json_surrounded_by_prose() {
        let text = "Sure! Here is the unified control:\n{\"title\": \"Logging\", \"description\": \"Centralize logs.\"}\nLet me know if you need more.";
        let summary = parse_summary(text).unwrap();
        assert_eq!(summary.title, "Logging");
        assert!(summary.implementation_steps.is_empty());
    }

    #[test]
    fn test_fenced_json() {
        let text = "```json\n{\"title\": \"Backups\", \"description\": \"Back up daily.\"}\n```";
        assert_eq!(parse_summary(text).unwrap().title, "Backups");
    }

    #[test]
    fn test_braces_inside_strings() {
        let text = r#"Note {draft}: {"title": "Use {curly} \"quotes\"", "description": "x } y"}"#;
        let summary = parse_summary(text).unwrap();
        assert_eq!(summary.title, "Use {curly} \"quotes\"");
        assert_eq!(summary.description, "x } y");
    }

    #[test]
    fn test_skips_invalid_object_before_valid_one() {
        let text = "{not json} then {\"title\": \"Second\"}";
        let summary = parse_summary(text).unwrap();
        assert_eq!(summary.title, "Second");
        assert_eq!(summary.description, "");
    }

    #[test]
    fn test_unbalanced_prefix() {
        let text = "{ broken { \"title\": \"Inner\", \"description\": \"ok\" }";
        assert_eq!(parse_summary(text).unwrap().title, "Inner");
    }

    #[test]
    fn test_valid_object_nested_in_invalid_one() {
        let text = r#"Result: {summary: {"title": "MFA", "description": "Require MFA."}}"#;
        let summary = parse_summary(text).unwrap();
        assert_eq!(summary.title, "MFA");
        assert_eq!(summary.description, "Require MFA.");
    }

    #[test]
    fn test_no_json() {
        assert!(extract_json_object("I cannot help with that.").is_none());
        assert!(extract_json_object("").is_none());
        assert!(parse_summary("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_object_without_summary_fields() {
        assert!(parse_summary(r#"{"foo": "bar"}"#).is_none());
        let untitled = parse_summary(r#"{"description": "only a description"}"#).unwrap();
        assert_eq!(untitled.title, "Untitled");
    }

    #[test]
    fn test_string_steps_are_numbered() {
        let summary = parse_summary(
            r#"{"title": "T", "implementation_steps": ["Do A", {"title": "B", "details": "Do B"}, 7, {}]}"#,
        )
        .unwrap();
        assert_eq!(
            summary.implementation_steps,
            vec![
                ImplementationStep::new("Step 1", "Do A"),
                ImplementationStep::new("B", "Do B"),
            ]
        );
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("plain"), "plain");
    }
}
