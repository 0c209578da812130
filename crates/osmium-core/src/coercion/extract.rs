//! Locating a JSON value inside free-form model text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

// Fenced blocks, with or without a language tag
static CODE_FENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[a-zA-Z]*\s*\n?(.*?)```").expect("Code fence regex should be valid")
});

/// Collects every JSON object or array embedded in `text`, in the order a
/// payload is most likely to be found.
///
/// Fenced code blocks come first, then balanced `{...}` or `[...]` spans in
/// order of appearance. Spans nested inside an accepted span are not
/// reported separately. Duplicates are dropped.
pub fn extract_candidates(text: &str) -> Vec<Value> {
    let mut candidates = Vec::new();

    for captures in CODE_FENCE_REGEX.captures_iter(text) {
        if let Some(block) = captures.get(1) {
            if let Ok(value) = serde_json::from_str::<Value>(block.as_str().trim()) {
                push_unique(&mut candidates, value);
            }
        }
    }

    let mut resume_at = 0;
    for (start, c) in text.char_indices() {
        if start < resume_at || (c != '{' && c != '[') {
            continue;
        }
        let Some(end) = balanced_end(text, start) else {
            continue;
        };
        if let Ok(value) = serde_json::from_str::<Value>(&text[start..end]) {
            push_unique(&mut candidates, value);
            resume_at = end;
        }
    }

    candidates
}

fn push_unique(candidates: &mut Vec<Value>, value: Value) {
    if !candidates.contains(&value) {
        candidates.push(value);
    }
}

/// Byte offset one past the bracket closing the one at `start`.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0_usize;
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
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset + c.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_from_code_fence() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nAnything else?";
        assert_eq!(extract_candidates(text), vec![json!({"a": 1})]);
    }

    #[test]
    fn test_extract_from_prose() {
        let text = r#"Sure! The answer is {"a": {"b": [1, 2]}, "c": "x}"} as requested."#;
        assert_eq!(extract_candidates(text), vec![json!({"a": {"b": [1, 2]}, "c": "x}"})]);
    }

    #[test]
    fn test_extract_skips_non_json_brackets() {
        let text = "Step [one] done. Result: [\"ok\"]";
        assert_eq!(extract_candidates(text), vec![json!(["ok"])]);
    }

    #[test]
    fn test_extract_keeps_every_span_in_order() {
        let text = r#"Compared steps [1] and [2]. {"root_cause": "order"} Also [1]."#;
        assert_eq!(
            extract_candidates(text),
            vec![json!([1]), json!([2]), json!({"root_cause": "order"})]
        );
    }

    #[test]
    fn test_extract_looks_inside_rejected_spans() {
        let text = r#"(see [the result {"a": 1}])"#;
        assert_eq!(extract_candidates(text), vec![json!({"a": 1})]);
    }

    #[test]
    fn test_extract_nothing() {
        assert!(extract_candidates("no structure here").is_empty());
        assert!(extract_candidates("{ unterminated").is_empty());
    }
}
