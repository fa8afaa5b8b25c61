//! Shared utility functions.

use serde_json::Value;

/// Truncate a string to approximately `max_bytes` without splitting a UTF-8
/// character boundary.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Short single-line rendering of a JSON value for log lines.
pub fn preview_json(value: &Value, max_bytes: usize) -> String {
    let rendered = value.to_string();
    if rendered.len() <= max_bytes {
        rendered
    } else {
        format!("{}… ({} bytes)", truncate_str(&rendered, max_bytes), rendered.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truncate_respects_char_boundary() {
        // "é" is 2 bytes; cutting at 1 would split it.
        assert_eq!(truncate_str("é", 1), "");
        assert_eq!(truncate_str("hello world", 5), "hello");
        assert_eq!(truncate_str("hi", 10), "hi");
    }

    #[test]
    fn preview_marks_truncation() {
        assert_eq!(preview_json(&json!({"x": 1}), 64), r#"{"x":1}"#);
        let long = preview_json(&json!({"text": "a".repeat(100)}), 10);
        assert!(long.starts_with(r#"{"text":"a"#));
        assert!(long.ends_with("bytes)"));
    }
}
