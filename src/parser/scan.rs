//! Span scanning over raw model output.
//!
//! Everything here works on byte offsets into the original text and is
//! string-aware: braces and brackets inside double-quoted strings do not
//! count towards nesting.

use regex::Regex;
use std::sync::LazyLock;

/// Upper bound on candidate fragments collected from one response.
pub const MAX_FRAGMENTS: usize = 64;

// Fenced code block with an optional language tag, captured lazily up to the closing fence.
static FENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").unwrap());

/// Contents of every fenced code block, in order of appearance.
pub fn fenced_blocks(text: &str) -> Vec<&str> {
    FENCE_REGEX
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Strip a single surrounding fence (with optional language tag) if present.
pub fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let body = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest,
        };
        return body.trim_end().trim_end_matches("```").trim();
    }
    trimmed
}

fn closer_for(open: u8) -> u8 {
    if open == b'{' { b'}' } else { b']' }
}

/// Find the end (exclusive) of the balanced structure opening at `start`.
///
/// Returns `None` when the structure is never closed or closes with the
/// wrong bracket kind.
pub fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let first = *bytes.get(start)?;
    if first != b'{' && first != b'[' {
        return None;
    }

    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => stack.push(closer_for(b)),
            b'}' | b']' => {
                if stack.pop() != Some(b) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn outermost(text: &str, open: char) -> Option<&str> {
    let start = text.find(open)?;
    balanced_end(text, start).map(|end| &text[start..end])
}

/// The balanced `{...}` span opening at the first `{`, if it closes.
pub fn outermost_object(text: &str) -> Option<&str> {
    outermost(text, '{')
}

/// The balanced `[...]` span opening at the first `[`, if it closes.
pub fn outermost_array(text: &str) -> Option<&str> {
    outermost(text, '[')
}

/// Span from the first `{` to the last `}`, ignoring balance.
pub fn greedy_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Everything from the first `{` to the end of the text.
pub fn object_tail(text: &str) -> Option<&str> {
    text.find('{').map(|start| &text[start..])
}

/// Every balanced fragment in the text, outermost first by start position.
///
/// Nested fragments are included after their parents. Arrays are only
/// collected when `include_arrays` is set. Runs in a single pass; a closer
/// of the wrong kind abandons every structure still open.
pub fn fragments(text: &str, include_arrays: bool) -> Vec<&str> {
    let mut open: Vec<(usize, u8)> = Vec::new();
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' if !open.is_empty() => in_string = true,
            b'{' | b'[' => open.push((i, b)),
            b'}' | b']' => match open.pop() {
                Some((start, opener)) if closer_for(opener) == b => {
                    if opener == b'{' || include_arrays {
                        spans.push((start, i + 1));
                    }
                }
                Some(_) => open.clear(),
                None => {}
            },
            _ => {}
        }
    }

    spans.sort_unstable_by_key(|&(start, _)| start);
    let mut found: Vec<&str> = Vec::new();
    for (start, end) in spans {
        if found.len() >= MAX_FRAGMENTS {
            break;
        }
        let fragment = &text[start..end];
        if !found.contains(&fragment) {
            found.push(fragment);
        }
    }
    found
}

/// Byte offset just past the last `}` that brings brace depth back to zero.
pub fn last_balanced_close(text: &str) -> Option<usize> {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut last = None;

    for (i, b) in text.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    last = Some(i + 1);
                } else if depth < 0 {
                    depth = 0;
                }
            }
            _ => {}
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_blocks_with_language_tag() {
        let text = "Here:\n```json\n{\"a\": 1}\n```\nand\n```\n[1, 2]\n```";
        assert_eq!(fenced_blocks(text), vec!["{\"a\": 1}", "[1, 2]"]);
    }

    #[test]
    fn test_strip_fence() {
        assert_eq!(strip_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_fence("  [1]  "), "[1]");
    }

    #[test]
    fn test_balanced_end_ignores_braces_in_strings() {
        let text = r#"{"a": "}{", "b": [1, {"c": 2}]} trailing"#;
        let end = balanced_end(text, 0).unwrap();
        assert_eq!(&text[..end], r#"{"a": "}{", "b": [1, {"c": 2}]}"#);
    }

    #[test]
    fn test_balanced_end_rejects_mismatch_and_unclosed() {
        assert!(balanced_end("{]", 0).is_none());
        assert!(balanced_end(r#"{"a": 1"#, 0).is_none());
        assert!(balanced_end("abc", 0).is_none());
    }

    #[test]
    fn test_outermost_object_requires_first_brace_to_close() {
        let text = r#"oops { not closed ... {"k": "v"}"#;
        // the first '{' swallows the second and never closes
        assert!(outermost_object(text).is_none());
        let text = r#"prefix {"k": {"n": 1}} suffix"#;
        assert_eq!(outermost_object(text), Some(r#"{"k": {"n": 1}}"#));
    }

    #[test]
    fn test_greedy_object_variants() {
        let text = "x {a} y {b} z";
        assert_eq!(greedy_object(text), Some("{a} y {b}"));
        assert_eq!(object_tail("x {a: 1, b"), Some("{a: 1, b"));
        assert!(greedy_object("no braces").is_none());
    }

    #[test]
    fn test_fragments_outer_first() {
        let text = r#"a {"x": {"y": 1}} b [1, 2]"#;
        assert_eq!(fragments(text, false), vec![r#"{"x": {"y": 1}}"#, r#"{"y": 1}"#]);
        assert_eq!(fragments(text, true).len(), 3);
    }

    #[test]
    fn test_fragments_survive_unclosed_and_mismatched_openers() {
        let text = r#"garbage { broken [ {"id": "TC-9"} and more"#;
        assert_eq!(fragments(text, false), vec![r#"{"id": "TC-9"}"#]);
        let text = r#"{"a": ] {"b": "}"} {"b": "}"}"#;
        assert_eq!(fragments(text, false), vec![r#"{"b": "}"}"#]);
    }

    #[test]
    fn test_fragments_cap_and_linear_scan() {
        let text = "{}".repeat(MAX_FRAGMENTS * 4);
        assert_eq!(fragments(&text, false), vec!["{}"]);
        let distinct: String = (0..MAX_FRAGMENTS * 2).map(|i| format!("{{\"n\": {i}}}")).collect();
        assert_eq!(fragments(&distinct, false).len(), MAX_FRAGMENTS);

        let started = std::time::Instant::now();
        assert!(fragments(&"{ x".repeat(40_000), true).is_empty());
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_last_balanced_close_truncates_tail() {
        let text = r#"{"a": 1} {"b": 2} {"c": "#;
        let end = last_balanced_close(text).unwrap();
        assert_eq!(&text[..end], r#"{"a": 1} {"b": 2}"#);
        assert!(last_balanced_close("no braces").is_none());
    }
}
