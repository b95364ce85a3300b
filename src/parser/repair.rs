//! Textual clean-up passes applied before strict or relaxed parsing.

use super::scan;

const ZERO_WIDTH: [char; 4] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}'];

fn is_smart_double(c: char) -> bool {
    matches!(c, '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}')
}

fn is_smart_single(c: char) -> bool {
    matches!(c, '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}')
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    Outside,
    /// Inside a string opened by an ASCII `"`.
    Ascii,
    /// Inside a string opened by a typographic double quote.
    Typographic,
}

/// Replace typographic quotes used as delimiters with their ASCII
/// counterparts.
///
/// Typographic quotes inside an ASCII-quoted string are content and are kept.
/// A string opened by a typographic double quote ends at the next one; ASCII
/// `"` inside it is escaped.
pub fn normalize_quotes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut state = QuoteState::Outside;
    let mut escaped = false;

    for c in text.chars() {
        match state {
            QuoteState::Outside => {
                if c == '"' {
                    state = QuoteState::Ascii;
                    out.push(c);
                } else if is_smart_double(c) {
                    state = QuoteState::Typographic;
                    out.push('"');
                } else if is_smart_single(c) {
                    out.push('\'');
                } else {
                    out.push(c);
                }
            }
            _ if escaped => {
                escaped = false;
                out.push(c);
            }
            _ if c == '\\' => {
                escaped = true;
                out.push(c);
            }
            QuoteState::Ascii => {
                if c == '"' {
                    state = QuoteState::Outside;
                }
                out.push(c);
            }
            QuoteState::Typographic => {
                if is_smart_double(c) {
                    state = QuoteState::Outside;
                    out.push('"');
                } else if c == '"' {
                    out.push_str("\\\"");
                } else {
                    out.push(c);
                }
            }
        }
    }
    out
}

/// Escape raw newlines, tabs and other control characters that appear
/// inside double-quoted strings.
pub fn escape_controls_in_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }
        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '"' => {
                in_string = false;
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Drop commas that directly precede a closing brace or bracket.
pub fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// The standard pre-parse clean: quotes, string controls, trailing commas.
pub fn clean_json_text(text: &str) -> String {
    strip_trailing_commas(&escape_controls_in_strings(&normalize_quotes(text)))
}

/// Double every backslash that does not start a valid JSON escape.
pub fn fix_invalid_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&next) if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
                out.push('\\');
                out.push(next);
                chars.next();
            }
            _ => out.push_str("\\\\"),
        }
    }
    out
}

/// Aggressive sanitation used by the retry pass.
///
/// Removes zero-width and control characters (keeping newline, carriage
/// return and tab), repairs invalid escapes, then truncates everything after
/// the last `}` that closes a balanced object.
pub fn deep_clean(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !ZERO_WIDTH.contains(c))
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect();

    let fixed = fix_invalid_escapes(&stripped);
    match scan::last_balanced_close(&fixed) {
        Some(end) => fixed[..end].to_string(),
        None => fixed,
    }
}
