//! Tolerant JSON-like parser used by the repair strategies.
//!
//! Rather than rewriting text with regular expressions and re-running a
//! strict parser, this walks the input once and accepts a superset of JSON.
//! [`RepairLevel::Light`] accepts:
//! - single- or double-quoted strings, with raw newlines and tabs inside
//! - unquoted identifier keys
//! - bare scalar values (typed when they read as number/bool/null, strings otherwise)
//! - trailing commas
//!
//! [`RepairLevel::Aggressive`] additionally inserts missing separators,
//! accepts Python literals, coerces any stray token to a string, tolerates
//! unescaped inner quotes and closes unterminated strings and containers at
//! end of input.

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Nesting limit; deeper input is rejected instead of recursing further.
pub const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairLevel {
    Light,
    Aggressive,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{message} at offset {offset}")]
pub struct RepairError {
    pub offset: usize,
    pub message: String,
}

/// Parse `text` as relaxed JSON at the given repair level.
pub fn parse_relaxed(text: &str, level: RepairLevel) -> Result<Value, RepairError> {
    let mut parser = RelaxedParser {
        chars: text.chars().collect(),
        pos: 0,
        level,
    };
    parser.skip_ws();
    let value = parser.parse_value(Container::Top, 0)?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() && level == RepairLevel::Light {
        return Err(parser.error("unexpected trailing content"));
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Top,
    Object,
    Array,
}

struct RelaxedParser {
    chars: Vec<char>,
    pos: usize,
    level: RepairLevel,
}

impl RelaxedParser {
    fn aggressive(&self) -> bool {
        self.level == RepairLevel::Aggressive
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn error(&self, message: &str) -> RepairError {
        RepairError {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    /// Skip whitespace and return the next char without consuming it.
    fn next_significant(&self, from: usize) -> Option<char> {
        self.chars[from.min(self.chars.len())..]
            .iter()
            .copied()
            .find(|c| !c.is_whitespace())
    }

    fn parse_value(&mut self, within: Container, depth: usize) -> Result<Value, RepairError> {
        if depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        match self.peek() {
            None => {
                if self.aggressive() && within != Container::Top {
                    Ok(Value::Null)
                } else {
                    Err(self.error("unexpected end of input"))
                }
            }
            Some('{') => self.parse_object(depth + 1),
            Some('[') => self.parse_array(depth + 1),
            Some(q @ ('"' | '\'')) => self.parse_string(q).map(Value::String),
            Some(c @ (',' | '}' | ']' | ':')) => {
                if self.aggressive() && within != Container::Top {
                    if c == ':' {
                        self.pos += 1;
                    }
                    Ok(Value::Null)
                } else {
                    Err(self.error("expected a value"))
                }
            }
            Some(_) => self.parse_bare(within),
        }
    }

    fn parse_object(&mut self, depth: usize) -> Result<Value, RepairError> {
        self.pos += 1; // '{'
        let mut map = Map::new();

        loop {
            self.skip_separators();
            match self.peek() {
                None => {
                    return if self.aggressive() {
                        Ok(Value::Object(map))
                    } else {
                        Err(self.error("unterminated object"))
                    };
                }
                Some('}') => {
                    self.pos += 1;
                    return Ok(Value::Object(map));
                }
                Some(']') if self.aggressive() => {
                    // mismatched closer: end this object and let the parent consume it
                    return Ok(Value::Object(map));
                }
                _ => {}
            }

            let key = self.parse_key()?;
            self.skip_ws();
            match self.peek() {
                Some(':') => self.pos += 1,
                _ if self.aggressive() => {}
                _ => return Err(self.error("expected ':' after key")),
            }
            self.skip_ws();
            let value = self.parse_value(Container::Object, depth)?;
            map.insert(key, value);

            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {}
                None if self.aggressive() => {}
                Some(']') if self.aggressive() => {}
                None => return Err(self.error("unterminated object")),
                Some(_) if self.aggressive() => {} // missing comma
                Some(_) => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn parse_array(&mut self, depth: usize) -> Result<Value, RepairError> {
        self.pos += 1; // '['
        let mut items = Vec::new();

        loop {
            self.skip_separators();
            match self.peek() {
                None => {
                    return if self.aggressive() {
                        Ok(Value::Array(items))
                    } else {
                        Err(self.error("unterminated array"))
                    };
                }
                Some(']') => {
                    self.pos += 1;
                    return Ok(Value::Array(items));
                }
                Some('}') if self.aggressive() => return Ok(Value::Array(items)),
                _ => {}
            }

            let value = self.parse_value(Container::Array, depth)?;
            items.push(value);

            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(']') => {}
                None if self.aggressive() => {}
                Some('}') if self.aggressive() => {}
                None => return Err(self.error("unterminated array")),
                Some(_) if self.aggressive() => {}
                Some(_) => return Err(self.error("expected ',' or ']'")),
            }
        }
    }

    /// Skip whitespace; in aggressive mode also swallow repeated commas.
    fn skip_separators(&mut self) {
        self.skip_ws();
        if self.aggressive() {
            while self.peek() == Some(',') {
                self.pos += 1;
                self.skip_ws();
            }
        }
    }

    fn parse_key(&mut self) -> Result<String, RepairError> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => self.parse_string(q),
            Some(_) => {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    let stop = if self.aggressive() {
                        matches!(c, ':' | ',' | '{' | '}' | '[' | ']' | '"' | '\n')
                    } else {
                        !(c.is_alphanumeric() || matches!(c, '_' | '-' | '$' | '.'))
                    };
                    if stop {
                        break;
                    }
                    self.pos += 1;
                }
                let key: String = self.chars[start..self.pos].iter().collect();
                let key = key.trim().to_string();
                if key.is_empty() {
                    Err(self.error("expected a key"))
                } else {
                    Ok(key)
                }
            }
            None => Err(self.error("expected a key")),
        }
    }

    fn parse_string(&mut self, quote: char) -> Result<String, RepairError> {
        let open = self.pos;
        self.pos += 1;
        let mut out = String::new();

        loop {
            let Some(c) = self.peek() else {
                if self.aggressive() {
                    return Ok(out);
                }
                self.pos = open;
                return Err(self.error("unterminated string"));
            };
            self.pos += 1;

            if c == quote {
                if self.aggressive() && !self.closes_string() {
                    out.push(c);
                    continue;
                }
                return Ok(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }

            let Some(esc) = self.peek() else {
                out.push('\\');
                continue;
            };
            self.pos += 1;
            match esc {
                '"' => out.push('"'),
                '\'' => out.push('\''),
                '\\' => out.push('\\'),
                '/' => out.push('/'),
                'b' => out.push('\u{0008}'),
                'f' => out.push('\u{000C}'),
                'n' => out.push('\n'),
                'r' => out.push('\r'),
                't' => out.push('\t'),
                'u' => out.push(self.parse_unicode_escape()),
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
        }
    }

    /// Whether a quote just consumed really ends the string, judged by what follows.
    fn closes_string(&self) -> bool {
        matches!(
            self.next_significant(self.pos),
            None | Some(',' | ':' | '}' | ']' | '"' | '\'')
        )
    }

    fn parse_unicode_escape(&mut self) -> char {
        let Some(high) = self.read_hex4() else {
            return '\u{FFFD}';
        };
        if (0xD800..0xDC00).contains(&high)
            && self.peek() == Some('\\')
            && self.peek_at(1) == Some('u')
        {
            let save = self.pos;
            self.pos += 2;
            if let Some(low) = self.read_hex4()
                && (0xDC00..0xE000).contains(&low)
            {
                let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                return char::from_u32(code).unwrap_or('\u{FFFD}');
            }
            self.pos = save;
        }
        char::from_u32(high).unwrap_or('\u{FFFD}')
    }

    fn read_hex4(&mut self) -> Option<u32> {
        let end = self.pos + 4;
        if end > self.chars.len() {
            return None;
        }
        let hex: String = self.chars[self.pos..end].iter().collect();
        let code = u32::from_str_radix(&hex, 16).ok()?;
        self.pos = end;
        Some(code)
    }

    /// A bare (unquoted) token in value position.
    fn parse_bare(&mut self, within: Container) -> Result<Value, RepairError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, ',' | '\n') {
                break;
            }
            match within {
                Container::Object if c == '}' => break,
                Container::Array if c == ']' => break,
                Container::Top if matches!(c, '}' | ']') => break,
                _ => {}
            }
            if self.aggressive() {
                if matches!(c, '}' | ']') {
                    break;
                }
                if within == Container::Object && c.is_whitespace() && self.bare_key_follows() {
                    break;
                }
            }
            self.pos += 1;
        }

        let token: String = self.chars[start..self.pos].iter().collect();
        let token = token.trim();
        if token.is_empty() {
            self.pos = start;
            return Err(self.error("expected a value"));
        }
        if !self.aggressive() && token.contains(['"', '{', '[', ':']) {
            self.pos = start;
            return Err(self.error("malformed bare value"));
        }
        Ok(self.classify_bare(token))
    }

    /// Whether a `key:` pair starts after the whitespace at the cursor.
    fn bare_key_follows(&self) -> bool {
        let mut i = self.pos;
        while self.chars.get(i).is_some_and(|c| c.is_whitespace()) {
            i += 1;
        }
        let key_start = i;
        while self
            .chars
            .get(i)
            .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '-'))
        {
            i += 1;
        }
        if i == key_start {
            return false;
        }
        while self.chars.get(i).is_some_and(|c| *c == ' ' || *c == '\t') {
            i += 1;
        }
        self.chars.get(i) == Some(&':')
    }

    fn classify_bare(&self, token: &str) -> Value {
        match token {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            "null" => return Value::Null,
            _ => {}
        }
        if self.aggressive() {
            match token {
                "True" => return Value::Bool(true),
                "False" => return Value::Bool(false),
                "None" => return Value::Null,
                _ => {}
            }
        }
        if let Ok(Value::Number(n)) = serde_json::from_str::<Value>(token) {
            return Value::Number(n);
        }
        if let Some(n) = token.parse::<f64>().ok().and_then(Number::from_f64)
            && token.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        {
            return Value::Number(n);
        }
        Value::String(token.to_string())
    }
}
