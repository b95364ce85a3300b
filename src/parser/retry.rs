//! Extra recovery steps for list-shaped contexts, run after the strategy
//! chain has given up.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::LazyLock;

use super::Record;
use super::relaxed::RepairLevel;
use super::repair;
use super::scan;
use super::strategies::{Strategy, parse_cleaned, parse_repaired};

/// Priority given to synthesized placeholder cases.
pub const PLACEHOLDER_PRIORITY: &str = "P1";
/// Category given to synthesized placeholder cases.
pub const PLACEHOLDER_CATEGORY: &str = "功能测试";

// Test-case field labels in Chinese or English, with optional numbering before the colon.
static CASE_LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:[-*•][ \t]*|\d+[.)、][ \t]*)?(测试用例|test ?case|tc|id|标识|标题|title|步骤|steps?|预期结果|expected(?: results?)?)[ \t#\-\d]*[:：][ \t]*(.*?)[ \t]*$",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStep {
    /// Array bound to the list key, each element repaired on its own.
    LooseList,
    /// Any bracketed fragment; bare arrays are wrapped under the list key.
    AnyFragment,
    /// The full chain re-run on deep-cleaned text, won by the given strategy.
    DeepClean(Strategy),
    /// Placeholder records built from field labels.
    LabelSynthesis,
}

impl fmt::Display for RetryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryStep::LooseList => f.write_str("loose_list"),
            RetryStep::AnyFragment => f.write_str("any_fragment"),
            RetryStep::DeepClean(strategy) => write!(f, "deep_clean+{strategy}"),
            RetryStep::LabelSynthesis => f.write_str("label_synthesis"),
        }
    }
}

fn repair_any(fragment: &str) -> Option<Value> {
    parse_cleaned(fragment)
        .or_else(|| parse_repaired(fragment, RepairLevel::Light))
        .or_else(|| parse_repaired(fragment, RepairLevel::Aggressive))
}

fn wrap(key: &str, items: Vec<Value>) -> Record {
    let mut record = Record::new();
    record.insert(key.to_string(), Value::Array(items));
    record
}

/// Byte offset of the `[` opening the array bound to `key`, if any.
fn list_start(text: &str, key: &str) -> Option<usize> {
    for (pos, _) in text.match_indices(key) {
        let rest = &text[pos + key.len()..];
        let rest_trimmed = rest
            .trim_start_matches(['"', '\'', '\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}'])
            .trim_start();
        let Some(after_colon) = rest_trimmed
            .strip_prefix(':')
            .or_else(|| rest_trimmed.strip_prefix('：'))
        else {
            continue;
        };
        let after_colon = after_colon.trim_start();
        if after_colon.starts_with('[') {
            return Some(text.len() - after_colon.len());
        }
    }
    None
}

/// Step (a): pull the array bound to `key` out of otherwise broken text and
/// repair each object element independently. A truncated final element is
/// closed aggressively.
pub fn loose_list(text: &str, key: &str) -> Option<Record> {
    let start = list_start(text, key)?;
    let array = match scan::balanced_end(text, start) {
        Some(end) => &text[start..end],
        None => &text[start..],
    };
    let array = repair::normalize_quotes(array);

    let mut items = Vec::new();
    let mut pos = 1;
    while let Some(offset) = array[pos..].find('{') {
        let elem_start = pos + offset;
        match scan::balanced_end(&array, elem_start) {
            Some(elem_end) => {
                if let Some(item @ Value::Object(_)) = repair_any(&array[elem_start..elem_end]) {
                    items.push(item);
                }
                pos = elem_end;
            }
            None => {
                if let Some(item @ Value::Object(_)) =
                    parse_repaired(&array[elem_start..], RepairLevel::Aggressive)
                {
                    items.push(item);
                }
                break;
            }
        }
    }

    (!items.is_empty()).then(|| wrap(key, items))
}

/// Step (b): the first bracketed fragment that repairs to a mapping or to a
/// non-empty array (wrapped under `key`).
pub fn any_fragment(text: &str, key: &str) -> Option<Record> {
    scan::fragments(text, true)
        .into_iter()
        .find_map(|fragment| match repair_any(&repair::normalize_quotes(fragment))? {
            Value::Object(map) => Some(map),
            Value::Array(items) if !items.is_empty() => Some(wrap(key, items)),
            _ => None,
        })
}

#[derive(Debug, Default)]
struct DraftCase {
    id: Option<String>,
    title: Option<String>,
    steps: Vec<String>,
    expected: Vec<String>,
}

impl DraftCase {
    fn is_empty(&self) -> bool {
        self.id.is_none() && self.title.is_none() && self.steps.is_empty() && self.expected.is_empty()
    }

    fn into_value(self, ordinal: usize) -> Value {
        let id = self.id.unwrap_or_else(|| format!("TC-{ordinal:03}"));
        let title = self
            .title
            .or_else(|| self.steps.first().cloned())
            .unwrap_or_else(|| id.clone());
        json!({
            "id": id,
            "title": title,
            "description": title,
            "preconditions": [],
            "steps": self.steps,
            "expected_results": self.expected,
            "priority": PLACEHOLDER_PRIORITY,
            "category": PLACEHOLDER_CATEGORY,
        })
    }
}

enum CaseLabel {
    Case,
    Id,
    Title,
    Step,
    Expected,
}

impl CaseLabel {
    fn from_label(label: &str) -> Self {
        let lower = label.to_lowercase();
        match lower.as_str() {
            "测试用例" | "tc" => CaseLabel::Case,
            "id" | "标识" => CaseLabel::Id,
            "标题" | "title" => CaseLabel::Title,
            "步骤" | "step" | "steps" => CaseLabel::Step,
            "预期结果" => CaseLabel::Expected,
            l if l.starts_with("expected") => CaseLabel::Expected,
            _ => CaseLabel::Case,
        }
    }
}

/// Step (d): placeholder test cases assembled from `id:`, `title:`,
/// `steps:` and `expected:` labels (Chinese or English).
pub fn synthesize_from_labels(text: &str, key: &str) -> Option<Record> {
    let mut drafts: Vec<DraftCase> = Vec::new();
    let mut current = DraftCase::default();

    for cap in CASE_LABEL_REGEX.captures_iter(text) {
        let (Some(label), Some(content)) = (cap.get(1), cap.get(2)) else {
            continue;
        };
        let content = content.as_str().trim().to_string();

        match CaseLabel::from_label(label.as_str()) {
            CaseLabel::Case => {
                if !current.is_empty() {
                    drafts.push(std::mem::take(&mut current));
                }
                if !content.is_empty() {
                    current.title = Some(content);
                }
            }
            CaseLabel::Id => {
                if current.id.is_some() || (current.title.is_some() && !current.steps.is_empty()) {
                    drafts.push(std::mem::take(&mut current));
                }
                if !content.is_empty() {
                    current.id = Some(content);
                }
            }
            CaseLabel::Title => {
                if current.title.is_some() {
                    drafts.push(std::mem::take(&mut current));
                }
                if !content.is_empty() {
                    current.title = Some(content);
                }
            }
            CaseLabel::Step => {
                if !content.is_empty() {
                    current.steps.push(content);
                }
            }
            CaseLabel::Expected => {
                if !content.is_empty() {
                    current.expected.push(content);
                }
            }
        }
    }
    if !current.is_empty() {
        drafts.push(current);
    }

    if drafts.is_empty() {
        return None;
    }
    let items = drafts
        .into_iter()
        .enumerate()
        .map(|(i, draft)| draft.into_value(i + 1))
        .collect();
    Some(wrap(key, items))
}

/// Re-run a strategy chain over deep-cleaned text, when cleaning changed anything.
pub fn deep_clean_rerun(
    text: &str,
    chain: impl Fn(&str) -> Option<(Record, Strategy)>,
) -> Option<(Record, RetryStep)> {
    let cleaned = repair::deep_clean(text);
    if cleaned == text || cleaned.trim().is_empty() {
        return None;
    }
    chain(&cleaned).map(|(record, strategy)| (record, RetryStep::DeepClean(strategy)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "test_cases";

    #[test]
    fn test_loose_list_repairs_elements_independently() {
        let text = r#"Here you go: {"summary": oops "broken, "test_cases": [
            {"id": "TC-001", "title": "Login", },
            {id: 'TC-002', title: 'Logout'},
            {"id": "TC-003", "title": "Reset"#;
        let record = loose_list(text, KEY).unwrap();
        let cases = record[KEY].as_array().unwrap();
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[0]["id"], "TC-001");
        assert_eq!(cases[1]["title"], "Logout");
        assert_eq!(cases[2]["title"], "Reset");
    }

    #[test]
    fn test_loose_list_keeps_typographic_quotes_inside_values() {
        let text = "noise \u{201C} {\u{201C}test_cases\u{201D}: [{\"title\": \"点击\u{201C}保存\u{201D}\", }";
        let record = loose_list(text, KEY).unwrap();
        assert_eq!(record[KEY][0]["title"], "点击\u{201C}保存\u{201D}");
    }

    #[test]
    fn test_loose_list_without_key_is_none() {
        assert!(loose_list(r#"{"cases": [{"id": 1}]}"#, KEY).is_none());
        assert!(loose_list(r#"{"test_cases": []}"#, KEY).is_none());
    }

    #[test]
    fn test_any_fragment_wraps_bare_array() {
        let text = "The cases are [{\"id\": \"TC-1\"}, {\"id\": \"TC-2\"}] as requested";
        let record = any_fragment(text, KEY).unwrap();
        assert_eq!(record[KEY].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_synthesize_from_chinese_labels() {
        let text = "测试用例1：\nID: TC-101\n标题：登录成功\n步骤：输入正确的用户名和密码\n预期结果：进入首页\n\n测试用例2：\n标题：密码错误\n步骤：输入错误密码\n预期结果：提示错误";
        let record = synthesize_from_labels(text, KEY).unwrap();
        let cases = record[KEY].as_array().unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0]["id"], "TC-101");
        assert_eq!(cases[0]["title"], "登录成功");
        assert_eq!(cases[0]["expected_results"], json!(["进入首页"]));
        assert_eq!(cases[1]["id"], "TC-002");
        assert_eq!(cases[1]["priority"], PLACEHOLDER_PRIORITY);
        assert_eq!(cases[1]["preconditions"], json!([]));
    }

    #[test]
    fn test_synthesize_from_english_labels() {
        let text = "Title: Checkout\nSteps: add item to cart\nExpected Result: order placed\nTitle: Refund\nSteps: open order";
        let record = synthesize_from_labels(text, KEY).unwrap();
        let cases = record[KEY].as_array().unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0]["steps"], json!(["add item to cart"]));
        assert_eq!(cases[1]["title"], "Refund");
    }

    #[test]
    fn test_synthesize_without_labels_is_none() {
        assert!(synthesize_from_labels("nothing useful here", KEY).is_none());
    }

    #[test]
    fn test_deep_clean_rerun_skips_unchanged_text() {
        let calls = std::cell::Cell::new(0);
        let rerun = deep_clean_rerun("plain", |_| {
            calls.set(calls.get() + 1);
            None
        });
        assert!(rerun.is_none());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_retry_step_display() {
        assert_eq!(RetryStep::DeepClean(Strategy::DirectParse).to_string(), "deep_clean+direct_parse");
        assert_eq!(RetryStep::LooseList.to_string(), "loose_list");
    }
}
