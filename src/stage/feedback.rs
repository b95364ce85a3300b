//! Review feedback: free text or a review record, split into comment lists
//! per review category.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

/// A category heading such as `1. 完整性`, `## Clarity` or `4) Boundary cases:`.
static HEADING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:#+\s*)?(?:\d+\s*[.、)）]\s*)?(?:\*\*)?(完整性|清晰度|可执行性|边界情况|错误场景|completeness|clarity|executability|boundary[ _]cases?|error[ _]scenarios?)",
    )
    .unwrap()
});

const BULLETS: [char; 3] = ['-', '•', '*'];

/// Review comments grouped by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComments {
    #[serde(default)]
    pub completeness: Vec<String>,
    #[serde(default)]
    pub clarity: Vec<String>,
    #[serde(default)]
    pub executability: Vec<String>,
    #[serde(default)]
    pub boundary_cases: Vec<String>,
    #[serde(default)]
    pub error_scenarios: Vec<String>,
}

impl ReviewComments {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of comments.
    pub fn len(&self) -> usize {
        self.completeness.len()
            + self.clarity.len()
            + self.executability.len()
            + self.boundary_cases.len()
            + self.error_scenarios.len()
    }

    fn section_mut(&mut self, heading: &str) -> &mut Vec<String> {
        let heading = heading.to_lowercase();
        if heading.starts_with("完整性") || heading.starts_with("completeness") {
            &mut self.completeness
        } else if heading.starts_with("清晰度") || heading.starts_with("clarity") {
            &mut self.clarity
        } else if heading.starts_with("可执行性") || heading.starts_with("executability") {
            &mut self.executability
        } else if heading.starts_with("边界情况") || heading.starts_with("boundary") {
            &mut self.boundary_cases
        } else {
            &mut self.error_scenarios
        }
    }
}

/// Split free-text feedback into category comment lists.
///
/// A heading line switches the current category; bullet lines (`-`, `•`,
/// `*`) under it become comments. Text before the first heading is ignored.
pub fn parse_review_feedback(text: &str) -> ReviewComments {
    let mut comments = ReviewComments::default();
    let mut current: Option<String> = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(bullet) = line.strip_prefix(BULLETS) {
            // `**Clarity**` is a heading, not a bullet
            if !line.starts_with("**")
                && let Some(section) = &current
            {
                let content = bullet.trim();
                if !content.is_empty() {
                    comments.section_mut(section).push(content.to_string());
                }
                continue;
            }
        }
        if let Some(caps) = HEADING_REGEX.captures(line) {
            current = Some(caps[1].to_string());
        }
    }
    comments
}

/// Feedback handed to the improvement stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Feedback {
    /// Text placed in the prompt
    pub text: String,
    pub comments: ReviewComments,
}

impl Feedback {
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let comments = parse_review_feedback(&text);
        Self { text, comments }
    }

    /// Accepts a string, a list of strings, or a review record with a
    /// `review_comments` mapping.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(text) => Self::from_text(text.clone()),
            Value::Array(items) if items.iter().all(Value::is_string) => {
                let lines: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                Self::from_text(lines.join("\n"))
            }
            Value::Object(map) => {
                let comments = map
                    .get("review_comments")
                    .and_then(|c| serde_json::from_value(c.clone()).ok())
                    .unwrap_or_default();
                Self {
                    text: serde_json::to_string_pretty(value).unwrap_or_default(),
                    comments,
                }
            }
            other => Self {
                text: other.to_string(),
                comments: ReviewComments::default(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.comments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chinese_numbered_headings() {
        let text = "审查结果如下：\n\
                    1. 完整性\n\
                    - 缺少注销场景\n\
                    - 缺少密码重置\n\
                    2. 清晰度\n\
                    • 步骤3描述含糊\n\
                    4. 边界情况\n\
                    - 用户名长度上限\n\
                    5. 错误场景\n\
                    - 网络中断";
        let comments = parse_review_feedback(text);
        assert_eq!(comments.completeness, vec!["缺少注销场景", "缺少密码重置"]);
        assert_eq!(comments.clarity, vec!["步骤3描述含糊"]);
        assert!(comments.executability.is_empty());
        assert_eq!(comments.boundary_cases, vec!["用户名长度上限"]);
        assert_eq!(comments.error_scenarios, vec!["网络中断"]);
        assert_eq!(comments.len(), 5);
    }

    #[test]
    fn test_english_markdown_headings() {
        let text = "## Executability\n* Step 2 has no expected result\n\n**Error scenarios**\n- Timeout on submit";
        let comments = parse_review_feedback(text);
        assert_eq!(comments.executability, vec!["Step 2 has no expected result"]);
        assert_eq!(comments.error_scenarios, vec!["Timeout on submit"]);
    }

    #[test]
    fn test_bullets_before_any_heading_are_ignored() {
        let comments = parse_review_feedback("- stray\n- note");
        assert!(comments.is_empty());
        assert!(parse_review_feedback("").is_empty());
    }

    #[test]
    fn test_feedback_from_review_record() {
        let value = json!({
            "review_comments": {"completeness": ["add logout"], "clarity": []},
            "review_status": "completed"
        });
        let feedback = Feedback::from_value(&value);
        assert_eq!(feedback.comments.completeness, vec!["add logout"]);
        assert!(feedback.text.contains("review_status"));
        assert!(!feedback.is_empty());
    }

    #[test]
    fn test_feedback_from_string_list() {
        let feedback = Feedback::from_value(&json!(["1. Clarity", "- rename TC-2"]));
        assert_eq!(feedback.comments.clarity, vec!["rename TC-2"]);
        assert!(Feedback::from_text("   ").is_empty());
    }
}
