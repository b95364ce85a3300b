//! Last-resort extraction from labeled prose lines.

use regex::Regex;
use serde_json::{Value, json};
use std::sync::LazyLock;

use super::Record;

// Optional bullet or number, a known label (Chinese or English), a colon, then the content.
static LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:[-*•][ \t]*|\d+[.)、][ \t]*)?(非功能需求|功能需求|测试场景|风险领域|风险|non[- ]functional requirements?|functional requirements?|requirements?|test scenarios?|scenarios?|risk areas?|risks?)[ \t]*[:：][ \t]*(.+?)[ \t]*$",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Functional,
    NonFunctional,
    Scenario,
    Risk,
}

impl Section {
    fn from_label(label: &str) -> Self {
        let lower = label.to_lowercase();
        if lower.starts_with("非功能") || lower.starts_with("non") {
            Section::NonFunctional
        } else if lower.starts_with("功能") || lower.contains("requirement") {
            Section::Functional
        } else if lower.starts_with("测试场景") || lower.contains("scenario") {
            Section::Scenario
        } else {
            Section::Risk
        }
    }

    fn key(self) -> &'static str {
        match self {
            Section::Functional => "functional_requirements",
            Section::NonFunctional => "non_functional_requirements",
            Section::Scenario => "test_scenarios",
            Section::Risk => "risk_areas",
        }
    }
}

/// Assemble a record from labeled lines such as `requirement: ...` or
/// `测试场景：...`. Returns `None` when no label is recognised.
pub fn extract(text: &str) -> Option<Record> {
    let mut record = Record::new();
    let mut scenario_count = 0usize;

    for cap in LABEL_REGEX.captures_iter(text) {
        let (Some(label), Some(content)) = (cap.get(1), cap.get(2)) else {
            continue;
        };
        let content = content.as_str().trim();
        if content.is_empty() {
            continue;
        }

        let section = Section::from_label(label.as_str());
        let entry = match section {
            Section::Scenario => {
                scenario_count += 1;
                json!({
                    "id": format!("TS{scenario_count:03}"),
                    "description": content,
                    "test_cases": [],
                })
            }
            _ => Value::String(content.to_string()),
        };

        if let Value::Array(items) = record
            .entry(section.key())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            items.push(entry);
        }
    }

    (!record.is_empty()).then_some(record)
}
