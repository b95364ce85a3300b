//! Test-case records: normalization and validation.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::parser::{Record, TEST_CASES_KEY};

/// Fields every test case must carry.
pub const REQUIRED_FIELDS: [&str; 8] = [
    "id",
    "title",
    "description",
    "preconditions",
    "steps",
    "expected_results",
    "priority",
    "category",
];

/// Fields holding a list of strings.
pub const LIST_FIELDS: [&str; 3] = ["preconditions", "steps", "expected_results"];

/// Category given to cases that omit one.
pub const DEFAULT_CATEGORY: &str = "功能测试";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TestCaseIssue {
    #[error("test case is not a JSON object")]
    NotAnObject,

    #[error("test case {id} is missing fields: {}", missing.join(", "))]
    MissingFields { id: String, missing: Vec<&'static str> },

    #[error("test case {id} has an empty '{field}'")]
    EmptyField { id: String, field: &'static str },
}

/// `"1"` and `1` become `"P1"`; anything else is trimmed and kept.
pub fn normalize_priority(value: &Value) -> Value {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => return other.clone(),
    };
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        Value::String(format!("P{raw}"))
    } else if let Some(rest) = raw.strip_prefix('p')
        && !rest.is_empty()
        && rest.chars().all(|c| c.is_ascii_digit())
    {
        Value::String(format!("P{rest}"))
    } else {
        Value::String(raw)
    }
}

fn coerce_list(value: &Value) -> Value {
    match value {
        Value::Array(_) => value.clone(),
        Value::Null => Value::Array(Vec::new()),
        Value::String(s) if s.trim().is_empty() => Value::Array(Vec::new()),
        scalar => Value::Array(vec![scalar.clone()]),
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

/// Fix up a case in place: priority format, default category, scalar list
/// fields wrapped in a list.
pub fn normalize(case: &mut Record) {
    if let Some(priority) = case.get("priority") {
        let normalized = normalize_priority(priority);
        case.insert("priority".into(), normalized);
    }
    if is_blank(case.get("category")) {
        case.insert("category".into(), Value::String(DEFAULT_CATEGORY.to_string()));
    }
    for field in LIST_FIELDS {
        if let Some(value) = case.get(field)
            && !value.is_array()
        {
            let list = coerce_list(value);
            case.insert(field.into(), list);
        }
    }
}

fn case_id(case: &Record) -> String {
    match case.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "unknown".to_string(),
    }
}

/// Check a normalized case.
pub fn validate(case: &Record) -> Result<(), TestCaseIssue> {
    let missing: Vec<&'static str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| !case.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        return Err(TestCaseIssue::MissingFields {
            id: case_id(case),
            missing,
        });
    }

    for field in ["id", "title", "description", "steps", "expected_results", "priority"] {
        if is_blank(case.get(field)) {
            return Err(TestCaseIssue::EmptyField {
                id: case_id(case),
                field,
            });
        }
    }
    Ok(())
}

/// Normalize then validate one raw value.
pub fn normalize_and_validate(value: Value) -> Result<Record, TestCaseIssue> {
    let Value::Object(mut case) = value else {
        return Err(TestCaseIssue::NotAnObject);
    };
    normalize(&mut case);
    validate(&case)?;
    Ok(case)
}

/// Keep only the cases that pass validation, logging the rest.
pub fn retain_valid(values: impl IntoIterator<Item = Value>) -> Vec<Record> {
    values
        .into_iter()
        .filter_map(|value| match normalize_and_validate(value) {
            Ok(case) => Some(case),
            Err(issue) => {
                warn!(%issue, "Dropping invalid test case");
                None
            }
        })
        .collect()
}

/// Test cases held by `value`: either a bare list or a mapping with a
/// `test_cases` list. Non-object entries are skipped.
pub fn cases_from_value(value: Value) -> Option<Vec<Record>> {
    let list = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove(TEST_CASES_KEY) {
            Some(Value::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };
    Some(
        list.into_iter()
            .filter_map(|item| match item {
                Value::Object(case) => Some(case),
                _ => None,
            })
            .collect(),
    )
}
