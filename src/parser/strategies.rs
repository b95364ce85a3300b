//! The individual recovery strategies.
//!
//! Every strategy is a pure function with the same signature, so a chain is
//! just an ordered slice of [`Strategy`] values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::Record;
use super::context::TEST_CASES_KEY;
use super::heuristic;
use super::relaxed::{RepairLevel, parse_relaxed};
use super::repair;
use super::scan;

/// Uniform strategy signature.
pub type StrategyFn = fn(&str) -> Option<Record>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// A bare top-level array of objects, wrapped under the test-case key.
    ListWrap,
    BlockExtraction,
    DirectParse,
    LightRepair,
    AggressiveRepair,
    FragmentFallback,
    HeuristicText,
}

impl Strategy {
    pub const ALL: [Strategy; 7] = [
        Strategy::ListWrap,
        Strategy::BlockExtraction,
        Strategy::DirectParse,
        Strategy::LightRepair,
        Strategy::AggressiveRepair,
        Strategy::FragmentFallback,
        Strategy::HeuristicText,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::ListWrap => "list_wrap",
            Strategy::BlockExtraction => "block_extraction",
            Strategy::DirectParse => "direct_parse",
            Strategy::LightRepair => "light_repair",
            Strategy::AggressiveRepair => "aggressive_repair",
            Strategy::FragmentFallback => "fragment_fallback",
            Strategy::HeuristicText => "heuristic_text",
        }
    }

    pub fn function(self) -> StrategyFn {
        match self {
            Strategy::ListWrap => list_wrap,
            Strategy::BlockExtraction => block_extraction,
            Strategy::DirectParse => direct_parse,
            Strategy::LightRepair => light_repair,
            Strategy::AggressiveRepair => aggressive_repair,
            Strategy::FragmentFallback => fragment_fallback,
            Strategy::HeuristicText => heuristic::extract,
        }
    }

    pub fn apply(self, text: &str) -> Option<Record> {
        (self.function())(text)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub(crate) fn into_record(value: Value) -> Option<Record> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn strict_object(text: &str) -> Option<Record> {
    serde_json::from_str::<Value>(text).ok().and_then(into_record)
}

/// Strict parse after the standard clean-up pass.
pub(crate) fn parse_cleaned(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(&repair::clean_json_text(text)).ok()
}

/// Relaxed parse at the given level.
pub(crate) fn parse_repaired(text: &str, level: RepairLevel) -> Option<Value> {
    parse_relaxed(text, level).ok()
}

fn list_wrap(text: &str) -> Option<Record> {
    let candidates = std::iter::once(scan::strip_fence(text)).chain(scan::fenced_blocks(text));
    for candidate in candidates {
        if !candidate.starts_with('[') {
            continue;
        }
        if let Some(Value::Array(items)) = parse_cleaned(candidate)
            && !items.is_empty()
            && items.iter().all(Value::is_object)
        {
            let mut record = Record::new();
            record.insert(TEST_CASES_KEY.to_string(), Value::Array(items));
            return Some(record);
        }
    }
    None
}

/// Strict parse of the span as written, then after the clean-up pass.
fn parse_strict_then_cleaned(span: &str) -> Option<Record> {
    strict_object(span).or_else(|| parse_cleaned(span).and_then(into_record))
}

fn block_extraction(text: &str) -> Option<Record> {
    for block in scan::fenced_blocks(text) {
        if let Some(record) = parse_strict_then_cleaned(block) {
            return Some(record);
        }
        if let Some(span) = scan::outermost_object(block)
            && let Some(record) = parse_strict_then_cleaned(span)
        {
            return Some(record);
        }
    }

    if let Some(record) = scan::outermost_object(text).and_then(parse_strict_then_cleaned) {
        return Some(record);
    }
    let normalized = repair::normalize_quotes(text);
    scan::outermost_object(&normalized)
        .and_then(parse_cleaned)
        .and_then(into_record)
}

fn direct_parse(text: &str) -> Option<Record> {
    strict_object(text.trim())
}

/// Spans located on the raw text come first so that typographic quotes in
/// surrounding prose cannot shift string boundaries inside the JSON.
fn raw_then_normalized<'a>(
    text: &'a str,
    normalized: &'a str,
    locate: impl Fn(&'a str) -> Option<&'a str>,
) -> impl Iterator<Item = String> + 'a {
    let raw = locate(text).map(repair::normalize_quotes);
    let whole = locate(normalized).map(str::to_string);
    raw.into_iter().chain(whole)
}

fn light_repair(text: &str) -> Option<Record> {
    let normalized = repair::normalize_quotes(text);
    raw_then_normalized(text, &normalized, scan::outermost_object)
        .chain(raw_then_normalized(text, &normalized, scan::greedy_object))
        .find_map(|span| parse_repaired(&span, RepairLevel::Light).and_then(into_record))
}

fn aggressive_repair(text: &str) -> Option<Record> {
    let normalized = repair::normalize_quotes(text);
    raw_then_normalized(text, &normalized, scan::object_tail).find_map(|span| {
        parse_repaired(&span, RepairLevel::Aggressive)
            .and_then(into_record)
            .or_else(|| parse_cleaned(&span).and_then(into_record))
    })
}

fn fragment_fallback(text: &str) -> Option<Record> {
    scan::fragments(text, false).into_iter().find_map(|fragment| {
        let fragment = repair::normalize_quotes(fragment);
        parse_repaired(&fragment, RepairLevel::Light)
            .or_else(|| parse_repaired(&fragment, RepairLevel::Aggressive))
            .and_then(into_record)
    })
}
