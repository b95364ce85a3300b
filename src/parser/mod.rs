//! Structured-output recovery.
//!
//! Turns one blob of model text into a JSON mapping for a [`ParseContext`].
//! Each context owns an ordered chain of [`Strategy`] functions; the first
//! one returning a mapping wins. List-shaped contexts get an extra
//! retry pass ([`RetryStep`]) when the whole chain fails. Parsing never
//! panics and never errors: unrecoverable input yields `None`.

pub mod context;
pub mod heuristic;
pub mod relaxed;
pub mod repair;
pub mod retry;
pub mod scan;
pub mod stats;
pub mod strategies;

pub use context::{ParseContext, REVIEW_CATEGORIES, TEST_CASES_KEY};
pub use retry::RetryStep;
pub use stats::{ParserStats, ParserStatsSnapshot};
pub use strategies::Strategy;

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, info, warn};

/// A recovered JSON mapping.
pub type Record = serde_json::Map<String, Value>;

/// Which step produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    Chain(Strategy),
    Retry(RetryStep),
}

impl fmt::Display for Recovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recovery::Chain(strategy) => write!(f, "{strategy}"),
            Recovery::Retry(step) => write!(f, "retry:{step}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub record: Record,
    pub recovery: Recovery,
}

/// Run `f`, treating a panic as "no result".
fn guarded<T>(label: &str, f: impl FnOnce() -> Option<T>) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(_) => {
            warn!(step = label, "Recovery step panicked; treating as no result");
            None
        }
    }
}

/// Run a context's strategy chain, returning the first mapping and the strategy that produced it.
pub fn run_chain(text: &str, context: ParseContext) -> Option<(Record, Strategy)> {
    for &strategy in context.strategies() {
        match guarded(strategy.name(), || strategy.apply(text)) {
            Some(record) => {
                debug!(%context, %strategy, keys = record.len(), "Strategy succeeded");
                return Some((record, strategy));
            }
            None => debug!(%context, %strategy, "Strategy produced nothing"),
        }
    }
    None
}

fn smart_retry(text: &str, context: ParseContext) -> Option<ParseOutcome> {
    let key = context.list_key()?;
    let outcome = |record: Record, step: RetryStep| ParseOutcome {
        record,
        recovery: Recovery::Retry(step),
    };

    if let Some(record) = guarded("loose_list", || retry::loose_list(text, key)) {
        return Some(outcome(record, RetryStep::LooseList));
    }
    if let Some(record) = guarded("any_fragment", || retry::any_fragment(text, key)) {
        return Some(outcome(record, RetryStep::AnyFragment));
    }
    if let Some((record, step)) = guarded("deep_clean", || {
        retry::deep_clean_rerun(text, |cleaned| run_chain(cleaned, context))
    }) {
        return Some(outcome(record, step));
    }
    guarded("label_synthesis", || retry::synthesize_from_labels(text, key))
        .map(|record| outcome(record, RetryStep::LabelSynthesis))
}

/// Parser front-end carrying shared statistics.
#[derive(Debug, Default)]
pub struct StructuredParser {
    stats: ParserStats,
}

impl StructuredParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recover a mapping from `text`, or `None`.
    pub fn parse(&self, text: &str, context: ParseContext) -> Option<Record> {
        self.parse_traced(text, context).map(|outcome| outcome.record)
    }

    /// Like [`parse`](Self::parse), but also reports which step succeeded.
    pub fn parse_traced(&self, text: &str, context: ParseContext) -> Option<ParseOutcome> {
        self.stats.record_attempt();

        if text.trim().is_empty() {
            warn!(%context, "Empty response; nothing to parse");
            self.stats.record_failure();
            return None;
        }

        let outcome = run_chain(text, context)
            .map(|(record, strategy)| ParseOutcome {
                record,
                recovery: Recovery::Chain(strategy),
            })
            .or_else(|| {
                if context.uses_smart_retry() {
                    warn!(%context, "Strategy chain failed; starting smart retry");
                    smart_retry(text, context)
                } else {
                    None
                }
            });

        match &outcome {
            Some(found) => {
                info!(%context, recovery = %found.recovery, "Parsed structured output");
                self.stats.record_success(found.recovery);
            }
            None => {
                warn!(%context, len = text.len(), "All recovery steps failed");
                self.stats.record_failure();
            }
        }
        outcome
    }

    pub fn stats(&self) -> ParserStatsSnapshot {
        self.stats.snapshot()
    }
}

/// One-off parse without keeping statistics.
pub fn parse(text: &str, context: ParseContext) -> Option<Record> {
    StructuredParser::new().parse(text, context)
}

/// Keys from `expected` that are missing in `record`.
pub fn missing_keys<'a>(record: &Record, expected: &[&'a str]) -> Vec<&'a str> {
    expected
        .iter()
        .copied()
        .filter(|key| !record.contains_key(*key))
        .collect()
}

/// Whether `record` carries every key in `expected`.
pub fn validate_structure(record: &Record, expected: &[&str]) -> bool {
    missing_keys(record, expected).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_ok(text: &str, context: ParseContext) -> ParseOutcome {
        StructuredParser::new()
            .parse_traced(text, context)
            .unwrap_or_else(|| panic!("expected a record for {text:?}"))
    }

    #[test]
    fn test_fenced_json_wins_by_block_extraction_in_every_context() {
        for ctx in ParseContext::ALL {
            let outcome = parse_ok("```json\n{\"a\": 1}\n```", ctx);
            assert_eq!(Value::Object(outcome.record), json!({"a": 1}));
            assert_eq!(outcome.recovery, Recovery::Chain(Strategy::BlockExtraction));
        }
    }

    #[test]
    fn test_typographic_quotes_inside_values_survive_in_every_context() {
        let text = "```json\n{\"title\": \"点击\u{201C}保存\u{201D}按钮\"}\n```";
        for ctx in ParseContext::ALL {
            let outcome = parse_ok(text, ctx);
            assert_eq!(
                Value::Object(outcome.record),
                json!({"title": "点击\u{201C}保存\u{201D}按钮"}),
                "context {ctx}"
            );
            assert_eq!(outcome.recovery, Recovery::Chain(Strategy::BlockExtraction));
        }
    }

    #[test]
    fn test_deeply_unclosed_input_finishes_quickly() {
        let text = "{ x".repeat(40_000);
        let started = std::time::Instant::now();
        let _ = StructuredParser::new().parse(&text, ParseContext::TestCaseImprovement);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_light_repair_scenario() {
        let outcome = parse_ok("{a: 1, b: 'x',}", ParseContext::General);
        assert_eq!(Value::Object(outcome.record), json!({"a": 1, "b": "x"}));
        assert_eq!(outcome.recovery, Recovery::Chain(Strategy::LightRepair));
    }

    #[test]
    fn test_analysis_context_skips_aggressive_repair() {
        let truncated = "{\"functional_requirements\": [\"login\"";
        assert!(parse(truncated, ParseContext::RequirementAnalysis).is_none());
        let outcome = parse_ok(truncated, ParseContext::General);
        assert_eq!(outcome.recovery, Recovery::Chain(Strategy::AggressiveRepair));
    }

    #[test]
    fn test_heuristic_for_prose() {
        let text = "功能需求：用户可以登录\n风险：密码泄露";
        let outcome = parse_ok(text, ParseContext::RequirementAnalysis);
        assert_eq!(outcome.recovery, Recovery::Chain(Strategy::HeuristicText));
        assert_eq!(outcome.record["risk_areas"], json!(["密码泄露"]));
    }

    #[test]
    fn test_bare_array_wrapped_for_improvement() {
        let text = "[{\"id\": \"TC-001\"}, {\"id\": \"TC-002\"}]";
        let outcome = parse_ok(text, ParseContext::TestCaseImprovement);
        assert_eq!(outcome.recovery, Recovery::Chain(Strategy::ListWrap));
        assert_eq!(outcome.record[TEST_CASES_KEY].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_smart_retry_label_synthesis_for_generation() {
        let text = "标题：登录成功\n步骤：输入用户名\n预期结果：进入首页";
        let outcome = parse_ok(text, ParseContext::TestCaseGeneration);
        assert_eq!(outcome.recovery, Recovery::Retry(RetryStep::LabelSynthesis));
        let cases = outcome.record[TEST_CASES_KEY].as_array().unwrap();
        assert_eq!(cases[0]["title"], "登录成功");
    }

    #[test]
    fn test_smart_retry_only_for_list_contexts() {
        let text = "标题：登录成功\n步骤：输入用户名";
        assert!(parse(text, ParseContext::QualityReview).is_none());
    }

    #[test]
    fn test_unrecoverable_input_is_none() {
        let parser = StructuredParser::new();
        assert!(parser.parse("", ParseContext::General).is_none());
        assert!(parser.parse("   \n\t", ParseContext::TestCaseImprovement).is_none());
        assert!(parser.parse("I cannot help with that.", ParseContext::General).is_none());
        let stats = parser.stats();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.failures, 3);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let text = "noise {\"test_cases\": [{\"id\": \"TC-1\", title: 'x',}] trailing";
        let first = parse_ok(text, ParseContext::TestCaseGeneration);
        for _ in 0..5 {
            assert_eq!(parse_ok(text, ParseContext::TestCaseGeneration), first);
        }
    }

    #[test]
    fn test_never_panics_on_hostile_input() {
        let inputs = [
            "{".repeat(2000),
            "[".repeat(2000) + &"]".repeat(10),
            "\"\\u".to_string(),
            "{\"a\": \"\\ud800\"}".to_string(),
            "```\n```".to_string(),
            "{'a': }}}}]]]".to_string(),
            "\u{FEFF}\u{200B}{\"x\":\u{0000}1}".to_string(),
            "测试用例：\nID：\n标题：".to_string(),
        ];
        let parser = StructuredParser::new();
        for input in &inputs {
            for ctx in ParseContext::ALL {
                let _ = parser.parse(input, ctx);
            }
        }
    }

    #[test]
    fn test_validate_structure() {
        let record = ParseContext::TestDesign.default_record();
        assert!(validate_structure(&record, ParseContext::TestDesign.expected_keys()));
        let partial: Record = json!({"test_approach": {}}).as_object().unwrap().clone();
        assert_eq!(
            missing_keys(&partial, ParseContext::TestDesign.expected_keys()),
            vec!["coverage_matrix", "priorities", "resource_estimation"]
        );
    }
}
