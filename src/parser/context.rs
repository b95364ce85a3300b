use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;

use super::Record;
use super::strategies::Strategy;

/// Key holding the list of test cases in generation and improvement output.
pub const TEST_CASES_KEY: &str = "test_cases";

/// Review comment categories, in presentation order.
pub const REVIEW_CATEGORIES: [&str; 5] = [
    "completeness",
    "clarity",
    "executability",
    "boundary_cases",
    "error_scenarios",
];

/// Semantic tag selecting the strategy chain and expected shape of a parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseContext {
    RequirementAnalysis,
    TestDesign,
    TestCaseGeneration,
    TestCaseImprovement,
    QualityReview,
    General,
}

const ALL_STRATEGIES: &[Strategy] = &[
    Strategy::BlockExtraction,
    Strategy::DirectParse,
    Strategy::LightRepair,
    Strategy::AggressiveRepair,
    Strategy::FragmentFallback,
    Strategy::HeuristicText,
];

const IMPROVEMENT_STRATEGIES: &[Strategy] = &[
    Strategy::ListWrap,
    Strategy::BlockExtraction,
    Strategy::DirectParse,
    Strategy::LightRepair,
    Strategy::AggressiveRepair,
    Strategy::FragmentFallback,
    Strategy::HeuristicText,
];

const GENERATION_STRATEGIES: &[Strategy] = &[
    Strategy::ListWrap,
    Strategy::BlockExtraction,
    Strategy::DirectParse,
    Strategy::LightRepair,
    Strategy::FragmentFallback,
    Strategy::HeuristicText,
];

const ANALYSIS_STRATEGIES: &[Strategy] = &[
    Strategy::BlockExtraction,
    Strategy::DirectParse,
    Strategy::LightRepair,
    Strategy::HeuristicText,
];

const REVIEW_STRATEGIES: &[Strategy] = &[
    Strategy::BlockExtraction,
    Strategy::DirectParse,
    Strategy::LightRepair,
    Strategy::FragmentFallback,
    Strategy::HeuristicText,
];

impl ParseContext {
    pub const ALL: [ParseContext; 6] = [
        ParseContext::RequirementAnalysis,
        ParseContext::TestDesign,
        ParseContext::TestCaseGeneration,
        ParseContext::TestCaseImprovement,
        ParseContext::QualityReview,
        ParseContext::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParseContext::RequirementAnalysis => "requirement-analysis",
            ParseContext::TestDesign => "test-design",
            ParseContext::TestCaseGeneration => "test-case-generation",
            ParseContext::TestCaseImprovement => "test-case-improvement",
            ParseContext::QualityReview => "quality-review",
            ParseContext::General => "general",
        }
    }

    /// Ordered strategy chain for this context.
    pub fn strategies(&self) -> &'static [Strategy] {
        match self {
            ParseContext::RequirementAnalysis => ANALYSIS_STRATEGIES,
            ParseContext::TestDesign | ParseContext::General => ALL_STRATEGIES,
            ParseContext::TestCaseGeneration => GENERATION_STRATEGIES,
            ParseContext::TestCaseImprovement => IMPROVEMENT_STRATEGIES,
            ParseContext::QualityReview => REVIEW_STRATEGIES,
        }
    }

    /// The list key for list-shaped contexts.
    pub fn list_key(&self) -> Option<&'static str> {
        match self {
            ParseContext::TestCaseGeneration | ParseContext::TestCaseImprovement => {
                Some(TEST_CASES_KEY)
            }
            _ => None,
        }
    }

    /// List-shaped contexts get the smart-retry pass after the chain fails.
    pub fn uses_smart_retry(&self) -> bool {
        self.list_key().is_some()
    }

    /// Top-level keys a well-shaped record of this context carries.
    pub fn expected_keys(&self) -> &'static [&'static str] {
        match self {
            ParseContext::RequirementAnalysis => &[
                "functional_requirements",
                "non_functional_requirements",
                "test_scenarios",
                "risk_areas",
            ],
            ParseContext::TestDesign => &[
                "test_approach",
                "coverage_matrix",
                "priorities",
                "resource_estimation",
            ],
            ParseContext::TestCaseGeneration | ParseContext::TestCaseImprovement => {
                &[TEST_CASES_KEY]
            }
            ParseContext::QualityReview => &["reviewed_cases", "review_comments", "review_status"],
            ParseContext::General => &[],
        }
    }

    /// Record a caller substitutes when parsing yields nothing.
    pub fn default_record(&self) -> Record {
        let value = match self {
            ParseContext::RequirementAnalysis => json!({
                "functional_requirements": [],
                "non_functional_requirements": [],
                "test_scenarios": [],
                "risk_areas": [],
            }),
            ParseContext::TestDesign => json!({
                "test_approach": {
                    "methodology": [],
                    "tools": [],
                    "frameworks": [],
                },
                "coverage_matrix": [],
                "priorities": [],
                "resource_estimation": {
                    "time": null,
                    "personnel": null,
                    "tools": [],
                    "additional_resources": [],
                },
            }),
            ParseContext::TestCaseGeneration | ParseContext::TestCaseImprovement => {
                json!({ "test_cases": [] })
            }
            ParseContext::QualityReview => {
                let comments: serde_json::Map<String, Value> = REVIEW_CATEGORIES
                    .iter()
                    .map(|c| (c.to_string(), json!([])))
                    .collect();
                json!({
                    "reviewed_cases": [],
                    "review_comments": comments,
                    "review_status": "pending",
                })
            }
            ParseContext::General => json!({}),
        };
        match value {
            Value::Object(map) => map,
            _ => Record::new(),
        }
    }
}

impl fmt::Display for ParseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParseContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "requirement-analysis" | "analysis" => Ok(ParseContext::RequirementAnalysis),
            "test-design" | "design" => Ok(ParseContext::TestDesign),
            "test-case-generation" | "generation" => Ok(ParseContext::TestCaseGeneration),
            "test-case-improvement" | "improvement" => Ok(ParseContext::TestCaseImprovement),
            "quality-review" | "review" => Ok(ParseContext::QualityReview),
            "general" | "default" => Ok(ParseContext::General),
            _ => Err(format!(
                "unknown parse context '{}' (expected one of: {})",
                s,
                ParseContext::ALL
                    .iter()
                    .map(|c| c.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_accepts_aliases_and_underscores() {
        assert_eq!(
            "test_case_improvement".parse::<ParseContext>().unwrap(),
            ParseContext::TestCaseImprovement
        );
        assert_eq!("Review".parse::<ParseContext>().unwrap(), ParseContext::QualityReview);
        assert!("nonsense".parse::<ParseContext>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_from_str() {
        for ctx in ParseContext::ALL {
            assert_eq!(ctx.to_string().parse::<ParseContext>().unwrap(), ctx);
        }
    }

    #[test]
    fn test_chains_end_with_heuristic() {
        for ctx in ParseContext::ALL {
            assert_eq!(ctx.strategies().last(), Some(&Strategy::HeuristicText));
            assert!(ctx.strategies().contains(&Strategy::BlockExtraction));
        }
    }

    #[test]
    fn test_only_list_contexts_retry() {
        assert!(ParseContext::TestCaseGeneration.uses_smart_retry());
        assert!(ParseContext::TestCaseImprovement.uses_smart_retry());
        assert!(!ParseContext::TestDesign.uses_smart_retry());
        assert!(!ParseContext::General.uses_smart_retry());
    }

    #[test]
    fn test_default_record_has_expected_keys() {
        for ctx in ParseContext::ALL {
            let record = ctx.default_record();
            for key in ctx.expected_keys() {
                assert!(record.contains_key(*key), "{ctx} default missing {key}");
            }
        }
        let design = ParseContext::TestDesign.default_record();
        assert!(design["resource_estimation"]["time"].is_null());
    }
}
