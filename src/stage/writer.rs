//! Writing stage: test cases generated per feature of the design's coverage
//! matrix, then checked against that matrix.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::test_case::retain_valid;
use crate::batch::BatchWorker;
use crate::errors::StageError;
use crate::model::ModelClient;
use crate::parser::{ParseContext, Record, StructuredParser, TEST_CASES_KEY};

/// Below this share of covered features the coverage check warns.
pub const LOW_COVERAGE_THRESHOLD: f64 = 0.8;

/// Coverage-matrix rows that share one feature, plus the cases written for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureGroup {
    pub feature: String,
    pub items: Vec<Record>,
    #[serde(default)]
    pub test_cases: Vec<Record>,
}

impl FeatureGroup {
    /// Distinct test types named by this group's rows.
    pub fn test_types(&self) -> Vec<String> {
        let mut types = Vec::new();
        for item in &self.items {
            for test_type in split_test_types(item.get("test_type")) {
                if !types.contains(&test_type) {
                    types.push(test_type);
                }
            }
        }
        types
    }
}

fn split_test_types(value: Option<&Value>) -> Vec<String> {
    let parts: Vec<String> = match value {
        Some(Value::String(s)) => s.split([',', '，']).map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.to_string()],
    };
    parts
        .into_iter()
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn coverage_matrix(design: &Record) -> &[Value] {
    match design.get("coverage_matrix") {
        Some(Value::Array(rows)) => rows.as_slice(),
        _ => &[],
    }
}

fn feature_of(row: &Value) -> Option<&str> {
    row.get("feature")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|feature| !feature.is_empty())
}

/// Group the design's coverage matrix by feature, in order of first
/// appearance. Rows without a feature are skipped.
pub fn feature_groups(design: &Record) -> Vec<FeatureGroup> {
    let mut groups: Vec<FeatureGroup> = Vec::new();
    for row in coverage_matrix(design) {
        let (Some(feature), Value::Object(item)) = (feature_of(row), row) else {
            continue;
        };
        match groups.iter_mut().find(|group| group.feature == feature) {
            Some(group) => group.items.push(item.clone()),
            None => groups.push(FeatureGroup {
                feature: feature.to_string(),
                items: vec![item.clone()],
                test_cases: Vec::new(),
            }),
        }
    }
    groups
}

fn approach_section(design: &Record) -> String {
    let mut section = String::from("Test approach:\n");
    if let Some(Value::Object(approach)) = design.get("test_approach") {
        for (key, value) in approach {
            let rendered = match value {
                Value::Array(items) => items
                    .iter()
                    .map(|item| item.as_str().map_or_else(|| item.to_string(), str::to_string))
                    .collect::<Vec<_>>()
                    .join(", "),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            section.push_str(&format!("- {key}: {rendered}\n"));
        }
    }
    section
}

fn priority_section(design: &Record) -> String {
    let mut section = String::from("Priorities:\n");
    if let Some(Value::Array(priorities)) = design.get("priorities") {
        for priority in priorities {
            let level = priority.get("level").and_then(Value::as_str).unwrap_or_default();
            let description = priority
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            section.push_str(&format!("- {level}: {description}\n"));
        }
    }
    section
}

const CASE_FIELDS: &str = "For every test case provide: id, title, description, preconditions, \
     steps, expected_results, priority (one of the levels above, such as P0 or P1) and \
     category (the matching test type).";

const JSON_REMINDER: &str = "Return JSON exactly in this form, with every field present:\n\
     {\"test_cases\": [{\"id\": \"TC-001\", \"title\": \"...\", \"description\": \"...\", \
     \"preconditions\": [\"...\"], \"steps\": [\"...\"], \"expected_results\": [\"...\"], \
     \"priority\": \"P0\", \"category\": \"...\"}]}";

/// Prompt for one feature. A retry repeats the requirements and spells out
/// the JSON shape.
pub fn feature_prompt(group: &FeatureGroup, design: &Record, retry: bool) -> String {
    let feature = &group.feature;
    let types = group
        .test_types()
        .iter()
        .map(|t| format!("- {t}\n"))
        .collect::<String>();
    let mut prompt = format!(
        "Write detailed test cases for the feature '{feature}'.\n\n\
         {approach}\n\
         Test types to cover for '{feature}':\n{types}\n\
         {priorities}\n\
         Every test type needs at least one test case. Ids follow TC-{feature}-XXX and every \
         title names '{feature}'.\n\
         {CASE_FIELDS}\n",
        approach = approach_section(design),
        priorities = priority_section(design),
    );
    if retry {
        prompt.push_str("\nThe previous answer had no usable test cases.\n");
        prompt.push_str(JSON_REMINDER);
    } else {
        prompt.push_str("Return the test cases as JSON in the form {\"test_cases\": [...]}.");
    }
    prompt
}

/// Prompt covering the whole design in one call.
pub fn generation_prompt(design: &Record) -> String {
    let mut coverage = String::from("Coverage matrix:\n");
    for row in coverage_matrix(design) {
        let feature = row.get("feature").and_then(Value::as_str).unwrap_or_default();
        let types = split_test_types(row.get("test_type")).join(", ");
        coverage.push_str(&format!("- feature: {feature}, test types: {types}\n"));
    }
    format!(
        "Write detailed test cases for the test design below.\n\n\
         {approach}\n{coverage}\n{priorities}\n\
         Every feature in the coverage matrix needs at least one test case, including \
         non-functional tests and risk areas.\n\
         {CASE_FIELDS}\n\
         {JSON_REMINDER}",
        approach = approach_section(design),
        priorities = priority_section(design),
    )
}

/// Prefix the title with the feature when it does not already name it.
pub fn ensure_feature_in_title(case: &mut Record, feature: &str) {
    let title = case.get("title").and_then(Value::as_str).unwrap_or_default();
    if !title.to_lowercase().contains(&feature.to_lowercase()) {
        let prefixed = format!("{feature} - {title}");
        case.insert("title".into(), Value::String(prefixed));
    }
}

/// Writes the cases for each feature group of a batch.
pub struct FeatureWorker {
    model: Arc<dyn ModelClient>,
    parser: Arc<StructuredParser>,
    design: Arc<Record>,
    max_retries: u32,
}

impl FeatureWorker {
    pub fn new(
        model: Arc<dyn ModelClient>,
        parser: Arc<StructuredParser>,
        design: Record,
        max_retries: u32,
    ) -> Self {
        Self {
            model,
            parser,
            design: Arc::new(design),
            max_retries,
        }
    }

    async fn attempt(&self, feature: &str, attempt: u32, prompt: &str) -> Option<Vec<Record>> {
        let response = match self.model.complete(prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!(feature, attempt, model = self.model.name(), error = %e, "Model call failed");
                return None;
            }
        };
        debug!(feature, attempt, response_len = response.len(), "Model responded");

        let mut record = self.parser.parse(&response, ParseContext::TestCaseGeneration)?;
        let cases = match record.remove(TEST_CASES_KEY) {
            Some(Value::Array(cases)) => cases,
            _ => return None,
        };
        let valid = retain_valid(cases);
        (!valid.is_empty()).then_some(valid)
    }

    /// Cases for one feature; empty when every attempt failed.
    pub async fn write_feature(&self, group: &FeatureGroup) -> Vec<Record> {
        for attempt in 1..=self.max_retries {
            let prompt = feature_prompt(group, &self.design, attempt > 1);
            if let Some(mut cases) = self.attempt(&group.feature, attempt, &prompt).await {
                for case in &mut cases {
                    ensure_feature_in_title(case, &group.feature);
                }
                info!(feature = %group.feature, attempt, cases = cases.len(), "Wrote test cases");
                return cases;
            }
            warn!(feature = %group.feature, attempt, "No usable test cases");
        }
        Vec::new()
    }
}

#[async_trait]
impl BatchWorker<FeatureGroup> for FeatureWorker {
    async fn process(
        &self,
        index: usize,
        batch: Vec<FeatureGroup>,
    ) -> anyhow::Result<Vec<FeatureGroup>> {
        let mut written = Vec::with_capacity(batch.len());
        for mut group in batch {
            group.test_cases = self.write_feature(&group).await;
            written.push(group);
        }

        if written.iter().all(|group| group.test_cases.is_empty()) {
            warn!(batch = index, groups = written.len(), "No feature in the batch got test cases");
            return Err(StageError::NoValidRecords {
                attempts: self.max_retries,
            }
            .into());
        }
        Ok(written)
    }
}

/// Coverage of one feature from the design's matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCoverage {
    pub feature: String,
    pub test_types: Vec<String>,
    pub covered: bool,
}

/// Which matrix features the written cases cover, judged by titles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub features: Vec<FeatureCoverage>,
}

impl CoverageReport {
    pub fn total(&self) -> usize {
        self.features.len()
    }

    pub fn covered(&self) -> usize {
        self.features.iter().filter(|f| f.covered).count()
    }

    pub fn uncovered(&self) -> Vec<&str> {
        self.features
            .iter()
            .filter(|f| !f.covered)
            .map(|f| f.feature.as_str())
            .collect()
    }

    /// Covered share; an empty matrix counts as fully covered.
    pub fn rate(&self) -> f64 {
        if self.features.is_empty() {
            1.0
        } else {
            self.covered() as f64 / self.total() as f64
        }
    }

    pub fn is_low(&self) -> bool {
        self.rate() < LOW_COVERAGE_THRESHOLD
    }
}

/// Check `cases` against the design's coverage matrix and log the result.
///
/// A feature counts as covered when some case title contains it,
/// case-insensitively. `None` when there is no matrix or no case to check.
pub fn validate_coverage(cases: &[Record], design: &Record) -> Option<CoverageReport> {
    let groups = feature_groups(design);
    if groups.is_empty() || cases.is_empty() {
        return None;
    }

    let titles: Vec<String> = cases
        .iter()
        .filter_map(|case| case.get("title").and_then(Value::as_str))
        .map(str::to_lowercase)
        .collect();
    let report = CoverageReport {
        features: groups
            .iter()
            .map(|group| {
                let needle = group.feature.to_lowercase();
                FeatureCoverage {
                    feature: group.feature.clone(),
                    test_types: group.test_types(),
                    covered: titles.iter().any(|title| title.contains(&needle)),
                }
            })
            .collect(),
    };

    info!(total = report.total(), covered = report.covered(), "Coverage matrix check");
    let uncovered = report.uncovered();
    if !uncovered.is_empty() {
        warn!(uncovered = ?uncovered, "Features without test cases");
        if report.is_low() {
            warn!(rate = %format!("{:.0}%", report.rate() * 100.0), "Test case coverage is low");
        }
    }
    Some(report)
}

/// Checkpoint content for the finished writing stage.
pub fn generation_record(
    cases: &[Record],
    feature_count: usize,
    coverage: Option<&CoverageReport>,
    generated_at: &str,
) -> Record {
    let mut record = Record::new();
    record.insert(TEST_CASES_KEY.into(), json!(cases));
    record.insert("feature_count".into(), json!(feature_count));
    record.insert("generation_status".into(), json!("completed"));
    record.insert("generated_at".into(), json!(generated_at));
    if let Some(coverage) = coverage {
        record.insert(
            "coverage".into(),
            json!({
                "total_features": coverage.total(),
                "covered_features": coverage.covered(),
                "uncovered": coverage.uncovered(),
                "rate": coverage.rate(),
            }),
        );
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModel;

    fn design() -> Record {
        json!({
            "test_approach": {"methods": ["等价类划分", "边界值分析"], "tools": "pytest"},
            "coverage_matrix": [
                {"feature": "文件上传", "test_type": "功能测试, 边界测试"},
                {"feature": "Login", "test_type": "安全测试"},
                {"feature": "文件上传", "test_type": "性能测试"},
                {"feature": "", "test_type": "功能测试"},
                "not a row"
            ],
            "priorities": [{"level": "P0", "description": "核心功能"}]
        })
        .as_object()
        .unwrap()
        .clone()
    }

    fn case(id: &str, title: &str) -> Value {
        json!({
            "id": id,
            "title": title,
            "description": "验证功能",
            "preconditions": [],
            "steps": ["打开页面"],
            "expected_results": ["成功"],
            "priority": "P0",
            "category": "功能测试"
        })
    }

    fn worker(model: Arc<ScriptedModel>, retries: u32) -> FeatureWorker {
        FeatureWorker::new(model, Arc::new(StructuredParser::new()), design(), retries)
    }

    #[test]
    fn test_feature_groups_in_first_appearance_order() {
        let groups = feature_groups(&design());
        let names: Vec<_> = groups.iter().map(|g| g.feature.as_str()).collect();
        assert_eq!(names, vec!["文件上传", "Login"]);
        assert_eq!(groups[0].items.len(), 2);
        assert_eq!(groups[0].test_types(), vec!["功能测试", "边界测试", "性能测试"]);
        assert!(feature_groups(&Record::new()).is_empty());
    }

    #[test]
    fn test_feature_prompt_names_feature_and_design() {
        let group = &feature_groups(&design())[0];
        let first = feature_prompt(group, &design(), false);
        assert!(first.contains("TC-文件上传-XXX"));
        assert!(first.contains("- methods: 等价类划分, 边界值分析"));
        assert!(first.contains("- P0: 核心功能"));
        assert!(first.contains("- 边界测试"));
        assert!(!first.contains("previous answer"));
        let retry = feature_prompt(group, &design(), true);
        assert!(retry.contains("\"expected_results\""));
    }

    #[test]
    fn test_generation_prompt_lists_matrix() {
        let prompt = generation_prompt(&design());
        assert!(prompt.contains("- feature: Login, test types: 安全测试"));
    }

    #[test]
    fn test_title_prefixed_only_when_feature_missing() {
        let mut named = case("TC-1", "LOGIN with wrong password").as_object().unwrap().clone();
        ensure_feature_in_title(&mut named, "Login");
        assert_eq!(named["title"], "LOGIN with wrong password");

        let mut bare = case("TC-2", "超大文件").as_object().unwrap().clone();
        ensure_feature_in_title(&mut bare, "文件上传");
        assert_eq!(bare["title"], "文件上传 - 超大文件");
    }

    #[tokio::test]
    async fn test_worker_retries_then_fills_groups() {
        let model = Arc::new(ScriptedModel::new([
            "I need more details first.".to_string(),
            json!({"test_cases": [case("TC-文件上传-001", "上传超大文件")]}).to_string(),
            json!({"test_cases": [case("TC-Login-001", "login lockout")]}).to_string(),
        ]));
        let groups = feature_groups(&design());
        let written = worker(model.clone(), 2).process(0, groups).await.unwrap();

        assert_eq!(model.calls(), 3);
        assert_eq!(written[0].test_cases[0]["title"], "文件上传 - 上传超大文件");
        assert_eq!(written[1].test_cases[0]["title"], "login lockout");
    }

    #[tokio::test]
    async fn test_worker_errors_when_no_group_gets_cases() {
        let model = Arc::new(ScriptedModel::default().then_fail("down"));
        let groups = feature_groups(&design());
        let err = worker(model, 1).process(3, groups).await.unwrap_err();
        assert!(err.to_string().contains("after 1 attempts"));
    }

    #[test]
    fn test_coverage_report() {
        let cases = retain_valid([case("TC-1", "文件上传 - 正常上传"), case("TC-2", "其他")]);
        let report = validate_coverage(&cases, &design()).unwrap();
        assert_eq!(report.total(), 2);
        assert_eq!(report.covered(), 1);
        assert_eq!(report.uncovered(), vec!["Login"]);
        assert!(report.is_low());
        assert_eq!(report.features[1].test_types, vec!["安全测试"]);

        let cases = retain_valid([case("TC-1", "文件上传"), case("TC-2", "Login ok")]);
        let report = validate_coverage(&cases, &design()).unwrap();
        assert!(!report.is_low());
        assert_eq!(report.rate(), 1.0);

        assert!(validate_coverage(&[], &design()).is_none());
        assert!(validate_coverage(&cases, &Record::new()).is_none());
    }

    #[test]
    fn test_generation_record_fields() {
        let cases = retain_valid([case("TC-1", "文件上传")]);
        let report = validate_coverage(&cases, &design());
        let record = generation_record(&cases, 2, report.as_ref(), "2026-01-01T00:00:00Z");
        assert_eq!(record["generation_status"], "completed");
        assert_eq!(record["feature_count"], 2);
        assert_eq!(record["coverage"]["uncovered"], json!(["Login"]));
        assert_eq!(record[TEST_CASES_KEY].as_array().unwrap().len(), 1);
    }
}
