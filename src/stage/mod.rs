//! Pipeline stages: the catalogue, single-shot stage calls, the per-feature
//! writing stage and the batched improvement stage.

pub mod feedback;
pub mod improve;
pub mod test_case;
pub mod writer;

pub use feedback::{Feedback, ReviewComments, parse_review_feedback};
pub use improve::{ImproveWorker, improvement_prompt};
pub use test_case::{TestCaseIssue, cases_from_value, normalize_and_validate, retain_valid};
pub use writer::{CoverageReport, FeatureGroup, FeatureWorker, feature_groups, validate_coverage};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::batch::{BatchOrchestrator, BatchRun, BatchSummary};
use crate::checkpoint::{CheckpointStore, checkpoint_key};
use crate::errors::StageError;
use crate::model::ModelClient;
use crate::parser::{ParseContext, Record, Recovery, StructuredParser, TEST_CASES_KEY};

/// The stages of the test-case pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    RequirementAnalysis,
    TestDesign,
    TestCaseWriting,
    TestCaseImprovement,
    QualityReview,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::RequirementAnalysis,
        Stage::TestDesign,
        Stage::TestCaseWriting,
        Stage::TestCaseImprovement,
        Stage::QualityReview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::RequirementAnalysis => "requirement-analysis",
            Stage::TestDesign => "test-design",
            Stage::TestCaseWriting => "test-case-writing",
            Stage::TestCaseImprovement => "test-case-improvement",
            Stage::QualityReview => "quality-review",
        }
    }

    /// Default owner name used in checkpoint keys.
    pub fn owner(&self) -> &'static str {
        match self {
            Stage::RequirementAnalysis => "requirement_analyst",
            Stage::TestDesign => "test_designer",
            Stage::TestCaseWriting | Stage::TestCaseImprovement => "test_case_writer",
            Stage::QualityReview => "quality_assurance",
        }
    }

    /// Qualifier appended to the owner in checkpoint keys.
    pub fn qualifier(&self) -> &'static str {
        match self {
            Stage::RequirementAnalysis => "analysis",
            Stage::TestDesign => "design",
            Stage::TestCaseWriting => "cases",
            Stage::TestCaseImprovement => "improve",
            Stage::QualityReview => "review",
        }
    }

    /// Parse context for this stage's model output.
    pub fn context(&self) -> ParseContext {
        match self {
            Stage::RequirementAnalysis => ParseContext::RequirementAnalysis,
            Stage::TestDesign => ParseContext::TestDesign,
            Stage::TestCaseWriting => ParseContext::TestCaseGeneration,
            Stage::TestCaseImprovement => ParseContext::TestCaseImprovement,
            Stage::QualityReview => ParseContext::QualityReview,
        }
    }

    /// Key of the list payload for list-shaped stages.
    pub fn payload_key(&self) -> Option<&'static str> {
        self.context().list_key()
    }

    /// Stages owned by the test-case writer take their owner from config.
    pub fn is_writer_stage(&self) -> bool {
        matches!(self, Stage::TestCaseWriting | Stage::TestCaseImprovement)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "requirement-analysis" | "analysis" => Ok(Stage::RequirementAnalysis),
            "test-design" | "design" => Ok(Stage::TestDesign),
            "test-case-writing" | "writing" | "generation" => Ok(Stage::TestCaseWriting),
            "test-case-improvement" | "improvement" | "improve" => Ok(Stage::TestCaseImprovement),
            "quality-review" | "review" => Ok(Stage::QualityReview),
            other => Err(format!(
                "unknown stage '{other}'; expected one of: {}",
                Stage::ALL.map(|s| s.as_str()).join(", ")
            )),
        }
    }
}

/// Result of a single-shot stage.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub stage: Stage,
    pub key: String,
    pub record: Record,
    /// How the record was recovered; `None` for defaults and resumed runs.
    pub recovery: Option<Recovery>,
    pub resumed: bool,
    pub path: Option<PathBuf>,
}

/// Result of the writing stage.
#[derive(Debug, Clone)]
pub struct CaseGeneration {
    pub key: String,
    pub test_cases: Vec<Record>,
    pub feature_count: usize,
    pub coverage: Option<CoverageReport>,
    /// Whether one whole-design call replaced the per-feature batches.
    pub whole_design: bool,
    pub resumed: bool,
    pub summary: BatchSummary,
    pub path: Option<PathBuf>,
}

/// Key under which feature-group checkpoints store their groups.
pub const FEATURE_GROUPS_KEY: &str = "feature_groups";

/// Runs stages against a model, a parser and a checkpoint store.
#[derive(Clone)]
pub struct StageRunner {
    model: Arc<dyn ModelClient>,
    store: Arc<dyn CheckpointStore>,
    parser: Arc<StructuredParser>,
    orchestrator: BatchOrchestrator,
    writer_owner: String,
    max_retries: u32,
}

impl StageRunner {
    pub fn new(
        model: Arc<dyn ModelClient>,
        store: Arc<dyn CheckpointStore>,
        orchestrator: BatchOrchestrator,
    ) -> Self {
        Self {
            model,
            store,
            parser: Arc::new(StructuredParser::new()),
            orchestrator,
            writer_owner: Stage::TestCaseWriting.owner().to_string(),
            max_retries: 3,
        }
    }

    pub fn with_writer_owner(mut self, owner: impl Into<String>) -> Self {
        self.writer_owner = owner.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn parser(&self) -> &StructuredParser {
        &self.parser
    }

    /// Checkpoint key for `stage`.
    pub fn checkpoint_key(&self, stage: Stage) -> String {
        let owner = if stage.is_writer_stage() {
            self.writer_owner.as_str()
        } else {
            stage.owner()
        };
        checkpoint_key(owner, stage.qualifier())
    }

    /// One model call, parsed in the stage's context.
    ///
    /// Unparseable output is replaced by the context's default record so the
    /// pipeline keeps going. An existing checkpoint is reused unless `force`.
    pub async fn run_single_shot(
        &self,
        stage: Stage,
        prompt: &str,
        force: bool,
    ) -> Result<StageOutput, StageError> {
        let key = self.checkpoint_key(stage);
        if !force && let Some(record) = self.store.load_checkpoint(&key) {
            info!(%stage, %key, "Reusing stage checkpoint");
            return Ok(StageOutput {
                stage,
                key,
                record,
                recovery: None,
                resumed: true,
                path: None,
            });
        }

        let response = self.model.complete(prompt).await?;
        let context = stage.context();
        let (mut record, recovery) = match self.parser.parse_traced(&response, context) {
            Some(outcome) => (outcome.record, Some(outcome.recovery)),
            None => {
                warn!(%stage, "Falling back to the default structure");
                (context.default_record(), None)
            }
        };

        if let Some(list_key) = stage.payload_key() {
            let raw = match record.remove(list_key) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            let total = raw.len();
            let valid = retain_valid(raw);
            if valid.len() < total {
                warn!(%stage, kept = valid.len(), total, "Dropped invalid test cases");
            }
            record.insert(list_key.to_string(), json!(valid));
        }

        let path = self.store.save_checkpoint(&key, &record);
        info!(%stage, %key, saved = path.is_some(), "Stage finished");
        Ok(StageOutput {
            stage,
            key,
            record,
            recovery,
            resumed: false,
            path,
        })
    }

    /// Write test cases for `design`, one feature group of its coverage
    /// matrix at a time, `workers` groups per batch.
    ///
    /// Without a coverage matrix, or when no feature yields a case, a single
    /// whole-design call is made instead. The merged cases are checked
    /// against the matrix and checkpointed under the writing stage's key.
    pub async fn write_test_cases(
        &self,
        design: &Record,
        workers: usize,
        force: bool,
    ) -> Result<CaseGeneration, StageError> {
        let key = self.checkpoint_key(Stage::TestCaseWriting);
        if !force
            && let Some(record) = self.store.load_checkpoint(&key)
            && let Some(test_cases) = cases_from_value(Value::Object(record.clone()))
        {
            info!(%key, cases = test_cases.len(), "Reusing test case checkpoint");
            return Ok(CaseGeneration {
                key,
                feature_count: record
                    .get("feature_count")
                    .and_then(Value::as_u64)
                    .unwrap_or_default() as usize,
                coverage: validate_coverage(&test_cases, design),
                test_cases,
                whole_design: false,
                resumed: true,
                summary: BatchSummary::default(),
                path: None,
            });
        }

        let groups = feature_groups(design);
        let feature_count = groups.len();
        let mut summary = BatchSummary::default();
        let mut test_cases = Vec::new();

        if !groups.is_empty() {
            let prefix = checkpoint_key(&self.writer_owner, "features");
            let config = self
                .orchestrator
                .config()
                .clone()
                .with_payload_key(FEATURE_GROUPS_KEY);
            let orchestrator = self.orchestrator.clone().with_config(config);
            let worker = Arc::new(FeatureWorker::new(
                self.model.clone(),
                self.parser.clone(),
                design.clone(),
                self.max_retries,
            ));
            let run = orchestrator
                .run_resumable(groups, worker, workers, &prefix, force)
                .await;
            summary = run.summary;
            test_cases = run.items.into_iter().flat_map(|group| group.test_cases).collect();
            info!(%prefix, features = feature_count, cases = test_cases.len(), "Feature groups written");
        }

        let whole_design = test_cases.is_empty();
        if whole_design {
            warn!(features = feature_count, "No per-feature test cases; writing from the whole design");
            let output = self
                .run_single_shot(Stage::TestCaseWriting, &writer::generation_prompt(design), true)
                .await?;
            test_cases = cases_from_value(Value::Object(output.record)).unwrap_or_default();
        }

        let coverage = validate_coverage(&test_cases, design);
        let record = writer::generation_record(
            &test_cases,
            feature_count,
            coverage.as_ref(),
            &Utc::now().to_rfc3339(),
        );
        let path = self.store.save_checkpoint(&key, &record);
        info!(%key, cases = test_cases.len(), saved = path.is_some(), "Test case writing finished");

        Ok(CaseGeneration {
            key,
            test_cases,
            feature_count,
            coverage,
            whole_design,
            resumed: false,
            summary,
            path,
        })
    }

    /// Improve `cases` against `feedback` in batches of `workers`.
    ///
    /// Batches the model cannot improve keep their original cases. Empty
    /// feedback returns the cases unchanged without calling the model.
    pub async fn improve(
        &self,
        cases: Vec<Record>,
        feedback: Feedback,
        workers: usize,
        force: bool,
    ) -> BatchRun<Record> {
        let prefix = self.checkpoint_key(Stage::TestCaseImprovement);
        if feedback.is_empty() {
            warn!(%prefix, "No review feedback; keeping test cases as they are");
            let mut run = BatchRun::empty(&prefix, uuid::Uuid::new_v4().to_string());
            run.summary.total_items = cases.len();
            run.items = cases;
            return run;
        }

        let mut extras = Record::new();
        extras.insert(
            "review_comments".into(),
            serde_json::to_value(&feedback.comments).unwrap_or_else(|_| json!({})),
        );
        let config = self
            .orchestrator
            .config()
            .clone()
            .with_payload_key(TEST_CASES_KEY)
            .with_checkpoint_extras(extras);
        let orchestrator = self.orchestrator.clone().with_config(config);

        let worker = Arc::new(ImproveWorker::new(
            self.model.clone(),
            self.parser.clone(),
            feedback,
            self.max_retries,
        ));
        orchestrator
            .run_resumable(cases, worker, workers, &prefix, force)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchConfig;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::model::ScriptedModel;

    fn case(id: &str) -> Record {
        json!({
            "id": id,
            "title": "导出报表",
            "description": "导出当月报表",
            "preconditions": ["已登录"],
            "steps": ["进入报表页", "点击导出"],
            "expected_results": ["下载 xlsx 文件"],
            "priority": "2",
            "category": "功能测试"
        })
        .as_object()
        .unwrap()
        .clone()
    }

    fn runner(model: Arc<ScriptedModel>) -> (StageRunner, Arc<MemoryCheckpointStore>) {
        let store = Arc::new(MemoryCheckpointStore::new());
        let orchestrator = BatchOrchestrator::new(store.clone(), BatchConfig::default());
        (StageRunner::new(model, store.clone(), orchestrator), store)
    }

    #[test]
    fn test_stage_catalogue() {
        assert_eq!(Stage::QualityReview.context(), ParseContext::QualityReview);
        assert_eq!(Stage::TestCaseImprovement.payload_key(), Some("test_cases"));
        assert_eq!(Stage::TestDesign.payload_key(), None);
        assert_eq!("improve".parse::<Stage>().unwrap(), Stage::TestCaseImprovement);
        assert_eq!("quality_review".parse::<Stage>().unwrap(), Stage::QualityReview);
        assert!("deploy".parse::<Stage>().is_err());
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
    }

    #[test]
    fn test_checkpoint_keys() {
        let (runner, _) = runner(Arc::new(ScriptedModel::default()));
        assert_eq!(
            runner.checkpoint_key(Stage::TestCaseImprovement),
            "test_case_writer_improve"
        );
        assert_eq!(runner.checkpoint_key(Stage::TestDesign), "test_designer_design");
        let runner = runner.with_writer_owner("writer");
        assert_eq!(runner.checkpoint_key(Stage::TestCaseWriting), "writer_cases");
        assert_eq!(runner.checkpoint_key(Stage::QualityReview), "quality_assurance_review");
    }

    #[tokio::test]
    async fn test_single_shot_parses_and_checkpoints() {
        let model = Arc::new(ScriptedModel::new([
            "Here you go:\n```json\n{\"functional_requirements\": [\"登录\"], \"risk_areas\": []}\n```",
        ]));
        let (runner, store) = runner(model.clone());

        let output = runner
            .run_single_shot(Stage::RequirementAnalysis, "analyse", false)
            .await
            .unwrap();
        assert_eq!(output.record["functional_requirements"], json!(["登录"]));
        assert!(output.recovery.is_some());
        assert!(store.get("requirement_analyst_analysis").unwrap().is_some());

        let again = runner
            .run_single_shot(Stage::RequirementAnalysis, "analyse", false)
            .await
            .unwrap();
        assert!(again.resumed);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_single_shot_falls_back_to_default() {
        let model = Arc::new(ScriptedModel::new(["I could not review these."]));
        let (runner, _) = runner(model);
        let output = runner
            .run_single_shot(Stage::QualityReview, "review", false)
            .await
            .unwrap();
        assert!(output.recovery.is_none());
        assert_eq!(output.record["review_status"], "pending");
    }

    #[tokio::test]
    async fn test_single_shot_model_error_propagates() {
        let (runner, store) = runner(Arc::new(ScriptedModel::default().then_fail("down")));
        let err = runner
            .run_single_shot(Stage::TestDesign, "design", true)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Model(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_writing_stage_keeps_only_valid_cases() {
        let response = json!({"test_cases": [case("TC-1"), {"id": "TC-2"}]}).to_string();
        let (runner, _) = runner(Arc::new(ScriptedModel::new([response])));
        let output = runner
            .run_single_shot(Stage::TestCaseWriting, "write", false)
            .await
            .unwrap();
        let cases = output.record["test_cases"].as_array().unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0]["priority"], "P2");
    }

    fn design_with_matrix() -> Record {
        json!({
            "coverage_matrix": [
                {"feature": "导出报表", "test_type": "功能测试"},
                {"feature": "权限", "test_type": "安全测试"}
            ],
            "priorities": [{"level": "P2", "description": "常规"}]
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[tokio::test]
    async fn test_write_test_cases_per_feature_then_resume() {
        let mut guarded = case("TC-权限-001");
        guarded.insert("title".into(), json!("普通用户导出"));
        let model = Arc::new(ScriptedModel::new([
            json!({"test_cases": [case("TC-导出报表-001")]}).to_string(),
            json!({"test_cases": [guarded]}).to_string(),
        ]));
        let (runner, store) = runner(model.clone());

        let generation = runner.write_test_cases(&design_with_matrix(), 1, false).await.unwrap();
        assert!(!generation.whole_design);
        assert_eq!(generation.feature_count, 2);
        assert_eq!(generation.test_cases.len(), 2);
        assert_eq!(generation.test_cases[1]["title"], "权限 - 普通用户导出");
        let coverage = generation.coverage.unwrap();
        assert_eq!(coverage.covered(), 2);

        let saved = store.get("test_case_writer_cases").unwrap().unwrap();
        assert_eq!(saved["generation_status"], "completed");
        assert_eq!(saved["coverage"]["rate"], 1.0);
        let groups = store.get("test_case_writer_features").unwrap().unwrap();
        assert_eq!(groups[FEATURE_GROUPS_KEY].as_array().unwrap().len(), 2);
        assert!(store.list_by_prefix("test_case_writer_features_batch_").unwrap().is_empty());

        let again = runner.write_test_cases(&design_with_matrix(), 1, false).await.unwrap();
        assert!(again.resumed);
        assert_eq!(again.test_cases.len(), 2);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_write_test_cases_without_matrix_uses_whole_design() {
        let model = Arc::new(ScriptedModel::new([
            json!({"test_cases": [case("TC-1"), {"id": "TC-2"}]}).to_string(),
        ]));
        let (runner, store) = runner(model.clone());
        let design = json!({"test_approach": {"methods": ["场景法"]}})
            .as_object()
            .unwrap()
            .clone();

        let generation = runner.write_test_cases(&design, 2, false).await.unwrap();
        assert!(generation.whole_design);
        assert_eq!(generation.feature_count, 0);
        assert_eq!(generation.test_cases.len(), 1);
        assert!(generation.coverage.is_none());
        assert_eq!(model.calls(), 1);
        let saved = store.get("test_case_writer_cases").unwrap().unwrap();
        assert_eq!(saved["feature_count"], 0);
    }

    #[tokio::test]
    async fn test_write_test_cases_falls_back_when_every_feature_fails() {
        let model = Arc::new(ScriptedModel::new([
            "抱歉，无法生成。".to_string(),
            "请提供更多信息。".to_string(),
            json!({"test_cases": [case("TC-9")]}).to_string(),
        ]));
        let (runner, store) = runner(model.clone());
        let runner = runner.with_max_retries(1);

        let generation = runner.write_test_cases(&design_with_matrix(), 2, false).await.unwrap();
        assert!(generation.whole_design);
        assert_eq!(generation.summary.fell_back, generation.summary.total_batches);
        assert_eq!(generation.test_cases.len(), 1);
        assert_eq!(model.calls(), 3);
        // the whole-design case names only one feature
        assert_eq!(generation.coverage.unwrap().uncovered(), vec!["权限"]);
        assert!(store.get("test_case_writer_cases").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_improve_falls_back_per_batch() {
        let mut improved = case("TC-1");
        improved.insert("title".into(), json!("导出报表（改进）"));
        // sequential run over 3 cases: three batches of one
        let model = Arc::new(
            ScriptedModel::new([json!({"test_cases": [improved]}).to_string()])
                .then_fail("down")
                .then_fail("down"),
        );
        let (runner, store) = runner(model);
        let runner = runner.with_max_retries(1);

        let run = runner
            .improve(
                vec![case("TC-1"), case("TC-2"), case("TC-3")],
                Feedback::from_text("2. 清晰度\n- 标题更具体"),
                1,
                false,
            )
            .await;

        assert_eq!(run.items.len(), 3);
        assert_eq!(run.items[0]["title"], "导出报表（改进）");
        assert_eq!(run.items[1]["id"], "TC-2");
        assert_eq!(run.summary.fell_back, 2);

        let stage = store.get("test_case_writer_improve").unwrap().unwrap();
        assert_eq!(stage["test_cases"].as_array().unwrap().len(), 3);
        assert_eq!(stage["review_comments"]["clarity"], json!(["标题更具体"]));
        assert!(store.list_by_prefix("test_case_writer_improve_batch_").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_improve_without_feedback_is_a_no_op() {
        let model = Arc::new(ScriptedModel::default());
        let (runner, store) = runner(model.clone());
        let run = runner.improve(vec![case("TC-1")], Feedback::default(), 2, false).await;
        assert_eq!(run.items.len(), 1);
        assert_eq!(model.calls(), 0);
        assert!(store.is_empty());
    }
}
