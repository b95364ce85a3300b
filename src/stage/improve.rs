//! Improvement stage: rewrite a batch of test cases against review feedback.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::feedback::Feedback;
use super::test_case::retain_valid;
use crate::batch::BatchWorker;
use crate::errors::StageError;
use crate::model::ModelClient;
use crate::parser::{ParseContext, Record, StructuredParser, TEST_CASES_KEY};

/// Build the improvement prompt for one batch.
pub fn improvement_prompt(cases: &[Record], feedback: &Feedback) -> String {
    let cases_json = serde_json::to_string_pretty(&json!({ "test_cases": cases }))
        .unwrap_or_else(|_| "{\"test_cases\": []}".to_string());

    format!(
        "Improve the existing test cases and add missing ones based on the quality review below.\n\n\
         Original test cases:\n{cases_json}\n\n\
         Quality review feedback:\n{feedback}\n\n\
         Make sure that:\n\
         1. Completeness: every required field is present and meaningful\n\
         2. Clarity: titles, steps and expected results are unambiguous\n\
         3. Executability: every step has a matching expected result\n\
         4. Boundary cases are covered\n\
         5. Error scenarios are covered\n\
         6. Scenarios or boundaries the review says are missing get new test cases\n\n\
         Keep and improve every original test case. New test cases follow the same \
         structure and get unique ids.\n\
         Return the complete list as JSON in the form {{\"test_cases\": [...]}} \
         with no extra explanation.",
        feedback = feedback.text.trim(),
    )
}

/// Calls the model for each batch, retrying until it yields valid cases.
pub struct ImproveWorker {
    model: Arc<dyn ModelClient>,
    parser: Arc<StructuredParser>,
    feedback: Arc<Feedback>,
    max_retries: u32,
}

impl ImproveWorker {
    pub fn new(
        model: Arc<dyn ModelClient>,
        parser: Arc<StructuredParser>,
        feedback: Feedback,
        max_retries: u32,
    ) -> Self {
        Self {
            model,
            parser,
            feedback: Arc::new(feedback),
            max_retries,
        }
    }

    /// One model round-trip; `None` when the attempt produced nothing usable.
    async fn attempt(&self, index: usize, attempt: u32, prompt: &str) -> Option<Vec<Record>> {
        let response = match self.model.complete(prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!(batch = index, attempt, model = self.model.name(), error = %e, "Model call failed");
                return None;
            }
        };
        debug!(batch = index, attempt, response_len = response.len(), "Model responded");

        let Some(mut record) = self.parser.parse(&response, ParseContext::TestCaseImprovement)
        else {
            warn!(batch = index, attempt, "Response could not be parsed");
            return None;
        };
        let cases = match record.remove(TEST_CASES_KEY) {
            Some(Value::Array(cases)) if !cases.is_empty() => cases,
            _ => {
                warn!(batch = index, attempt, "Response has no test cases");
                return None;
            }
        };

        let returned = cases.len();
        let valid = retain_valid(cases);
        if valid.is_empty() {
            warn!(batch = index, attempt, returned, "No returned test case passed validation");
            return None;
        }
        Some(valid)
    }
}

#[async_trait]
impl BatchWorker<Record> for ImproveWorker {
    async fn process(&self, index: usize, batch: Vec<Record>) -> anyhow::Result<Vec<Record>> {
        let prompt = improvement_prompt(&batch, &self.feedback);

        for attempt in 1..=self.max_retries {
            if let Some(valid) = self.attempt(index, attempt, &prompt).await {
                info!(
                    batch = index,
                    attempt,
                    input = batch.len(),
                    output = valid.len(),
                    "Improved test cases"
                );
                return Ok(valid);
            }
        }

        Err(StageError::NoValidRecords {
            attempts: self.max_retries,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModel;

    fn case(id: &str) -> Record {
        json!({
            "id": id,
            "title": "查询订单",
            "description": "按订单号查询",
            "preconditions": [],
            "steps": ["输入订单号", "点击查询"],
            "expected_results": ["显示订单详情"],
            "priority": "P1",
            "category": "功能测试"
        })
        .as_object()
        .unwrap()
        .clone()
    }

    fn worker(model: Arc<ScriptedModel>, retries: u32) -> ImproveWorker {
        ImproveWorker::new(
            model,
            Arc::new(StructuredParser::new()),
            Feedback::from_text("1. 完整性\n- 补充异常订单号"),
            retries,
        )
    }

    #[test]
    fn test_prompt_carries_cases_and_feedback() {
        let prompt = improvement_prompt(&[case("TC-7")], &Feedback::from_text("- be precise"));
        assert!(prompt.contains("\"TC-7\""));
        assert!(prompt.contains("- be precise"));
        assert!(prompt.contains("{\"test_cases\": [...]}"));
    }

    #[tokio::test]
    async fn test_first_valid_response_wins() {
        let response = format!(
            "```json\n{}\n```",
            json!({"test_cases": [case("TC-1"), case("TC-2")]})
        );
        let model = Arc::new(ScriptedModel::new([response]));
        let improved = worker(model.clone(), 3).process(0, vec![case("TC-1")]).await.unwrap();
        assert_eq!(improved.len(), 2);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_retries_past_garbage_and_invalid_cases() {
        let model = Arc::new(
            ScriptedModel::new([
                "sorry, I cannot help with that".to_string(),
                json!({"test_cases": [{"id": "TC-1"}]}).to_string(),
            ])
            .then_fail("overloaded"),
        );
        let err = worker(model.clone(), 3)
            .process(1, vec![case("TC-1")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("after 3 attempts"));
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_invalid_cases_are_dropped_from_output() {
        let response = json!({"test_cases": [case("TC-1"), {"id": "TC-bad"}]}).to_string();
        let model = Arc::new(ScriptedModel::new([response]));
        let improved = worker(model, 1).process(0, vec![case("TC-1")]).await.unwrap();
        assert_eq!(improved.len(), 1);
        assert_eq!(improved[0]["id"], "TC-1");
    }
}
