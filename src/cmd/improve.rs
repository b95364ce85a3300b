//! `caseforge improve`: batch-improve test cases against review feedback.

use anyhow::{Context, Result, bail};
use console::style;
use serde_json::{Value, json};
use std::path::Path;
use tokio::sync::mpsc;

use caseforge::config::CaseforgeConfig;
use caseforge::parser::{self, ParseContext, Record};
use caseforge::stage::Feedback;
use caseforge::stage::test_case::cases_from_value;
use caseforge::ui::icons::{CHECK, PIVOT};
use caseforge::ui::{BatchProgressUI, UiMode, spawn_renderer};

/// Test cases from a file holding either strict JSON or model output.
fn load_cases(path: &Path) -> Result<Vec<Record>> {
    let text = super::read_input(Some(path))?;
    let value = match serde_json::from_str::<Value>(&text) {
        Ok(value) => value,
        Err(_) => parser::parse(&text, ParseContext::TestCaseGeneration)
            .map(Value::Object)
            .with_context(|| format!("No test cases found in {}", path.display()))?,
    };
    match cases_from_value(value) {
        Some(cases) => Ok(cases),
        None => bail!("{} does not contain a test case list", path.display()),
    }
}

fn load_feedback(path: &Path) -> Result<Feedback> {
    let text = super::read_input(Some(path))?;
    Ok(match serde_json::from_str::<Value>(&text) {
        Ok(value) => Feedback::from_value(&value),
        Err(_) => Feedback::from_text(text),
    })
}

pub async fn cmd_improve(
    config: &CaseforgeConfig,
    cases: &Path,
    feedback: &Path,
    output: Option<&Path>,
    force: bool,
    ui: &str,
) -> Result<()> {
    let cases = load_cases(cases)?;
    let feedback = load_feedback(feedback)?;
    if config.verbose {
        eprintln!(
            "{} test cases, {} review comments",
            style(cases.len()).cyan(),
            style(feedback.comments.len()).cyan()
        );
    }

    let (tx, rx) = mpsc::channel(64);
    let renderer = spawn_renderer(BatchProgressUI::new(UiMode::parse(ui), config.verbose), rx);
    let runner = super::stage_runner(config, Some(tx));

    let run = runner
        .improve(cases, feedback, config.workers(), force)
        .await;
    // The runner holds the last sender; the renderer stops once it is gone.
    drop(runner);
    let ui = renderer.await.context("Progress renderer failed")?;
    ui.finish(run.summary.fell_back);

    let document = json!({ "test_cases": run.items });
    let rendered = serde_json::to_string_pretty(&document)?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered + "\n")
                .with_context(|| format!("Failed to write {}", path.display()))?;
            let icon = if run.summary.fell_back > 0 { PIVOT } else { CHECK };
            eprintln!(
                "{}{} test cases written to {}",
                icon,
                style(run.items.len()).green().bold(),
                path.display()
            );
        }
        None => println!("{}", rendered),
    }

    Ok(())
}
