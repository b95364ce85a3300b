//! `caseforge generate`: write test cases from a test design.

use anyhow::{Context, Result, bail};
use console::style;
use serde_json::{Value, json};
use std::path::Path;
use tokio::sync::mpsc;

use caseforge::config::CaseforgeConfig;
use caseforge::parser::{self, ParseContext, Record};
use caseforge::ui::icons::{CHECK, PIVOT, RESUME};
use caseforge::ui::{BatchProgressUI, UiMode, spawn_renderer};

/// Test design from a file holding either a strict JSON object or model output.
fn load_design(path: &Path) -> Result<Record> {
    let text = super::read_input(Some(path))?;
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(design)) => Ok(design),
        Ok(_) => bail!("{} does not contain a test design object", path.display()),
        Err(_) => parser::parse(&text, ParseContext::TestDesign)
            .with_context(|| format!("No test design found in {}", path.display())),
    }
}

pub async fn cmd_generate(
    config: &CaseforgeConfig,
    design: &Path,
    output: Option<&Path>,
    force: bool,
    ui: &str,
) -> Result<()> {
    let design = load_design(design)?;

    let (tx, rx) = mpsc::channel(64);
    let renderer = spawn_renderer(BatchProgressUI::new(UiMode::parse(ui), config.verbose), rx);
    let runner = super::stage_runner(config, Some(tx));

    let generation = runner
        .write_test_cases(&design, config.workers(), force)
        .await;
    drop(runner);
    let ui = renderer.await.context("Progress renderer failed")?;
    let generation = generation?;
    ui.finish(generation.summary.fell_back);

    if generation.resumed {
        eprintln!("{}reused checkpoint {}", RESUME, style(&generation.key).dim());
    } else if generation.whole_design {
        eprintln!("{}wrote test cases from the whole design", PIVOT);
    }
    if let Some(coverage) = &generation.coverage {
        let rate = format!("{:.0}%", coverage.rate() * 100.0);
        let rate = if coverage.is_low() {
            style(rate).red()
        } else {
            style(rate).green()
        };
        eprintln!(
            "Coverage: {}/{} features ({})",
            coverage.covered(),
            coverage.total(),
            rate
        );
        for feature in coverage.uncovered() {
            eprintln!("  - uncovered: {}", feature);
        }
    }

    let document = json!({ "test_cases": generation.test_cases });
    let rendered = serde_json::to_string_pretty(&document)?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered + "\n")
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "{}{} test cases written to {}",
                CHECK,
                style(generation.test_cases.len()).green().bold(),
                path.display()
            );
        }
        None => println!("{}", rendered),
    }

    Ok(())
}
