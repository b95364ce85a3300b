//! `caseforge stage`: one model call for a single-shot stage.

use anyhow::Result;
use console::style;
use std::path::Path;

use caseforge::config::CaseforgeConfig;
use caseforge::stage::Stage;
use caseforge::ui::icons::{RESUME, SPARKLE};

pub async fn cmd_stage(
    config: &CaseforgeConfig,
    stage: Stage,
    prompt: &Path,
    force: bool,
) -> Result<()> {
    let prompt = super::read_input(Some(prompt))?;
    let runner = super::stage_runner(config, None);
    let output = runner.run_single_shot(stage, &prompt, force).await?;

    if output.resumed {
        eprintln!(
            "{}{} reused checkpoint {}",
            RESUME,
            style(stage).bold(),
            style(&output.key).dim()
        );
    } else {
        let via = match output.recovery {
            Some(recovery) => recovery.to_string(),
            None => "default structure".to_string(),
        };
        eprintln!(
            "{}{} finished via {}",
            SPARKLE,
            style(stage).bold(),
            style(via).green()
        );
        if let Some(path) = &output.path {
            eprintln!("  saved to {}", path.display());
        }
    }

    println!("{}", serde_json::to_string_pretty(&output.record)?);
    Ok(())
}
