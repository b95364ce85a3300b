//! `caseforge parse`: recover structured data from model output.

use anyhow::{Result, bail};
use console::style;
use std::path::Path;

use caseforge::parser::{ParseContext, StructuredParser};

pub fn cmd_parse(
    input: Option<&Path>,
    context: ParseContext,
    or_default: bool,
    trace: bool,
) -> Result<()> {
    let text = super::read_input(input)?;
    let parser = StructuredParser::new();

    let record = match parser.parse_traced(&text, context) {
        Some(outcome) => {
            if trace {
                eprintln!(
                    "{} {} ({})",
                    style("Recovered via").dim(),
                    style(outcome.recovery).green().bold(),
                    context
                );
            }
            outcome.record
        }
        None if or_default => {
            if trace {
                eprintln!("{} ({})", style("Using default structure").yellow(), context);
            }
            context.default_record()
        }
        None => bail!("No structured data could be recovered ({} context)", context),
    };

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
