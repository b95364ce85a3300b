//! Batch run progress, rendered from the orchestrator's event stream.
//!
//! Output modes:
//! - `full`: progress bar with colored status lines
//! - `minimal`: one plain line per notable event
//! - `json`: one JSON object per event

use console::{Term, style};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::batch::{BatchEvent, BatchStatus};
use crate::ui::icons::{CHECK, CROSS, PIVOT, RESUME, RUNNING, SPARKLE};

/// Output mode for progress display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    #[default]
    Full,
    Minimal,
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

impl UiMode {
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

/// Plain-text line for an event in minimal mode.
fn minimal_line(event: &BatchEvent) -> Option<String> {
    match event {
        BatchEvent::Planned {
            prefix,
            items,
            batches,
            concurrency,
            ..
        } => Some(format!(
            "{prefix}: {items} items in {batches} batches ({concurrency} workers)"
        )),
        BatchEvent::FellBack { index, reason } => {
            Some(format!("batch {index} kept original items: {reason}"))
        }
        BatchEvent::Merged { prefix, items, .. } => Some(format!("{prefix}: merged {items} items")),
        BatchEvent::Resumed { prefix, items } => {
            Some(format!("{prefix}: reused checkpoint with {items} items"))
        }
        BatchEvent::Started { .. } | BatchEvent::Completed { .. } => None,
    }
}

/// Progress display for one batch run. Writes to stderr.
pub struct BatchProgressUI {
    mode: UiMode,
    bar: ProgressBar,
    term: Term,
    verbose: bool,
}

impl BatchProgressUI {
    pub fn new(mode: UiMode, verbose: bool) -> Self {
        let bar = if mode == UiMode::Full {
            let bar = ProgressBar::new(0);
            if let Ok(bar_style) = ProgressStyle::default_bar()
                .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            {
                bar.set_style(bar_style.progress_chars("█▓▒░"));
            }
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            mode,
            bar,
            term: Term::stderr(),
            verbose,
        }
    }

    pub fn handle_event(&self, event: &BatchEvent) {
        match self.mode {
            UiMode::Json => {
                if let Ok(json) = serde_json::to_string(event) {
                    let _ = writeln!(&self.term, "{}", json);
                }
            }
            UiMode::Minimal => {
                if let Some(line) = minimal_line(event) {
                    let _ = writeln!(&self.term, "{}", line);
                }
            }
            UiMode::Full => self.handle_full(event),
        }
    }

    fn handle_full(&self, event: &BatchEvent) {
        match event {
            BatchEvent::Planned {
                prefix,
                items,
                batches,
                batch_size,
                concurrency,
            } => {
                self.bar.set_length(*batches as u64);
                self.bar.set_prefix(prefix.clone());
                self.bar.set_message(format!(
                    "{} items, batch size {}, {} workers",
                    items, batch_size, concurrency
                ));
            }
            BatchEvent::Started { index, size } => {
                if self.verbose {
                    self.bar.println(format!(
                        "  {}batch {} started ({} items)",
                        RUNNING,
                        style(index).cyan(),
                        size
                    ));
                }
            }
            BatchEvent::Completed {
                index,
                status,
                items,
            } => {
                self.bar.inc(1);
                if self.verbose && *status == BatchStatus::Completed {
                    self.bar.println(format!(
                        "  {}batch {} -> {} items",
                        CHECK,
                        style(index).cyan(),
                        items
                    ));
                }
            }
            BatchEvent::FellBack { index, reason } => {
                self.bar.println(format!(
                    "  {}batch {} kept original items: {}",
                    PIVOT,
                    style(index).yellow(),
                    style(reason).dim()
                ));
            }
            BatchEvent::Merged { items, batches, .. } => {
                self.bar.finish_with_message(format!(
                    "{}merged {} items from {} batches",
                    SPARKLE,
                    style(items).green().bold(),
                    batches
                ));
            }
            BatchEvent::Resumed { prefix, items } => {
                self.bar.println(format!(
                    "{}{}: reused checkpoint with {} items",
                    RESUME,
                    style(prefix).bold(),
                    items
                ));
            }
        }
    }

    /// Print the closing line for a run.
    pub fn finish(&self, fell_back: usize) {
        if self.mode != UiMode::Full {
            return;
        }
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
        if fell_back > 0 {
            let _ = writeln!(
                &self.term,
                "{}{} batch(es) kept their original items",
                CROSS,
                style(fell_back).red().bold()
            );
        }
    }
}

/// Render events from `rx` until every sender is dropped.
pub fn spawn_renderer(ui: BatchProgressUI, mut rx: mpsc::Receiver<BatchEvent>) -> JoinHandle<BatchProgressUI> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            ui.handle_event(&event);
        }
        ui
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ui_mode_parse() {
        assert_eq!(UiMode::parse("JSON"), UiMode::Json);
        assert_eq!(UiMode::parse("minimal"), UiMode::Minimal);
        assert_eq!(UiMode::parse("anything"), UiMode::Full);
    }

    #[test]
    fn test_minimal_lines() {
        let planned = BatchEvent::Planned {
            prefix: "writer_improve".into(),
            items: 7,
            batches: 7,
            batch_size: 1,
            concurrency: 3,
        };
        assert_eq!(
            minimal_line(&planned).unwrap(),
            "writer_improve: 7 items in 7 batches (3 workers)"
        );
        assert!(minimal_line(&BatchEvent::Started { index: 0, size: 1 }).is_none());
        assert!(
            minimal_line(&BatchEvent::FellBack {
                index: 2,
                reason: "timed out".into()
            })
            .unwrap()
            .contains("batch 2")
        );
    }

    #[tokio::test]
    async fn test_renderer_drains_channel() {
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_renderer(BatchProgressUI::new(UiMode::Minimal, false), rx);
        tx.send(BatchEvent::Started { index: 0, size: 2 }).await.unwrap();
        drop(tx);
        let ui = handle.await.unwrap();
        ui.finish(0);
    }
}
