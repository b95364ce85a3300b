//! Tracing subscriber setup.
//!
//! Console logs go to stderr so command output on stdout stays clean. The
//! filter comes from `CASEFORGE_LOG` when set, else from `--verbose` or the
//! configured level. An optional log file rotates daily.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingSection};

pub const LOG_ENV: &str = "CASEFORGE_LOG";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Filter from an explicit directive string, falling back to `level`.
fn filter_from(env_value: Option<String>, level: &str, verbose: bool) -> EnvFilter {
    if let Some(directives) = env_value
        && let Ok(filter) = EnvFilter::try_new(&directives)
    {
        return filter;
    }
    let level = if verbose { "debug" } else { level };
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn build_filter(level: &str, verbose: bool) -> EnvFilter {
    filter_from(std::env::var(LOG_ENV).ok(), level, verbose)
}

fn console_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Text => fmt::layer()
            .with_target(false)
            .with_ansi(console::Term::stderr().features().colors_supported())
            .with_writer(std::io::stderr)
            .boxed(),
    }
}

fn file_layer(path: &Path, format: LogFormat) -> Result<(BoxedLayer, WorkerGuard)> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    let appender = tracing_appender::rolling::daily(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = match format {
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        LogFormat::Text => fmt::layer().with_ansi(false).with_writer(writer).boxed(),
    };
    Ok((layer, guard))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the file writer.
pub fn init(
    settings: &LoggingSection,
    log_file: Option<&Path>,
    verbose: bool,
) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<BoxedLayer> = vec![console_layer(settings.format)];
    let mut guard = None;
    if let Some(path) = log_file {
        let (layer, file_guard) = file_layer(path, settings.format)?;
        layers.push(layer);
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(build_filter(&settings.level, verbose))
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(guard)
}
