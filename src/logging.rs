//! Tracing subscriber setup.
//!
//! Console output always goes to stderr so `mender run` can print its JSON
//! results on stdout. An optional daily-rotated file under
//! `logging.directory` receives the same events without ANSI colors.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_PREFIX: &str = "mender.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// `[logging]` section of `mender.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub format: LogFormat,
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,tower_http=warn".to_string(),
            format: LogFormat::Pretty,
            directory: None,
        }
    }
}

/// Pick the filter directive: `RUST_LOG`, then `--verbose`, then config.
fn filter_directive(env: Option<String>, config: &LoggingConfig, verbose: bool) -> String {
    match env.filter(|value| !value.trim().is_empty()) {
        Some(value) => value,
        None if verbose => "debug".to_string(),
        None => config.filter.clone(),
    }
}

fn build_filter(env: Option<String>, config: &LoggingConfig, verbose: bool) -> Result<EnvFilter> {
    let directive = filter_directive(env, config, verbose);
    EnvFilter::try_new(&directive).with_context(|| format!("Invalid log filter '{}'", directive))
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(std::env::var("RUST_LOG").ok(), config, verbose)?;

    let (pretty, json) = match config.format {
        LogFormat::Pretty => (
            Some(fmt::layer().with_writer(std::io::stderr).with_target(false)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    let (file, guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .with(file)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
