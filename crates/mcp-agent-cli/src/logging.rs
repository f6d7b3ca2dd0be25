use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::Subscriber;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::configuration::Settings;

/// Where traces are written when tracing is on and no file is configured
pub fn default_trace_file() -> Result<PathBuf> {
    let home_dir =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
    Ok(home_dir.join(".config").join("mcp-agent").join("traces.jsonl"))
}

/// Log to stderr, filtered by `RUST_LOG`, and when tracing is enabled also
/// append every closed agent span to the trace file as a JSON line.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter);

    let traces = if settings.enable_tracing {
        let path = match &settings.trace_file {
            Some(path) => path.clone(),
            None => default_trace_file()?,
        };
        Some(trace_layer(&path)?)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(console)
        .with(traces)
        .try_init()
        .context("failed to install the log subscriber")?;
    Ok(())
}

/// A layer writing the spans of the agent crate to `path`, one JSON object per
/// closed span carrying its fields, its parents and its timings
pub fn trace_layer<S>(path: &Path) -> Result<impl Layer<S>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open trace file {}", path.display()))?;

    Ok(fmt::layer()
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_span_list(true)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_filter(Targets::new().with_target("mcp_agent", LevelFilter::INFO)))
}
