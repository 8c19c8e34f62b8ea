//! Tracing subscriber setup with format selection.

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// JSON lines for log shippers.
    Json,
    /// Human-readable multi-line format.
    Pretty,
    /// Compact single-line format.
    #[default]
    Compact,
}

/// Filter directive: `--debug` wins, then `RUST_LOG`, then `info`.
fn filter(debug: bool) -> EnvFilter {
    if debug {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
pub fn init_tracing(format: LogFormat, debug: bool) -> Result<()> {
    let registry = tracing_subscriber::registry().with(filter(debug));

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).flatten_event(true))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty().with_target(true)).try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(true))
            .try_init(),
    }
    .context("Failed to initialize tracing subscriber")
}
