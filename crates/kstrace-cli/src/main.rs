//! # kstrace: strace for Kubernetes pods
//!
//! Attaches a system-call tracer to running containers by scheduling
//! short-lived helper pods next to them.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod args;
mod cluster;
mod output;
mod run;

use clap::Parser;
use kstrace_common::types::LogLevel;
use tracing_subscriber::EnvFilter;

use crate::args::{Cli, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level: LogLevel = cli.log_level.parse()?;
    init_tracing(level, cli.log_format);
    run::execute(cli).await
}

/// Logs go to stderr so console mode keeps stdout for trace output.
/// `RUST_LOG`, when set, overrides `--log-level`.
fn init_tracing(level: LogLevel, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
