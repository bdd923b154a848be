//! # kstrace-helper: helper container entrypoint
//!
//! Resolves the target container to its host process through the runtime
//! socket and runs strace against it. The trace becomes this container's
//! log, which the operator-side tracer streams into its artifact.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use kstrace_common::constants::{DEFAULT_SOCKET_PATH, HELPER_LOG_LEVEL};
use kstrace_common::types::LogLevel;
use kstrace_cri::entrypoint::{self, HelperArgs};
use tracing_subscriber::EnvFilter;

/// Helper container arguments, set by the helper pod spec.
#[derive(Parser, Debug)]
#[command(name = "kstrace-helper", version, about = "Attach strace to a container through the CRI socket")]
struct HelperCli {
    /// CRI socket path, mounted from the host at the same path.
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    socket_path: PathBuf,

    /// Runtime id of the container to trace.
    #[arg(long)]
    container_id: String,

    /// Verbosity of helper diagnostics.
    #[arg(long, default_value = HELPER_LOG_LEVEL)]
    log_level: String,

    /// Extra arguments passed to strace.
    #[arg(last = true)]
    strace_args: Vec<String>,
}

#[allow(clippy::print_stderr)]
fn main() -> ExitCode {
    let cli = HelperCli::parse();
    let level = cli.log_level.parse().unwrap_or(LogLevel::Warn);
    // stderr is part of the container log the artifact is built from.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level.as_filter()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = HelperArgs {
        socket_path: cli.socket_path,
        container_id: cli.container_id,
        strace_args: cli.strace_args,
    };
    match entrypoint::run(&args) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("kstrace-helper: {e}");
            ExitCode::FAILURE
        }
    }
}
