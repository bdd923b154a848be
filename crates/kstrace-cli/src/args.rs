//! Command-line arguments of `kstrace`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use kstrace_common::config::RunOptions;
use kstrace_common::constants::{
    DEFAULT_LOG_LEVEL, DEFAULT_OUTPUT_DIR, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SOCKET_PATH,
    DEFAULT_TRACE_IMAGE, DEFAULT_TRACE_TIMEOUT,
};

/// kstrace: attach strace to running pods without touching the workload.
///
/// For every target pod, a privileged helper pod is scheduled onto the same
/// node inside a disposable namespace. Its trace output is collected under
/// the output directory, one file per container, and every helper resource
/// is removed when tracing ends.
#[derive(Parser, Debug)]
#[command(name = "kstrace", version, about, long_about = None)]
pub struct Cli {
    /// Pods to trace, as `name` or `pod/name`.
    pub targets: Vec<String>,

    /// Namespace of the target pods. Defaults to the kubeconfig context's.
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Path to the kubeconfig file.
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use.
    #[arg(long)]
    pub context: Option<String>,

    /// The trace image for use when performing the strace.
    #[arg(long, env = "KSTRACE_IMAGE", default_value = DEFAULT_TRACE_IMAGE)]
    pub image: String,

    /// The location of the CRI socket on the host machine.
    #[arg(long, env = "KSTRACE_SOCKET_PATH", default_value = DEFAULT_SOCKET_PATH)]
    pub socket_path: String,

    /// The length of time to capture the strace output for (`0` runs until interrupted).
    #[arg(long, default_value = DEFAULT_TRACE_TIMEOUT)]
    pub trace_timeout: String,

    /// The directory to store the strace data, or `-` for standard out.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: String,

    /// How long a helper pod may take to start running.
    #[arg(long, default_value = DEFAULT_REQUEST_TIMEOUT)]
    pub request_timeout: String,

    /// Verbosity: trace, debug, info, warning, error, fatal or panic.
    #[arg(long, default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Format of diagnostic logs on standard error.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Diagnostic log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

impl Cli {
    /// Collects the run options, unparsed.
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            trace_image: self.image.clone(),
            socket_path: self.socket_path.clone(),
            trace_timeout: self.trace_timeout.clone(),
            output: self.output.clone(),
            request_timeout: self.request_timeout.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_match_run_options() {
        let cli = Cli::try_parse_from(["kstrace", "web-1"]).unwrap();
        assert_eq!(cli.targets, vec!["web-1"]);
        let options = cli.run_options();
        let defaults = RunOptions::default();
        assert_eq!(options.trace_image, defaults.trace_image);
        assert_eq!(options.socket_path, defaults.socket_path);
        assert_eq!(options.trace_timeout, "0");
        assert_eq!(options.output, "strace-collection");
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn flags_are_threaded_through() {
        let cli = Cli::try_parse_from([
            "kstrace",
            "-n",
            "prod",
            "--trace-timeout",
            "30s",
            "-o",
            "-",
            "--socket-path",
            "/run/containerd/containerd.sock",
            "pod/web-1",
            "web-2",
        ])
        .unwrap();
        assert_eq!(cli.namespace.as_deref(), Some("prod"));
        assert_eq!(cli.targets, vec!["pod/web-1", "web-2"]);
        let config = cli.run_options().parse().unwrap();
        assert!(config.output.is_console());
        assert_eq!(config.trace_duration.as_secs(), 30);
    }
}
