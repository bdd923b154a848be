//! Formatted output helpers for the run summary.

use kstrace_runtime::orchestrator::RunReport;

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Formats a byte count into a human-readable string (e.g., "12.0 KiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Renders one summary line per artifact.
#[must_use]
pub fn summary_lines(report: &RunReport) -> Vec<String> {
    report
        .artifacts
        .iter()
        .map(|a| {
            let place = a
                .path
                .as_ref()
                .map_or_else(|| String::from("stdout"), |p| p.display().to_string());
            format!("{:<40} {:>10}  {place}", a.label, format_bytes(a.bytes))
        })
        .collect()
}

/// Prints the run summary to stderr, keeping stdout for trace output.
#[allow(clippy::print_stderr)]
pub fn print_summary(report: &RunReport) {
    eprintln!();
    if report.cancelled {
        eprintln!("  {YELLOW}Interrupted.{RESET} Helper resources removed.");
    } else {
        eprintln!("  {GREEN}Done.{RESET} Helper resources removed.");
    }
    eprintln!("  {DIM}namespace {}{RESET}", report.namespace);
    eprintln!();
    for line in summary_lines(report) {
        eprintln!("  {BOLD}{line}{RESET}");
    }
}
