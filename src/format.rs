//! Terminal and JSON rendering of grouped execution results.

use std::time::Duration;

use serde::Serialize;

use crate::executor::HostResult;
use crate::grouper::{GroupedResults, OutputGroup};

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_RED: &str = "\x1b[31m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_YELLOW: &str = "\x1b[33m";
const COLOR_CYAN: &str = "\x1b[36m";

/// Formats grouped execution results for terminal display.
#[derive(Debug, Clone, Default)]
pub struct Formatter {
    pub errors_only: bool,
    pub color: bool,
}

impl Formatter {
    pub fn new(errors_only: bool, color: bool) -> Self {
        Self { errors_only, color }
    }

    /// Renders grouped results as a human-readable string ending with a
    /// summary line ("3 succeeded, 1 failed, ...").
    pub fn format(&self, grouped: &GroupedResults) -> String {
        let mut out = String::new();

        let mut succeeded = 0;
        let mut non_zero = 0;
        let failed = grouped.failed.len();
        let timed_out = grouped.timed_out.len();

        for g in &grouped.groups {
            if g.exit_code != 0 {
                non_zero += g.hosts.len();
            } else {
                succeeded += g.hosts.len();
            }
            if !self.errors_only || g.exit_code != 0 {
                self.write_group(&mut out, g, grouped.groups.len());
                out.push('\n');
            }
        }

        for r in &grouped.failed {
            self.write_errored(&mut out, r, " 1 host failed:", "unknown error");
            out.push('\n');
        }

        for r in &grouped.timed_out {
            self.write_errored(&mut out, r, " 1 host timed out:", "timeout");
            out.push('\n');
        }

        out.push_str(&summary_line(succeeded, non_zero, failed, timed_out));
        out.push('\n');
        out
    }

    fn write_group(&self, out: &mut String, g: &OutputGroup, total_groups: usize) {
        let count = g.hosts.len();
        let host_word = if count == 1 { "host" } else { "hosts" };

        if g.exit_code != 0 {
            let label = format!(" {count} {host_word} exited with code {}:", g.exit_code);
            out.push_str(&self.colorize(&label, COLOR_RED));
        } else if g.is_norm {
            // "1 host identical" reads oddly when there was only one host.
            let label = if total_groups == 1 && count == 1 {
                format!(" {count} {host_word}:")
            } else {
                format!(" {count} {host_word} identical:")
            };
            out.push_str(&self.colorize(&label, COLOR_GREEN));
        } else {
            let verb = if count == 1 { "differs" } else { "differ" };
            let label = format!(" {count} {host_word} {verb}:");
            out.push_str(&self.colorize(&label, COLOR_YELLOW));
        }
        out.push('\n');

        out.push_str("   ");
        out.push_str(&self.colorize(&g.hosts.join(", "), COLOR_CYAN));
        out.push('\n');

        let stdout = String::from_utf8_lossy(&g.stdout);
        let stdout = stdout.trim_end_matches('\n');
        if !stdout.is_empty() {
            for line in stdout.split('\n') {
                out.push_str("   ");
                out.push_str(line);
                out.push('\n');
            }
        }

        let stderr = String::from_utf8_lossy(&g.stderr);
        let stderr = stderr.trim_end_matches('\n');
        if !stderr.is_empty() {
            for line in stderr.split('\n') {
                out.push_str("   ");
                out.push_str(&self.colorize(&format!("stderr: {line}"), COLOR_RED));
                out.push('\n');
            }
        }

        if !g.is_norm && !g.diff.is_empty() {
            out.push('\n');
            self.write_diff(out, &g.diff);
        }
    }

    fn write_diff(&self, out: &mut String, diff: &str) {
        for line in diff.trim_end_matches('\n').split('\n') {
            out.push_str("   ");
            let colored = if line.starts_with("--- ") || line.starts_with("+++ ") {
                self.colorize(line, COLOR_CYAN)
            } else if line.starts_with('+') {
                self.colorize(line, COLOR_GREEN)
            } else if line.starts_with('-') {
                self.colorize(line, COLOR_RED)
            } else {
                line.to_string()
            };
            out.push_str(&colored);
            out.push('\n');
        }
    }

    fn write_errored(&self, out: &mut String, r: &HostResult, label: &str, fallback: &str) {
        out.push_str(&self.colorize(label, COLOR_RED));
        out.push('\n');

        let msg = r
            .err
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| fallback.to_string());
        out.push_str("   ");
        out.push_str(&self.colorize(&r.host, COLOR_CYAN));
        out.push_str(&format!(" ({msg})"));
        out.push('\n');
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("{color}{text}{COLOR_RESET}")
    }
}

fn summary_line(succeeded: usize, non_zero: usize, failed: usize, timed_out: usize) -> String {
    let mut parts = vec![format!("{succeeded} succeeded")];
    if non_zero > 0 {
        parts.push(format!("{non_zero} non-zero exit"));
    }
    if failed > 0 {
        parts.push(format!("{failed} failed"));
    }
    if timed_out > 0 {
        parts.push(format!("{timed_out} timeout"));
    }
    parts.join(", ")
}

#[derive(Serialize)]
struct JsonResult<'a> {
    host: &'a str,
    stdout: String,
    stderr: String,
    exit_code: i32,
    duration: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Serializes results as a two-space-indented JSON array.
pub fn format_json(results: &[HostResult]) -> serde_json::Result<String> {
    let out: Vec<JsonResult> = results
        .iter()
        .map(|r| JsonResult {
            host: &r.host,
            stdout: String::from_utf8_lossy(&r.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&r.stderr).into_owned(),
            exit_code: r.exit_code,
            duration: format_duration(r.duration),
            error: r.err.as_ref().map(|e| e.to_string()),
        })
        .collect();
    serde_json::to_string_pretty(&out)
}

/// Free-form duration notation: `52ms`, `1.2s`, `1m30s`.
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis < 1_000 {
        return format!("{millis}ms");
    }
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        let rounded = (secs * 10.0).round() / 10.0;
        return if (rounded - rounded.trunc()).abs() < f64::EPSILON {
            format!("{}s", rounded.trunc() as u64)
        } else {
            format!("{rounded:.1}s")
        };
    }
    let total = d.as_secs();
    format!("{}m{}s", total / 60, total % 60)
}
