//! Run reports.
//!
//! A plain-text summary of one run: the task, the host, every executed step
//! with a short output preview, and why the run stopped. Written to a
//! timestamped file under the data directory so unattended runs leave an
//! audit trail.

use crate::context::HostContext;
use crate::plan::StepRecord;
use crate::runner::RunOutcome;
use chrono::Local;
use std::path::{Path, PathBuf};

/// Preview limits. Full output already went to the model; the report only
/// needs enough to recognise a step at a glance.
const PREVIEW_LINES: usize = 3;
const PREVIEW_LINE_CHARS: usize = 200;

/// Render the full text report.
pub fn render(query: &str, host: &HostContext, outcome: &RunOutcome) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "shellpilot run report — {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(&format!("task: {query}\n"));
    out.push_str(&format!(
        "host: {} ({})\n",
        host.platform,
        host.distro_name
            .as_deref()
            .or(host.distro_id.as_deref())
            .unwrap_or("unknown")
    ));
    out.push_str(&format!("mode: {}\n", if host.automation_mode {
        "automation"
    } else {
        "interactive"
    }));
    out.push_str(&format!(
        "result: {} after {} step(s) in {:.1}s\n",
        outcome.stop,
        outcome.state.steps_executed,
        outcome.state.started.elapsed().as_secs_f64()
    ));

    if outcome.state.history.is_empty() {
        out.push_str("\nno commands were executed\n");
        return out;
    }

    for (idx, record) in outcome.state.history.iter().enumerate() {
        out.push('\n');
        out.push_str(&render_step(idx + 1, record));
    }
    out
}

fn render_step(index: usize, record: &StepRecord) -> String {
    let result = &record.result;
    let status = match result.exit_code {
        Some(0) => "ok".to_string(),
        Some(code) => format!("failed (exit {code})"),
        None => "killed by signal".to_string(),
    };
    let mut out = format!(
        "[{index}] {}\n    status: {status}, {:.2}s",
        record.step.raw_text,
        result.duration.as_secs_f64()
    );
    if result.timed_out {
        out.push_str(", timed out");
    }
    out.push('\n');
    if let Some(rationale) = &record.step.rationale {
        out.push_str(&format!("    note: {rationale}\n"));
    }
    if !result.stdout.trim().is_empty() {
        out.push_str(&indented_preview("stdout", &result.stdout));
    }
    if !result.stderr.trim().is_empty() {
        out.push_str(&indented_preview("stderr", &result.stderr));
    }
    out
}

/// First few lines of a stream, each line capped, with a count of what was
/// left out.
fn preview(text: &str) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let mut shown: Vec<String> = lines
        .iter()
        .take(PREVIEW_LINES)
        .map(|line| {
            if line.chars().count() > PREVIEW_LINE_CHARS {
                let capped: String = line.chars().take(PREVIEW_LINE_CHARS).collect();
                format!("{capped}…")
            } else {
                (*line).to_string()
            }
        })
        .collect();
    if lines.len() > PREVIEW_LINES {
        shown.push(format!("(+{} more lines)", lines.len() - PREVIEW_LINES));
    }
    shown.join("\n")
}

fn indented_preview(label: &str, text: &str) -> String {
    let body = preview(text)
        .lines()
        .map(|line| format!("        {line}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("    {label}:\n{body}\n")
}

/// Write the report to `dir`, creating it if needed. The filename carries a
/// local timestamp, plus a numeric suffix when two runs land in the same
/// second.
pub fn write_to_dir(dir: &Path, report: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let mut path = dir.join(format!("run-{stamp}.txt"));
    let mut attempt = 1;
    while path.exists() {
        path = dir.join(format!("run-{stamp}-{attempt}.txt"));
        attempt += 1;
    }
    std::fs::write(&path, report)?;
    Ok(path)
}
