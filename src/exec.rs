//! Execution engine.
//!
//! Runs one validated command as a child process. The command is spawned as
//! an argv vector, never through a shell string: the parser already resolved
//! token boundaries and nothing here re-interprets metacharacters. Output is
//! captured incrementally with a per-stream byte cap, a wall-clock timeout is
//! enforced with a SIGTERM-then-SIGKILL escalation, and an external
//! cancellation token can interrupt a running step at any point.
//!
//! A non-zero exit code is ordinary, reportable outcome data, not a fault.

use crate::error::ExecError;
use crate::security::ParsedCommand;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

/// Default per-command wall-clock timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// Per-stream capture cap. Bounds both memory and the token cost of feeding
/// output back to the plan source.
const MAX_CAPTURE_BYTES: usize = 65_536;
/// How long a SIGTERM'd process gets to exit before SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(2);
/// Marker appended to a stream that hit the capture cap.
const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// Environment variables safe to pass through to child commands.
/// Only functional variables -- never API keys or secrets.
const SAFE_ENV_VARS: &[&str] = &[
    "PATH", "HOME", "TERM", "LANG", "LC_ALL", "LC_CTYPE", "USER", "SHELL",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TerminationReason {
    Completed,
    Timeout,
    Killed,
}

/// Observed outcome of one executed step.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// `None` when the process died to a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub duration: Duration,
    pub timed_out: bool,
    pub termination: TerminationReason,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.termination == TerminationReason::Completed && self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    output_cap: usize,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self {
            output_cap: MAX_CAPTURE_BYTES,
        }
    }
}

impl ExecutionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_output_cap(output_cap: usize) -> Self {
        Self { output_cap }
    }

    /// Execute one parsed command. Errors here are engine faults (nothing to
    /// spawn, spawn failed); command failure travels inside the result.
    pub async fn execute(
        &self,
        cmd: &ParsedCommand,
        working_dir: Option<&Path>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, ExecError> {
        let argv = cmd.argv();
        let Some((program, args)) = argv.split_first() else {
            return Err(ExecError::EmptyCommand);
        };

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Clear the environment so secrets never leak into child commands,
        // then re-add only functional variables.
        command.env_clear();
        for var in SAFE_ENV_VARS {
            if let Ok(value) = std::env::var(var) {
                command.env(var, value);
            }
        }
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| ExecError::Spawn {
            program: (*program).to_string(),
            source,
        })?;

        let cap = self.output_cap;
        let stdout_task = child
            .stdout
            .take()
            .map(|reader| tokio::spawn(read_capped(reader, cap)));
        let stderr_task = child
            .stderr
            .take()
            .map(|reader| tokio::spawn(read_capped(reader, cap)));

        let (status, termination) = tokio::select! {
            status = child.wait() => (status.ok(), TerminationReason::Completed),
            () = tokio::time::sleep(timeout) => {
                (terminate_with_grace(&mut child).await, TerminationReason::Timeout)
            }
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                (child.wait().await.ok(), TerminationReason::Killed)
            }
        };

        let (stdout, stdout_truncated) = collect(stdout_task).await;
        let (stderr, stderr_truncated) = collect(stderr_task).await;

        Ok(ExecutionResult {
            exit_code: status.and_then(|s| s.code()),
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            duration: started.elapsed(),
            timed_out: termination == TerminationReason::Timeout,
            termination,
        })
    }
}

/// SIGTERM, grace period, then SIGKILL. Returns the exit status if the child
/// reported one.
async fn terminate_with_grace(child: &mut tokio::process::Child) -> Option<std::process::ExitStatus> {
    send_sigterm(child);
    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(status) => status.ok(),
        Err(_) => {
            let _ = child.kill().await;
            child.wait().await.ok()
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to a pid we own; no memory involved.
        unsafe {
            #[allow(clippy::cast_possible_wrap)]
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &tokio::process::Child) {}

/// Read a stream to EOF, keeping at most `cap` bytes. Keeps draining past the
/// cap so the child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> (String, bool) {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if buf.len() < cap {
                    let take = n.min(cap - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
        }
    }
    let mut text = String::from_utf8_lossy(&buf).into_owned();
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    (text, truncated)
}

async fn collect(task: Option<tokio::task::JoinHandle<(String, bool)>>) -> (String, bool) {
    match task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => (String::new(), false),
    }
}
