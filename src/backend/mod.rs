//! Plan sources.
//!
//! A plan source proposes the next candidate step given everything that has
//! run so far. The feedback loop owns when to ask; the source owns how a
//! proposal is produced. The only shipped implementation talks to an
//! OpenAI-compatible chat completion API, but the boundary is a trait so the
//! loop tests against scripted sources.

pub mod openai;

pub use openai::OpenAiPlanSource;

use crate::context::Platform;
use crate::error::Result;
use crate::plan::{PlanStep, StepRecord};
use std::future::Future;
use std::pin::Pin;

/// A candidate step plus the plan-level facts the validator compares against.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub step: PlanStep,
    pub target_platform: Platform,
}

impl Proposal {
    pub fn new(step: PlanStep) -> Self {
        Self {
            step,
            target_platform: Platform::Unknown,
        }
    }
}

/// What the source wants the loop to do next.
#[derive(Debug, Clone)]
pub enum PlanDecision {
    /// Run this candidate step (still subject to validation).
    Step(Proposal),
    /// The task is finished; the loop terminates normally.
    Done,
}

pub trait PlanSource: Send + Sync {
    /// Propose the next step. `history` is every record accumulated so far,
    /// oldest first; the slice grows by at most one entry between calls.
    fn next_step<'a>(
        &'a self,
        history: &'a [StepRecord],
    ) -> Pin<Box<dyn Future<Output = Result<PlanDecision>> + Send + 'a>>;
}

/// Per-stream cap when feeding output back to the source. Far below the
/// engine's capture cap: feedback pays per token.
const FEEDBACK_STREAM_CHARS: usize = 2000;

/// Render one executed step as feedback text for the source.
pub fn format_step_feedback(record: &StepRecord) -> String {
    let result = &record.result;
    let status = match result.exit_code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    };
    let mut feedback = format!("Command: {}\nResult: {status}", record.step.raw_text);
    if result.timed_out {
        feedback.push_str(" (timed out)");
    }
    let stdout = clip(&result.stdout, FEEDBACK_STREAM_CHARS);
    let stderr = clip(&result.stderr, FEEDBACK_STREAM_CHARS);
    if !stdout.is_empty() {
        feedback.push_str("\n--- stdout ---\n");
        feedback.push_str(&stdout);
    }
    if !stderr.is_empty() {
        feedback.push_str("\n--- stderr ---\n");
        feedback.push_str(&stderr);
    }
    if stdout.is_empty() && stderr.is_empty() {
        feedback.push_str("\n(no output)");
    }
    feedback
}

fn clip(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim_end();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let kept: String = trimmed.chars().take(max_chars).collect();
    format!("{kept}\n... [clipped]")
}
