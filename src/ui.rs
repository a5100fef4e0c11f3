//! Terminal rendering and confirmation gates.

use crate::exec::ExecutionResult;
use crate::plan::PlanStep;
use crate::runner::{ConsentGate, StepObserver, StopReason};
use crate::security::ValidationOutcome;
use console::style;
use dialoguer::Confirm;
use std::fmt::Display;

/// Green bold — success checkmarks, confirmations
pub fn success<D: Display>(text: D) -> String {
    style(text).green().bold().to_string()
}

/// White bold — section headers, titles
pub fn header<D: Display>(text: D) -> String {
    style(text).white().bold().to_string()
}

/// Dim — subtitles, secondary text
pub fn dim<D: Display>(text: D) -> String {
    style(text).dim().to_string()
}

/// Yellow — shell commands, warnings
pub fn command<D: Display>(text: D) -> String {
    style(text).yellow().to_string()
}

/// Red bold — blocked commands, failures
pub fn danger<D: Display>(text: D) -> String {
    style(text).red().bold().to_string()
}

/// Cyan bold — step numbers
pub fn accent<D: Display>(text: D) -> String {
    style(text).cyan().bold().to_string()
}

/// Interactive gates: each step is shown and confirmed on the terminal,
/// high-risk steps get a second, explicit prompt that defaults to "no".
pub struct InteractiveGate;

impl ConsentGate for InteractiveGate {
    fn confirm_step(&self, step: &PlanStep) -> bool {
        println!("  {} {}", accent("run:"), command(&step.raw_text));
        if let Some(rationale) = &step.rationale {
            println!("  {}", dim(rationale));
        }
        Confirm::new()
            .with_prompt("Execute this command?")
            .default(true)
            .interact()
            .unwrap_or(false)
    }

    fn confirm_high_risk(&self, step: &PlanStep, reason: &str) -> bool {
        println!(
            "  {} {}",
            danger("high-risk:"),
            command(&step.raw_text)
        );
        println!("  {}", dim(reason));
        Confirm::new()
            .with_prompt("This needs explicit consent. Proceed anyway?")
            .default(false)
            .interact()
            .unwrap_or(false)
    }
}

/// Unattended gates: ordinary steps pass, high-risk steps never do.
pub struct AutomationGate;

impl ConsentGate for AutomationGate {
    fn confirm_step(&self, _step: &PlanStep) -> bool {
        true
    }

    fn confirm_high_risk(&self, _step: &PlanStep, _reason: &str) -> bool {
        false
    }
}

/// Interactive gate variant for `--yes`: skips the per-step confirmation but
/// still prompts for high-risk consent.
pub struct PreApprovedGate;

impl ConsentGate for PreApprovedGate {
    fn confirm_step(&self, step: &PlanStep) -> bool {
        println!("  {} {}", accent("run:"), command(&step.raw_text));
        true
    }

    fn confirm_high_risk(&self, step: &PlanStep, reason: &str) -> bool {
        InteractiveGate.confirm_high_risk(step, reason)
    }
}

/// Prints step progress to the terminal as the loop advances.
pub struct ConsoleObserver;

impl StepObserver for ConsoleObserver {
    fn on_validation(&self, step: &PlanStep, outcome: &ValidationOutcome) {
        if !outcome.is_approved() {
            println!(
                "  {} {} {}",
                danger("✗"),
                command(&step.raw_text),
                dim(outcome.detail())
            );
        }
    }

    fn on_result(&self, _step: &PlanStep, result: &ExecutionResult) {
        if result.success() {
            println!("  {} {}", success("✓"), dim(format!("{:.2}s", result.duration.as_secs_f64())));
        } else {
            let status = match result.exit_code {
                Some(code) => format!("exit {code}"),
                None => "killed".to_string(),
            };
            println!("  {} {}", danger("✗"), dim(status));
        }
        let preview = if result.stdout.trim().is_empty() {
            result.stderr.trim()
        } else {
            result.stdout.trim()
        };
        for line in preview.lines().take(5) {
            println!("    {line}");
        }
    }
}

/// One-line closing banner for the run.
pub fn render_stop(stop: &StopReason) -> String {
    match stop {
        StopReason::Completed => success("task completed"),
        StopReason::Rejected(outcome) => danger(format!("stopped — {}", outcome.detail())),
        StopReason::Declined => dim("stopped at your request"),
        StopReason::BudgetExceeded => danger("stopped — step or time budget exhausted"),
        StopReason::Cancelled => dim("interrupted"),
        StopReason::SpawnFailed(detail) => danger(format!("stopped — {detail}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn automation_gate_never_grants_high_risk_consent() {
        let step = PlanStep::new("reboot");
        assert!(AutomationGate.confirm_step(&step));
        assert!(!AutomationGate.confirm_high_risk(&step, "power change"));
    }

    #[test]
    fn stop_banners_are_distinct() {
        let banners = [
            render_stop(&StopReason::Completed),
            render_stop(&StopReason::Declined),
            render_stop(&StopReason::BudgetExceeded),
            render_stop(&StopReason::Cancelled),
        ];
        for (i, a) in banners.iter().enumerate() {
            for b in banners.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
