//! Feedback loop controller.
//!
//! Orchestrates the run: ask the plan source for a candidate step, validate
//! it, execute it, feed the result back, repeat. Every candidate passes
//! through the validator before it can reach the engine; any rejection stops
//! the run. Budgets (step count and wall clock) are checked whenever a next
//! candidate exists, so a run never starts a step it has no budget for.

use crate::backend::{PlanDecision, PlanSource, Proposal};
use crate::context::HostContext;
use crate::error::Result;
use crate::exec::{ExecutionEngine, ExecutionResult, TerminationReason};
use crate::plan::{PlanStep, StepRecord};
use crate::security::{parse, ValidationOutcome, Validator};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Hard limits on a single run.
#[derive(Debug, Clone, Copy)]
pub struct LoopBudget {
    pub max_steps: usize,
    pub max_duration: Duration,
}

impl Default for LoopBudget {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_duration: Duration::from_secs(1800),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    AwaitingPlan,
    Validating,
    Executing,
    AwaitingNextStep,
    Terminated,
}

/// Observable state of a run.
#[derive(Debug)]
pub struct LoopState {
    pub phase: LoopPhase,
    pub steps_executed: usize,
    pub started: Instant,
    pub history: Vec<StepRecord>,
}

impl LoopState {
    fn new() -> Self {
        Self {
            phase: LoopPhase::AwaitingPlan,
            steps_executed: 0,
            started: Instant::now(),
            history: Vec::new(),
        }
    }
}

/// Why the run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The source declared the task finished.
    Completed,
    /// A candidate step failed validation; nothing was executed for it.
    Rejected(ValidationOutcome),
    /// The user declined a step at the confirmation gate.
    Declined,
    /// Step or wall-clock budget exhausted with a candidate still pending.
    BudgetExceeded,
    /// External cancellation (ctrl-c).
    Cancelled,
    /// The child process could not be started at all. Fatal to the run:
    /// retrying a spawn failure rarely succeeds.
    SpawnFailed(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Rejected(outcome) => write!(f, "rejected: {}", outcome.detail()),
            Self::Declined => write!(f, "declined by user"),
            Self::BudgetExceeded => write!(f, "budget exceeded"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::SpawnFailed(detail) => write!(f, "spawn failed: {detail}"),
        }
    }
}

pub struct RunOutcome {
    pub stop: StopReason,
    pub state: LoopState,
}

/// Confirmation hooks. Interactive runs prompt; automation runs answer
/// deterministically (yes to ordinary steps, no to high-risk ones).
pub trait ConsentGate: Send + Sync {
    /// Ordinary per-step confirmation before an approved step runs.
    fn confirm_step(&self, step: &PlanStep) -> bool;
    /// Explicit high-risk acknowledgement for steps the validator would only
    /// approve with consent.
    fn confirm_high_risk(&self, step: &PlanStep, reason: &str) -> bool;
}

/// Progress hooks for rendering. All methods default to no-ops.
pub trait StepObserver: Send + Sync {
    fn on_proposal(&self, _step: &PlanStep) {}
    fn on_validation(&self, _step: &PlanStep, _outcome: &ValidationOutcome) {}
    fn on_result(&self, _step: &PlanStep, _result: &ExecutionResult) {}
}

/// Observer that renders nothing.
pub struct SilentObserver;

impl StepObserver for SilentObserver {}

pub struct FeedbackLoop<'a> {
    source: &'a dyn PlanSource,
    engine: &'a ExecutionEngine,
    validator: Validator,
    host: &'a HostContext,
    budget: LoopBudget,
    step_timeout: Duration,
    gate: &'a dyn ConsentGate,
    observer: &'a dyn StepObserver,
    cancel: CancellationToken,
}

impl<'a> FeedbackLoop<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: &'a dyn PlanSource,
        engine: &'a ExecutionEngine,
        validator: Validator,
        host: &'a HostContext,
        budget: LoopBudget,
        step_timeout: Duration,
        gate: &'a dyn ConsentGate,
        observer: &'a dyn StepObserver,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            engine,
            validator,
            host,
            budget,
            step_timeout,
            gate,
            observer,
            cancel,
        }
    }

    /// Drive the loop to termination. The returned state carries the full
    /// execution history for reporting.
    pub async fn run(&self) -> Result<RunOutcome> {
        let mut state = LoopState::new();

        let stop = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            state.phase = if state.history.is_empty() {
                LoopPhase::AwaitingPlan
            } else {
                LoopPhase::AwaitingNextStep
            };
            let decision = self.source.next_step(&state.history).await?;
            let Proposal {
                step,
                target_platform,
            } = match decision {
                PlanDecision::Done => break StopReason::Completed,
                PlanDecision::Step(proposal) => proposal,
            };

            // Budget gates a candidate, never a completion: a source that
            // answers "done" at the limit still completes normally.
            if state.steps_executed >= self.budget.max_steps {
                warn!(max_steps = self.budget.max_steps, "step budget exhausted");
                break StopReason::BudgetExceeded;
            }
            if state.started.elapsed() >= self.budget.max_duration {
                warn!("wall-clock budget exhausted");
                break StopReason::BudgetExceeded;
            }

            state.phase = LoopPhase::Validating;
            self.observer.on_proposal(&step);
            let outcome = self.validate_with_consent(&step, target_platform);
            self.observer.on_validation(&step, &outcome);
            if !outcome.is_approved() {
                info!(command = %step.raw_text, detail = %outcome.detail(), "step rejected");
                break StopReason::Rejected(outcome);
            }
            if !self.gate.confirm_step(&step) {
                break StopReason::Declined;
            }

            state.phase = LoopPhase::Executing;
            let result = match self.execute_step(&step).await {
                Ok(result) => result,
                // Fatal to the run: a spawn failure is an environment
                // problem, not something the source can command its way out
                // of, and automatic retry risks compounding it.
                Err(err) => break StopReason::SpawnFailed(err.to_string()),
            };
            self.observer.on_result(&step, &result);
            let interrupted = result.termination == TerminationReason::Killed;
            state.history.push(StepRecord { step, result });
            state.steps_executed += 1;
            if interrupted {
                break StopReason::Cancelled;
            }
        };

        state.phase = LoopPhase::Terminated;
        info!(
            steps = state.steps_executed,
            stop = ?stop,
            "run finished"
        );
        Ok(RunOutcome { stop, state })
    }

    /// Validate once without consent; if only a missing consent blocks the
    /// step, ask the gate and re-validate. Validation is pure, so the second
    /// call differs only in the consent flag.
    fn validate_with_consent(
        &self,
        step: &PlanStep,
        target: crate::context::Platform,
    ) -> ValidationOutcome {
        let outcome = self
            .validator
            .validate(step, target, self.host.platform, false);
        if let ValidationOutcome::RejectedDangerous {
            consent_would_approve: true,
            reason,
            ..
        } = &outcome
        {
            if self.gate.confirm_high_risk(step, reason) {
                return self.validator.validate(step, target, self.host.platform, true);
            }
        }
        outcome
    }

    async fn execute_step(
        &self,
        step: &PlanStep,
    ) -> std::result::Result<ExecutionResult, crate::error::ExecError> {
        let parsed = parse(&step.raw_text);
        debug!(command = %step.raw_text, "executing");
        self.engine
            .execute(
                &parsed,
                step.working_dir.as_deref(),
                self.step_timeout,
                &self.cancel,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Platform;
    use crate::plan::PlanStep;
    use crate::security::ExecutionPolicy;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedSource {
        decisions: Mutex<VecDeque<PlanDecision>>,
    }

    impl ScriptedSource {
        fn new(decisions: Vec<PlanDecision>) -> Self {
            Self {
                decisions: Mutex::new(decisions.into()),
            }
        }

        fn steps(raws: &[&str]) -> Self {
            let mut decisions: Vec<PlanDecision> = raws
                .iter()
                .map(|raw| PlanDecision::Step(Proposal::new(PlanStep::new(*raw))))
                .collect();
            decisions.push(PlanDecision::Done);
            Self::new(decisions)
        }
    }

    impl PlanSource for ScriptedSource {
        fn next_step<'a>(
            &'a self,
            _history: &'a [StepRecord],
        ) -> Pin<Box<dyn Future<Output = Result<PlanDecision>> + Send + 'a>> {
            let decision = self
                .decisions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(PlanDecision::Done);
            Box::pin(async move { Ok(decision) })
        }
    }

    struct ApproveAll;

    impl ConsentGate for ApproveAll {
        fn confirm_step(&self, _step: &PlanStep) -> bool {
            true
        }
        fn confirm_high_risk(&self, _step: &PlanStep, _reason: &str) -> bool {
            true
        }
    }

    struct DenyEverything;

    impl ConsentGate for DenyEverything {
        fn confirm_step(&self, _step: &PlanStep) -> bool {
            false
        }
        fn confirm_high_risk(&self, _step: &PlanStep, _reason: &str) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        executed: AtomicUsize,
        validated: AtomicUsize,
    }

    impl StepObserver for CountingObserver {
        fn on_validation(&self, _step: &PlanStep, _outcome: &ValidationOutcome) {
            self.validated.fetch_add(1, Ordering::SeqCst);
        }
        fn on_result(&self, _step: &PlanStep, _result: &ExecutionResult) {
            self.executed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn linux_host() -> HostContext {
        HostContext {
            platform: Platform::Linux,
            distro_id: Some("debian".into()),
            distro_name: None,
            working_dir: std::env::temp_dir(),
            automation_mode: false,
        }
    }

    fn run_loop<'a>(
        source: &'a dyn PlanSource,
        engine: &'a ExecutionEngine,
        host: &'a HostContext,
        budget: LoopBudget,
        gate: &'a dyn ConsentGate,
        observer: &'a dyn StepObserver,
        cancel: CancellationToken,
    ) -> FeedbackLoop<'a> {
        FeedbackLoop::new(
            source,
            engine,
            Validator::new(ExecutionPolicy::default()),
            host,
            budget,
            Duration::from_secs(30),
            gate,
            observer,
            cancel,
        )
    }

    #[tokio::test]
    async fn runs_steps_until_source_is_done() {
        let source = ScriptedSource::steps(&["echo one", "echo two"]);
        let engine = ExecutionEngine::new();
        let host = linux_host();
        let observer = CountingObserver::default();
        let outcome = run_loop(
            &source,
            &engine,
            &host,
            LoopBudget::default(),
            &ApproveAll,
            &observer,
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(outcome.stop, StopReason::Completed);
        assert_eq!(outcome.state.steps_executed, 2);
        assert_eq!(outcome.state.history.len(), 2);
        assert!(outcome.state.history.iter().all(|r| r.result.success()));
        assert_eq!(outcome.state.phase, LoopPhase::Terminated);
    }

    #[tokio::test]
    async fn dangerous_step_is_never_executed() {
        let source = ScriptedSource::steps(&["rm -rf /"]);
        let engine = ExecutionEngine::new();
        let host = linux_host();
        let observer = CountingObserver::default();
        let outcome = run_loop(
            &source,
            &engine,
            &host,
            LoopBudget::default(),
            &ApproveAll,
            &observer,
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert!(matches!(outcome.stop, StopReason::Rejected(_)));
        assert_eq!(observer.executed.load(Ordering::SeqCst), 0);
        assert!(outcome.state.history.is_empty());
    }

    #[tokio::test]
    async fn platform_mismatch_stops_before_execution() {
        let step = PlanStep::new("brew install jq");
        let source = ScriptedSource::new(vec![PlanDecision::Step(Proposal {
            step,
            target_platform: Platform::Macos,
        })]);
        let engine = ExecutionEngine::new();
        let host = linux_host();
        let observer = CountingObserver::default();
        let outcome = run_loop(
            &source,
            &engine,
            &host,
            LoopBudget::default(),
            &ApproveAll,
            &observer,
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        let StopReason::Rejected(ValidationOutcome::RejectedPlatformMismatch(_)) = outcome.stop
        else {
            panic!("expected platform mismatch, got {:?}", outcome.stop);
        };
        assert_eq!(observer.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn step_budget_stops_the_run() {
        let source = ScriptedSource::steps(&["echo 1", "echo 2", "echo 3", "echo 4"]);
        let engine = ExecutionEngine::new();
        let host = linux_host();
        let observer = CountingObserver::default();
        let budget = LoopBudget {
            max_steps: 2,
            max_duration: Duration::from_secs(60),
        };
        let outcome = run_loop(
            &source,
            &engine,
            &host,
            budget,
            &ApproveAll,
            &observer,
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(outcome.stop, StopReason::BudgetExceeded);
        assert_eq!(outcome.state.steps_executed, 2);
    }

    #[tokio::test]
    async fn done_at_the_budget_edge_still_completes() {
        let source = ScriptedSource::steps(&["echo only"]);
        let engine = ExecutionEngine::new();
        let host = linux_host();
        let budget = LoopBudget {
            max_steps: 1,
            max_duration: Duration::from_secs(60),
        };
        let outcome = run_loop(
            &source,
            &engine,
            &host,
            budget,
            &ApproveAll,
            &SilentObserver,
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(outcome.stop, StopReason::Completed);
        assert_eq!(outcome.state.steps_executed, 1);
    }

    #[tokio::test]
    async fn declined_step_stops_without_executing() {
        let source = ScriptedSource::steps(&["echo fine"]);
        let engine = ExecutionEngine::new();
        let host = linux_host();
        let observer = CountingObserver::default();
        let outcome = run_loop(
            &source,
            &engine,
            &host,
            LoopBudget::default(),
            &DenyEverything,
            &observer,
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(outcome.stop, StopReason::Declined);
        assert_eq!(observer.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn consent_gate_unlocks_metachar_step() {
        let source = ScriptedSource::steps(&["echo hello | tr a-z A-Z"]);
        let engine = ExecutionEngine::new();
        let host = linux_host();
        let denied = run_loop(
            &source,
            &engine,
            &host,
            LoopBudget::default(),
            &DenyEverything,
            &SilentObserver,
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();
        assert!(matches!(denied.stop, StopReason::Rejected(_)));

        // With consent granted the same step is approved. The argv spawn
        // passes the pipe characters to echo literally; nothing here
        // re-creates a shell.
        let source = ScriptedSource::steps(&["echo hello | tr a-z A-Z"]);
        let approved = run_loop(
            &source,
            &engine,
            &host,
            LoopBudget::default(),
            &ApproveAll,
            &SilentObserver,
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();
        assert_eq!(approved.stop, StopReason::Completed);
        assert_eq!(approved.state.steps_executed, 1);
    }

    #[tokio::test]
    async fn failed_step_feeds_back_and_loop_continues() {
        let source = ScriptedSource::steps(&["ls /definitely_not_here_xyz", "echo recovered"]);
        let engine = ExecutionEngine::new();
        let host = linux_host();
        let outcome = run_loop(
            &source,
            &engine,
            &host,
            LoopBudget::default(),
            &ApproveAll,
            &SilentObserver,
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(outcome.stop, StopReason::Completed);
        assert_eq!(outcome.state.history.len(), 2);
        assert!(!outcome.state.history[0].result.success());
        assert!(outcome.state.history[1].result.success());
    }

    #[tokio::test]
    async fn spawn_failure_stops_the_run() {
        let source = ScriptedSource::steps(&["no_such_binary_shellpilot_test", "echo never"]);
        let engine = ExecutionEngine::new();
        let host = linux_host();
        let outcome = run_loop(
            &source,
            &engine,
            &host,
            LoopBudget::default(),
            &ApproveAll,
            &SilentObserver,
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        let StopReason::SpawnFailed(detail) = outcome.stop else {
            panic!("expected SpawnFailed, got {:?}", outcome.stop);
        };
        assert!(detail.contains("no_such_binary_shellpilot_test"));
        // Nothing ran, nothing was retried.
        assert!(outcome.state.history.is_empty());
        assert_eq!(outcome.state.steps_executed, 0);
    }

    #[tokio::test]
    async fn pre_cancelled_run_executes_nothing() {
        let source = ScriptedSource::steps(&["echo never"]);
        let engine = ExecutionEngine::new();
        let host = linux_host();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let observer = CountingObserver::default();
        let outcome = run_loop(
            &source,
            &engine,
            &host,
            LoopBudget::default(),
            &ApproveAll,
            &observer,
            cancel,
        )
        .run()
        .await
        .unwrap();

        assert_eq!(outcome.stop, StopReason::Cancelled);
        assert_eq!(observer.executed.load(Ordering::SeqCst), 0);
    }
}
