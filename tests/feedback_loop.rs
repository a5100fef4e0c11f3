//! End-to-end feedback loop behaviour with a scripted plan source: real
//! processes run, but the "model" is a queue of canned decisions that also
//! records what the loop fed back to it.

use shellpilot::backend::{PlanDecision, PlanSource, Proposal};
use shellpilot::context::{HostContext, Platform};
use shellpilot::exec::ExecutionEngine;
use shellpilot::plan::{PlanStep, StepRecord};
use shellpilot::runner::{
    ConsentGate, FeedbackLoop, LoopBudget, SilentObserver, StopReason,
};
use shellpilot::security::{ExecutionPolicy, Validator};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct ScriptedSource {
    decisions: Mutex<VecDeque<PlanDecision>>,
    /// Snapshot of the history slice at each consultation.
    seen: Mutex<Vec<Vec<StepRecord>>>,
}

impl ScriptedSource {
    fn steps(raws: &[&str]) -> Self {
        let mut decisions: VecDeque<PlanDecision> = raws
            .iter()
            .map(|raw| PlanDecision::Step(Proposal::new(PlanStep::new(*raw))))
            .collect();
        decisions.push_back(PlanDecision::Done);
        Self {
            decisions: Mutex::new(decisions),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn sudo_step(raw: &str) -> Self {
        let step = PlanStep {
            uses_sudo: true,
            ..PlanStep::new(raw)
        };
        Self {
            decisions: Mutex::new(VecDeque::from([PlanDecision::Step(Proposal::new(step))])),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn last_seen(&self) -> Vec<StepRecord> {
        self.seen.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

impl PlanSource for ScriptedSource {
    fn next_step<'a>(
        &'a self,
        history: &'a [StepRecord],
    ) -> Pin<Box<dyn Future<Output = shellpilot::error::Result<PlanDecision>> + Send + 'a>> {
        self.seen.lock().unwrap().push(history.to_vec());
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

fn linux_host(automation_mode: bool) -> HostContext {
    HostContext {
        platform: Platform::Linux,
        distro_id: Some("debian".into()),
        distro_name: None,
        working_dir: std::env::temp_dir(),
        automation_mode,
    }
}

fn default_budget() -> LoopBudget {
    LoopBudget {
        max_steps: 10,
        max_duration: Duration::from_secs(60),
    }
}

#[tokio::test]
async fn each_consultation_sees_the_grown_history() {
    let source = ScriptedSource::steps(&["echo first-marker", "echo second-marker"]);
    let engine = ExecutionEngine::new();
    let host = linux_host(false);
    let outcome = FeedbackLoop::new(
        &source,
        &engine,
        Validator::new(ExecutionPolicy::default()),
        &host,
        default_budget(),
        Duration::from_secs(30),
        &ApproveAll,
        &SilentObserver,
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(outcome.stop, StopReason::Completed);
    // Three consultations: empty, one record, two records.
    let seen = source.seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen[0].is_empty());
    assert_eq!(seen[1].len(), 1);
    assert!(seen[1][0].result.stdout.contains("first-marker"));
    assert_eq!(seen[2].len(), 2);
    assert!(seen[2][1].result.stdout.contains("second-marker"));
}

#[tokio::test]
async fn unattended_sudo_is_stopped_before_execution() {
    let source = ScriptedSource::sudo_step("sudo apt-get update");
    let engine = ExecutionEngine::new();
    let host = linux_host(true);
    let policy = ExecutionPolicy {
        automation_mode: true,
        passwordless_sudo: false,
    };
    let outcome = FeedbackLoop::new(
        &source,
        &engine,
        Validator::new(policy),
        &host,
        default_budget(),
        Duration::from_secs(30),
        &ApproveAll,
        &SilentObserver,
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap();

    assert!(matches!(outcome.stop, StopReason::Rejected(_)));
    assert_eq!(outcome.state.steps_executed, 0);
    assert!(outcome.state.history.is_empty());
}

#[tokio::test]
async fn timed_out_step_is_fed_back_and_the_loop_continues() {
    let source = ScriptedSource::steps(&["sleep 30", "echo after-timeout"]);
    let engine = ExecutionEngine::new();
    let host = linux_host(false);
    let outcome = FeedbackLoop::new(
        &source,
        &engine,
        Validator::new(ExecutionPolicy::default()),
        &host,
        default_budget(),
        Duration::from_millis(200),
        &ApproveAll,
        &SilentObserver,
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(outcome.stop, StopReason::Completed);
    assert_eq!(outcome.state.history.len(), 2);
    assert!(outcome.state.history[0].result.timed_out);
    assert!(outcome.state.history[1].result.success());
    // The source saw the timeout before proposing the follow-up.
    let last = source.last_seen();
    assert!(last.iter().any(|r| r.result.timed_out));
}

#[tokio::test]
async fn destructive_step_never_reaches_a_process() {
    let source = ScriptedSource::steps(&["rm -rf /etc"]);
    let engine = ExecutionEngine::new();
    let host = linux_host(false);
    let outcome = FeedbackLoop::new(
        &source,
        &engine,
        Validator::new(ExecutionPolicy::default()),
        &host,
        default_budget(),
        Duration::from_secs(30),
        &ApproveAll,
        &SilentObserver,
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap();

    assert!(matches!(outcome.stop, StopReason::Rejected(_)));
    assert!(outcome.state.history.is_empty());
}

#[tokio::test]
async fn timeout_mid_plan_then_budget_stops_a_fourth_step() {
    // Three-step run where the second step times out; the source still gets
    // its output and proposes more, but the step budget blocks a fourth.
    let source = ScriptedSource::steps(&["echo one", "sleep 30", "echo three", "echo four"]);
    let engine = ExecutionEngine::new();
    let host = linux_host(false);
    let budget = LoopBudget {
        max_steps: 3,
        max_duration: Duration::from_secs(60),
    };
    let outcome = FeedbackLoop::new(
        &source,
        &engine,
        Validator::new(ExecutionPolicy::default()),
        &host,
        budget,
        Duration::from_millis(200),
        &ApproveAll,
        &SilentObserver,
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(outcome.stop, StopReason::BudgetExceeded);
    assert_eq!(outcome.state.steps_executed, 3);
    assert!(outcome.state.history[1].result.timed_out);
    // The source was consulted after the timeout with that result in hand.
    let seen = source.seen.lock().unwrap();
    assert!(seen
        .iter()
        .any(|h| h.len() == 2 && h[1].result.timed_out));
}

#[tokio::test]
async fn exhausted_wall_clock_budget_blocks_the_next_candidate() {
    let source = ScriptedSource::steps(&["echo never"]);
    let engine = ExecutionEngine::new();
    let host = linux_host(false);
    let budget = LoopBudget {
        max_steps: 10,
        max_duration: Duration::ZERO,
    };
    let outcome = FeedbackLoop::new(
        &source,
        &engine,
        Validator::new(ExecutionPolicy::default()),
        &host,
        budget,
        Duration::from_secs(30),
        &ApproveAll,
        &SilentObserver,
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(outcome.stop, StopReason::BudgetExceeded);
    assert_eq!(outcome.state.steps_executed, 0);
}
