//! Run wiring: config, host detection, backend, gates, the loop itself.

use crate::backend::OpenAiPlanSource;
use crate::cli::Cli;
use crate::config::Config;
use crate::context::{HostContext, SudoProbe};
use crate::exec::ExecutionEngine;
use crate::report;
use crate::runner::{ConsentGate, FeedbackLoop, LoopBudget, StopReason};
use crate::security::{ExecutionPolicy, Validator};
use crate::ui::{self, AutomationGate, ConsoleObserver, InteractiveGate, PreApprovedGate};
use anyhow::Context;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    apply_overrides(&mut config, &cli);
    config.validate()?;

    if let Some(cwd) = &cli.cwd {
        std::env::set_current_dir(cwd)
            .with_context(|| format!("cannot change to {}", cwd.display()))?;
    }
    let host = HostContext::detect(cli.automation);

    // The passwordless allowance is only probed when it could matter: an
    // interactive run can always type the password itself.
    let passwordless_sudo = if cli.automation {
        SudoProbe::new().passwordless_sudo().await
    } else {
        false
    };
    let policy = ExecutionPolicy {
        automation_mode: cli.automation,
        passwordless_sudo,
    };

    let source = OpenAiPlanSource::new(&config.backend, host.clone(), &cli.query)?;
    let engine = ExecutionEngine::new();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let gate: Box<dyn ConsentGate> = if cli.automation {
        Box::new(AutomationGate)
    } else if cli.yes {
        Box::new(PreApprovedGate)
    } else {
        Box::new(InteractiveGate)
    };
    let observer = ConsoleObserver;

    println!("{}", ui::header(format!("shellpilot — {}", cli.query)));
    println!(
        "{}",
        ui::dim(format!(
            "host: {} · mode: {}",
            host.platform,
            if cli.automation { "automation" } else { "interactive" }
        ))
    );

    let budget = LoopBudget {
        max_steps: config.exec.max_steps,
        max_duration: Duration::from_secs(config.exec.max_run_secs),
    };
    let feedback_loop = FeedbackLoop::new(
        &source,
        &engine,
        Validator::new(policy),
        &host,
        budget,
        Duration::from_secs(config.exec.timeout_secs),
        gate.as_ref(),
        &observer,
        cancel,
    );
    let outcome = feedback_loop.run().await?;

    println!("\n{}", ui::render_stop(&outcome.stop));

    if config.report.enabled && !cli.no_report {
        let text = report::render(&cli.query, &host, &outcome);
        match config.report_dir() {
            Some(dir) => match report::write_to_dir(&dir, &text) {
                Ok(path) => println!("{}", ui::dim(format!("report: {}", path.display()))),
                Err(err) => warn!(error = %err, "could not write run report"),
            },
            None => warn!("no report directory available"),
        }
    }

    match outcome.stop {
        StopReason::Completed | StopReason::Declined | StopReason::Cancelled => Ok(()),
        StopReason::Rejected(outcome) => anyhow::bail!("run stopped: {}", outcome.detail()),
        StopReason::BudgetExceeded => anyhow::bail!("run stopped: budget exceeded"),
        StopReason::SpawnFailed(detail) => anyhow::bail!("run stopped: {detail}"),
    }
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(model) = &cli.model {
        config.backend.model = model.clone();
    }
    if let Some(base_url) = &cli.base_url {
        config.backend.base_url = base_url.clone();
    }
    if let Some(max_steps) = cli.max_steps {
        config.exec.max_steps = max_steps;
    }
    if let Some(timeout_secs) = cli.timeout_secs {
        config.exec.timeout_secs = timeout_secs;
    }
}
