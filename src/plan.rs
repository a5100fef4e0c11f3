//! Command plan model and extraction.
//!
//! The plan source (the AI backend) answers with prose that should contain a
//! JSON command plan, either in a ```json fenced block or as an inline
//! object. Extraction validates every field before anything reaches the
//! safety pipeline; a plan is immutable once produced and consumed exactly
//! once by validation + execution.

use crate::context::{HostContext, Platform};
use crate::error::PlanError;
use crate::exec::ExecutionResult;
use serde::Deserialize;
use std::path::PathBuf;

/// One candidate shell command within a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub raw_text: String,
    pub working_dir: Option<PathBuf>,
    pub uses_sudo: bool,
    /// Display-only explanation from the model. Never consulted for safety
    /// decisions.
    pub rationale: Option<String>,
}

impl PlanStep {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            working_dir: None,
            uses_sudo: false,
            rationale: None,
        }
    }
}

/// An ordered sequence of candidate commands plus plan-level metadata.
#[derive(Debug, Clone)]
pub struct CommandPlan {
    pub steps: Vec<PlanStep>,
    pub target_platform: Platform,
    pub requires_confirmation: bool,
    pub automation_mode: bool,
    /// High-risk acknowledgement set by the user-facing confirmation step.
    /// Required before a REQUIRES_EXPLICIT_CONSENT command may run.
    pub consent_granted: bool,
}

/// One executed step and its observed result, in order. The feedback loop
/// hands the accumulated records back to the plan source between steps.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step: PlanStep,
    pub result: ExecutionResult,
}

// ─── Extraction from model responses ────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PlanPayload {
    commands: Vec<serde_json::Value>,
    #[serde(default)]
    sudo: bool,
    #[serde(default)]
    platform: Option<PlatformField>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

/// Models emit `"platform": "linux"` and `"platform": ["ubuntu", "debian"]`
/// interchangeably.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlatformField {
    One(String),
    Many(Vec<String>),
}

impl PlatformField {
    fn names(&self) -> Vec<&str> {
        match self {
            Self::One(name) => vec![name.as_str()],
            Self::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// Extract and validate a command plan from a model response.
///
/// `PlanError::NotFound` means the response carried no plan at all, which the
/// caller treats as the completion signal rather than a fault.
pub fn extract_plan(response: &str, host: &HostContext) -> Result<CommandPlan, PlanError> {
    let candidate = find_json_candidate(response).ok_or(PlanError::NotFound)?;
    let payload: PlanPayload =
        serde_json::from_str(candidate).map_err(|e| PlanError::Json(e.to_string()))?;
    plan_from_payload(payload, host)
}

fn plan_from_payload(payload: PlanPayload, host: &HostContext) -> Result<CommandPlan, PlanError> {
    let mut commands = Vec::new();
    for entry in &payload.commands {
        let Some(text) = entry.as_str() else {
            return Err(PlanError::Invalid("each command must be a string".into()));
        };
        let text = text.trim();
        if !text.is_empty() {
            commands.push(text.to_string());
        }
    }
    if commands.is_empty() {
        return Err(PlanError::Invalid("'commands' must be a non-empty list".into()));
    }

    let working_dir = payload
        .cwd
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| PathBuf::from(shellexpand::tilde(c).into_owned()));

    let rationale = payload
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(ToString::to_string);

    let target_platform = resolve_target_platform(payload.platform.as_ref(), host);

    let steps = commands
        .into_iter()
        .map(|raw| {
            let uses_sudo = payload.sudo || raw.split_whitespace().next() == Some("sudo");
            PlanStep {
                raw_text: raw,
                working_dir: working_dir.clone(),
                uses_sudo,
                rationale: rationale.clone(),
            }
        })
        .collect();

    // Interactive runs confirm each step on the terminal; unattended runs
    // have nobody to ask, so the flag flips off and policy gates instead.
    Ok(CommandPlan {
        steps,
        target_platform,
        requires_confirmation: !host.automation_mode,
        automation_mode: host.automation_mode,
        consent_granted: false,
    })
}

/// Resolve the declared platform list against the enum the validator
/// compares. If any declared name identifies the host (platform family or
/// distro id), the declaration resolves to the host's platform; otherwise
/// the first recognisable name wins so the mismatch is visible downstream.
fn resolve_target_platform(field: Option<&PlatformField>, host: &HostContext) -> Platform {
    let Some(field) = field else {
        return Platform::Unknown;
    };
    let names = field.names();
    if names.iter().any(|n| host.matches_name(n)) {
        return host.platform;
    }
    names
        .iter()
        .map(|n| Platform::from_name(n))
        .find(|p| *p != Platform::Unknown)
        .unwrap_or(Platform::Unknown)
}

/// Locate the JSON object in a response: fenced ```json block first, then a
/// best-effort brace match over the whole text.
fn find_json_candidate(response: &str) -> Option<&str> {
    if let Some(fenced) = find_fenced_json(response) {
        return Some(fenced);
    }
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (end > start).then(|| &response[start..=end])
}

fn find_fenced_json(response: &str) -> Option<&str> {
    let mut rest = response;
    loop {
        let fence = rest.find("```")?;
        let after = &rest[fence + 3..];
        let newline = after.find('\n')?;
        let lang = after[..newline].trim().to_lowercase();
        let body_start = newline + 1;
        let body_end = after[body_start..].find("```")?;
        let body = after[body_start..body_start + body_end].trim();
        if (lang == "json" || lang.is_empty()) && body.starts_with('{') {
            return Some(body);
        }
        rest = &after[body_start + body_end + 3..];
    }
}
