//! Plan-step validation.
//!
//! The gate in front of the execution engine. Checks run in a fixed order and
//! short-circuit on the first failure: malformed step, platform mismatch,
//! sudo policy, then dangerous-pattern classification. Validation is a pure
//! decision function: no I/O, safe to call repeatedly and concurrently.

use super::classifier::{self, PlanContext, Verdict};
use super::parser;
use crate::context::Platform;
use crate::plan::PlanStep;

/// Policy facts the validator is constructed with. Threaded explicitly so
/// policy stays testable and request-scoped, never ambient.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionPolicy {
    pub automation_mode: bool,
    /// A passwordless-sudo allowance established externally (`sudo -n true`
    /// probe). Without it, sudo steps cannot run unattended.
    pub passwordless_sudo: bool,
}

/// The verdict gating a step. Nothing proceeds past a `Rejected*` outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Approved,
    RejectedMalformed(String),
    RejectedPlatformMismatch(String),
    RejectedDangerous {
        rule: Option<&'static str>,
        reason: String,
        /// True when the only blocker is a missing explicit consent, so an
        /// interactive confirmation could approve the step. Never true for
        /// outright dangerous commands.
        consent_would_approve: bool,
    },
}

impl ValidationOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }

    /// Human-readable detail for reporting.
    pub fn detail(&self) -> String {
        match self {
            Self::Approved => "approved".into(),
            Self::RejectedMalformed(detail) => format!("malformed step: {detail}"),
            Self::RejectedPlatformMismatch(detail) => format!("platform mismatch: {detail}"),
            Self::RejectedDangerous { reason, rule, .. } => match rule {
                Some(rule) => format!("blocked ({rule}): {reason}"),
                None => format!("blocked: {reason}"),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Validator {
    policy: ExecutionPolicy,
}

impl Validator {
    pub fn new(policy: ExecutionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Validate one step against the declared target platform, the detected
    /// host platform and the plan's consent flag.
    pub fn validate(
        &self,
        step: &PlanStep,
        target: Platform,
        host: Platform,
        consent_granted: bool,
    ) -> ValidationOutcome {
        // 1. Malformed: empty or multi-line raw text. A multi-line "step" is
        //    structurally a script, not a command.
        let raw = step.raw_text.trim();
        if raw.is_empty() {
            return ValidationOutcome::RejectedMalformed("empty command".into());
        }
        if raw.contains('\n') {
            return ValidationOutcome::RejectedMalformed(
                "step must be a single command line".into(),
            );
        }

        // 2. Platform: declarative comparison only; the plan states its
        //    target, the host context supplies the detected identity.
        if target != Platform::Unknown && target != host {
            return ValidationOutcome::RejectedPlatformMismatch(format!(
                "step targets {target}, host is {host}"
            ));
        }

        // 3. Sudo policy.
        if step.uses_sudo && self.policy.automation_mode && !self.policy.passwordless_sudo {
            return ValidationOutcome::RejectedDangerous {
                rule: None,
                reason: "sudo blocked in unattended mode (no passwordless allowance)".into(),
                consent_would_approve: false,
            };
        }

        // 4. Classification.
        let parsed = parser::parse(raw);
        let ctx = PlanContext {
            automation_mode: self.policy.automation_mode,
        };
        let classification = classifier::classify(&parsed, &ctx);
        match classification.verdict {
            Verdict::Safe => ValidationOutcome::Approved,
            Verdict::Dangerous => ValidationOutcome::RejectedDangerous {
                rule: classification.matched_rule,
                reason: classification.reason,
                consent_would_approve: false,
            },
            Verdict::RequiresConsent => {
                if consent_granted {
                    ValidationOutcome::Approved
                } else {
                    ValidationOutcome::RejectedDangerous {
                        rule: classification.matched_rule,
                        reason: format!(
                            "needs elevated confirmation: {}",
                            classification.reason
                        ),
                        consent_would_approve: !self.policy.automation_mode,
                    }
                }
            }
        }
    }
}
