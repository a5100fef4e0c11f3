//! Dangerous-pattern classification.
//!
//! Evaluates the ordered rule set against a parsed command. A command whose
//! raw text needs shell interpretation is never classified `Safe`: structural
//! analysis cannot fully reason about composed or piped effects, so the
//! verdict floors at `RequiresConsent`. The individual clauses of a chained
//! command are still scanned, so a destructive clause hiding behind `&&`
//! escalates all the way to `Dangerous` rather than stopping at consent.

use super::parser::{self, ParsedCommand};
use super::rules::{Rule, RuleCategory, Severity, RULES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Safe,
    RequiresConsent,
    Dangerous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationResult {
    pub verdict: Verdict,
    pub matched_rule: Option<&'static str>,
    pub reason: String,
}

impl ClassificationResult {
    fn safe() -> Self {
        Self {
            verdict: Verdict::Safe,
            matched_rule: None,
            reason: "no dangerous pattern matched".into(),
        }
    }
}

/// Plan-level facts that change verdict policy. Threaded in explicitly;
/// never read from ambient process state.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanContext {
    pub automation_mode: bool,
}

/// Classify one parsed command. For a plain command the first matching rule
/// wins. For a chained command the verdict is the worst across the full
/// parse and every clause: a consent-level match up front must not mask a
/// destructive clause behind it.
pub fn classify(cmd: &ParsedCommand, ctx: &PlanContext) -> ClassificationResult {
    let full_match = first_match(cmd).map(|rule| from_rule(rule, ctx));

    if !cmd.has_shell_metachars {
        return full_match.unwrap_or_else(ClassificationResult::safe);
    }

    // Scan each clause of the chain: splitting is for analysis only, the
    // step itself stays atomic. The first dangerous verdict anywhere wins;
    // otherwise the first consent-level match is kept for its rule id.
    let mut consent_match: Option<ClassificationResult> = None;
    if let Some(result) = full_match {
        if result.verdict == Verdict::Dangerous {
            return result;
        }
        consent_match = Some(result);
    }
    for segment in parser::split_segments(&cmd.raw) {
        let parsed = parser::parse(&segment);
        if let Some(rule) = first_match(&parsed) {
            let result = from_rule(rule, ctx);
            if result.verdict == Verdict::Dangerous {
                return result;
            }
            consent_match.get_or_insert(result);
        }
    }
    consent_match.unwrap_or_else(|| ClassificationResult {
        verdict: Verdict::RequiresConsent,
        matched_rule: None,
        reason: "shell metacharacters require explicit consent".into(),
    })
}

fn first_match(cmd: &ParsedCommand) -> Option<&'static Rule> {
    RULES.iter().find(|rule| (rule.matches)(cmd))
}

fn from_rule(rule: &'static Rule, ctx: &PlanContext) -> ClassificationResult {
    // Unattended termination of the host is categorically irreversible:
    // power-state rules harden to Dangerous in automation mode no matter
    // what consent says.
    let verdict = if rule.category == RuleCategory::SystemPower && ctx.automation_mode {
        Verdict::Dangerous
    } else {
        match rule.severity {
            Severity::Dangerous => Verdict::Dangerous,
            Severity::RequiresConsent => Verdict::RequiresConsent,
        }
    };
    ClassificationResult {
        verdict,
        matched_rule: Some(rule.id),
        reason: rule.reason.to_string(),
    }
}
