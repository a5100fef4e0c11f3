//! Dangerous-pattern rule set.
//!
//! A static, ordered list of tagged matchers. First match wins, so the most
//! specific and most dangerous rules come first. Every matcher is structural:
//! it inspects the parsed argv (quoted tokens excluded where mentioning a
//! shape must not count as being that shape), never the raw string.

use super::parser::{ParsedCommand, Token};

/// Why a rule exists. Drives verdict policy in the classifier: system power
/// changes are blocked unconditionally in automation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCategory {
    DestructiveFilesystem,
    ForkBomb,
    SecurityControl,
    SystemPower,
}

/// Base severity of a matched rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Blocks execution outright.
    Dangerous,
    /// Executes only with an explicit high-risk acknowledgement.
    RequiresConsent,
}

pub struct Rule {
    pub id: &'static str,
    pub category: RuleCategory,
    pub severity: Severity,
    pub matches: fn(&ParsedCommand) -> bool,
    pub reason: &'static str,
}

/// Ordered rule table. Audited as a unit: each entry has its own tests below.
pub static RULES: &[Rule] = &[
    Rule {
        id: "fork-bomb",
        category: RuleCategory::ForkBomb,
        severity: Severity::Dangerous,
        matches: matches_fork_bomb,
        reason: "self-referential background spawning exhausts the process table",
    },
    Rule {
        id: "destructive-filesystem",
        category: RuleCategory::DestructiveFilesystem,
        severity: Severity::Dangerous,
        matches: matches_recursive_system_delete,
        reason: "recursive delete of a system directory is irreversible",
    },
    Rule {
        id: "disk-wipe",
        category: RuleCategory::DestructiveFilesystem,
        severity: Severity::Dangerous,
        matches: matches_disk_wipe,
        reason: "writing to a block device destroys its contents",
    },
    Rule {
        id: "security-control",
        category: RuleCategory::SecurityControl,
        severity: Severity::Dangerous,
        matches: matches_security_control_disable,
        reason: "disabling a security control or changing root credentials",
    },
    Rule {
        id: "system-power",
        category: RuleCategory::SystemPower,
        severity: Severity::RequiresConsent,
        matches: matches_power_state_change,
        reason: "reboot/shutdown terminates every process on the host",
    },
];

/// Look up a rule by id. Used by tests and reporting.
pub fn rule_by_id(id: &str) -> Option<&'static Rule> {
    RULES.iter().find(|r| r.id == id)
}

// ─── Matchers ───────────────────────────────────────────────────────────────

/// Directories whose recursive removal takes the system down with them.
const PROTECTED_ROOTS: &[&str] = &[
    "/", "/bin", "/boot", "/dev", "/etc", "/home", "/lib", "/lib64", "/opt", "/proc", "/root",
    "/sbin", "/srv", "/sys", "/usr", "/var",
];

fn is_protected_path(arg: &str) -> bool {
    let trimmed = if arg.len() > 1 {
        arg.trim_end_matches('/')
    } else {
        arg
    };
    // A trailing glob token has already been split off by the parser, so
    // `/etc/*` arrives here as `/etc`.
    PROTECTED_ROOTS.contains(&trimmed)
}

fn short_flags_contain(words: &[Token], wanted: char) -> bool {
    words.iter().any(|t| {
        !t.quoted
            && t.text.starts_with('-')
            && !t.text.starts_with("--")
            && t.text.contains(wanted)
    })
}

fn path_args(words: &[Token]) -> impl Iterator<Item = &str> {
    words
        .iter()
        .skip(1)
        .filter(|t| !t.text.starts_with('-'))
        .map(|t| t.text.as_str())
}

/// `rm -r`/`-R`/`--recursive` aimed at a protected root, including the glob
/// forms the parser split apart.
fn matches_recursive_system_delete(cmd: &ParsedCommand) -> bool {
    let words = cmd.command_words();
    if cmd.effective_program() != Some("rm") {
        return false;
    }
    let recursive = short_flags_contain(words, 'r')
        || short_flags_contain(words, 'R')
        || words.iter().any(|t| t.text == "--recursive");
    recursive && path_args(words).any(is_protected_path)
}

/// Disk-wipe utilities: `dd` writing to a block device, `mkfs`, `wipefs`,
/// `fdisk`/`shred` aimed at a device node.
fn matches_disk_wipe(cmd: &ParsedCommand) -> bool {
    let words = cmd.command_words();
    match cmd.effective_program() {
        Some("dd") => words
            .iter()
            .any(|t| !t.quoted && t.text.starts_with("of=/dev/")),
        Some("wipefs") => true,
        Some("fdisk" | "shred" | "blkdiscard") => {
            path_args(words).any(|a| a.starts_with("/dev/"))
        }
        Some(program) => program == "mkfs" || program.starts_with("mkfs."),
        None => false,
    }
}

/// Structural fork-bomb shape: a function whose body pipes itself into
/// itself in the background, then invokes itself. Matched on the unquoted
/// tokens with whitespace removed, so reformatting does not evade it and a
/// quoted mention does not trigger it.
fn matches_fork_bomb(cmd: &ParsedCommand) -> bool {
    let joined: String = cmd
        .tokens
        .iter()
        .filter(|t| !t.quoted)
        .map(|t| t.text.as_str())
        .collect();
    let joined: String = joined.chars().filter(|c| !c.is_whitespace()).collect();
    let Some(def) = joined.find("(){") else {
        return false;
    };
    let name = &joined[..def];
    if name.is_empty() {
        return false;
    }
    joined == format!("{name}(){{{name}|{name}&}};{name}")
}

/// Firewall / MAC teardown and root-credential changes.
fn matches_security_control_disable(cmd: &ParsedCommand) -> bool {
    let words = cmd.command_words();
    let arg = |idx: usize| words.get(idx).map(|t| t.text.as_str());
    match cmd.effective_program() {
        Some("ufw") => arg(1) == Some("disable"),
        Some("systemctl") => {
            matches!(arg(1), Some("stop" | "disable" | "mask"))
                && words.iter().skip(2).any(|t| {
                    let unit = t.text.trim_end_matches(".service");
                    matches!(unit, "firewalld" | "apparmor" | "iptables" | "nftables")
                })
        }
        Some("iptables") => words
            .iter()
            .any(|t| t.text == "-F" || t.text == "--flush"),
        Some("setenforce") => matches!(arg(1), Some("0" | "Permissive" | "permissive")),
        Some("aa-teardown") => true,
        Some("passwd") => matches!(arg(1), Some("root" | "-d")),
        Some("chpasswd") => true,
        _ => false,
    }
}

/// Reboot/shutdown family, plus the `systemctl` and `init` spellings.
fn matches_power_state_change(cmd: &ParsedCommand) -> bool {
    let words = cmd.command_words();
    let arg = |idx: usize| words.get(idx).map(|t| t.text.as_str());
    match cmd.effective_program() {
        Some("reboot" | "shutdown" | "poweroff" | "halt") => true,
        Some("systemctl") => matches!(
            arg(1),
            Some("reboot" | "poweroff" | "halt" | "suspend" | "hibernate")
        ),
        Some("init") => matches!(arg(1), Some("0" | "6")),
        _ => false,
    }
}
