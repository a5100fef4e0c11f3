//! Host context detection.
//!
//! Collects the read-only facts the validator compares plans against: the
//! detected OS identity, the Linux distribution (from `/etc/os-release`),
//! the working directory and whether we are running unattended. Detection
//! happens once per process; the validator never infers platform from
//! command content.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// How long the `sudo -n true` probe may take before we assume no allowance.
const SUDO_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// OS identity a plan can target and a host can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, Default)]
#[strum(serialize_all = "lowercase")]
pub enum Platform {
    Linux,
    Macos,
    /// Undeclared or unrecognised. A plan targeting `Unknown` matches any
    /// host; a host detected as `Unknown` only matches undeclared plans.
    #[default]
    Unknown,
}

impl Platform {
    /// Map a platform name as written by a model or a config file.
    /// Linux distribution ids count as linux.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "linux" | "ubuntu" | "debian" | "fedora" | "arch" | "archlinux" | "centos"
            | "rhel" | "alpine" | "opensuse" | "suse" | "nixos" | "gentoo" | "mint"
            | "raspbian" => Self::Linux,
            "macos" | "darwin" | "osx" | "mac" => Self::Macos,
            _ => Self::Unknown,
        }
    }

    /// Detect the platform of the running host.
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => Self::Linux,
            "macos" => Self::Macos,
            _ => Self::Unknown,
        }
    }
}

/// Read-only host facts supplied to validation. Built once per request.
#[derive(Debug, Clone)]
pub struct HostContext {
    pub platform: Platform,
    /// `ID` from os-release (e.g. `ubuntu`), lowercase. Linux only.
    pub distro_id: Option<String>,
    /// `PRETTY_NAME` from os-release, for display.
    pub distro_name: Option<String>,
    pub working_dir: PathBuf,
    pub automation_mode: bool,
}

impl HostContext {
    pub fn detect(automation_mode: bool) -> Self {
        let platform = Platform::current();
        let (distro_id, distro_name) = if platform == Platform::Linux {
            read_os_release(Path::new("/etc/os-release"))
                .or_else(|| read_os_release(Path::new("/usr/lib/os-release")))
                .unwrap_or((None, None))
        } else {
            (None, None)
        };
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self {
            platform,
            distro_id,
            distro_name,
            working_dir,
            automation_mode,
        }
    }

    /// True if `name` identifies this host: its platform name or its
    /// distribution id (so a plan declared for "ubuntu" matches an Ubuntu
    /// host even though the platform enum only knows "linux").
    pub fn matches_name(&self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        if Platform::from_name(&name) == self.platform && self.platform != Platform::Unknown {
            return true;
        }
        self.distro_id.as_deref() == Some(name.as_str())
    }
}

fn read_os_release(path: &Path) -> Option<(Option<String>, Option<String>)> {
    let contents = std::fs::read_to_string(path).ok()?;
    Some(parse_os_release(&contents))
}

/// Parse the `KEY=value` lines of an os-release file. Quotes are stripped,
/// comments and malformed lines skipped.
fn parse_os_release(contents: &str) -> (Option<String>, Option<String>) {
    let mut id = None;
    let mut pretty = None;
    for line in contents.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim_matches(|c| c == '"' || c == '\'').to_string();
        match key {
            "ID" => id = Some(value.to_lowercase()),
            "PRETTY_NAME" => pretty = Some(value),
            _ => {}
        }
    }
    (id, pretty)
}

/// Cached probe for a passwordless-sudo allowance.
///
/// Runs `sudo -n true` once and remembers the answer for the lifetime of the
/// process; sudoers configuration does not change under us mid-request.
#[derive(Debug, Default)]
pub struct SudoProbe {
    cached: Mutex<Option<bool>>,
}

impl SudoProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn passwordless_sudo(&self) -> bool {
        if let Some(cached) = *self.cached.lock().expect("sudo probe lock poisoned") {
            return cached;
        }
        let available = probe_sudo().await;
        *self.cached.lock().expect("sudo probe lock poisoned") = Some(available);
        available
    }
}

async fn probe_sudo() -> bool {
    let probe = tokio::process::Command::new("sudo")
        .args(["-n", "true"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
    match tokio::time::timeout(SUDO_PROBE_TIMEOUT, probe).await {
        Ok(Ok(status)) => status.success(),
        // sudo missing, unspawnable or asking for a password: no allowance.
        _ => false,
    }
}
