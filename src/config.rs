//! Configuration.
//!
//! A single TOML file under the platform config directory. Every field has a
//! default so a missing file or a partial file both work; unknown keys are
//! rejected to catch typos.

use crate::error::ConfigError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub backend: BackendConfig,
    pub exec: ExecConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    pub base_url: String,
    /// Falls back to the SHELLPILOT_API_KEY environment variable.
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            model: "gpt-4o-mini".into(),
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecConfig {
    /// Per-command wall-clock timeout.
    pub timeout_secs: u64,
    /// Budget: maximum executed steps per run.
    pub max_steps: usize,
    /// Budget: maximum wall-clock time per run.
    pub max_run_secs: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            max_steps: 10,
            max_run_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    /// Write a run report file after each run.
    pub enabled: bool,
    /// Override for the report directory; defaults to the platform data dir.
    pub dir: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

impl Config {
    /// Platform config file location, e.g. `~/.config/shellpilot/config.toml`
    /// on Linux.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "shellpilot").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location. A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exec.timeout_secs == 0 {
            return Err(ConfigError::Validation("exec.timeout_secs must be > 0".into()));
        }
        if self.exec.max_steps == 0 {
            return Err(ConfigError::Validation("exec.max_steps must be > 0".into()));
        }
        if self.exec.max_run_secs == 0 {
            return Err(ConfigError::Validation("exec.max_run_secs must be > 0".into()));
        }
        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return Err(ConfigError::Validation(
                "backend.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        Ok(())
    }

    /// Where run reports go: the configured override, else the platform data
    /// directory.
    pub fn report_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.report.dir {
            return Some(dir.clone());
        }
        ProjectDirs::from("", "", "shellpilot").map(|dirs| dirs.data_dir().join("reports"))
    }
}
