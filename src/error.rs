use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for shellpilot.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum PilotError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Plan extraction / shape ─────────────────────────────────────────
    #[error("plan: {0}")]
    Plan(#[from] PlanError),

    // ── Command execution ───────────────────────────────────────────────
    #[error("exec: {0}")]
    Exec(#[from] ExecError),

    // ── Plan source backend ─────────────────────────────────────────────
    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Plan errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PlanError {
    /// No JSON command plan present in the model response. This is the
    /// "task finished" signal at the plan-source boundary, not a fault.
    #[error("no command plan found in response")]
    NotFound,

    #[error("invalid JSON command plan: {0}")]
    Json(String),

    #[error("malformed command plan: {0}")]
    Invalid(String),
}

// ─── Execution errors ───────────────────────────────────────────────────────

/// Faults of the execution engine itself. A non-zero exit code or a timeout is
/// ordinary reportable data and never surfaces here.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("empty argv, nothing to spawn")]
    EmptyCommand,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

// ─── Backend errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("no API key configured (set backend.api_key or SHELLPILOT_API_KEY)")]
    MissingApiKey,
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, PilotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_displays_correctly() {
        let err = PilotError::Config(ConfigError::Validation("bad timeout".into()));
        assert!(err.to_string().contains("validation failed"));
    }

    #[test]
    fn plan_not_found_is_distinct_from_json_error() {
        let not_found = PlanError::NotFound.to_string();
        let bad_json = PlanError::Json("expected value".into()).to_string();
        assert_ne!(not_found, bad_json);
        assert!(bad_json.contains("expected value"));
    }

    #[test]
    fn spawn_error_names_the_program() {
        let err = ExecError::Spawn {
            program: "systemctl".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.to_string().contains("systemctl"));
    }

    #[test]
    fn anyhow_interop() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let pilot_err: PilotError = anyhow_err.into();
        assert!(pilot_err.to_string().contains("something went wrong"));
    }
}
