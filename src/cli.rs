use clap::Parser;
use std::path::PathBuf;

/// `shellpilot` - AI-planned shell commands behind a safety gate.
#[derive(Parser, Debug)]
#[command(name = "shellpilot")]
#[command(version = "0.1.0")]
#[command(about = "Plan and run shell commands with an AI in the loop.", long_about = None)]
pub struct Cli {
    /// What to do, in plain language
    pub query: String,

    /// Unattended mode: no prompts, high-risk commands are blocked outright
    #[arg(long)]
    pub automation: bool,

    /// Skip per-step confirmation (high-risk consent still prompts)
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Maximum number of executed steps for this run
    #[arg(long)]
    pub max_steps: Option<usize>,

    /// Per-command timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Working directory for executed commands
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Model override
    #[arg(long)]
    pub model: Option<String>,

    /// OpenAI-compatible API base URL override
    #[arg(long)]
    pub base_url: Option<String>,

    /// Config file override
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Skip writing the run report file
    #[arg(long)]
    pub no_report: bool,
}
