#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default
)]

//! AI-planned shell commands behind a safety gate.
//!
//! The pipeline is parse → classify → validate → execute, driven by a
//! feedback loop that hands each command's output back to the plan source
//! until the task is done or a stop condition fires.

pub mod app;
pub mod backend;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod plan;
pub mod report;
pub mod runner;
pub mod security;
pub mod ui;
