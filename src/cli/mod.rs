//! Command-line interface for fairing.
//!
//! Provides commands for running a training workload through the
//! preprocess, build and deploy stages, and for listing strategies.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
