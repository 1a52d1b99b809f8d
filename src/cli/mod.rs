//! Command-line interface for detection-scorer.
//!
//! Provides the `serve` command that runs the scoring service and a
//! `frameworks` command for inspecting the configured framework table.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
