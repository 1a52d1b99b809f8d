//! detection-scorer: grades browser-automation detection scripts.
//!
//! A submitted script is installed into the page under test, then a shuffled
//! sequence of containerized automation frameworks (and optionally a human
//! operator) visits the page. The script reports which driver it believes is
//! in control; the score is the fraction of trials it named correctly.

pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod fakes;
pub mod metrics;
pub mod notify;
pub mod scoring;
pub mod server;
pub mod submission;

pub use config::AppConfig;
pub use error::{
    ConfigError, DockerError, FirewallError, InstallError, NotifyError, RunnerError, ScoringError,
    WebError,
};
