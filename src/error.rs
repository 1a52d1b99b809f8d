//! Error types for detection-scorer operations.
//!
//! Defines error types for each subsystem:
//! - Configuration loading and validation
//! - Docker container management and host firewall setup
//! - Bot container runs
//! - Human notification and script installation collaborators
//! - Scoring runs and HTTP handlers

use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("No frameworks configured")]
    NoFrameworks,

    #[error("Framework '{0}' is configured more than once")]
    DuplicateFramework(String),

    #[error("Framework '{0}' has no container image")]
    MissingImage(String),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Errors that can occur during Docker operations.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("Network '{name}' error: {reason}")]
    Network { name: String, reason: String },

    #[error("Failed to pull image '{image}': {reason}")]
    PullFailed { image: String, reason: String },

    #[error("Docker run failed: {0}")]
    RunFailed(String),

    #[error("Container '{id}' not found")]
    ContainerNotFound { id: String },

    #[error("Error reading container logs: {0}")]
    Logs(String),
}

/// Errors raised while applying host packet-filtering rules.
#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Rule '{rule}' was rejected (exit code {code:?}): {stderr}")]
    Rejected {
        rule: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Errors produced by a single bot container run.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Isolated network setup failed: {0}")]
    Network(#[source] DockerError),

    #[error("Network '{0}' has no IPAM subnet/gateway configuration")]
    MissingIpam(String),

    #[error("Firewall setup failed: {0}")]
    Firewall(#[from] FirewallError),

    #[error("Container launch failed: {0}")]
    Launch(#[source] DockerError),
}

impl RunnerError {
    /// Returns true when the error is an infrastructure failure that must abort
    /// the whole scoring run rather than a single trial.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RunnerError::Network(_) | RunnerError::MissingIpam(_) | RunnerError::Firewall(_)
        )
    }
}

/// Errors from the human-notification webhook.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification endpoint is not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid notification URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Notification rejected ({code}): {message}")]
    Rejected { code: u16, message: String },
}

/// Errors from installing a submitted detection script.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Submitted script is empty")]
    EmptyScript,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort a scoring run.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("A scoring run is already in progress")]
    RunInProgress,

    #[error("Failed to install detection script: {0}")]
    Install(#[from] InstallError),

    #[error("Scoring run ended abnormally: {0}")]
    Aborted(String),

    #[error("Infrastructure failure during trial {trial} ('{framework}'): {source}")]
    Infrastructure {
        trial: usize,
        framework: String,
        #[source]
        source: RunnerError,
    },
}

/// Errors surfaced by HTTP handlers.
#[derive(Debug, Error)]
pub enum WebError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
