//! Narrow container-engine interface consumed by the bot runner.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::DockerError;

/// Addressing details of the isolated bridge network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: String,
    pub subnet: Option<String>,
    pub gateway: Option<String>,
}

/// Everything needed to start one bot container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    /// `nofile` ulimit, applied as both soft and hard limit.
    pub nofile_limit: i64,
}

/// Container engine operations. Containers are addressed by name so that
/// cleanup works even when a launch failed before an ID was assigned.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates the bridge network if absent and returns its addressing.
    async fn ensure_network(&self, name: &str) -> Result<NetworkInfo, DockerError>;

    /// Force-removes a leftover container with this name, if any.
    async fn discard_stale(&self, name: &str) -> Result<(), DockerError>;

    /// Creates and starts a detached container. Returns the container ID.
    async fn launch(&self, spec: &LaunchSpec) -> Result<String, DockerError>;

    /// Follows the container's combined output until it ends.
    fn stream_logs(&self, name: &str) -> BoxStream<'static, Result<String, DockerError>>;

    /// Resolves with the exit code once the container stops running.
    async fn wait_exit(&self, name: &str) -> Result<i64, DockerError>;

    /// Stops the container, killing it after `grace`.
    async fn stop(&self, name: &str, grace: Duration) -> Result<(), DockerError>;

    /// Force-removes the container.
    async fn remove(&self, name: &str) -> Result<(), DockerError>;
}
