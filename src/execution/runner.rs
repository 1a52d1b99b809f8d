//! Time-bounded execution of one untrusted bot container.
//!
//! A run goes through these steps:
//! ```text
//! ensure network → isolate subnet → discard stale → launch → stream logs
//!   → wait (bounded) → stop (bounded) → remove
//! ```
//! Network and firewall failures are returned as fatal errors. Once the stale
//! container has been discarded, teardown is always attempted exactly once
//! and never fails the run.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::error::{DockerError, RunnerError};
use crate::execution::firewall::Firewall;
use crate::execution::runtime::{ContainerRuntime, LaunchSpec, NetworkInfo};
use crate::metrics::MetricsCollector;

/// Environment variable carrying the page URL into bot containers.
pub const WEB_URL_ENV: &str = "ABS_WEB_URL";

/// Extra time allowed for the engine's own stop on top of the stop grace.
const STOP_SLACK: Duration = Duration::from_secs(5);

/// Settings shared by every run of a [`ContainerRunner`].
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Port the page under test is served on.
    pub web_port: u16,
    /// Path of the page under test.
    pub web_path: String,
    /// Grace given to the container before it is killed during teardown.
    pub stop_timeout: Duration,
    /// Pause between discarding a stale container and launching.
    pub settle_delay: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            web_port: 10001,
            web_path: "/_web".to_string(),
            stop_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_secs(1),
        }
    }
}

/// Parameters of a single bot run.
#[derive(Debug, Clone)]
pub struct BotRunRequest<'a> {
    pub image: &'a str,
    pub container_name: &'a str,
    pub network_name: &'a str,
    pub fd_limit: i64,
    pub timeout: Duration,
}

/// How the wait on a launched container ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerExit {
    /// The container exited by itself.
    Exited { code: i64 },
    /// The deadline passed first. Expected for scripts that never terminate.
    TimedOut,
    /// The engine failed while waiting; the container was still torn down.
    WaitFailed(String),
}

/// Launches bot containers under network and resource constraints.
#[derive(Clone)]
pub struct ContainerRunner {
    runtime: Arc<dyn ContainerRuntime>,
    firewall: Arc<dyn Firewall>,
    settings: RunnerSettings,
    metrics: MetricsCollector,
}

impl ContainerRunner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        firewall: Arc<dyn Firewall>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            runtime,
            firewall,
            settings,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// URL of the page under test as seen from inside the bot network.
    pub fn web_url(&self, gateway: &str) -> String {
        format!(
            "http://{}:{}{}",
            gateway, self.settings.web_port, self.settings.web_path
        )
    }

    /// Runs one bot container to completion or timeout, then tears it down.
    pub async fn run(&self, request: &BotRunRequest<'_>) -> Result<ContainerExit, RunnerError> {
        info!(
            image = request.image,
            container = request.container_name,
            "Running bot container"
        );

        let network = self.prepare_network(request.network_name).await?;
        let gateway = network
            .gateway
            .ok_or_else(|| RunnerError::MissingIpam(network.name.clone()))?;

        if let Err(e) = self.runtime.discard_stale(request.container_name).await {
            debug!(container = request.container_name, error = %e, "Failed to discard stale container");
        }
        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }

        let spec = LaunchSpec {
            name: request.container_name.to_string(),
            image: request.image.to_string(),
            network: request.network_name.to_string(),
            env: vec![format!("{}={}", WEB_URL_ENV, self.web_url(&gateway))],
            nofile_limit: request.fd_limit,
        };

        let result = self.launch_and_wait(&spec, request.timeout).await;
        self.cleanup(request.container_name).await;

        match result {
            Ok(exit) => {
                info!(
                    image = request.image,
                    container = request.container_name,
                    exit = ?exit,
                    "Finished bot container"
                );
                Ok(exit)
            }
            Err(e) => {
                error!(image = request.image, error = %e, "Failed to run bot container");
                Err(RunnerError::Launch(e))
            }
        }
    }

    /// Ensures the isolated network exists and its subnet is firewalled.
    async fn prepare_network(&self, name: &str) -> Result<NetworkInfo, RunnerError> {
        let network = self
            .runtime
            .ensure_network(name)
            .await
            .map_err(RunnerError::Network)?;

        let subnet = network
            .subnet
            .as_deref()
            .ok_or_else(|| RunnerError::MissingIpam(name.to_string()))?;
        self.firewall.isolate_subnet(subnet).await?;

        Ok(network)
    }

    async fn launch_and_wait(
        &self,
        spec: &LaunchSpec,
        timeout: Duration,
    ) -> Result<ContainerExit, DockerError> {
        let id = self.runtime.launch(spec).await?;
        debug!(container = %spec.name, id = %id, "Container started");

        self.spawn_log_stream(&spec.name);

        debug!(
            container = %spec.name,
            timeout_secs = timeout.as_secs_f64(),
            "Waiting for container to finish"
        );
        let exit = match tokio::time::timeout(timeout, self.runtime.wait_exit(&spec.name)).await {
            Ok(Ok(code)) => ContainerExit::Exited { code },
            Ok(Err(e)) => {
                warn!(container = %spec.name, error = %e, "Error while waiting for container");
                ContainerExit::WaitFailed(e.to_string())
            }
            Err(_) => {
                debug!(container = %spec.name, "Container still running at deadline");
                ContainerExit::TimedOut
            }
        };

        Ok(exit)
    }

    /// Forwards container output to the log on a detached task.
    fn spawn_log_stream(&self, name: &str) {
        let mut logs = self.runtime.stream_logs(name);
        let container = name.to_string();

        tokio::spawn(async move {
            while let Some(chunk) = logs.next().await {
                match chunk {
                    Ok(text) => {
                        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                            info!(target: "bot_logs", container = %container, "{}", line);
                        }
                    }
                    Err(e) => {
                        error!(container = %container, error = %e, "Error streaming logs");
                        break;
                    }
                }
            }
        });
    }

    /// Bounded stop followed by forced removal. Failures are logged only.
    async fn cleanup(&self, name: &str) {
        let bound = self.settings.stop_timeout.saturating_add(STOP_SLACK);
        match tokio::time::timeout(bound, self.runtime.stop(name, self.settings.stop_timeout)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(DockerError::ContainerNotFound { .. })) => {
                debug!(container = name, "Container already gone before stop");
            }
            Ok(Err(e)) => {
                debug!(container = name, error = %e, "Failed to stop container");
            }
            Err(_) => {
                warn!(container = name, "Timed out stopping container, forcing removal");
            }
        }

        match self.runtime.remove(name).await {
            Ok(()) => debug!(container = name, "Removed container"),
            Err(DockerError::ContainerNotFound { .. }) => {
                debug!(container = name, "Container already removed");
            }
            Err(e) => {
                self.metrics.record_cleanup_failure();
                warn!(container = name, error = %e, "Failed to remove container");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::firewall::DisabledFirewall;
    use crate::fakes::{ExitBehavior, FakeFirewall, FakeRuntime};

    fn runner(runtime: Arc<FakeRuntime>, firewall: Arc<dyn Firewall>) -> ContainerRunner {
        ContainerRunner::new(
            runtime,
            firewall,
            RunnerSettings {
                web_port: 8080,
                web_path: "/_web".to_string(),
                stop_timeout: Duration::from_millis(10),
                settle_delay: Duration::ZERO,
            },
        )
    }

    fn request(timeout: Duration) -> BotRunRequest<'static> {
        BotRunRequest {
            image: "bots/selenium:latest",
            container_name: "detect-selenium-0",
            network_name: "local_network",
            fd_limit: 1024,
            timeout,
        }
    }

    #[tokio::test]
    async fn test_normal_exit_is_cleaned_up() {
        let runtime = Arc::new(FakeRuntime::new());
        let firewall = Arc::new(FakeFirewall::new());
        let runner = runner(Arc::clone(&runtime), firewall.clone());

        let exit = runner.run(&request(Duration::from_secs(1))).await.unwrap();
        assert_eq!(exit, ContainerExit::Exited { code: 0 });

        let calls = runtime.calls();
        assert_eq!(calls.stale_discards, 1);
        assert_eq!(calls.launches, 1);
        assert_eq!(calls.stops, 1);
        assert_eq!(calls.removes, 1);
        assert_eq!(firewall.isolated_subnets(), vec!["172.30.0.0/16".to_string()]);
    }

    #[tokio::test]
    async fn test_timeout_is_cleaned_up() {
        let runtime = Arc::new(FakeRuntime::new().with_exit(ExitBehavior::Hang));
        let runner = runner(Arc::clone(&runtime), Arc::new(DisabledFirewall));

        let start = std::time::Instant::now();
        let exit = runner.run(&request(Duration::from_millis(50))).await.unwrap();
        assert_eq!(exit, ContainerExit::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(2));

        let calls = runtime.calls();
        assert_eq!(calls.stops, 1);
        assert_eq!(calls.removes, 1);
    }

    #[tokio::test]
    async fn test_unbounded_stop_timeout_does_not_overflow() {
        let runtime = Arc::new(FakeRuntime::new());
        let runner = ContainerRunner::new(
            Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
            Arc::new(DisabledFirewall),
            RunnerSettings {
                stop_timeout: Duration::MAX,
                settle_delay: Duration::ZERO,
                ..Default::default()
            },
        );

        let exit = runner.run(&request(Duration::from_secs(1))).await.unwrap();
        assert_eq!(exit, ContainerExit::Exited { code: 0 });
        assert_eq!(runtime.calls().stops, 1);
        assert_eq!(runtime.calls().removes, 1);
    }

    #[tokio::test]
    async fn test_launch_failure_still_cleans_up() {
        let runtime = Arc::new(FakeRuntime::new().failing_launch_for("bots/selenium:latest"));
        let runner = runner(Arc::clone(&runtime), Arc::new(DisabledFirewall));

        let err = runner.run(&request(Duration::from_secs(1))).await.unwrap_err();
        assert!(matches!(err, RunnerError::Launch(_)));
        assert!(!err.is_fatal());

        let calls = runtime.calls();
        assert_eq!(calls.stops, 1);
        assert_eq!(calls.removes, 1);
    }

    #[tokio::test]
    async fn test_wait_error_is_not_fatal() {
        let runtime = Arc::new(FakeRuntime::new().with_exit(ExitBehavior::Fail));
        let runner = runner(Arc::clone(&runtime), Arc::new(DisabledFirewall));

        let exit = runner.run(&request(Duration::from_secs(1))).await.unwrap();
        assert!(matches!(exit, ContainerExit::WaitFailed(_)));
        assert_eq!(runtime.calls().removes, 1);
    }

    #[tokio::test]
    async fn test_network_failure_is_fatal_and_launches_nothing() {
        let runtime = Arc::new(FakeRuntime::new().failing_network());
        let runner = runner(Arc::clone(&runtime), Arc::new(DisabledFirewall));

        let err = runner.run(&request(Duration::from_secs(1))).await.unwrap_err();
        assert!(err.is_fatal());

        let calls = runtime.calls();
        assert_eq!(calls.launches, 0);
        assert_eq!(calls.stops, 0);
        assert_eq!(calls.removes, 0);
    }

    #[tokio::test]
    async fn test_firewall_failure_is_fatal() {
        let runtime = Arc::new(FakeRuntime::new());
        let runner = runner(Arc::clone(&runtime), Arc::new(FakeFirewall::failing()));

        let err = runner.run(&request(Duration::from_secs(1))).await.unwrap_err();
        assert!(matches!(err, RunnerError::Firewall(_)));
        assert_eq!(runtime.calls().launches, 0);
    }

    #[tokio::test]
    async fn test_launch_spec_points_bot_at_gateway() {
        let runtime = Arc::new(FakeRuntime::new());
        let runner = runner(Arc::clone(&runtime), Arc::new(DisabledFirewall));

        runner.run(&request(Duration::from_secs(1))).await.unwrap();

        let launched = runtime.launched();
        assert_eq!(launched.len(), 1);
        let spec = &launched[0];
        assert_eq!(spec.name, "detect-selenium-0");
        assert_eq!(spec.network, "local_network");
        assert_eq!(spec.nofile_limit, 1024);
        assert_eq!(spec.env, vec!["ABS_WEB_URL=http://172.30.0.1:8080/_web".to_string()]);
    }
}
