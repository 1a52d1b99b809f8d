//! Docker API wrapper using the bollard crate.
//!
//! Implements [`ContainerRuntime`] against the local Docker daemon.

use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Network, ResourcesUlimits};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use bollard::Docker;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, info};

use crate::error::DockerError;
use crate::execution::runtime::{ContainerRuntime, LaunchSpec, NetworkInfo};

/// Docker client wrapper for bot container operations.
#[derive(Clone)]
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Creates a new Docker client connecting to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::DaemonUnavailable` if the Docker daemon is not accessible.
    pub fn new() -> Result<Self, DockerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DockerError::DaemonUnavailable(format!("Failed to connect: {e}")))?;

        Ok(Self { docker })
    }

    /// Creates a new Docker client from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Checks if an image exists locally.
    pub async fn image_exists(&self, image: &str) -> bool {
        self.docker.inspect_image(image).await.is_ok()
    }

    /// Pulls a Docker image from a registry.
    pub async fn pull_image(&self, image: &str) -> Result<(), DockerError> {
        info!(image, "Pulling framework image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| DockerError::PullFailed {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }

    async fn inspect_network(&self, name: &str) -> Result<Network, BollardError> {
        self.docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
    }

    async fn create_network(&self, name: &str) -> Result<(), DockerError> {
        info!(network = name, "Creating bridge network");
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            ..Default::default()
        };

        self.docker
            .create_network(options)
            .await
            .map_err(|e| network_error(name, e))?;
        Ok(())
    }
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn is_not_modified(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

fn network_error(name: &str, err: BollardError) -> DockerError {
    DockerError::Network {
        name: name.to_string(),
        reason: err.to_string(),
    }
}

fn container_error(name: &str, action: &str, err: BollardError) -> DockerError {
    if is_not_found(&err) {
        DockerError::ContainerNotFound {
            id: name.to_string(),
        }
    } else {
        DockerError::RunFailed(format!("Failed to {action} container '{name}': {err}"))
    }
}

/// Extracts the first IPAM subnet/gateway pair of a network.
fn network_info(name: &str, network: Network) -> NetworkInfo {
    let first = network
        .ipam
        .and_then(|ipam| ipam.config)
        .and_then(|configs| configs.into_iter().next());

    NetworkInfo {
        name: name.to_string(),
        subnet: first.as_ref().and_then(|c| c.subnet.clone()),
        gateway: first.and_then(|c| c.gateway),
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn ensure_network(&self, name: &str) -> Result<NetworkInfo, DockerError> {
        let network = match self.inspect_network(name).await {
            Ok(network) => network,
            Err(e) if is_not_found(&e) => {
                self.create_network(name).await?;
                self.inspect_network(name)
                    .await
                    .map_err(|e| network_error(name, e))?
            }
            Err(e) => return Err(network_error(name, e)),
        };

        Ok(network_info(name, network))
    }

    async fn discard_stale(&self, name: &str) -> Result<(), DockerError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => {
                debug!(container = name, "Removed stale container");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(container_error(name, "remove stale", e)),
        }
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<String, DockerError> {
        if !self.image_exists(&spec.image).await {
            self.pull_image(&spec.image).await?;
        }

        let host_config = HostConfig {
            network_mode: Some(spec.network.clone()),
            ulimits: Some(vec![ResourcesUlimits {
                name: Some("nofile".to_string()),
                soft: Some(spec.nofile_limit),
                hard: Some(spec.nofile_limit),
            }]),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            host_config: Some(host_config),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| container_error(&spec.name, "create", e))?;

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| container_error(&spec.name, "start", e))?;

        Ok(response.id)
    }

    fn stream_logs(&self, name: &str) -> BoxStream<'static, Result<String, DockerError>> {
        let docker = self.docker.clone();
        let name = name.to_string();

        async_stream::stream! {
            let options = LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            };
            let mut logs = docker.logs(&name, Some(options));

            while let Some(chunk) = logs.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message })
                    | Ok(LogOutput::StdErr { message })
                    | Ok(LogOutput::Console { message }) => {
                        yield Ok(String::from_utf8_lossy(&message).into_owned());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        yield Err(DockerError::Logs(e.to_string()));
                        break;
                    }
                }
            }
        }
        .boxed()
    }

    async fn wait_exit(&self, name: &str) -> Result<i64, DockerError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(name, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(container_error(name, "wait for", e)),
            None => Err(DockerError::RunFailed(format!(
                "Wait stream for container '{name}' ended without a status"
            ))),
        }
    }

    async fn stop(&self, name: &str, grace: Duration) -> Result<(), DockerError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };

        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(container_error(name, "stop", e)),
        }
    }

    async fn remove(&self, name: &str) -> Result<(), DockerError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| container_error(name, "remove", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{Ipam, IpamConfig};

    #[test]
    fn test_network_info_reads_first_ipam_config() {
        let network = Network {
            ipam: Some(Ipam {
                config: Some(vec![IpamConfig {
                    subnet: Some("172.30.0.0/16".to_string()),
                    gateway: Some("172.30.0.1".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let info = network_info("local_network", network);
        assert_eq!(info.name, "local_network");
        assert_eq!(info.subnet.as_deref(), Some("172.30.0.0/16"));
        assert_eq!(info.gateway.as_deref(), Some("172.30.0.1"));
    }

    #[test]
    fn test_network_info_without_ipam() {
        let info = network_info("bare", Network::default());
        assert!(info.subnet.is_none());
        assert!(info.gateway.is_none());
    }

    #[test]
    fn test_error_mapping() {
        let not_found = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container".to_string(),
        };
        assert!(matches!(
            container_error("bot", "remove", not_found),
            DockerError::ContainerNotFound { id } if id == "bot"
        ));

        let conflict = BollardError::DockerResponseServerError {
            status_code: 409,
            message: "conflict".to_string(),
        };
        assert!(matches!(
            container_error("bot", "create", conflict),
            DockerError::RunFailed(msg) if msg.contains("create")
        ));
    }
}
