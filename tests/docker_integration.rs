//! Integration tests against a real Docker daemon.
//!
//! These tests create a bridge network and run short-lived containers.
//! Run with: cargo test --test docker_integration -- --ignored

use std::sync::Arc;
use std::time::Duration;

use detection_scorer::execution::{
    BotRunRequest, ContainerExit, ContainerRunner, ContainerRuntime, DisabledFirewall,
    DockerClient, RunnerSettings,
};

const NETWORK: &str = "detection_scorer_it";
const IMAGE: &str = "nginx:1.27-alpine";

fn create_test_client() -> DockerClient {
    DockerClient::new().expect("Docker daemon must be reachable for integration tests")
}

fn runner(client: DockerClient) -> ContainerRunner {
    ContainerRunner::new(
        Arc::new(client),
        Arc::new(DisabledFirewall),
        RunnerSettings {
            stop_timeout: Duration::from_secs(1),
            ..Default::default()
        },
    )
}

#[tokio::test]
#[ignore] // Run with: cargo test --test docker_integration -- --ignored
async fn test_network_is_created_and_reused() {
    let client = create_test_client();

    let first = client.ensure_network(NETWORK).await.expect("create network");
    let second = client.ensure_network(NETWORK).await.expect("reuse network");

    assert_eq!(first.name, NETWORK);
    assert!(first.subnet.is_some(), "bridge network should report a subnet");
    assert_eq!(first.gateway, second.gateway);
}

#[tokio::test]
#[ignore]
async fn test_container_timeout_is_cleaned_up() {
    let client = create_test_client();
    let runner = runner(client.clone());

    // nginx runs in the foreground until stopped
    let request = BotRunRequest {
        image: IMAGE,
        container_name: "detection-scorer-it-timeout",
        network_name: NETWORK,
        fd_limit: 1024,
        timeout: Duration::from_secs(2),
    };
    let exit = runner.run(&request).await.expect("run container");
    assert_eq!(exit, ContainerExit::TimedOut);

    let gone = client.wait_exit("detection-scorer-it-timeout").await;
    assert!(gone.is_err(), "container should have been removed");
}
