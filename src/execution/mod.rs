//! Docker execution layer for bot trials.
//!
//! Container lifecycle for one trial:
//! ```text
//! NETWORK READY → STALE REMOVED → RUNNING → EXITED/TIMEOUT/FAILED → STOPPED → REMOVED
//! ```
//!
//! The engine and the host firewall sit behind the [`ContainerRuntime`] and
//! [`Firewall`] traits so that [`ContainerRunner`] can be exercised without
//! Docker or root privileges.

pub mod docker_client;
pub mod firewall;
pub mod runner;
pub mod runtime;

pub use docker_client::DockerClient;
pub use firewall::{DisabledFirewall, Firewall, FirewallRule, IptablesFirewall};
pub use runner::{BotRunRequest, ContainerExit, ContainerRunner, RunnerSettings};
pub use runtime::{ContainerRuntime, LaunchSpec, NetworkInfo};
