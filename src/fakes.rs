//! In-memory fakes for the scoring collaborators (testing only).
//!
//! Provides `FakeRuntime`, `FakeFirewall`, `FakeHumanTrigger` and
//! `MemoryInstaller`, which satisfy the trait contracts without Docker,
//! iptables or network access. The runtime and trigger can optionally feed a
//! [`DriverResultBroker`] to play the part of the detection script.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;

use crate::error::{DockerError, FirewallError, InstallError, NotifyError};
use crate::execution::firewall::Firewall;
use crate::execution::runtime::{ContainerRuntime, LaunchSpec, NetworkInfo};
use crate::notify::HumanTrigger;
use crate::scoring::broker::DriverResultBroker;
use crate::submission::ScriptInstaller;

// ---------------------------------------------------------------------------
// FakeRuntime
// ---------------------------------------------------------------------------

/// How `wait_exit` behaves for launched containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitBehavior {
    /// Exit immediately with this code.
    Code(i64),
    /// Never exit; the caller's deadline decides.
    Hang,
    /// The engine errors while waiting.
    Fail,
}

/// Counts of runtime operations performed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeCalls {
    pub network_checks: usize,
    pub stale_discards: usize,
    pub launches: usize,
    pub stops: usize,
    pub removes: usize,
}

/// Container runtime that records calls and can submit driver reports on launch.
pub struct FakeRuntime {
    calls: Mutex<RuntimeCalls>,
    launched: Mutex<Vec<LaunchSpec>>,
    exit: ExitBehavior,
    fail_network: bool,
    failing_images: HashSet<String>,
    reports: HashMap<String, String>,
    broker: Option<Arc<DriverResultBroker>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(RuntimeCalls::default()),
            launched: Mutex::new(Vec::new()),
            exit: ExitBehavior::Code(0),
            fail_network: false,
            failing_images: HashSet::new(),
            reports: HashMap::new(),
            broker: None,
        }
    }

    pub fn with_exit(mut self, exit: ExitBehavior) -> Self {
        self.exit = exit;
        self
    }

    pub fn failing_network(mut self) -> Self {
        self.fail_network = true;
        self
    }

    /// Makes every launch of `image` fail.
    pub fn failing_launch_for(mut self, image: impl Into<String>) -> Self {
        self.failing_images.insert(image.into());
        self
    }

    /// Submits reports to `broker` when containers launch.
    pub fn reporting_to(mut self, broker: Arc<DriverResultBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// When `image` launches, submit `report` to the broker.
    pub fn report_on_launch(mut self, image: impl Into<String>, report: impl Into<String>) -> Self {
        self.reports.insert(image.into(), report.into());
        self
    }

    pub fn calls(&self) -> RuntimeCalls {
        *self.calls.lock().unwrap()
    }

    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.launched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_network(&self, name: &str) -> Result<NetworkInfo, DockerError> {
        self.calls.lock().unwrap().network_checks += 1;
        if self.fail_network {
            return Err(DockerError::Network {
                name: name.to_string(),
                reason: "daemon refused network creation".to_string(),
            });
        }
        Ok(NetworkInfo {
            name: name.to_string(),
            subnet: Some("172.30.0.0/16".to_string()),
            gateway: Some("172.30.0.1".to_string()),
        })
    }

    async fn discard_stale(&self, _name: &str) -> Result<(), DockerError> {
        self.calls.lock().unwrap().stale_discards += 1;
        Ok(())
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<String, DockerError> {
        self.calls.lock().unwrap().launches += 1;
        self.launched.lock().unwrap().push(spec.clone());

        if self.failing_images.contains(&spec.image) {
            return Err(DockerError::RunFailed(format!(
                "image '{}' failed to start",
                spec.image
            )));
        }

        if let (Some(broker), Some(report)) = (&self.broker, self.reports.get(&spec.image)) {
            broker.submit(report);
        }

        Ok(format!("fake-{}", spec.name))
    }

    fn stream_logs(&self, name: &str) -> BoxStream<'static, Result<String, DockerError>> {
        stream::iter(vec![Ok(format!("{name} started\n"))]).boxed()
    }

    async fn wait_exit(&self, name: &str) -> Result<i64, DockerError> {
        match self.exit {
            ExitBehavior::Code(code) => Ok(code),
            ExitBehavior::Hang => {
                futures::future::pending::<()>().await;
                Ok(0)
            }
            ExitBehavior::Fail => Err(DockerError::RunFailed(format!(
                "lost connection while waiting for '{name}'"
            ))),
        }
    }

    async fn stop(&self, _name: &str, _grace: Duration) -> Result<(), DockerError> {
        self.calls.lock().unwrap().stops += 1;
        Ok(())
    }

    async fn remove(&self, _name: &str) -> Result<(), DockerError> {
        self.calls.lock().unwrap().removes += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeFirewall
// ---------------------------------------------------------------------------

/// Firewall that records isolated subnets.
#[derive(Debug, Default)]
pub struct FakeFirewall {
    subnets: Mutex<Vec<String>>,
    fail: bool,
}

impl FakeFirewall {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn isolated_subnets(&self) -> Vec<String> {
        self.subnets.lock().unwrap().clone()
    }
}

#[async_trait]
impl Firewall for FakeFirewall {
    async fn isolate_subnet(&self, subnet: &str) -> Result<(), FirewallError> {
        if self.fail {
            return Err(FirewallError::Rejected {
                rule: format!("filter/FORWARD -s {subnet}"),
                code: Some(4),
                stderr: "Permission denied".to_string(),
            });
        }
        self.subnets.lock().unwrap().push(subnet.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeHumanTrigger
// ---------------------------------------------------------------------------

/// Human trigger that counts notifications and can answer with a report.
#[derive(Default)]
pub struct FakeHumanTrigger {
    notifications: Mutex<usize>,
    fail: bool,
    response: Option<(Arc<DriverResultBroker>, String)>,
}

impl FakeHumanTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Submits `report` to `broker` whenever the human is notified.
    pub fn answering(broker: Arc<DriverResultBroker>, report: impl Into<String>) -> Self {
        Self {
            response: Some((broker, report.into())),
            ..Self::default()
        }
    }

    pub fn notifications(&self) -> usize {
        *self.notifications.lock().unwrap()
    }
}

#[async_trait]
impl HumanTrigger for FakeHumanTrigger {
    async fn notify_human(&self) -> Result<(), NotifyError> {
        *self.notifications.lock().unwrap() += 1;
        if self.fail {
            return Err(NotifyError::Rejected {
                code: 503,
                message: "device offline".to_string(),
            });
        }
        if let Some((broker, report)) = &self.response {
            broker.submit(report);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryInstaller
// ---------------------------------------------------------------------------

/// Script installer that keeps every installed script in memory.
#[derive(Debug, Default)]
pub struct MemoryInstaller {
    installed: Mutex<Vec<String>>,
}

impl MemoryInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn installed(&self) -> Vec<String> {
        self.installed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScriptInstaller for MemoryInstaller {
    async fn install(&self, script: &str) -> Result<(), InstallError> {
        if script.trim().is_empty() {
            return Err(InstallError::EmptyScript);
        }
        self.installed.lock().unwrap().push(script.to_string());
        Ok(())
    }
}
