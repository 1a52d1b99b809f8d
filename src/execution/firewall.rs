//! Host packet filtering around the bot network.
//!
//! Containers on the bot subnet may talk to addresses inside the subnet
//! (including the gateway, where the page under test is served) but nothing
//! beyond it. Rules are checked before insertion so repeated setup is a no-op.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::FirewallError;

/// Applies network isolation rules for a subnet.
#[async_trait]
pub trait Firewall: Send + Sync {
    async fn isolate_subnet(&self, subnet: &str) -> Result<(), FirewallError>;
}

/// One iptables rule: table, chain and rule specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    pub table: &'static str,
    pub chain: &'static str,
    pub spec: Vec<String>,
}

impl FirewallRule {
    fn args(&self, action: &str) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            self.table.to_string(),
            action.to_string(),
            self.chain.to_string(),
        ];
        args.extend(self.spec.iter().cloned());
        args
    }
}

impl std::fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} {}", self.table, self.chain, self.spec.join(" "))
    }
}

/// Rules that keep `subnet` from reaching anything outside itself.
pub fn isolation_rules(subnet: &str) -> Vec<FirewallRule> {
    vec![
        FirewallRule {
            table: "filter",
            chain: "FORWARD",
            spec: ["-s", subnet, "!", "-d", subnet, "-j", "DROP"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        },
        FirewallRule {
            table: "nat",
            chain: "POSTROUTING",
            spec: ["-s", subnet, "-j", "RETURN"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        },
    ]
}

/// iptables-backed firewall.
#[derive(Debug, Clone)]
pub struct IptablesFirewall {
    use_sudo: bool,
}

impl IptablesFirewall {
    pub fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("iptables");
            cmd
        } else {
            Command::new("iptables")
        };
        cmd.args(args).stdin(Stdio::null());
        cmd
    }

    fn program(&self) -> String {
        if self.use_sudo {
            "sudo iptables".to_string()
        } else {
            "iptables".to_string()
        }
    }

    async fn rule_exists(&self, rule: &FirewallRule) -> Result<bool, FirewallError> {
        let status = self
            .command(&rule.args("-C"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|source| FirewallError::Spawn {
                program: self.program(),
                source,
            })?;
        Ok(status.success())
    }

    async fn insert(&self, rule: &FirewallRule) -> Result<(), FirewallError> {
        let output = self
            .command(&rule.args("-I"))
            .output()
            .await
            .map_err(|source| FirewallError::Spawn {
                program: self.program(),
                source,
            })?;

        if !output.status.success() {
            return Err(FirewallError::Rejected {
                rule: rule.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Firewall for IptablesFirewall {
    async fn isolate_subnet(&self, subnet: &str) -> Result<(), FirewallError> {
        for rule in isolation_rules(subnet) {
            if self.rule_exists(&rule).await? {
                debug!(rule = %rule, "Firewall rule already present");
                continue;
            }
            self.insert(&rule).await?;
            info!(rule = %rule, "Inserted firewall rule");
        }
        Ok(())
    }
}

/// Firewall that applies nothing, for hosts where isolation is handled elsewhere.
#[derive(Debug, Clone, Default)]
pub struct DisabledFirewall;

#[async_trait]
impl Firewall for DisabledFirewall {
    async fn isolate_subnet(&self, subnet: &str) -> Result<(), FirewallError> {
        debug!(subnet, "Firewall disabled, skipping isolation rules");
        Ok(())
    }
}
