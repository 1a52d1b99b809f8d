//! Service configuration.
//!
//! Configuration is read once at process start from a YAML file. Secrets may
//! be supplied through the environment by the CLI layer.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scoring::types::{FrameworkEntry, HUMAN_IDENTITY};

/// Default extra wait added to every trial timeout.
const DEFAULT_GRACE_PERIOD_SECS: u64 = 5;

/// Default bounded stop applied to a bot container during cleanup.
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 5;

/// Default Pushcut API endpoint.
const DEFAULT_PUSHCUT_BASE_URL: &str = "https://api.pushcut.io/v1";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener settings.
    pub api: ApiConfig,
    /// Scoring run settings.
    pub challenge: ChallengeConfig,
    /// Human-notification webhook settings.
    pub pushcut: PushcutConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 10001,
        }
    }
}

/// Scoring run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// Candidate frameworks, including the `human` sentinel.
    pub frameworks: Vec<FrameworkEntry>,
    /// How many times each framework appears in a trial sequence.
    pub repeated_framework_count: usize,
    /// Wall-clock budget for a bot container.
    pub bot_timeout_secs: u64,
    /// Extra wait for a driver report on top of the nominal timeout.
    pub grace_period_secs: u64,
    /// Bounded stop used when tearing a container down.
    pub stop_timeout_secs: u64,
    /// `nofile` ulimit applied to bot containers (soft = hard).
    pub docker_ulimit: i64,
    /// Bridge network shared by bot containers.
    pub network_name: String,
    /// Prefix for per-trial container names.
    pub container_prefix: String,
    /// Path of the page under test on this service.
    pub web_path: String,
    /// Directory holding `index.html` and the `static/` assets.
    pub templates_dir: PathBuf,
    /// Optional seed for reproducible trial sequences.
    pub shuffle_seed: Option<u64>,
    /// Host packet-filtering settings.
    pub firewall: FirewallConfig,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            frameworks: Vec::new(),
            repeated_framework_count: 1,
            bot_timeout_secs: 15,
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
            docker_ulimit: 32768,
            network_name: "local_network".to_string(),
            container_prefix: "detect".to_string(),
            web_path: "/_web".to_string(),
            templates_dir: PathBuf::from("templates"),
            shuffle_seed: None,
            firewall: FirewallConfig::default(),
        }
    }
}

impl ChallengeConfig {
    pub fn bot_timeout(&self) -> Duration {
        Duration::from_secs(self.bot_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Checks the framework table and numeric limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frameworks.is_empty() {
            return Err(ConfigError::NoFrameworks);
        }

        let mut seen = HashSet::new();
        for entry in &self.frameworks {
            if entry.identity.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "challenge.frameworks.name".to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
            if !seen.insert(entry.identity.as_str()) {
                return Err(ConfigError::DuplicateFramework(entry.identity.clone()));
            }
            if !entry.is_human() && entry.image.trim().is_empty() {
                return Err(ConfigError::MissingImage(entry.identity.clone()));
            }
        }

        if self.repeated_framework_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "challenge.repeated_framework_count".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if self.docker_ulimit <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "challenge.docker_ulimit".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        if !self.web_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "challenge.web_path".to_string(),
                reason: "must start with '/'".to_string(),
            });
        }

        Ok(())
    }

    /// Returns true if the framework table contains the human sentinel.
    pub fn has_human(&self) -> bool {
        self.frameworks.iter().any(|f| f.identity == HUMAN_IDENTITY)
    }
}

/// Host packet-filtering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    /// Apply iptables rules around the bot network.
    pub enabled: bool,
    /// Prefix iptables invocations with `sudo`.
    pub use_sudo: bool,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_sudo: true,
        }
    }
}

/// Pushcut webhook settings used to summon a human operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushcutConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub shortcut: String,
    /// Page URL the human device is asked to open.
    pub web_url: String,
    pub server_id: Option<String>,
    /// Time the human has to open the page and get detected.
    pub timeout_secs: u64,
}

impl Default for PushcutConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PUSHCUT_BASE_URL.to_string(),
            api_key: None,
            shortcut: String::new(),
            web_url: String::new(),
            server_id: None,
            timeout_secs: 30,
        }
    }
}

impl PushcutConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    /// Loads and validates configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parses and validates configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "api.port".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        self.challenge.validate()
    }
}
