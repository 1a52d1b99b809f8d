//! HTTP surface of the scorer.
//!
//! | Route              | Purpose                                         |
//! |--------------------|-------------------------------------------------|
//! | `GET /task`        | task description for participants               |
//! | `POST /score`      | run one full scoring pass, answer the score     |
//! | `GET /_web`        | page under test (path configurable)             |
//! | `GET /static/*`    | static assets, including the installed script   |
//! | `POST /driver`     | driver report from the page under test          |
//! | `GET /results`     | outcomes of the latest run                      |
//! | `GET /status`      | current run phase and broker state              |
//! | `GET /metrics`     | Prometheus text exposition                      |

pub mod routes;
pub mod state;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::AppConfig;
use crate::execution::{
    ContainerRunner, DisabledFirewall, DockerClient, Firewall, IptablesFirewall, RunnerSettings,
};
use crate::notify::PushcutTrigger;
use crate::scoring::{DriverResultBroker, OrchestratorSettings, ResultStore, ScoringOrchestrator};
use crate::submission::StaticAssetInstaller;

pub use routes::router;
pub use state::{task_for, AppState};

/// Wires the production collaborators (Docker, iptables, Pushcut, static assets).
pub fn build_state(config: &AppConfig) -> anyhow::Result<Arc<AppState>> {
    let challenge = &config.challenge;

    let docker = DockerClient::new().context("Failed to connect to Docker")?;
    let firewall: Arc<dyn Firewall> = if challenge.firewall.enabled {
        Arc::new(IptablesFirewall::new(challenge.firewall.use_sudo))
    } else {
        Arc::new(DisabledFirewall)
    };
    let runner = ContainerRunner::new(
        Arc::new(docker),
        firewall,
        RunnerSettings {
            web_port: config.api.port,
            web_path: challenge.web_path.clone(),
            stop_timeout: challenge.stop_timeout(),
            ..Default::default()
        },
    );

    let human = PushcutTrigger::new(config.pushcut.clone())
        .context("Failed to build Pushcut client")?;
    let installer = StaticAssetInstaller::new(&challenge.templates_dir);

    let orchestrator = ScoringOrchestrator::new(
        OrchestratorSettings::from_config(config),
        Arc::new(DriverResultBroker::new()),
        ResultStore::new(),
        runner,
        Arc::new(human),
        Arc::new(installer),
    );

    Ok(Arc::new(AppState::new(
        Arc::new(orchestrator),
        task_for(config),
        &challenge.templates_dir,
    )))
}

/// Binds the listener and serves until the process is stopped.
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let state = build_state(&config)?;
    let app = router(state, &config.challenge.web_path);

    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(
        addr = %addr,
        frameworks = config.challenge.frameworks.len(),
        repetitions = config.challenge.repeated_framework_count,
        "Detection scorer listening"
    );

    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}
