//! End-to-end scoring run.
//!
//! A run moves through `Idle → Preparing → Running(0..N-1) → Aggregating → Idle`.
//! Trials execute strictly one after another because the broker carries no
//! trial identity: only one trial may hold a listening window at a time.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use super::aggregate::{framework_stats, log_summary, score};
use super::broker::DriverResultBroker;
use super::sequence::build_trial_sequence;
use super::store::ResultStore;
use super::types::{DetectionOutcome, FrameworkEntry, FrameworkStats, ScoringRun};
use crate::config::AppConfig;
use crate::error::ScoringError;
use crate::execution::runner::{BotRunRequest, ContainerRunner};
use crate::metrics::{MetricsCollector, TrialOutcome};
use crate::notify::HumanTrigger;
use crate::submission::{ScriptInstaller, Submission};

/// Parameters of every run driven by one orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub frameworks: Vec<FrameworkEntry>,
    pub repetitions: usize,
    /// Container deadline, also the nominal report wait for bot trials.
    pub bot_timeout: Duration,
    /// Nominal report wait for the human trial.
    pub human_timeout: Duration,
    /// Added to either nominal wait.
    pub grace_period: Duration,
    pub fd_limit: i64,
    pub network_name: String,
    pub container_prefix: String,
    pub shuffle_seed: Option<u64>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let challenge = &config.challenge;
        Self {
            frameworks: challenge.frameworks.clone(),
            repetitions: challenge.repeated_framework_count,
            bot_timeout: challenge.bot_timeout(),
            human_timeout: config.pushcut.timeout(),
            grace_period: challenge.grace_period(),
            fd_limit: challenge.docker_ulimit,
            network_name: challenge.network_name.clone(),
            container_prefix: challenge.container_prefix.clone(),
            shuffle_seed: challenge.shuffle_seed,
        }
    }

    /// Container name for one trial; unique within a run.
    pub fn container_name(&self, identity: &str, trial_index: usize) -> String {
        format!("{}-{}-{}", self.container_prefix, identity, trial_index)
    }
}

/// Where the orchestrator currently is in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Preparing,
    Running {
        trial: usize,
        total: usize,
        framework: String,
    },
    Aggregating,
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub score: f64,
    pub matched: usize,
    pub recorded: usize,
    pub stats: BTreeMap<String, FrameworkStats>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Owns scoring runs end to end.
pub struct ScoringOrchestrator {
    settings: OrchestratorSettings,
    broker: Arc<DriverResultBroker>,
    store: ResultStore,
    runner: ContainerRunner,
    human: Arc<dyn HumanTrigger>,
    installer: Arc<dyn ScriptInstaller>,
    run_gate: tokio::sync::Mutex<()>,
    phase: Mutex<RunPhase>,
    metrics: MetricsCollector,
}

impl ScoringOrchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        broker: Arc<DriverResultBroker>,
        store: ResultStore,
        runner: ContainerRunner,
        human: Arc<dyn HumanTrigger>,
        installer: Arc<dyn ScriptInstaller>,
    ) -> Self {
        Self {
            settings,
            broker,
            store,
            runner,
            human,
            installer,
            run_gate: tokio::sync::Mutex::new(()),
            phase: Mutex::new(RunPhase::Idle),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn broker(&self) -> &Arc<DriverResultBroker> {
        &self.broker
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_phase(&self, phase: RunPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// Runs [`score`](Self::score) on its own task and waits for it.
    ///
    /// Dropping the returned future does not cancel the run: the current
    /// trial still finishes, its container is torn down and the phase returns
    /// to `Idle`. HTTP handlers use this so a client disconnect cannot cut a
    /// trial short.
    pub async fn score_detached(
        self: &Arc<Self>,
        submission: Submission,
    ) -> Result<RunSummary, ScoringError> {
        let orchestrator = Arc::clone(self);
        let handle = tokio::spawn(async move { orchestrator.score(&submission).await });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Scoring task did not complete");
                self.broker.clear("after aborted scoring run");
                self.set_phase(RunPhase::Idle);
                Err(ScoringError::Aborted(e.to_string()))
            }
        }
    }

    /// Installs the submitted script and runs every trial.
    ///
    /// Trial-local failures become outcomes. Only infrastructure failures
    /// and a second concurrent run are returned as errors.
    pub async fn score(&self, submission: &Submission) -> Result<RunSummary, ScoringError> {
        let _gate = self
            .run_gate
            .try_lock()
            .map_err(|_| ScoringError::RunInProgress)?;

        let result = self.execute(submission).await;

        self.broker.clear("after scoring run");
        self.set_phase(RunPhase::Idle);

        if let Err(e) = &result {
            error!(error = %e, "Scoring run aborted");
        }
        result
    }

    async fn execute(&self, submission: &Submission) -> Result<RunSummary, ScoringError> {
        let started_at = Utc::now();
        self.set_phase(RunPhase::Preparing);

        let mut run = ScoringRun::new();
        self.store.reset();
        self.broker.clear("before scoring run");

        self.installer.install(&submission.detection_js).await?;

        let sequence = build_trial_sequence(
            &self.settings.frameworks,
            self.settings.repetitions,
            self.settings.shuffle_seed,
        );
        let total = sequence.len();
        info!(trials = total, "Starting scoring run");

        for (index, entry) in sequence.iter().enumerate() {
            self.set_phase(RunPhase::Running {
                trial: index,
                total,
                framework: entry.identity.clone(),
            });
            info!(trial = index, framework = %entry.identity, "Running detection against framework");

            let outcome = self.run_trial(index, entry).await?;
            self.metrics.record_trial(
                &entry.identity,
                trial_outcome(&outcome),
                outcome.duration_secs,
            );
            run.record(outcome);
            self.store.publish(&run);
        }

        self.set_phase(RunPhase::Aggregating);
        let stats = framework_stats(&run);
        log_summary(&run, &stats);

        let final_score = score(&run);
        self.metrics.set_last_score(final_score);
        let matched = run.outcomes().filter(|o| o.matched).count();
        let recorded = run.outcomes().count();
        info!(score = final_score, matched, recorded, "Scoring run complete");

        Ok(RunSummary {
            score: final_score,
            matched,
            recorded,
            stats,
            started_at,
            completed_at: Utc::now(),
        })
    }

    /// Runs one trial. Errors are returned only when they are fatal to the run.
    async fn run_trial(
        &self,
        index: usize,
        entry: &FrameworkEntry,
    ) -> Result<DetectionOutcome, ScoringError> {
        let started = Instant::now();

        self.broker.clear("before trial");
        // Open the window before triggering so reports sent while the
        // container is still running are kept.
        let listener = self.broker.listen();

        let wait = if entry.is_human() {
            if let Err(e) = self.human.notify_human().await {
                error!(error = %e, "Failed to send human notification");
            }
            self.settings.human_timeout.saturating_add(self.settings.grace_period)
        } else {
            let container_name = self.settings.container_name(&entry.identity, index);
            let request = BotRunRequest {
                image: &entry.image,
                container_name: &container_name,
                network_name: &self.settings.network_name,
                fd_limit: self.settings.fd_limit,
                timeout: self.settings.bot_timeout,
            };

            match self.runner.run(&request).await {
                Ok(_) => self.settings.bot_timeout.saturating_add(self.settings.grace_period),
                Err(e) if e.is_fatal() => {
                    return Err(ScoringError::Infrastructure {
                        trial: index,
                        framework: entry.identity.clone(),
                        source: e,
                    });
                }
                Err(e) => {
                    error!(framework = %entry.identity, error = %e, "Error testing framework");
                    return Ok(DetectionOutcome::failed(index, &entry.identity, e));
                }
            }
        };

        let report = listener
            .wait_for_report(wait, &entry.identity)
            .await
            .filter(|r| !r.is_empty());
        drop(listener);

        let outcome = DetectionOutcome::observed(
            index,
            &entry.identity,
            report,
            started.elapsed().as_secs_f64(),
        );

        if outcome.matched {
            info!(framework = %entry.identity, driver = %outcome.predicted, "Detected driver correctly");
        } else {
            warn!(
                framework = %entry.identity,
                predicted = %outcome.predicted,
                "Incorrect detection"
            );
        }

        Ok(outcome)
    }
}

fn trial_outcome(outcome: &DetectionOutcome) -> TrialOutcome {
    if outcome.matched {
        TrialOutcome::Matched
    } else if outcome.observed.is_some() {
        TrialOutcome::Mismatched
    } else if outcome.predicted.starts_with("Error:") {
        TrialOutcome::Error
    } else {
        TrialOutcome::NoReport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_is_unique_per_trial() {
        let settings = OrchestratorSettings::from_config(&AppConfig::default());
        assert_eq!(settings.container_name("selenium", 0), "detect-selenium-0");
        assert_ne!(
            settings.container_name("selenium", 0),
            settings.container_name("selenium", 3)
        );
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = AppConfig::default();
        config.challenge.bot_timeout_secs = 20;
        config.challenge.grace_period_secs = 5;
        config.pushcut.timeout_secs = 45;

        let settings = OrchestratorSettings::from_config(&config);
        assert_eq!(settings.bot_timeout, Duration::from_secs(20));
        assert_eq!(settings.human_timeout, Duration::from_secs(45));
        assert_eq!(settings.grace_period, Duration::from_secs(5));
        assert_eq!(settings.network_name, "local_network");
    }

    #[test]
    fn test_trial_outcome_classification() {
        let matched = DetectionOutcome::observed(0, "chrome", Some("chrome".into()), 1.0);
        let wrong = DetectionOutcome::observed(1, "chrome", Some("firefox".into()), 1.0);
        let silent = DetectionOutcome::observed(2, "chrome", None, 1.0);
        let failed = DetectionOutcome::failed(3, "chrome", "no such image");

        assert_eq!(trial_outcome(&matched), TrialOutcome::Matched);
        assert_eq!(trial_outcome(&wrong), TrialOutcome::Mismatched);
        assert_eq!(trial_outcome(&silent), TrialOutcome::NoReport);
        assert_eq!(trial_outcome(&failed), TrialOutcome::Error);
    }

    #[test]
    fn test_phase_serializes_with_tag() {
        let phase = RunPhase::Running {
            trial: 2,
            total: 6,
            framework: "human".to_string(),
        };
        let json = serde_json::to_value(&phase).unwrap();
        assert_eq!(json["phase"], "running");
        assert_eq!(json["trial"], 2);
        assert_eq!(serde_json::to_value(RunPhase::Idle).unwrap()["phase"], "idle");
    }
}
