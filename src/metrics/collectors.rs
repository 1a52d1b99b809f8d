//! High-level recording interface over the raw Prometheus metrics.

use std::fmt;

use super::prometheus::{
    CLEANUP_FAILURES_TOTAL, DRIVER_REPORTS_TOTAL, LAST_SCORE, TRIALS_TOTAL, TRIAL_DURATION,
};

/// How a single trial ended, as seen by the metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialOutcome {
    /// The reported driver equals the expected identity.
    Matched,
    /// A driver was reported but it is the wrong one.
    Mismatched,
    /// Nothing was reported before the deadline.
    NoReport,
    /// The trial could not be executed.
    Error,
}

impl TrialOutcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            TrialOutcome::Matched => "matched",
            TrialOutcome::Mismatched => "mismatched",
            TrialOutcome::NoReport => "no_report",
            TrialOutcome::Error => "error",
        }
    }
}

impl fmt::Display for TrialOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Records scoring metrics; every method is a no-op before `init_metrics()`.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Records a finished trial and its duration.
    pub fn record_trial(&self, framework: &str, outcome: TrialOutcome, duration_secs: f64) {
        if let Some(trials_total) = TRIALS_TOTAL.get() {
            trials_total
                .with_label_values(&[framework, outcome.as_label()])
                .inc();
        }

        if let Some(trial_duration) = TRIAL_DURATION.get() {
            trial_duration
                .with_label_values(&[framework])
                .observe(duration_secs);
        }

        tracing::trace!(
            framework = framework,
            outcome = %outcome,
            duration_secs = duration_secs,
            "Recorded trial metric"
        );
    }

    /// Records a driver report as accepted (queued) or discarded.
    pub fn record_driver_report(&self, accepted: bool) {
        let disposition = if accepted { "accepted" } else { "discarded" };
        if let Some(reports) = DRIVER_REPORTS_TOTAL.get() {
            reports.with_label_values(&[disposition]).inc();
        }
    }

    pub fn record_cleanup_failure(&self) {
        if let Some(failures) = CLEANUP_FAILURES_TOTAL.get() {
            failures.inc();
        }
    }

    pub fn set_last_score(&self, score: f64) {
        if let Some(last_score) = LAST_SCORE.get() {
            last_score.set(score);
        }

        tracing::trace!(score = score, "Updated last score metric");
    }
}
