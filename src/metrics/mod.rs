//! Prometheus metrics for scoring runs.
//!
//! Metrics are registered once with [`init_metrics`]; until then every
//! [`MetricsCollector`] call is a no-op, which keeps unit tests and library
//! users free of global setup.
//!
//! ```ignore
//! use detection_scorer::metrics::{export_metrics, init_metrics, MetricsCollector, TrialOutcome};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! let collector = MetricsCollector::new();
//! collector.record_trial("firefox", TrialOutcome::Matched, 4.2);
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{MetricsCollector, TrialOutcome};
pub use prometheus::{export_metrics, init_metrics, metrics_handler};

pub use prometheus::{
    CLEANUP_FAILURES_TOTAL, DRIVER_REPORTS_TOTAL, LAST_SCORE, REGISTRY, TRIALS_TOTAL,
    TRIAL_DURATION,
};
