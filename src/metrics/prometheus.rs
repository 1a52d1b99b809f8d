//! Prometheus metrics registration and export.

use prometheus::{Counter, CounterVec, Encoder, Gauge, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Registry holding every detection-scorer metric.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Trials executed, labeled by framework and outcome.
pub static TRIALS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Wall-clock duration of a trial in seconds, labeled by framework.
pub static TRIAL_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Driver reports received, labeled by disposition (accepted/discarded).
pub static DRIVER_REPORTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Container teardown steps that failed.
pub static CLEANUP_FAILURES_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Score of the most recent completed run.
pub static LAST_SCORE: OnceLock<Gauge> = OnceLock::new();

/// Creates and registers all metrics.
///
/// Calling it again after a successful initialization leaves the first set of
/// metrics in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if a metric definition is invalid or a name
/// is registered twice.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let trials_total = CounterVec::new(
        Opts::new("detection_trials_total", "Total number of detection trials"),
        &["framework", "outcome"],
    )?;

    let trial_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "detection_trial_duration_seconds",
            "Detection trial duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0]),
        &["framework"],
    )?;

    let driver_reports_total = CounterVec::new(
        Opts::new(
            "detection_driver_reports_total",
            "Driver reports received from the page under test",
        ),
        &["disposition"],
    )?;

    let cleanup_failures_total = Counter::new(
        "detection_cleanup_failures_total",
        "Container stop/remove steps that failed",
    )?;

    let last_score = Gauge::new("detection_last_score", "Score of the last completed run")?;

    registry.register(Box::new(trials_total.clone()))?;
    registry.register(Box::new(trial_duration.clone()))?;
    registry.register(Box::new(driver_reports_total.clone()))?;
    registry.register(Box::new(cleanup_failures_total.clone()))?;
    registry.register(Box::new(last_score.clone()))?;

    // Already-set statics mean a previous call won; keep those.
    let _ = REGISTRY.set(registry);
    let _ = TRIALS_TOTAL.set(trials_total);
    let _ = TRIAL_DURATION.set(trial_duration);
    let _ = DRIVER_REPORTS_TOTAL.set(driver_reports_total);
    let _ = CLEANUP_FAILURES_TOTAL.set(cleanup_failures_total);
    let _ = LAST_SCORE.set(last_score);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Encodes all registered metrics in the Prometheus text format.
///
/// Returns a comment line instead of metrics when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// Handler for `GET /metrics`.
pub async fn metrics_handler() -> String {
    export_metrics()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        // Another test may have initialized the registry first.
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_init() {
        let _ = init_metrics();

        if let Some(trials) = TRIALS_TOTAL.get() {
            trials.with_label_values(&["firefox", "matched"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("detection_trials_total"));
    }

    #[tokio::test]
    async fn test_metrics_handler_returns_text() {
        let _ = init_metrics();
        let body = metrics_handler().await;
        assert!(!body.is_empty());
    }
}
