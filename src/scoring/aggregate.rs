//! Aggregation of trial outcomes into per-framework stats and a final score.

use std::collections::BTreeMap;

use tracing::info;

use super::types::{FrameworkStats, ScoringRun};

/// Groups outcomes by expected identity.
pub fn framework_stats(run: &ScoringRun) -> BTreeMap<String, FrameworkStats> {
    let mut stats: BTreeMap<String, FrameworkStats> = BTreeMap::new();
    for outcome in run.outcomes() {
        let entry = stats.entry(outcome.expected.clone()).or_default();
        entry.total += 1;
        if outcome.matched {
            entry.success += 1;
        }
    }
    stats
}

/// Matched outcomes divided by recorded outcomes; `0.0` when nothing was recorded.
pub fn score(run: &ScoringRun) -> f64 {
    let (matched, total) = run.outcomes().fold((0usize, 0usize), |(m, t), o| {
        (m + usize::from(o.matched), t + 1)
    });

    if total == 0 {
        0.0
    } else {
        matched as f64 / total as f64
    }
}

/// Logs the per-framework breakdown of a finished run.
pub fn log_summary(run: &ScoringRun, stats: &BTreeMap<String, FrameworkStats>) {
    for (framework, stat) in stats {
        info!(
            framework = %framework,
            success = stat.success,
            total = stat.total,
            "Framework detections"
        );
        for outcome in run.outcomes().filter(|o| &o.expected == framework) {
            let status = if outcome.matched { "Passed" } else { "Failed" };
            info!(
                "  - [{}]: Predicted '{}' for {}",
                status, outcome.predicted, framework
            );
        }
    }

    info!("Detection results summary:");
    for (framework, stat) in stats {
        info!("- {}: {:.1}% success rate", framework, stat.success_rate() * 100.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::types::DetectionOutcome;

    fn run_of(outcomes: Vec<DetectionOutcome>) -> ScoringRun {
        let mut run = ScoringRun::new();
        for outcome in outcomes {
            run.record(outcome);
        }
        run
    }

    #[test]
    fn test_three_of_four_matched() {
        let run = run_of(vec![
            DetectionOutcome::observed(0, "selenium", Some("selenium".into()), 1.0),
            DetectionOutcome::observed(1, "playwright", Some("playwright".into()), 1.0),
            DetectionOutcome::observed(2, "human", Some("human".into()), 1.0),
            DetectionOutcome::observed(3, "selenium", Some("puppeteer".into()), 1.0),
        ]);
        assert_eq!(score(&run), 0.75);
    }

    #[test]
    fn test_empty_run_scores_zero() {
        let value = score(&ScoringRun::new());
        assert_eq!(value, 0.0);
        assert!(!value.is_nan());
    }

    #[test]
    fn test_failed_and_missing_count_against_score() {
        let run = run_of(vec![
            DetectionOutcome::observed(0, "selenium", Some("selenium".into()), 1.0),
            DetectionOutcome::observed(1, "selenium", None, 1.0),
            DetectionOutcome::failed(2, "playwright", "launch failed"),
        ]);
        let value = score(&run);
        assert!((value - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stats_grouped_by_expected_identity() {
        let run = run_of(vec![
            DetectionOutcome::observed(0, "selenium", Some("selenium".into()), 1.0),
            DetectionOutcome::observed(1, "selenium", Some("chrome".into()), 1.0),
            DetectionOutcome::observed(2, "human", Some("human".into()), 1.0),
        ]);
        let stats = framework_stats(&run);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats["selenium"], FrameworkStats { success: 1, total: 2 });
        assert_eq!(stats["human"].success_rate(), 1.0);
    }
}
