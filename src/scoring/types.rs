//! Core data types for scoring runs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of the human-operated trial.
pub const HUMAN_IDENTITY: &str = "human";

/// Placeholder shown when the human trial produced no report.
pub const NO_HUMAN_REPORT: &str = "No driver reported";

/// Placeholder shown when a bot trial produced no report.
pub const NO_BOT_REPORT: &str = "The script did not return any driver";

/// A candidate browser-automation framework, or the human sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkEntry {
    /// Identity the detection script is expected to report.
    #[serde(rename = "name")]
    pub identity: String,
    /// Container image running the framework. Empty for the human sentinel.
    #[serde(default)]
    pub image: String,
}

impl FrameworkEntry {
    pub fn new(identity: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            image: image.into(),
        }
    }

    /// The human sentinel entry.
    pub fn human() -> Self {
        Self::new(HUMAN_IDENTITY, "")
    }

    pub fn is_human(&self) -> bool {
        self.identity == HUMAN_IDENTITY
    }
}

impl fmt::Display for FrameworkEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_human() {
            write!(f, "{}", self.identity)
        } else {
            write!(f, "{} ({})", self.identity, self.image)
        }
    }
}

/// The result of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionOutcome {
    pub trial_index: usize,
    /// Identity that was actually driving the page.
    pub expected: String,
    /// Identity reported by the detection script, if any.
    pub observed: Option<String>,
    pub matched: bool,
    /// What the script predicted, or a placeholder describing why nothing was observed.
    pub predicted: String,
    pub duration_secs: f64,
}

impl DetectionOutcome {
    /// Builds an outcome from an observed report. `matched` is derived, never supplied.
    pub fn observed(
        trial_index: usize,
        expected: impl Into<String>,
        observed: Option<String>,
        duration_secs: f64,
    ) -> Self {
        let expected = expected.into();
        let matched = observed.as_deref() == Some(expected.as_str());
        let predicted = match &observed {
            Some(value) => value.clone(),
            None if expected == HUMAN_IDENTITY => NO_HUMAN_REPORT.to_string(),
            None => NO_BOT_REPORT.to_string(),
        };
        Self {
            trial_index,
            expected,
            observed,
            matched,
            predicted,
            duration_secs,
        }
    }

    /// Builds the outcome recorded when a trial failed internally.
    pub fn failed(trial_index: usize, expected: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            trial_index,
            expected: expected.into(),
            observed: None,
            matched: false,
            predicted: format!("Error: {error}"),
            duration_secs: 0.0,
        }
    }
}

/// Outcomes of one scoring run, keyed by trial index.
///
/// A trial maps to a list so that a trial that recorded nothing is
/// distinguishable from one that recorded a failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoringRun {
    trials: BTreeMap<usize, Vec<DetectionOutcome>>,
}

impl ScoringRun {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: DetectionOutcome) {
        self.trials
            .entry(outcome.trial_index)
            .or_default()
            .push(outcome);
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// Number of trials that produced at least one outcome.
    pub fn recorded_trials(&self) -> usize {
        self.trials.values().filter(|v| !v.is_empty()).count()
    }

    pub fn trial(&self, index: usize) -> Option<&[DetectionOutcome]> {
        self.trials.get(&index).map(Vec::as_slice)
    }

    /// Iterates every outcome in trial order.
    pub fn outcomes(&self) -> impl Iterator<Item = &DetectionOutcome> {
        self.trials.values().flatten()
    }

    pub fn trials(&self) -> &BTreeMap<usize, Vec<DetectionOutcome>> {
        &self.trials
    }
}

/// Per-identity success counts, derived from a run on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameworkStats {
    pub success: usize,
    pub total: usize,
}

impl FrameworkStats {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.success as f64 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matched_requires_exact_identity() {
        let hit = DetectionOutcome::observed(0, "firefox", Some("firefox".to_string()), 1.0);
        assert!(hit.matched);
        assert_eq!(hit.predicted, "firefox");

        let miss = DetectionOutcome::observed(1, "firefox", Some("chrome".to_string()), 1.0);
        assert!(!miss.matched);
        assert_eq!(miss.predicted, "chrome");
    }

    #[test]
    fn test_placeholders_for_missing_reports() {
        let human = DetectionOutcome::observed(0, HUMAN_IDENTITY, None, 3.0);
        assert!(!human.matched);
        assert_eq!(human.predicted, NO_HUMAN_REPORT);

        let bot = DetectionOutcome::observed(1, "selenium", None, 3.0);
        assert_eq!(bot.predicted, NO_BOT_REPORT);
    }

    #[test]
    fn test_failed_outcome() {
        let outcome = DetectionOutcome::failed(4, "puppeteer", "image not found");
        assert_eq!(outcome.trial_index, 4);
        assert!(outcome.observed.is_none());
        assert!(!outcome.matched);
        assert_eq!(outcome.predicted, "Error: image not found");
        assert_eq!(outcome.duration_secs, 0.0);
    }

    #[test]
    fn test_scoring_run_serializes_as_index_map() {
        let mut run = ScoringRun::new();
        run.record(DetectionOutcome::observed(2, "selenium", None, 0.5));
        run.record(DetectionOutcome::observed(0, "human", Some("human".into()), 0.5));

        let value = serde_json::to_value(&run).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert!(object.contains_key("0"));
        assert_eq!(object["2"][0]["expected"], "selenium");
        assert_eq!(run.recorded_trials(), 2);
        assert_eq!(run.outcomes().next().unwrap().trial_index, 0);
    }

    #[test]
    fn test_framework_entry_yaml_names() {
        let entry: FrameworkEntry = serde_yaml::from_str("name: human\n").unwrap();
        assert!(entry.is_human());
        assert!(entry.image.is_empty());
        assert_eq!(FrameworkEntry::human(), entry);
    }

    #[test]
    fn test_success_rate_of_empty_stats() {
        assert_eq!(FrameworkStats::default().success_rate(), 0.0);
    }
}
