//! Shared state handed to every HTTP handler.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::scoring::{DriverResultBroker, ResultStore, ScoringOrchestrator};
use crate::submission::TaskDescription;

/// Application state behind `State<Arc<AppState>>`.
pub struct AppState {
    pub orchestrator: Arc<ScoringOrchestrator>,
    /// Task returned by `GET /task`.
    pub task: TaskDescription,
    /// Directory holding `index.html` and `static/`.
    pub templates_dir: PathBuf,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<ScoringOrchestrator>,
        task: TaskDescription,
        templates_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            orchestrator,
            task,
            templates_dir: templates_dir.into(),
        }
    }

    pub fn broker(&self) -> &Arc<DriverResultBroker> {
        self.orchestrator.broker()
    }

    pub fn store(&self) -> &ResultStore {
        self.orchestrator.store()
    }

    pub fn static_dir(&self) -> PathBuf {
        self.templates_dir.join("static")
    }
}

/// Builds the task description advertised to participants.
///
/// The page URL is the one the human device opens when configured, else the
/// service's own listening address.
pub fn task_for(config: &AppConfig) -> TaskDescription {
    let web_url = if config.pushcut.web_url.trim().is_empty() {
        format!(
            "http://{}:{}{}",
            config.api.host, config.api.port, config.challenge.web_path
        )
    } else {
        config.pushcut.web_url.clone()
    };

    TaskDescription {
        web_url,
        frameworks: config
            .challenge
            .frameworks
            .iter()
            .map(|f| f.identity.clone())
            .collect(),
        detection_js: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::FrameworkEntry;

    #[test]
    fn test_task_defaults_to_local_page() {
        let mut config = AppConfig::default();
        config.challenge.frameworks = vec![
            FrameworkEntry::human(),
            FrameworkEntry::new("selenium", "bots/selenium"),
        ];

        let task = task_for(&config);
        assert_eq!(task.web_url, "http://0.0.0.0:10001/_web");
        assert_eq!(task.frameworks, vec!["human", "selenium"]);
        assert!(task.detection_js.is_empty());
    }

    #[test]
    fn test_task_prefers_configured_page_url() {
        let mut config = AppConfig::default();
        config.pushcut.web_url = "https://scorer.example.org/_web".to_string();
        assert_eq!(task_for(&config).web_url, "https://scorer.example.org/_web");
    }
}
