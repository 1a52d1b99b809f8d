//! Pushcut webhook client.
//!
//! Executes a Pushcut shortcut on the operator's device with the page URL as
//! input, which opens the page under test in a real browser.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::{debug, info};

use crate::config::PushcutConfig;
use crate::error::NotifyError;
use crate::notify::HumanTrigger;

/// Slack added to the shortcut timeout for the HTTP request itself.
const REQUEST_SLACK_SECS: u64 = 10;

/// Pushcut-backed [`HumanTrigger`].
#[derive(Debug, Clone)]
pub struct PushcutTrigger {
    client: Client,
    config: PushcutConfig,
}

impl PushcutTrigger {
    /// Creates a trigger for the given settings.
    pub fn new(config: PushcutConfig) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs + REQUEST_SLACK_SECS))
            .build()?;
        Ok(Self { client, config })
    }

    /// Builds the execute URL with its query parameters.
    pub fn execute_url(&self) -> Result<Url, NotifyError> {
        if self.config.shortcut.trim().is_empty() {
            return Err(NotifyError::NotConfigured("pushcut.shortcut".to_string()));
        }

        let timeout = self.config.timeout_secs.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("shortcut", self.config.shortcut.as_str()),
            ("input", self.config.web_url.as_str()),
            ("timeout", timeout.as_str()),
        ];
        if let Some(server_id) = self.config.server_id.as_deref() {
            params.push(("serverId", server_id));
        }

        let base = format!("{}/execute", self.config.base_url.trim_end_matches('/'));
        Url::parse_with_params(&base, &params).map_err(|e| NotifyError::InvalidUrl(e.to_string()))
    }

    /// Returns the API key with all but the edges masked.
    pub fn api_key_masked(&self) -> String {
        let Some(key) = self.config.api_key.as_deref() else {
            return "<unset>".to_string();
        };
        let count = key.chars().count();
        if count <= 8 {
            return "*".repeat(count);
        }
        let head: String = key.chars().take(4).collect();
        let tail: String = key.chars().skip(count - 4).collect();
        format!("{head}...{tail}")
    }
}

#[async_trait]
impl HumanTrigger for PushcutTrigger {
    async fn notify_human(&self) -> Result<(), NotifyError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| NotifyError::NotConfigured("pushcut.api_key".to_string()))?;
        let url = self.execute_url()?;

        debug!(shortcut = %self.config.shortcut, api_key = %self.api_key_masked(), "Executing Pushcut shortcut");
        let response = self
            .client
            .post(url)
            .header("API-Key", api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                code: status.as_u16(),
                message,
            });
        }

        info!(input = %self.config.web_url, "Human notification accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PushcutConfig {
        PushcutConfig {
            api_key: Some("abcd1234efgh5678".to_string()),
            shortcut: "Open Page".to_string(),
            web_url: "https://example.org/_web".to_string(),
            server_id: Some("srv-1".to_string()),
            timeout_secs: 30,
            ..Default::default()
        }
    }

    #[test]
    fn test_execute_url() {
        let trigger = PushcutTrigger::new(config()).unwrap();
        let url = trigger.execute_url().unwrap();

        assert_eq!(url.path(), "/v1/execute");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("shortcut".to_string(), "Open Page".to_string())));
        assert!(pairs.contains(&("input".to_string(), "https://example.org/_web".to_string())));
        assert!(pairs.contains(&("timeout".to_string(), "30".to_string())));
        assert!(pairs.contains(&("serverId".to_string(), "srv-1".to_string())));
    }

    #[test]
    fn test_missing_shortcut() {
        let trigger = PushcutTrigger::new(PushcutConfig::default()).unwrap();
        assert!(matches!(
            trigger.execute_url(),
            Err(NotifyError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_api_key_masked() {
        let trigger = PushcutTrigger::new(config()).unwrap();
        assert_eq!(trigger.api_key_masked(), "abcd...5678");
    }

    #[test]
    fn test_api_key_masked_multibyte() {
        let mut config = config();
        config.api_key = Some("ключ1234секрет!é".to_string());
        let trigger = PushcutTrigger::new(config.clone()).unwrap();
        assert_eq!(trigger.api_key_masked(), "ключ...ет!é");

        config.api_key = Some("ééééé".to_string());
        let trigger = PushcutTrigger::new(config.clone()).unwrap();
        assert_eq!(trigger.api_key_masked(), "*****");

        config.api_key = None;
        let trigger = PushcutTrigger::new(config).unwrap();
        assert_eq!(trigger.api_key_masked(), "<unset>");
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_without_request() {
        let mut config = config();
        config.api_key = None;
        let trigger = PushcutTrigger::new(config).unwrap();
        assert!(matches!(
            trigger.notify_human().await,
            Err(NotifyError::NotConfigured(field)) if field == "pushcut.api_key"
        ));
    }
}
