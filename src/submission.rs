//! Installation of submitted detection scripts.
//!
//! The page under test loads `static/detection/detection.js`; installing a
//! submission overwrites that file before any trial starts.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::InstallError;

/// Task handed to participants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDescription {
    /// Page the detection script will run on.
    #[serde(default)]
    pub web_url: String,
    /// Identities the script may report.
    #[serde(default)]
    pub frameworks: Vec<String>,
    /// Starter script content, left empty by the task endpoint.
    #[serde(default)]
    pub detection_js: String,
}

/// A participant's submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub detection_js: String,
}

/// Makes a submitted script available to the page under test.
#[async_trait]
pub trait ScriptInstaller: Send + Sync {
    async fn install(&self, script: &str) -> Result<(), InstallError>;
}

/// Writes the script into the templates' static assets.
#[derive(Debug, Clone)]
pub struct StaticAssetInstaller {
    templates_dir: PathBuf,
}

impl StaticAssetInstaller {
    pub fn new(templates_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
        }
    }

    pub fn detection_dir(&self) -> PathBuf {
        self.templates_dir.join("static").join("detection")
    }

    pub fn detection_path(&self) -> PathBuf {
        self.detection_dir().join("detection.js")
    }

    /// Size in bytes of the installed script.
    pub async fn submission_size(&self) -> Result<u64, InstallError> {
        Ok(tokio::fs::metadata(self.detection_path()).await?.len())
    }

    pub fn templates_dir(&self) -> &Path {
        &self.templates_dir
    }
}

#[async_trait]
impl ScriptInstaller for StaticAssetInstaller {
    async fn install(&self, script: &str) -> Result<(), InstallError> {
        if script.trim().is_empty() {
            return Err(InstallError::EmptyScript);
        }

        tokio::fs::create_dir_all(self.detection_dir()).await?;
        tokio::fs::write(self.detection_path(), script).await?;

        info!(
            path = %self.detection_path().display(),
            bytes = script.len(),
            "Installed detection script"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_install_writes_static_asset() {
        let dir = TempDir::new().unwrap();
        let installer = StaticAssetInstaller::new(dir.path());

        installer.install("console.log('hi');").await.unwrap();

        let path = dir.path().join("static/detection/detection.js");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "console.log('hi');");
        assert_eq!(installer.submission_size().await.unwrap(), 18);
    }

    #[tokio::test]
    async fn test_install_overwrites_previous_script() {
        let dir = TempDir::new().unwrap();
        let installer = StaticAssetInstaller::new(dir.path());

        installer.install("first();").await.unwrap();
        installer.install("second();").await.unwrap();

        let content = std::fs::read_to_string(installer.detection_path()).unwrap();
        assert_eq!(content, "second();");
    }

    #[tokio::test]
    async fn test_empty_script_rejected() {
        let dir = TempDir::new().unwrap();
        let installer = StaticAssetInstaller::new(dir.path());

        assert!(matches!(
            installer.install("  \n").await,
            Err(InstallError::EmptyScript)
        ));
        assert!(!installer.detection_path().exists());
    }
}
