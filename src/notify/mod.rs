//! Human-operator notification.
//!
//! The human trial asks a person to open the page under test. How the person
//! is summoned is opaque to the scoring run: it only learns whether the
//! request was accepted.

pub mod pushcut;

use async_trait::async_trait;

use crate::error::NotifyError;

pub use pushcut::PushcutTrigger;

/// Fires the external notification for the human trial.
#[async_trait]
pub trait HumanTrigger: Send + Sync {
    async fn notify_human(&self) -> Result<(), NotifyError>;
}
