//! Process-lifetime holder of the most recent scoring run.

use std::sync::{Arc, PoisonError, RwLock};

use super::types::ScoringRun;

/// Read-only view of the latest (possibly in-progress) run.
///
/// Cloning the store shares the underlying run.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    inner: Arc<RwLock<ScoringRun>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the latest run; empty if no run has executed.
    pub fn snapshot(&self) -> ScoringRun {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the stored run.
    pub(crate) fn publish(&self, run: &ScoringRun) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = run.clone();
    }

    /// Discards the previous run.
    pub(crate) fn reset(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = ScoringRun::new();
    }
}
