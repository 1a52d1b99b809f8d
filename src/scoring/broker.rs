//! Hand-off point between out-of-band driver reports and the waiting trial.
//!
//! Reports arrive on the HTTP path at any time. A trial opens a listening
//! window with [`DriverResultBroker::listen`]; reports submitted while no
//! window is open are discarded so they can never be attributed to a later
//! trial. Each window carries a generation number, so a stale guard being
//! dropped late cannot close a newer window.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::metrics::MetricsCollector;

/// What happened to a submitted report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Queued for the listening trial; `pending` is the queue length after the push.
    Accepted { pending: usize },
    /// Dropped because no trial was listening.
    Discarded,
}

#[derive(Debug, Default)]
struct BrokerState {
    queue: VecDeque<String>,
    generation: u64,
    listening: bool,
}

/// Thread-safe FIFO of driver reports guarded by a single mutex/notify pair.
#[derive(Debug, Default)]
pub struct DriverResultBroker {
    state: Mutex<BrokerState>,
    notify: Notify,
    metrics: MetricsCollector,
}

impl DriverResultBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submits a report. Never fails; reports outside a listening window are dropped.
    pub fn submit(&self, report: &str) -> SubmitOutcome {
        let report = report.trim().to_string();

        let outcome = {
            let mut state = self.lock();
            if state.listening {
                state.queue.push_back(report.clone());
                SubmitOutcome::Accepted {
                    pending: state.queue.len(),
                }
            } else {
                SubmitOutcome::Discarded
            }
        };

        match outcome {
            SubmitOutcome::Accepted { pending } => {
                self.notify.notify_one();
                self.metrics.record_driver_report(true);
                info!(driver = %report, pending, "Received driver submission");
            }
            SubmitOutcome::Discarded => {
                self.metrics.record_driver_report(false);
                info!(driver = %report, "Discarded driver submission, no trial is listening");
            }
        }

        outcome
    }

    /// Drops every queued report and returns how many were dropped.
    pub fn clear(&self, reason: &str) -> usize {
        let cleared = {
            let mut state = self.lock();
            let cleared = state.queue.len();
            state.queue.clear();
            cleared
        };

        if cleared > 0 {
            debug!(cleared, reason, "Cleared pending driver submissions");
        }
        cleared
    }

    /// Opens a new listening window, discarding any backlog.
    ///
    /// The window stays open until the returned guard is dropped.
    pub fn listen(&self) -> ReportListener<'_> {
        let (generation, cleared) = {
            let mut state = self.lock();
            state.generation = state.generation.wrapping_add(1);
            state.listening = true;
            let cleared = state.queue.len();
            state.queue.clear();
            (state.generation, cleared)
        };

        if cleared > 0 {
            debug!(cleared, "Discarded stale driver submissions when opening a window");
        }

        ReportListener {
            broker: self,
            generation,
        }
    }

    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_listening(&self) -> bool {
        self.lock().listening
    }

    fn pop(&self, generation: u64) -> Option<String> {
        let mut state = self.lock();
        if state.listening && state.generation == generation {
            state.queue.pop_front()
        } else {
            None
        }
    }

    /// Closes the window if it is still current; returns how many reports were dropped.
    fn close(&self, generation: u64) -> usize {
        let cleared = {
            let mut state = self.lock();
            if state.generation != generation {
                return 0;
            }
            state.listening = false;
            let cleared = state.queue.len();
            state.queue.clear();
            cleared
        };

        if cleared > 0 {
            debug!(
                cleared,
                generation,
                "Discarded unconsumed driver submissions when closing a window"
            );
        }
        cleared
    }
}

/// Roughly 30 years; used when `now + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// An open listening window. Dropping it closes the window.
#[derive(Debug)]
pub struct ReportListener<'a> {
    broker: &'a DriverResultBroker,
    generation: u64,
}

impl ReportListener<'_> {
    /// Waits for the next report in FIFO order, or `None` once `timeout` elapses.
    ///
    /// Consumes at most one report. A timeout is the normal "no report" result.
    pub async fn wait_for_report(&self, timeout: Duration, framework: &str) -> Option<String> {
        let deadline = deadline_after(timeout);

        loop {
            let notified = self.broker.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(report) = self.broker.pop(self.generation) {
                info!(driver = %report, framework, "Matched driver submission to framework");
                return Some(report);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        if let Some(report) = self.broker.pop(self.generation) {
            info!(driver = %report, framework, "Matched driver submission to framework");
            return Some(report);
        }

        warn!(
            framework,
            timeout_secs = timeout.as_secs_f64(),
            "No driver submission received within timeout"
        );
        None
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for ReportListener<'_> {
    fn drop(&mut self) {
        self.broker.close(self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_times_out_without_report() {
        let broker = DriverResultBroker::new();
        let listener = broker.listen();

        let start = std::time::Instant::now();
        let report = listener
            .wait_for_report(Duration::from_millis(80), "selenium")
            .await;

        assert!(report.is_none());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(80));
        assert!(elapsed < Duration::from_millis(500), "waited {elapsed:?}");
    }

    #[tokio::test]
    async fn test_zero_timeout_returns_immediately() {
        let broker = DriverResultBroker::new();
        let listener = broker.listen();

        let start = std::time::Instant::now();
        assert!(listener.wait_for_report(Duration::ZERO, "x").await.is_none());
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_report_during_wait_is_delivered() {
        let broker = Arc::new(DriverResultBroker::new());
        let listener = broker.listen();

        let submitter = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                broker.submit("firefox")
            })
        };

        let report = listener
            .wait_for_report(Duration::from_secs(2), "firefox")
            .await;
        assert_eq!(report.as_deref(), Some("firefox"));
        assert_eq!(
            submitter.await.unwrap(),
            SubmitOutcome::Accepted { pending: 1 }
        );
        assert_eq!(broker.pending(), 0);
    }

    #[tokio::test]
    async fn test_report_without_listener_is_discarded() {
        let broker = DriverResultBroker::new();
        assert_eq!(broker.submit("chrome"), SubmitOutcome::Discarded);
        assert_eq!(broker.pending(), 0);

        let listener = broker.listen();
        let report = listener.wait_for_report(Duration::from_millis(30), "firefox").await;
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn test_fifo_and_one_report_per_wait() {
        let broker = DriverResultBroker::new();
        let listener = broker.listen();

        broker.submit(" chrome ");
        broker.submit("firefox");
        assert_eq!(broker.pending(), 2);

        let first = listener.wait_for_report(Duration::from_millis(10), "t").await;
        assert_eq!(first.as_deref(), Some("chrome"));
        assert_eq!(broker.pending(), 1);

        let second = listener.wait_for_report(Duration::from_millis(10), "t").await;
        assert_eq!(second.as_deref(), Some("firefox"));
    }

    #[tokio::test]
    async fn test_leftovers_do_not_leak_into_next_window() {
        let broker = DriverResultBroker::new();
        {
            let _listener = broker.listen();
            broker.submit("chrome");
            broker.submit("chrome");
        }
        assert!(!broker.is_listening());
        assert_eq!(broker.pending(), 0);

        let listener = broker.listen();
        let report = listener.wait_for_report(Duration::from_millis(30), "firefox").await;
        assert!(report.is_none());
    }

    #[test]
    fn test_stale_guard_does_not_close_newer_window() {
        let broker = DriverResultBroker::new();
        let old = broker.listen();
        let new = broker.listen();
        assert!(new.generation() > old.generation());

        drop(old);
        assert!(broker.is_listening());
        assert!(matches!(
            broker.submit("selenium"),
            SubmitOutcome::Accepted { .. }
        ));

        drop(new);
        assert!(!broker.is_listening());
    }

    #[test]
    fn test_clear_reports_count() {
        let broker = DriverResultBroker::new();
        let _listener = broker.listen();
        broker.submit("a");
        broker.submit("b");
        assert_eq!(broker.clear("test"), 2);
        assert_eq!(broker.clear("test"), 0);
    }

    #[test]
    fn test_close_counts_leftovers_only_for_current_window() {
        let broker = DriverResultBroker::new();
        let listener = broker.listen();
        let generation = listener.generation();
        broker.submit("chrome");
        broker.submit("firefox");

        assert_eq!(broker.close(generation - 1), 0);
        assert_eq!(broker.pending(), 2);

        assert_eq!(broker.close(generation), 2);
        assert!(!broker.is_listening());
        drop(listener);
    }

    #[test]
    fn test_unbounded_timeout_does_not_overflow() {
        let now = Instant::now();
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline > now + Duration::from_secs(86400));
    }

    #[tokio::test]
    async fn test_report_delivered_with_maximal_timeout() {
        let broker = DriverResultBroker::new();
        let listener = broker.listen();
        broker.submit("nodriver");

        let report = listener.wait_for_report(Duration::MAX, "nodriver").await;
        assert_eq!(report.as_deref(), Some("nodriver"));
    }
}
