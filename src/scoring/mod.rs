//! Scoring core: trial sequencing, driver-report hand-off, outcome
//! recording and aggregation.
//!
//! ```text
//! POST /driver ──► DriverResultBroker ◄── wait ── ScoringOrchestrator
//!                                                   │        │
//!                                   ContainerRunner ┘        └ HumanTrigger
//!                                                   │
//!                                              ResultStore ──► GET /results
//! ```

pub mod aggregate;
pub mod broker;
pub mod orchestrator;
pub mod sequence;
pub mod store;
pub mod types;

pub use aggregate::{framework_stats, score};
pub use broker::{DriverResultBroker, ReportListener, SubmitOutcome};
pub use orchestrator::{OrchestratorSettings, RunPhase, RunSummary, ScoringOrchestrator};
pub use sequence::build_trial_sequence;
pub use store::ResultStore;
pub use types::{DetectionOutcome, FrameworkEntry, FrameworkStats, ScoringRun, HUMAN_IDENTITY};
