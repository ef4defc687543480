//! kite-pipeline: the staged orchestrator.
//!
//! S0 Quality → S1 Universe → S2 Signals → S3 Screener → S4 Ranker →
//! S5 Portfolio → S6 Planning → S6.5 Risk Gate → S7 Audit.
//!
//! The orchestrator is the only component that knows the stage order; each
//! stage is a function over the previous stages' artifacts with a side
//! effect into the repositories. Per-run artifacts are keyed by `run_id`
//! and every write upserts, so re-running a run is idempotent per stage.

pub mod audit_log;
pub mod orchestrator;

pub use audit_log::AuditLog;
pub use orchestrator::{Orchestrator, RunConfig, RunResult, StageOutcome};
