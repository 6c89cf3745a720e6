//! The plangen worker: claims pending plan-generation tasks, runs the
//! pipeline under cooperative cancellation, bills usage exactly once, and
//! persists the results.
//!
//! - [`claimer::Claimer`]: poll loop and per-task orchestration.
//! - [`runner::PipelineRunner`]: working directory, context, and outcome.
//! - [`monitor::CancellationMonitor`]: the pipeline's progress callback.
//! - [`progress::ProgressReporter`]: retrying progress and state writes.
//! - [`artifacts::ArtifactStore`]: report and snapshot persistence.
//! - [`billing::BillingLedger`]: idempotent usage charge.
//! - [`heartbeat::Heartbeat`]: liveness row for operators.

pub mod artifacts;
pub mod billing;
pub mod claimer;
pub mod config;
pub mod heartbeat;
pub mod monitor;
pub mod progress;
pub mod runner;
