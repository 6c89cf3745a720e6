//! The plan-generation pipeline as seen from the task queue.
//!
//! The pipeline itself is an external collaborator. This crate defines the
//! seam the worker drives it through:
//!
//! - [`Pipeline`]: runs one plan in a working directory.
//! - [`ProgressCallback`]: invoked on every progress tick; returning an
//!   [`AbortSignal`] is the only way to stop a run.
//! - [`subprocess::SubprocessPipeline`]: adapter for pipelines shipped as
//!   an executable that reports progress as JSON lines on stdout.

pub mod subprocess;

use async_trait::async_trait;
use plangen_core::artifacts::StopReason;
use plangen_core::context::ExecutionContext;

pub use subprocess::SubprocessPipeline;

/// Raised by a progress callback to abort a run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AbortSignal {
    pub reason: StopReason,
    pub message: String,
}

impl AbortSignal {
    pub fn new(reason: StopReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// Receives progress from a running pipeline.
#[async_trait]
pub trait ProgressCallback: Send + Sync {
    /// Report progress. `percentage` is nominally `0.0..=100.0`.
    async fn on_progress(&self, percentage: f64, message: &str) -> Result<(), AbortSignal>;
}

/// Everything a pipeline needs for one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub prompt: String,
    pub parameters: serde_json::Value,
    pub context: ExecutionContext,
}

/// What the pipeline returned. Informational only: the outcome of a run is
/// judged from the artifacts in the working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReturn {
    pub exit_code: Option<i32>,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A progress callback asked the run to stop.
    #[error("Aborted: {0}")]
    Aborted(#[from] AbortSignal),

    /// The pipeline could not be started.
    #[error("Failed to start pipeline: {0}")]
    Spawn(std::io::Error),

    /// I/O error while talking to a running pipeline.
    #[error("Pipeline I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The pipeline ran and reported failure.
    #[error("Pipeline failed with exit code {exit_code}: {stderr}")]
    Failed { exit_code: i32, stderr: String },

    /// Any other failure inside the pipeline.
    #[error("Pipeline error: {0}")]
    Other(String),
}

impl PipelineError {
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

/// Runs one plan.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn run(
        &self,
        config: &PipelineConfig,
        on_progress: &dyn ProgressCallback,
    ) -> Result<PipelineReturn, PipelineError>;
}
