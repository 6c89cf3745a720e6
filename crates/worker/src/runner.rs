//! Drives one claimed task through the pipeline.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use plangen_core::artifacts::{inspect, ArtifactPresence, Outcome};
use plangen_core::cancellation::CancellationConfig;
use plangen_core::context::ExecutionContext;
use plangen_core::retry::Clock;
use plangen_db::models::task::ClaimedTask;
use plangen_pipeline::{Pipeline, PipelineConfig, PipelineError};
use sqlx::PgPool;
use tracing::Instrument;

use crate::artifacts::WorkDir;
use crate::monitor::CancellationMonitor;
use crate::progress::ProgressReporter;

/// Result of running a task. The working directory is still on disk so the
/// caller can bill and persist from it.
#[derive(Debug)]
pub struct RunOutcome {
    pub outcome: Outcome,
    pub presence: ArtifactPresence,
    pub work_dir: WorkDir,
    /// Display form of the pipeline's error, if it returned one.
    pub diagnostic: Option<String>,
}

pub struct PipelineRunner {
    pool: PgPool,
    pipeline: Arc<dyn Pipeline>,
    run_dir: PathBuf,
    cancellation: CancellationConfig,
    reporter: ProgressReporter,
    clock: Arc<dyn Clock>,
}

impl PipelineRunner {
    pub fn new(
        pool: PgPool,
        pipeline: Arc<dyn Pipeline>,
        run_dir: impl Into<PathBuf>,
        cancellation: CancellationConfig,
        reporter: ProgressReporter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            pipeline,
            run_dir: run_dir.into(),
            cancellation,
            reporter,
            clock,
        }
    }

    /// Run the pipeline for `task` in a fresh working directory and classify
    /// the result from the artifacts it left behind.
    ///
    /// Fails only if the working directory cannot be prepared.
    pub async fn execute(&self, task: &ClaimedTask) -> io::Result<RunOutcome> {
        let work_dir = WorkDir::create(&self.run_dir, task.id)?;
        let context = ExecutionContext::new(task.id, task.owner_id, work_dir.path());
        let span = context.span();

        let monitor = CancellationMonitor::new(
            self.pool.clone(),
            task.id,
            work_dir.path(),
            self.cancellation,
            self.reporter.clone(),
            Arc::clone(&self.clock),
        );
        let config = PipelineConfig {
            prompt: task.prompt.clone(),
            parameters: task.parameters.clone(),
            context,
        };

        let (diagnostic, abort) = async {
            tracing::info!(work_dir = %work_dir.path().display(), "Pipeline starting");
            match self.pipeline.run(&config, &monitor).await {
                Ok(ret) => {
                    tracing::info!(exit_code = ?ret.exit_code, "Pipeline returned");
                    (None, None)
                }
                Err(PipelineError::Aborted(signal)) => {
                    tracing::info!(reason = %signal, "Pipeline aborted");
                    (Some(signal.to_string()), Some(signal.reason))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Pipeline failed");
                    (Some(e.to_string()), None)
                }
            }
        }
        .instrument(span.clone())
        .await;

        let presence = inspect(work_dir.path());
        let outcome = presence.outcome_after_abort(abort);
        span.in_scope(|| {
            if outcome.is_success() && !presence.has_pipeline_complete {
                tracing::warn!("Report present but pipeline-complete marker missing");
            }
            tracing::info!(outcome = ?outcome, "Run classified");
        });

        Ok(RunOutcome {
            outcome,
            presence,
            work_dir,
            diagnostic,
        })
    }
}
