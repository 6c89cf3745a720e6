//! The pipeline's progress callback.
//!
//! On every tick the monitor re-reads the task's stop flag and client
//! liveness, decides via [`plangen_core::cancellation::decide`], and either
//! records the progress or aborts the run. Each tick issues its own short
//! auto-committed statements; no lock is held across pipeline stages.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use plangen_core::artifacts::{write_stop_flag, StopReason};
use plangen_core::cancellation::{decide, CancellationConfig, CancellationFlags, Decision};
use plangen_core::retry::Clock;
use plangen_core::types::DbId;
use plangen_db::repositories::TaskRepo;
use plangen_pipeline::{AbortSignal, ProgressCallback};
use sqlx::PgPool;

use crate::progress::ProgressReporter;

/// Progress message persisted when a user stop is honoured.
pub const STOP_REQUESTED_MESSAGE: &str = "Stop requested";

/// Abort message for a user stop.
pub const USER_STOP_ABORT: &str = "Stop requested by user";

/// Abort message for an inactivity timeout.
pub const INACTIVITY_ABORT: &str = "Client inactive for too long";

pub struct CancellationMonitor {
    pool: PgPool,
    task_id: DbId,
    work_dir: PathBuf,
    config: CancellationConfig,
    reporter: ProgressReporter,
    clock: Arc<dyn Clock>,
}

impl CancellationMonitor {
    pub fn new(
        pool: PgPool,
        task_id: DbId,
        work_dir: impl Into<PathBuf>,
        config: CancellationConfig,
        reporter: ProgressReporter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            task_id,
            work_dir: work_dir.into(),
            config,
            reporter,
            clock,
        }
    }

    /// Read the flags, failing open: an unreadable row means "continue".
    async fn read_flags(&self) -> Option<CancellationFlags> {
        match TaskRepo::cancellation_flags(&self.pool, self.task_id).await {
            Ok(Some(row)) => Some(row.into()),
            Ok(None) => {
                tracing::warn!(task_id = self.task_id, "Task row missing during run");
                None
            }
            Err(e) => {
                tracing::warn!(
                    task_id = self.task_id,
                    error = %e,
                    "Could not read cancellation flags, continuing"
                );
                None
            }
        }
    }

    async fn abort(&self, reason: StopReason) -> AbortSignal {
        let message = match reason {
            StopReason::User => {
                self.reporter
                    .update_progress_message(self.task_id, STOP_REQUESTED_MESSAGE)
                    .await;
                USER_STOP_ABORT
            }
            StopReason::Inactivity => INACTIVITY_ABORT,
        };

        if let Err(e) = write_stop_flag(&self.work_dir, reason) {
            tracing::error!(
                task_id = self.task_id,
                error = %e,
                "Failed to write stop flag"
            );
        }

        tracing::info!(task_id = self.task_id, reason = reason.as_str(), "Aborting run");
        AbortSignal::new(reason, message)
    }
}

#[async_trait]
impl ProgressCallback for CancellationMonitor {
    async fn on_progress(&self, percentage: f64, message: &str) -> Result<(), AbortSignal> {
        if let Some(flags) = self.read_flags().await {
            if let Decision::Abort(reason) = decide(&flags, self.clock.now(), &self.config) {
                return Err(self.abort(reason).await);
            }
        }

        self.reporter
            .update_progress(self.task_id, percentage, message)
            .await;
        Ok(())
    }
}
