//! The worker's poll loop.
//!
//! Claims one pending task at a time and takes it through run, billing,
//! artifact persistence, terminal state, and owner notification, in that
//! order. Any number of worker processes may run this loop against the same
//! database; the claim's row lock is the only coordination between them.

use std::sync::Arc;
use std::time::Duration;

use plangen_core::artifacts::Outcome;
use plangen_core::retry::Clock;
use plangen_db::models::status::TaskState;
use plangen_db::models::task::ClaimedTask;
use plangen_db::repositories::TaskRepo;
use plangen_events::NotificationSink;
use plangen_pipeline::Pipeline;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactStore;
use crate::billing::BillingLedger;
use crate::config::{render_report_url, WorkerConfig};
use crate::heartbeat::Heartbeat;
use crate::progress::ProgressReporter;
use crate::runner::{PipelineRunner, RunOutcome};

/// Longest task label sent with a success notification.
const MAX_LABEL_CHARS: usize = 80;

pub struct Claimer {
    pool: PgPool,
    heartbeat: Heartbeat,
    reporter: ProgressReporter,
    runner: PipelineRunner,
    store: ArtifactStore,
    ledger: BillingLedger,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    poll_busy: Duration,
    poll_idle: Duration,
    heartbeat_interval: Duration,
    report_url_template: String,
}

impl Claimer {
    pub fn new(
        pool: PgPool,
        config: &WorkerConfig,
        pipeline: Arc<dyn Pipeline>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reporter = ProgressReporter::new(pool.clone(), config.progress_retry, Arc::clone(&clock));
        let runner = PipelineRunner::new(
            pool.clone(),
            pipeline,
            config.run_dir.clone(),
            config.cancellation,
            reporter.clone(),
            Arc::clone(&clock),
        );

        Self {
            heartbeat: Heartbeat::new(pool.clone(), config.worker_id.clone(), Arc::clone(&clock)),
            store: ArtifactStore::new(pool.clone()),
            ledger: BillingLedger::new(pool.clone(), config.billing),
            pool,
            reporter,
            runner,
            sink,
            clock,
            poll_busy: config.poll_busy,
            poll_idle: config.poll_idle,
            heartbeat_interval: config.heartbeat_interval,
            report_url_template: config.report_url_template.clone(),
        }
    }

    pub fn worker_id(&self) -> &str {
        self.heartbeat.worker_id()
    }

    /// Poll until `cancel` fires. A task already in flight is finished
    /// before the loop exits.
    ///
    /// Sleeps `poll_busy` after processing a task and `poll_idle` after an
    /// empty queue or a claim error. While idle the heartbeat is refreshed
    /// every `heartbeat_interval`.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(worker_id = %self.worker_id(), "Worker loop started");
        self.heartbeat.beat(None).await;
        let mut last_beat = self.clock.now();

        while !cancel.is_cancelled() {
            let pause = match self.poll_once().await {
                Ok(true) => {
                    last_beat = self.clock.now();
                    self.poll_busy
                }
                Ok(false) => {
                    let now = self.clock.now();
                    if (now - last_beat).to_std().unwrap_or_default() >= self.heartbeat_interval {
                        self.heartbeat.beat(None).await;
                        last_beat = now;
                    }
                    self.poll_idle
                }
                Err(e) => {
                    tracing::error!(worker_id = %self.worker_id(), error = %e, "Claim failed");
                    self.poll_idle
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.clock.sleep(pause) => {}
            }
        }

        tracing::info!(worker_id = %self.worker_id(), "Worker loop stopped");
    }

    /// Claim and process at most one task. Returns whether a task was
    /// processed.
    pub async fn poll_once(&self) -> Result<bool, sqlx::Error> {
        let Some(task) = TaskRepo::claim_next(&self.pool, self.worker_id()).await? else {
            return Ok(false);
        };

        tracing::info!(worker_id = %self.worker_id(), task_id = task.id, "Claimed task");
        self.heartbeat.beat(Some(task.id)).await;
        self.process_task(task).await;
        self.heartbeat.beat(None).await;
        Ok(true)
    }

    /// Take a claimed task to a terminal state. Never fails; every step
    /// logs and degrades on error.
    pub async fn process_task(&self, task: ClaimedTask) -> Outcome {
        let run = match self.runner.execute(&task).await {
            Ok(run) => run,
            Err(e) => {
                tracing::error!(task_id = task.id, error = %e, "Could not prepare working directory");
                let message = format!("Could not prepare working directory: {e}");
                self.finish_failed(&task, &message).await;
                return Outcome::Crashed;
            }
        };

        let RunOutcome {
            outcome,
            work_dir,
            diagnostic,
            ..
        } = run;

        match self
            .ledger
            .charge_once(task.id, work_dir.path(), outcome.is_success())
            .await
        {
            Ok(result) => tracing::debug!(task_id = task.id, result = ?result, "Billing done"),
            Err(e) => tracing::error!(task_id = task.id, error = %e, "Billing failed"),
        }

        self.store.persist_and_cleanup(task.id, work_dir).await;

        match outcome.failure_message() {
            None => {
                self.reporter.update_state(task.id, TaskState::Completed).await;
                let report_url = render_report_url(&self.report_url_template, task.id);
                self.sink
                    .notify_success(task.owner_id, &report_url, &task_label(&task.prompt))
                    .await;
            }
            Some(message) => {
                let message = match (outcome, diagnostic) {
                    (Outcome::Crashed, Some(detail)) => format!("{message}: {detail}"),
                    _ => message.to_string(),
                };
                self.finish_failed(&task, &message).await;
            }
        }

        tracing::info!(task_id = task.id, outcome = ?outcome, "Task finished");
        outcome
    }

    async fn finish_failed(&self, task: &ClaimedTask, message: &str) {
        if let Err(e) = TaskRepo::set_error_message(&self.pool, task.id, message).await {
            tracing::warn!(task_id = task.id, error = %e, "Failed to record error message");
        }
        self.reporter.update_state(task.id, TaskState::Failed).await;
        self.sink.notify_failure(task.owner_id, message).await;
    }
}

/// First line of the prompt, shortened for notification subjects.
fn task_label(prompt: &str) -> String {
    let first_line = prompt.lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= MAX_LABEL_CHARS {
        return first_line.to_string();
    }
    let mut label: String = first_line.chars().take(MAX_LABEL_CHARS - 1).collect();
    label.push('…');
    label
}
