#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use plangen_core::artifacts::{PIPELINE_COMPLETE_FILE, REPORT_FILE, USAGE_COST_FILE};
use plangen_core::retry::{Clock, ManualClock, RetryPolicy};
use plangen_core::types::{DbId, Timestamp};
use plangen_db::models::task::CreateTask;
use plangen_db::models::user::CreateUser;
use plangen_db::repositories::{TaskRepo, UserRepo};
use plangen_events::NotificationSink;
use plangen_pipeline::{
    Pipeline, PipelineConfig, PipelineError, PipelineReturn, ProgressCallback,
};
use plangen_worker::config::WorkerConfig;
use plangen_worker::progress::ProgressReporter;
use sqlx::types::chrono::{TimeZone, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

/// Build a `WorkerConfig` rooted at `run_dir` with production defaults.
pub fn test_config(run_dir: &Path) -> WorkerConfig {
    let vars: HashMap<&str, String> = HashMap::from([
        ("DATABASE_URL", "postgres://unused".to_string()),
        ("PIPELINE_COMMAND", "unused".to_string()),
        ("WORKER_ID", "test-worker".to_string()),
        ("RUN_DIR", run_dir.display().to_string()),
        ("PROGRESS_RETRY_DELAY_MS", "0".to_string()),
    ]);
    WorkerConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

pub fn test_reporter(pool: &PgPool, clock: Arc<ManualClock>) -> ProgressReporter {
    ProgressReporter::new(pool.clone(), RetryPolicy::default(), clock)
}

pub async fn new_user(pool: &PgPool, email: &str, balance: i64) -> DbId {
    UserRepo::create(
        pool,
        &CreateUser {
            email: email.to_string(),
            credits_balance: Some(balance),
        },
    )
    .await
    .unwrap()
    .id
}

pub async fn new_task(
    pool: &PgPool,
    owner_id: DbId,
    prompt: &str,
    parameters: Option<serde_json::Value>,
) -> DbId {
    TaskRepo::submit(
        pool,
        &CreateTask {
            prompt: prompt.to_string(),
            owner_id,
            parameters,
        },
    )
    .await
    .unwrap()
    .id
}

pub async fn set_last_seen(pool: &PgPool, task_id: DbId, at: Timestamp) {
    sqlx::query("UPDATE tasks SET last_seen_at = $2 WHERE id = $1")
        .bind(task_id)
        .bind(at)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn balance_of(pool: &PgPool, user_id: DbId) -> i64 {
    UserRepo::find_by_id(pool, user_id)
        .await
        .unwrap()
        .unwrap()
        .credits_balance
}

/// Current time truncated to whole seconds, so it survives a round trip
/// through a TIMESTAMPTZ column unchanged.
pub fn whole_second_now() -> Timestamp {
    Utc.timestamp_opt(Utc::now().timestamp(), 0).unwrap()
}

pub fn write_usage_cost(dir: &Path, usd: f64) {
    std::fs::write(
        dir.join(USAGE_COST_FILE),
        serde_json::json!({ "total_cost": usd }).to_string(),
    )
    .unwrap();
}

// ---------------------------------------------------------------------------
// Stub pipeline
// ---------------------------------------------------------------------------

/// A pipeline that reports a fixed sequence of ticks and writes artifacts
/// like the real one does.
pub struct ScriptedPipeline {
    pub ticks: Vec<f64>,
    /// Fail with an error after this many ticks.
    pub fail_after: Option<usize>,
    pub usage_cost: Option<f64>,
    /// Cancelled as soon as a run starts.
    pub cancel_on_start: Option<CancellationToken>,
    pub seen_prompts: Mutex<Vec<String>>,
}

impl ScriptedPipeline {
    pub fn succeeding(usage_cost: f64) -> Self {
        Self {
            ticks: vec![0.0, 25.0, 50.0, 75.0, 100.0],
            fail_after: None,
            usage_cost: Some(usage_cost),
            cancel_on_start: None,
            seen_prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_after(ticks: usize, usage_cost: f64) -> Self {
        Self {
            fail_after: Some(ticks),
            ..Self::succeeding(usage_cost)
        }
    }
}

#[async_trait]
impl Pipeline for ScriptedPipeline {
    async fn run(
        &self,
        config: &PipelineConfig,
        on_progress: &dyn ProgressCallback,
    ) -> Result<PipelineReturn, PipelineError> {
        self.seen_prompts.lock().unwrap().push(config.prompt.clone());
        if let Some(token) = &self.cancel_on_start {
            token.cancel();
        }
        let dir = config.context.work_dir.as_path();
        if let Some(cost) = self.usage_cost {
            write_usage_cost(dir, cost);
        }
        std::fs::write(dir.join("log.txt"), "stage output\n")?;

        for (i, pct) in self.ticks.iter().enumerate() {
            if self.fail_after == Some(i) {
                return Err(PipelineError::Other("model endpoint unavailable".to_string()));
            }
            on_progress.on_progress(*pct, &format!("stage {i}")).await?;
        }

        std::fs::write(dir.join(REPORT_FILE), format!("<html>{}</html>", config.prompt))?;
        std::fs::write(dir.join(PIPELINE_COMPLETE_FILE), "done")?;
        Ok(PipelineReturn { exit_code: Some(0) })
    }
}

// ---------------------------------------------------------------------------
// Stopping clock
// ---------------------------------------------------------------------------

/// A [`ManualClock`] that cancels `cancel` once it has been asked to sleep
/// `stop_after` times, ending a worker loop after a known number of polls.
pub struct StoppingClock {
    inner: ManualClock,
    cancel: CancellationToken,
    stop_after: usize,
}

impl StoppingClock {
    pub fn new(start: Timestamp, cancel: CancellationToken, stop_after: usize) -> Self {
        Self {
            inner: ManualClock::new(start),
            cancel,
            stop_after,
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.sleeps()
    }
}

#[async_trait]
impl Clock for StoppingClock {
    fn now(&self) -> Timestamp {
        self.inner.now()
    }

    async fn sleep(&self, duration: Duration) {
        self.inner.sleep(duration).await;
        if self.inner.sleeps().len() >= self.stop_after {
            self.cancel.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Recording sink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notified {
    Success {
        owner_id: DbId,
        artifact_path: String,
        label: String,
    },
    Failure {
        owner_id: DbId,
        message: String,
    },
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<Notified>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Notified> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify_success(&self, owner_id: DbId, artifact_path: &str, label: &str) {
        self.events.lock().unwrap().push(Notified::Success {
            owner_id,
            artifact_path: artifact_path.to_string(),
            label: label.to_string(),
        });
    }

    async fn notify_failure(&self, owner_id: DbId, message: &str) {
        self.events.lock().unwrap().push(Notified::Failure {
            owner_id,
            message: message.to_string(),
        });
    }
}
