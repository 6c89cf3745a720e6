//! Retrying writers for task progress and state.
//!
//! Every write is a single auto-committed statement wrapped in
//! [`retry_with_policy`]. Transient database errors are retried; anything
//! else, or exhausting the attempts, is logged and reported as `false`.
//! Callers never see an error: a lost progress tick must not fail a run.

use std::sync::Arc;

use plangen_core::retry::{retry_with_policy, Clock, RetryPolicy};
use plangen_core::types::DbId;
use plangen_db::models::status::TaskState;
use plangen_db::repositories::{StateTransition, TaskRepo};
use plangen_db::transient::is_transient;
use sqlx::PgPool;

#[derive(Clone)]
pub struct ProgressReporter {
    pool: PgPool,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl ProgressReporter {
    pub fn new(pool: PgPool, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            policy,
            clock,
        }
    }

    /// Record progress for a processing task. `percentage` is clamped to
    /// `0..=100`.
    pub async fn update_progress(&self, task_id: DbId, percentage: f64, message: &str) -> bool {
        let pct = clamp_percentage(percentage);
        let result = retry_with_policy(
            &self.policy,
            self.clock.as_ref(),
            "update_progress",
            is_transient,
            || TaskRepo::update_progress(&self.pool, task_id, pct, message),
        )
        .await;

        match result {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(task_id, pct, "Progress ignored, task is not processing");
                false
            }
            Err(e) => {
                tracing::error!(task_id, pct, error = %e, "Failed to record progress");
                false
            }
        }
    }

    /// Replace the progress message, keeping the last percentage.
    pub async fn update_progress_message(&self, task_id: DbId, message: &str) -> bool {
        let result = retry_with_policy(
            &self.policy,
            self.clock.as_ref(),
            "update_progress_message",
            is_transient,
            || TaskRepo::update_progress_message(&self.pool, task_id, message),
        )
        .await;

        result.unwrap_or_else(|e| {
            tracing::error!(task_id, error = %e, "Failed to record progress message");
            false
        })
    }

    /// Move a task to `new_state`.
    ///
    /// Returns `true` if the task is in `new_state` afterwards, including
    /// when it already was. A regression is refused and returns `false`.
    pub async fn update_state(&self, task_id: DbId, new_state: TaskState) -> bool {
        let result = retry_with_policy(
            &self.policy,
            self.clock.as_ref(),
            "update_state",
            is_transient,
            || TaskRepo::transition_state(&self.pool, task_id, new_state),
        )
        .await;

        match result {
            Ok(StateTransition::Applied) => {
                tracing::info!(task_id, state = %new_state, "Task state updated");
                true
            }
            Ok(StateTransition::AlreadyInState) => {
                tracing::debug!(task_id, state = %new_state, "Task already in requested state");
                true
            }
            Ok(StateTransition::Refused { current }) => {
                tracing::warn!(
                    task_id,
                    current = %current,
                    requested = %new_state,
                    "Refused task state regression"
                );
                false
            }
            Ok(StateTransition::NotFound) => {
                tracing::warn!(task_id, requested = %new_state, "Task not found for state update");
                false
            }
            Err(e) => {
                tracing::error!(task_id, requested = %new_state, error = %e, "Failed to update task state");
                false
            }
        }
    }
}

/// Clamp a reported percentage into the column's `0..=100` range.
fn clamp_percentage(percentage: f64) -> i16 {
    if percentage.is_nan() {
        return 0;
    }
    percentage.clamp(0.0, 100.0).round() as i16
}
