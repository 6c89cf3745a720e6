//! Repository for the `tasks` table.
//!
//! Uses `TaskState` from `models::status` for every state literal.
//! The claim is the only place a row is locked; every other method is a
//! single short auto-committed statement.

use plangen_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::models::status::{StatusId, TaskState};
use crate::models::task::{ClaimedTask, CreateTask, Task, TaskCancellationRow};

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, state_id, prompt, parameters, owner_id, \
    progress_percentage, progress_message, error_message, \
    claimed_by, claimed_at, completed_at, last_seen_at, \
    stop_requested, stop_requested_at, report, run_snapshot, created_at";

/// Columns returned to a worker by a successful claim.
const CLAIM_COLUMNS: &str = "id, owner_id, prompt, parameters, created_at";

/// Result of a state transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    /// The row moved into the requested state.
    Applied,
    /// The row was already in the requested state; nothing was written.
    AlreadyInState,
    /// The transition would regress the state machine and was refused.
    Refused { current: TaskState },
    /// No such task.
    NotFound,
}

/// Provides persistence operations for tasks.
pub struct TaskRepo;

impl TaskRepo {
    /// Insert a new pending task.
    pub async fn submit(pool: &PgPool, input: &CreateTask) -> Result<Task, sqlx::Error> {
        let query = format!(
            "INSERT INTO tasks (state_id, prompt, owner_id, parameters) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(TaskState::Pending.id())
            .bind(&input.prompt)
            .bind(input.owner_id)
            .bind(
                input
                    .parameters
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({})),
            )
            .fetch_one(pool)
            .await
    }

    /// Atomically claim the oldest claimable task for `worker_id`.
    ///
    /// Lock, state flip and commit happen in one transaction. On any error
    /// the transaction is rolled back, leaving the row pending.
    pub async fn claim_next(
        pool: &PgPool,
        worker_id: &str,
    ) -> Result<Option<ClaimedTask>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        match Self::claim_next_in(&mut tx, worker_id).await {
            Ok(claimed) => {
                tx.commit().await?;
                Ok(claimed)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Claim rollback failed");
                }
                Err(e)
            }
        }
    }

    /// The claim statements, run inside a caller-owned transaction.
    ///
    /// Uses `SELECT ... FOR UPDATE SKIP LOCKED` so concurrent claimers skip
    /// rows another transaction is holding instead of queueing behind it.
    /// Nothing is visible to other workers until the caller commits.
    pub async fn claim_next_in(
        conn: &mut PgConnection,
        worker_id: &str,
    ) -> Result<Option<ClaimedTask>, sqlx::Error> {
        let candidate: Option<DbId> = sqlx::query_scalar(
            "SELECT id FROM tasks \
             WHERE state_id = $1 AND stop_requested = FALSE \
             ORDER BY created_at ASC, id ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(TaskState::Pending.id())
        .fetch_optional(&mut *conn)
        .await?;

        let Some(task_id) = candidate else {
            return Ok(None);
        };

        let query = format!(
            "UPDATE tasks \
             SET state_id = $2, claimed_by = $3, claimed_at = NOW(), \
                 progress_percentage = 0, progress_message = NULL \
             WHERE id = $1 \
             RETURNING {CLAIM_COLUMNS}"
        );
        sqlx::query_as::<_, ClaimedTask>(&query)
            .bind(task_id)
            .bind(TaskState::Processing.id())
            .bind(worker_id)
            .fetch_one(&mut *conn)
            .await
            .map(Some)
    }

    /// Find a task by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Record progress on a processing task.
    ///
    /// Returns `false` if the task is not (or no longer) processing, so a
    /// late tick can never overwrite a terminal row.
    pub async fn update_progress(
        pool: &PgPool,
        id: DbId,
        percentage: i16,
        message: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tasks SET progress_percentage = $2, progress_message = $3 \
             WHERE id = $1 AND state_id = $4",
        )
        .bind(id)
        .bind(percentage)
        .bind(message)
        .bind(TaskState::Processing.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the progress message of a processing task, keeping its
    /// percentage.
    pub async fn update_progress_message(
        pool: &PgPool,
        id: DbId,
        message: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tasks SET progress_message = $2 WHERE id = $1 AND state_id = $3",
        )
        .bind(id)
        .bind(message)
        .bind(TaskState::Processing.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a task forward to `new_state`.
    ///
    /// The `WHERE state_id = ANY(predecessors)` guard makes the write
    /// idempotent and monotonic: repeating a transition touches nothing,
    /// and a transition backwards is refused.
    pub async fn transition_state(
        pool: &PgPool,
        id: DbId,
        new_state: TaskState,
    ) -> Result<StateTransition, sqlx::Error> {
        let predecessors: Vec<StatusId> =
            new_state.predecessors().iter().map(|s| s.id()).collect();

        let result = sqlx::query(
            "UPDATE tasks \
             SET state_id = $2, \
                 completed_at = CASE WHEN $3 THEN NOW() ELSE completed_at END \
             WHERE id = $1 AND state_id = ANY($4)",
        )
        .bind(id)
        .bind(new_state.id())
        .bind(new_state.is_terminal())
        .bind(&predecessors)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(StateTransition::Applied);
        }

        let current: Option<StatusId> =
            sqlx::query_scalar("SELECT state_id FROM tasks WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;

        Ok(match current.and_then(TaskState::from_id) {
            None => StateTransition::NotFound,
            Some(state) if state == new_state => StateTransition::AlreadyInState,
            Some(state) => StateTransition::Refused { current: state },
        })
    }

    /// Read the columns the cancellation monitor decides on.
    pub async fn cancellation_flags(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<TaskCancellationRow>, sqlx::Error> {
        sqlx::query_as::<_, TaskCancellationRow>(
            "SELECT stop_requested, last_seen_at FROM tasks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Owner and parameters of a task, read inside the billing transaction.
    pub async fn billing_subject(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<(DbId, serde_json::Value)>, sqlx::Error> {
        sqlx::query_as("SELECT owner_id, parameters FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Store the report and run snapshot in one statement.
    pub async fn save_artifacts(
        pool: &PgPool,
        id: DbId,
        report: Option<&[u8]>,
        run_snapshot: Option<&[u8]>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET report = $2, run_snapshot = $3 WHERE id = $1")
            .bind(id)
            .bind(report)
            .bind(run_snapshot)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Record a human-readable failure diagnostic.
    pub async fn set_error_message(
        pool: &PgPool,
        id: DbId,
        message: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET error_message = $2 WHERE id = $1")
            .bind(id)
            .bind(message)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Flag a task for cooperative cancellation.
    ///
    /// Returns `false` if the task is already terminal or unknown. The
    /// first request's timestamp is kept.
    pub async fn request_stop(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tasks \
             SET stop_requested = TRUE, \
                 stop_requested_at = COALESCE(stop_requested_at, NOW()) \
             WHERE id = $1 AND state_id IN ($2, $3)",
        )
        .bind(id)
        .bind(TaskState::Pending.id())
        .bind(TaskState::Processing.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
