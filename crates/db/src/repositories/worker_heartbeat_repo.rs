//! Repository for the `worker_heartbeats` table.

use plangen_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::worker_heartbeat::WorkerHeartbeat;

/// Column list for `worker_heartbeats` queries.
const COLUMNS: &str = "worker_id, started_at, last_heartbeat_at, current_task_id";

/// Provides liveness writes for worker processes.
pub struct WorkerHeartbeatRepo;

impl WorkerHeartbeatRepo {
    /// Create the worker's row on first call, refresh it afterwards.
    ///
    /// `started_at` is only set on insert; `current_task_id` always reflects
    /// the latest call, so passing `None` clears it. `at` is the worker's
    /// own notion of now.
    pub async fn upsert(
        pool: &PgPool,
        worker_id: &str,
        current_task_id: Option<DbId>,
        at: Timestamp,
    ) -> Result<WorkerHeartbeat, sqlx::Error> {
        let query = format!(
            "INSERT INTO worker_heartbeats (worker_id, current_task_id, started_at, last_heartbeat_at) \
             VALUES ($1, $2, $3, $3) \
             ON CONFLICT (worker_id) DO UPDATE \
             SET last_heartbeat_at = EXCLUDED.last_heartbeat_at, \
                 current_task_id = EXCLUDED.current_task_id \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorkerHeartbeat>(&query)
            .bind(worker_id)
            .bind(current_task_id)
            .bind(at)
            .fetch_one(pool)
            .await
    }

    /// Find a worker's heartbeat row.
    pub async fn find(
        pool: &PgPool,
        worker_id: &str,
    ) -> Result<Option<WorkerHeartbeat>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM worker_heartbeats WHERE worker_id = $1");
        sqlx::query_as::<_, WorkerHeartbeat>(&query)
            .bind(worker_id)
            .fetch_optional(pool)
            .await
    }
}
