//! Worker liveness rows. Read only by operators; never by the claim path.

use plangen_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `worker_heartbeats` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub started_at: Timestamp,
    pub last_heartbeat_at: Timestamp,
    pub current_task_id: Option<DbId>,
}
