//! Task entity models and DTOs.

use plangen_core::cancellation::CancellationFlags;
use plangen_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::{StatusId, TaskState};

/// A row from the `tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Task {
    pub id: DbId,
    pub state_id: StatusId,
    pub prompt: String,
    pub parameters: serde_json::Value,
    pub owner_id: DbId,
    pub progress_percentage: i16,
    pub progress_message: Option<String>,
    pub error_message: Option<String>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub last_seen_at: Timestamp,
    pub stop_requested: bool,
    pub stop_requested_at: Option<Timestamp>,
    #[serde(skip)]
    pub report: Option<Vec<u8>>,
    #[serde(skip)]
    pub run_snapshot: Option<Vec<u8>>,
    pub created_at: Timestamp,
}

impl Task {
    pub fn state(&self) -> Option<TaskState> {
        TaskState::from_id(self.state_id)
    }
}

/// Everything a worker needs to execute a claimed task without going back
/// to the database.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ClaimedTask {
    pub id: DbId,
    pub owner_id: DbId,
    pub prompt: String,
    pub parameters: serde_json::Value,
    pub created_at: Timestamp,
}

/// The columns read by the cancellation monitor on every progress tick.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct TaskCancellationRow {
    pub stop_requested: bool,
    pub last_seen_at: Option<Timestamp>,
}

impl From<TaskCancellationRow> for CancellationFlags {
    fn from(row: TaskCancellationRow) -> Self {
        CancellationFlags {
            stop_requested: row.stop_requested,
            last_seen_at: row.last_seen_at,
        }
    }
}

/// DTO for inserting a new pending task.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTask {
    pub prompt: String,
    pub owner_id: DbId,
    pub parameters: Option<serde_json::Value>,
}
