//! Worker liveness registry.
//!
//! Purely informational: nothing in the claim path reads these rows.

use std::sync::Arc;

use plangen_core::retry::Clock;
use plangen_core::types::DbId;
use plangen_db::repositories::WorkerHeartbeatRepo;
use sqlx::PgPool;

#[derive(Clone)]
pub struct Heartbeat {
    pool: PgPool,
    worker_id: String,
    clock: Arc<dyn Clock>,
}

impl Heartbeat {
    pub fn new(pool: PgPool, worker_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            worker_id: worker_id.into(),
            clock,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Upsert this worker's row. Failures are logged and otherwise ignored.
    pub async fn beat(&self, current_task_id: Option<DbId>) {
        let at = self.clock.now();
        if let Err(e) =
            WorkerHeartbeatRepo::upsert(&self.pool, &self.worker_id, current_task_id, at).await
        {
            tracing::warn!(
                worker_id = %self.worker_id,
                current_task_id,
                error = %e,
                "Heartbeat write failed"
            );
        }
    }
}
