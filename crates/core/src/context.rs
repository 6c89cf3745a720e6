//! Per-run execution context.
//!
//! Carries the identity of the run being executed down the call chain so
//! instrumentation (log spans, the pipeline's own cost tracking) can
//! attribute work to a task and user without any process-global state.

use std::path::PathBuf;

use crate::types::DbId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub task_id: DbId,
    pub user_id: DbId,
    pub work_dir: PathBuf,
}

impl ExecutionContext {
    pub fn new(task_id: DbId, user_id: DbId, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            task_id,
            user_id,
            work_dir: work_dir.into(),
        }
    }

    /// Tracing span that tags everything logged during the run.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("task", task_id = self.task_id, user_id = self.user_id)
    }

    /// Environment variables handed to out-of-process pipelines.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        vec![
            ("PLANGEN_TASK_ID".to_string(), self.task_id.to_string()),
            ("PLANGEN_USER_ID".to_string(), self.user_id.to_string()),
            (
                "PLANGEN_RUN_DIR".to_string(),
                self.work_dir.display().to_string(),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_vars_carry_identity() {
        let ctx = ExecutionContext::new(12, 34, "/tmp/run/12");
        let vars = ctx.env_vars();
        assert!(vars.contains(&("PLANGEN_TASK_ID".to_string(), "12".to_string())));
        assert!(vars.contains(&("PLANGEN_USER_ID".to_string(), "34".to_string())));
        assert!(vars.contains(&("PLANGEN_RUN_DIR".to_string(), "/tmp/run/12".to_string())));
    }
}
