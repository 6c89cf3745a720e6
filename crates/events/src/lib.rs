//! Outbound notifications about finished tasks.
//!
//! - [`NotificationSink`]: the seam the worker reports outcomes through.
//! - [`LogNotificationSink`]: writes notifications to the log only.
//! - [`delivery::webhook::WebhookNotificationSink`]: POSTs notifications to
//!   an external URL with bounded retry.
//!
//! Delivery is best-effort. Sinks log failures and never return them.

pub mod delivery;

use async_trait::async_trait;
use chrono::Utc;
use plangen_core::types::{DbId, Timestamp};
use serde::Serialize;

pub use delivery::webhook::WebhookNotificationSink;

/// Kind of task notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TaskCompleted,
    TaskFailed,
}

/// The notification envelope sent to external sinks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub owner_id: DbId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: Timestamp,
}

impl Notification {
    pub fn success(owner_id: DbId, artifact_path: &str, label: &str) -> Self {
        Self {
            kind: NotificationKind::TaskCompleted,
            owner_id,
            artifact_path: Some(artifact_path.to_string()),
            label: Some(label.to_string()),
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(owner_id: DbId, message: &str) -> Self {
        Self {
            kind: NotificationKind::TaskFailed,
            owner_id,
            artifact_path: None,
            label: None,
            message: Some(message.to_string()),
            timestamp: Utc::now(),
        }
    }
}

/// Receives task outcomes. Implementations must not fail the caller.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// A task finished with a report available at `artifact_path`.
    async fn notify_success(&self, owner_id: DbId, artifact_path: &str, label: &str);

    /// A task ended without a report.
    async fn notify_failure(&self, owner_id: DbId, message: &str);
}

/// Sink that only logs. Used when no external endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify_success(&self, owner_id: DbId, artifact_path: &str, label: &str) {
        tracing::info!(owner_id, artifact_path, label, "Task completed");
    }

    async fn notify_failure(&self, owner_id: DbId, message: &str) {
        tracing::info!(owner_id, message, "Task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_omits_message() {
        let json = serde_json::to_value(Notification::success(7, "/tasks/3/report", "a shed"))
            .unwrap();
        assert_eq!(json["kind"], "task_completed");
        assert_eq!(json["owner_id"], 7);
        assert_eq!(json["artifact_path"], "/tasks/3/report");
        assert!(json.get("message").is_none());
    }

    #[test]
    fn failure_envelope_omits_artifact() {
        let json = serde_json::to_value(Notification::failure(7, "Stopped by user")).unwrap();
        assert_eq!(json["kind"], "task_failed");
        assert_eq!(json["message"], "Stopped by user");
        assert!(json.get("artifact_path").is_none());
        assert!(json.get("label").is_none());
    }

    #[tokio::test]
    async fn log_sink_accepts_both_kinds() {
        let sink = LogNotificationSink;
        sink.notify_success(1, "/tasks/1/report", "plan").await;
        sink.notify_failure(1, "boom").await;
    }
}
