//! Working-directory artifacts and run outcome classification.
//!
//! The pipeline is a black box: its return value says nothing reliable
//! about whether it produced a plan. The files it leaves behind in the
//! working directory do. [`inspect`] looks at those files once and
//! [`ArtifactPresence::outcome`] folds them into a single [`Outcome`] that
//! every downstream step consumes.

use std::io;
use std::path::Path;

use serde::Serialize;

// ---------------------------------------------------------------------------
// File names
// ---------------------------------------------------------------------------

/// The final report produced by a successful run.
pub const REPORT_FILE: &str = "report.html";

/// Marker written by the pipeline after its last stage finished.
pub const PIPELINE_COMPLETE_FILE: &str = "999-pipeline_complete.txt";

/// Marker written by the cancellation monitor before aborting a run.
/// Its content is the [`StopReason`] tag.
pub const STOP_FLAG_FILE: &str = "stop_flag.txt";

/// Rolling log file. Excluded from run snapshots.
pub const LOG_FILE: &str = "log.txt";

/// Read-only usage cost summary (`{"total_cost": <usd>}`).
pub const USAGE_COST_FILE: &str = "activity_overview.json";

// ---------------------------------------------------------------------------
// Stop reason
// ---------------------------------------------------------------------------

/// Why a run was cooperatively aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The owner pressed stop.
    User,
    /// The client stopped polling for longer than the inactivity threshold.
    Inactivity,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Inactivity => "inactivity",
        }
    }

    /// Parse the stop-flag file content. Anything unrecognised counts as a
    /// user stop, since a stop flag only ever exists because someone asked.
    pub fn from_flag_content(content: &str) -> Self {
        match content.trim() {
            "inactivity" => Self::Inactivity,
            _ => Self::User,
        }
    }
}

/// Write the stop-flag marker into `work_dir`.
pub fn write_stop_flag(work_dir: &Path, reason: StopReason) -> io::Result<()> {
    std::fs::write(work_dir.join(STOP_FLAG_FILE), reason.as_str())
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal classification of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    UserStopped,
    InactivityStopped,
    Crashed,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Diagnostic stored on the task and sent to the owner when the run did
    /// not produce a report.
    pub fn failure_message(self) -> Option<&'static str> {
        match self {
            Self::Success => None,
            Self::UserStopped => Some("Stopped by user"),
            Self::InactivityStopped => {
                Some("Stopped because the client was inactive for too long")
            }
            Self::Crashed => Some("Plan generation failed before a report was produced"),
        }
    }
}

/// Which artifacts a finished run left in its working directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArtifactPresence {
    pub has_report: bool,
    pub has_stop_flag: bool,
    pub has_pipeline_complete: bool,
    pub stop_reason: Option<StopReason>,
}

impl ArtifactPresence {
    /// Fold the presence flags into an [`Outcome`].
    ///
    /// A report wins over everything else: if it exists the plan was
    /// produced, even when a stop arrived after the last stage.
    pub fn outcome(&self) -> Outcome {
        if self.has_report {
            return Outcome::Success;
        }
        if self.has_stop_flag {
            return match self.stop_reason.unwrap_or(StopReason::User) {
                StopReason::User => Outcome::UserStopped,
                StopReason::Inactivity => Outcome::InactivityStopped,
            };
        }
        Outcome::Crashed
    }

    /// [`outcome`](Self::outcome) for a run the progress callback aborted
    /// with `abort`. A missing stop-flag marker falls back to the abort's
    /// own reason instead of counting as a crash.
    pub fn outcome_after_abort(&self, abort: Option<StopReason>) -> Outcome {
        match (self.outcome(), abort) {
            (Outcome::Crashed, Some(StopReason::User)) => Outcome::UserStopped,
            (Outcome::Crashed, Some(StopReason::Inactivity)) => Outcome::InactivityStopped,
            (outcome, _) => outcome,
        }
    }
}

/// Inspect `work_dir` for the marker files. A missing directory yields an
/// all-false presence.
pub fn inspect(work_dir: &Path) -> ArtifactPresence {
    let has_report = work_dir.join(REPORT_FILE).is_file();
    let has_pipeline_complete = work_dir.join(PIPELINE_COMPLETE_FILE).is_file();
    let stop_reason = std::fs::read_to_string(work_dir.join(STOP_FLAG_FILE))
        .ok()
        .map(|content| StopReason::from_flag_content(&content));

    ArtifactPresence {
        has_report,
        has_stop_flag: stop_reason.is_some(),
        has_pipeline_complete,
        stop_reason,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
