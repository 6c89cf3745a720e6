//! Cooperative cancellation decision.
//!
//! The worker asks [`decide`] on every pipeline progress tick whether the
//! run may continue. A stop request always wins; otherwise the run is
//! aborted once the client has not been seen for longer than the
//! inactivity threshold.

use std::time::Duration;

use crate::artifacts::StopReason;
use crate::types::Timestamp;

/// Default inactivity threshold.
///
/// Calibrated against the frontend's "last seen" polling cadence, which
/// browsers throttle heavily in background tabs.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(80);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationConfig {
    pub inactivity_timeout: Duration,
    pub inactivity_abort_enabled: bool,
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            inactivity_abort_enabled: true,
        }
    }
}

/// The task columns the decision depends on, read fresh on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationFlags {
    pub stop_requested: bool,
    pub last_seen_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Abort(StopReason),
}

/// Decide whether a run may continue at `now`.
pub fn decide(flags: &CancellationFlags, now: Timestamp, config: &CancellationConfig) -> Decision {
    if flags.stop_requested {
        return Decision::Abort(StopReason::User);
    }
    if !config.inactivity_abort_enabled {
        return Decision::Continue;
    }
    match flags.last_seen_at {
        Some(last_seen) if idle_for(last_seen, now) > config.inactivity_timeout => {
            Decision::Abort(StopReason::Inactivity)
        }
        _ => Decision::Continue,
    }
}

/// How long the client has been silent. A `last_seen_at` in the future
/// (clock skew between hosts) counts as zero.
pub fn idle_for(last_seen: Timestamp, now: Timestamp) -> Duration {
    (now - last_seen).to_std().unwrap_or(Duration::ZERO)
}
