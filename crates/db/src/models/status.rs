//! Status helper enums mapping to SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data in the
//! corresponding lookup table.

use serde::Serialize;

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Map a database status ID back to the enum.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( x if x == $val => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Task lifecycle state.
    TaskState {
        Pending = 1,
        Processing = 2,
        Completed = 3,
        Failed = 4,
    }
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// States a task may be in immediately before entering `self`.
    ///
    /// Transitions only move forward: pending → processing →
    /// completed | failed. A pending task may also fail directly (e.g. it
    /// was stopped before any worker picked it up).
    pub fn predecessors(self) -> &'static [TaskState] {
        match self {
            Self::Pending => &[],
            Self::Processing => &[Self::Pending],
            Self::Completed => &[Self::Processing],
            Self::Failed => &[Self::Pending, Self::Processing],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_ids_match_seed_data() {
        assert_eq!(TaskState::Pending.id(), 1);
        assert_eq!(TaskState::Processing.id(), 2);
        assert_eq!(TaskState::Completed.id(), 3);
        assert_eq!(TaskState::Failed.id(), 4);
    }

    #[test]
    fn status_into_status_id() {
        let id: StatusId = TaskState::Processing.into();
        assert_eq!(id, 2);
    }

    #[test]
    fn from_id_round_trips_and_rejects_unknown() {
        assert_eq!(TaskState::from_id(3), Some(TaskState::Completed));
        assert_eq!(TaskState::from_id(0), None);
        assert_eq!(TaskState::from_id(9), None);
    }

    #[test]
    fn transitions_never_regress() {
        assert!(TaskState::Pending.predecessors().is_empty());
        assert!(!TaskState::Completed
            .predecessors()
            .contains(&TaskState::Failed));
        assert!(!TaskState::Processing
            .predecessors()
            .contains(&TaskState::Completed));
        assert!(TaskState::Failed.predecessors().contains(&TaskState::Processing));
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Processing.is_terminal());
    }
}
