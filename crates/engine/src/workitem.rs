//! Work items and their lifecycle state machine
//!
//! A work item is one instance of a task's execution within a case. Ordinary
//! tasks have a single instance per firing; multi-instance tasks spawn
//! several siblings sharing the task id but carrying distinct instance
//! indices. All mutation goes through the owning case runner; this module
//! only defines the data and the legal transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use weft_model::TaskId;

/// Lifecycle status of a work item
///
/// ```text
/// Enabled ──> Fired ──> Executing ──> Complete
///               │           │    └──> Failed
///               └──> Suspended <─┘
/// ```
///
/// `Cancelled` is reachable from every non-terminal state (cancellation-set
/// application, case cancellation, sibling-threshold completion).
/// `Complete`, `Failed`, and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    /// The task is enabled and this instance may be started
    Enabled,

    /// Input tokens have been consumed on behalf of this instance's task
    Fired,

    /// The external collaborator is executing the work
    Executing,

    /// Finished successfully
    Complete,

    /// Withdrawn before completion
    Cancelled,

    /// The collaborator reported failure
    Failed,

    /// Frozen by case suspension
    Suspended,
}

impl WorkItemStatus {
    /// Whether this status permits no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Failed)
    }

    /// Whether the item still counts as outstanding work
    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }

    /// The transition table for the work-item state machine
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Enabled, Self::Fired) => true,
            (Self::Fired, Self::Executing) => true,
            (Self::Fired | Self::Executing, Self::Suspended) => true,
            (Self::Suspended, Self::Executing) => true,
            // Completion is accepted from Suspended too: the external
            // collaborator may finish work that was in flight when the case
            // was suspended
            (Self::Executing | Self::Suspended, Self::Complete) => true,
            (Self::Executing | Self::Suspended, Self::Failed) => true,
            (from, Self::Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Enabled => "enabled",
            Self::Fired => "fired",
            Self::Executing => "executing",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Suspended => "suspended",
        };
        f.write_str(s)
    }
}

/// One instance of a task's execution within a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique id (UUID v7, time-ordered)
    pub id: Uuid,

    /// The case this item belongs to
    pub case_id: Uuid,

    /// The task this item instantiates
    pub task: TaskId,

    /// Enablement round this instance belongs to
    ///
    /// Incremented each time the task is enabled anew (relevant in cyclic
    /// nets); multi-instance threshold accounting only considers siblings of
    /// the same generation.
    pub generation: u32,

    /// Instance index; 0 for ordinary tasks, 0..n for multi-instance siblings
    pub instance: u32,

    pub status: WorkItemStatus,

    /// Data snapshot handed to the collaborator when the item was created
    pub data: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

impl WorkItem {
    /// Create a new item in `Enabled` status
    ///
    /// The timestamp is taken here (not at apply time) so replaying the
    /// persisted creation delta reproduces the item exactly.
    pub fn new(
        case_id: Uuid,
        task: TaskId,
        generation: u32,
        instance: u32,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            case_id,
            task,
            generation,
            instance,
            status: WorkItemStatus::Enabled,
            data,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use WorkItemStatus::*;

        assert!(Enabled.can_transition_to(Fired));
        assert!(Fired.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Complete));
        assert!(Executing.can_transition_to(Failed));
    }

    #[test]
    fn test_cancellation_reachable_from_all_non_terminal() {
        use WorkItemStatus::*;

        for from in [Enabled, Fired, Executing, Suspended] {
            assert!(from.can_transition_to(Cancelled), "{from} -> Cancelled");
        }
        for from in [Complete, Failed, Cancelled] {
            assert!(!from.can_transition_to(Cancelled), "{from} -> Cancelled");
        }
    }

    #[test]
    fn test_terminal_states_are_dead_ends() {
        use WorkItemStatus::*;

        for from in [Complete, Failed, Cancelled] {
            for to in [Enabled, Fired, Executing, Complete, Failed, Suspended] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_suspension_round_trip() {
        use WorkItemStatus::*;

        assert!(Executing.can_transition_to(Suspended));
        assert!(Fired.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Executing));
        assert!(Suspended.can_transition_to(Complete));
        assert!(!Enabled.can_transition_to(Suspended));
    }

    #[test]
    fn test_cannot_skip_firing() {
        use WorkItemStatus::*;

        assert!(!Enabled.can_transition_to(Executing));
        assert!(!Enabled.can_transition_to(Complete));
    }

    #[test]
    fn test_work_item_serialization() {
        let item = WorkItem::new(
            Uuid::now_v7(),
            TaskId::new("review"),
            1,
            0,
            serde_json::json!({ "k": 1 }),
        );

        let json = serde_json::to_string(&item).unwrap();
        let parsed: WorkItem = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, item);
    }
}
