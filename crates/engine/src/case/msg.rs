//! Requests into a case runner and the snapshot it answers with

use std::collections::BTreeMap;

use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;
use weft_model::{ConditionId, NetSpec, SpecificationId, TaskId};

use crate::error::EngineError;
use crate::state::{CaseState, CaseStatus};
use crate::workitem::{WorkItem, WorkItemStatus};

/// An external event addressed to one case
#[derive(Debug)]
pub enum CaseRequest {
    /// Begin executing an enabled work item
    StartWorkItem { item: Uuid },

    /// The collaborator finished a work item
    CompleteWorkItem { item: Uuid, output: Value },

    /// The collaborator reports a work item failed
    FailWorkItem { item: Uuid, error: String },

    /// Withdraw a single work item
    CancelWorkItem { item: Uuid, reason: String },

    /// Add a dynamic multi-instance sibling
    AddInstance { task: TaskId, data: Value },

    /// Cancel the whole case
    Cancel { reason: String },

    /// Freeze work issuance
    Suspend,

    /// Unfreeze work issuance
    Resume,

    /// Read the current state without mutating
    Snapshot,
}

/// Envelope carried through a case mailbox
pub(crate) struct CaseMsg {
    pub request: CaseRequest,
    pub reply: oneshot::Sender<Result<CaseSnapshot, EngineError>>,
}

/// Point-in-time view of a case, returned by every operation
#[derive(Debug, Clone, PartialEq)]
pub struct CaseSnapshot {
    pub case_id: Uuid,
    pub specification: SpecificationId,
    pub status: CaseStatus,

    /// Conditions currently holding tokens
    pub tokens: BTreeMap<ConditionId, u32>,

    /// Tasks that have fired but not completed
    pub busy_tasks: Vec<TaskId>,

    pub work_items: Vec<WorkItem>,
    pub data: Value,
}

impl CaseSnapshot {
    pub(crate) fn from_state(net: &NetSpec, state: &CaseState) -> Self {
        Self {
            case_id: state.case_id,
            specification: state.specification.clone(),
            status: state.status,
            tokens: state.marking.to_condition_counts(net),
            busy_tasks: state
                .marking
                .busy_tasks()
                .map(|t| net.task(t).id.clone())
                .collect(),
            work_items: state.work_items.values().cloned().collect(),
            data: state.data.clone(),
        }
    }

    /// All work items of a task, in creation order
    pub fn items_for_task(&self, task: &str) -> Vec<&WorkItem> {
        let task = TaskId::new(task);
        self.work_items.iter().filter(|w| w.task == task).collect()
    }

    /// The single live work item of a task, if any
    pub fn live_item_for_task(&self, task: &str) -> Option<&WorkItem> {
        let task = TaskId::new(task);
        self.work_items
            .iter()
            .find(|w| w.task == task && w.status.is_live())
    }

    /// Work items currently in a given status
    pub fn items_in_status(&self, status: WorkItemStatus) -> Vec<&WorkItem> {
        self.work_items
            .iter()
            .filter(|w| w.status == status)
            .collect()
    }

    /// Tokens on a condition, by id
    pub fn tokens_at(&self, condition: &str) -> u32 {
        self.tokens
            .get(&ConditionId::new(condition))
            .copied()
            .unwrap_or(0)
    }
}
