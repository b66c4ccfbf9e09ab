//! Case state, persisted deltas, and the shared application path
//!
//! Every state change a case runner makes is expressed as a sequence of
//! [`CaseDelta`] values. The same pure function, [`CaseState::apply`], is
//! used on the live path (stage, persist, apply) and during crash-recovery
//! replay, which is what makes replay reproduce the pre-crash state exactly.
//!
//! Deltas carry absolute values ("set condition to N tokens"), never
//! increments, so replaying a log is idempotent by construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use weft_model::{ConditionId, NetSpec, SpecificationId, TaskId};

use crate::error::EngineError;
use crate::marking::Marking;
use crate::workitem::{WorkItem, WorkItemStatus};

/// Status of a case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// Executing normally
    Running,

    /// Work issuance frozen; marking preserved
    Suspended,

    /// A token reached the output condition
    Completed,

    /// Explicitly cancelled
    Cancelled,

    /// Failed (routing dead-end or fault policy decision)
    Failed,
}

impl CaseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One persisted state change
///
/// The append-only log of deltas for a case is its durable representation.
/// Conditions and tasks are addressed by id (not arena index) so a log
/// outlives any particular in-memory arena layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaseDelta {
    /// First delta of every case
    CaseLaunched {
        specification: SpecificationId,
        data: Value,
    },

    /// Absolute token count for one condition
    TokensSet { condition: ConditionId, count: u32 },

    /// A task entered or left the busy set
    TaskBusySet { task: TaskId, busy: bool },

    /// A work item came into existence (always in `Enabled` status)
    WorkItemCreated { item: WorkItem },

    /// A work item changed status
    WorkItemStatusSet {
        item: Uuid,
        status: WorkItemStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// The case data document was replaced
    CaseDataSet { data: Value },

    /// The case changed status
    CaseStatusSet {
        status: CaseStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// The complete in-memory state of one case
///
/// Owned exclusively by that case's runner; nothing else mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseState {
    pub case_id: Uuid,
    pub specification: SpecificationId,
    pub status: CaseStatus,
    pub marking: Marking,
    pub work_items: BTreeMap<Uuid, WorkItem>,
    pub data: Value,
}

impl CaseState {
    /// Fresh state, before the launch delta is applied
    pub fn new(case_id: Uuid, specification: SpecificationId) -> Self {
        Self {
            case_id,
            specification,
            status: CaseStatus::Running,
            marking: Marking::new(),
            work_items: BTreeMap::new(),
            data: Value::Null,
        }
    }

    /// Apply one delta
    ///
    /// This is the only code path that mutates case state; both live
    /// operation and recovery replay run through it.
    pub fn apply(&mut self, net: &NetSpec, delta: &CaseDelta) -> Result<(), EngineError> {
        match delta {
            CaseDelta::CaseLaunched {
                specification,
                data,
            } => {
                self.specification = specification.clone();
                self.status = CaseStatus::Running;
                self.data = data.clone();
            }

            CaseDelta::TokensSet { condition, count } => {
                let idx = net
                    .find_condition(condition)
                    .ok_or_else(|| EngineError::UnknownElement(condition.to_string()))?;
                self.marking.set_tokens(idx, *count);
            }

            CaseDelta::TaskBusySet { task, busy } => {
                let idx = net
                    .find_task(task)
                    .ok_or_else(|| EngineError::UnknownElement(task.to_string()))?;
                self.marking.set_busy(idx, *busy);
            }

            CaseDelta::WorkItemCreated { item } => {
                self.work_items.insert(item.id, item.clone());
            }

            CaseDelta::WorkItemStatusSet { item, status, .. } => {
                let item = self
                    .work_items
                    .get_mut(item)
                    .ok_or(EngineError::WorkItemNotFound(*item))?;
                item.status = *status;
            }

            CaseDelta::CaseDataSet { data } => {
                self.data = data.clone();
            }

            CaseDelta::CaseStatusSet { status, .. } => {
                self.status = *status;
            }
        }

        Ok(())
    }

    /// Rebuild a case from its persisted delta log
    pub fn replay<'a, I>(
        net: &NetSpec,
        case_id: Uuid,
        deltas: I,
    ) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = &'a CaseDelta>,
    {
        let mut state = Self::new(case_id, net.id().clone());
        for delta in deltas {
            state.apply(net, delta)?;
        }
        Ok(state)
    }

    /// Work items belonging to a task, in creation order
    pub fn items_of_task<'a>(&'a self, task: &'a TaskId) -> impl Iterator<Item = &'a WorkItem> {
        self.work_items.values().filter(move |w| &w.task == task)
    }

    /// Non-terminal work items
    pub fn live_items(&self) -> impl Iterator<Item = &WorkItem> {
        self.work_items.values().filter(|w| w.status.is_live())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_model::{NetBuilder, TaskDef};

    fn tiny_net() -> NetSpec {
        NetBuilder::new("tiny")
            .input_condition("start")
            .output_condition("end")
            .task(TaskDef::new("a"))
            .flow("start", "a")
            .flow("a", "end")
            .build()
            .unwrap()
    }

    #[test]
    fn test_delta_serialization() {
        let delta = CaseDelta::TokensSet {
            condition: ConditionId::new("start"),
            count: 1,
        };

        let json = serde_json::to_string(&delta).unwrap();
        assert!(json.contains("\"type\":\"tokens_set\""));

        let parsed: CaseDelta = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, delta);
    }

    #[test]
    fn test_status_set_reason_omitted_when_none() {
        let delta = CaseDelta::CaseStatusSet {
            status: CaseStatus::Completed,
            reason: None,
        };
        let json = serde_json::to_string(&delta).unwrap();
        assert!(!json.contains("reason"));
    }

    #[test]
    fn test_apply_rejects_unknown_condition() {
        let net = tiny_net();
        let mut state = CaseState::new(Uuid::now_v7(), net.id().clone());

        let err = state
            .apply(
                &net,
                &CaseDelta::TokensSet {
                    condition: ConditionId::new("ghost"),
                    count: 1,
                },
            )
            .unwrap_err();

        assert!(matches!(err, EngineError::UnknownElement(_)));
    }

    #[test]
    fn test_replay_reproduces_state() {
        let net = tiny_net();
        let case_id = Uuid::now_v7();
        let item = WorkItem::new(case_id, TaskId::new("a"), 1, 0, Value::Null);

        let deltas = vec![
            CaseDelta::CaseLaunched {
                specification: net.id().clone(),
                data: serde_json::json!({ "k": 1 }),
            },
            CaseDelta::TokensSet {
                condition: ConditionId::new("start"),
                count: 1,
            },
            CaseDelta::WorkItemCreated { item: item.clone() },
            CaseDelta::WorkItemStatusSet {
                item: item.id,
                status: WorkItemStatus::Fired,
                reason: None,
            },
            CaseDelta::TokensSet {
                condition: ConditionId::new("start"),
                count: 0,
            },
            CaseDelta::TaskBusySet {
                task: TaskId::new("a"),
                busy: true,
            },
        ];

        let once = CaseState::replay(&net, case_id, deltas.iter()).unwrap();
        let twice = CaseState::replay(&net, case_id, deltas.iter()).unwrap();

        assert_eq!(once, twice);
        assert_eq!(once.work_items[&item.id].status, WorkItemStatus::Fired);
        assert!(once.marking.is_busy(net.find_task(&TaskId::new("a")).unwrap()));
        assert_eq!(once.marking.total_tokens(), 0);
    }
}
