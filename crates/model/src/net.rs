//! Net element types and the arena-addressed net graph
//!
//! A [`NetSpec`] stores conditions and tasks in vectors and wires them with
//! index references ([`CondIdx`], [`TaskIdx`]) rather than pointers, so the
//! graph may be cyclic without any ownership cycles. All adjacency needed by
//! the engine (join inputs, split outputs, cancellation regions) is
//! precomputed at build time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ConditionId, NodeRef, SpecificationId, TaskId};
use crate::predicate::Predicate;

/// How a task produces tokens on its output flows when it completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitType {
    /// Token on every output flow
    And,

    /// Token on every output flow whose predicate is true (at least one must be)
    Or,

    /// Token on exactly the first output flow (declaration order) whose
    /// predicate is true
    Xor,

    /// Single output flow, no routing decision
    None,
}

/// How a task consumes tokens from its input conditions to become enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    /// Enabled iff every input condition holds a token
    And,

    /// Enabled iff at least one input holds a token and no unmarked input
    /// can still receive one (non-local reachability decision)
    Or,

    /// Enabled iff exactly one input condition holds a token
    Xor,

    /// Single input condition, behaves as an AND over one input
    None,
}

/// Instance creation mode for multi-instance tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationMode {
    /// All instances are created when the task is enabled
    Static,

    /// Further instances may be added at runtime while the task is busy,
    /// up to `max`
    Dynamic,
}

/// Multi-instance parameters of a task
///
/// The task spawns `min` work items when enabled (and up to `max` in total
/// under [`CreationMode::Dynamic`]); it is considered complete once
/// `threshold` instances have completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiInstance {
    pub min: u32,
    pub max: u32,
    pub threshold: u32,
    pub creation: CreationMode,
}

impl MultiInstance {
    /// Fixed number of instances, all created up front, all required
    pub fn fixed(count: u32) -> Self {
        Self {
            min: count,
            max: count,
            threshold: count,
            creation: CreationMode::Static,
        }
    }
}

/// Index of a condition within a [`NetSpec`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CondIdx(pub usize);

/// Index of a task within a [`NetSpec`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskIdx(pub usize);

/// A place in the net
#[derive(Debug, Clone)]
pub struct Condition {
    pub id: ConditionId,

    /// True for conditions materialized by the builder between two directly
    /// connected tasks
    pub implicit: bool,

    /// Tasks with a flow into this condition
    pub inputs: Vec<TaskIdx>,

    /// Tasks this condition feeds
    pub outputs: Vec<TaskIdx>,
}

/// An output flow of a task, ordered by declaration
#[derive(Debug, Clone)]
pub struct OutputFlow {
    pub target: CondIdx,

    /// Routing predicate; `None` on an XOR/OR split means the default route
    /// (always true, but for XOR tried in declaration position like any other)
    pub predicate: Option<Predicate>,
}

impl OutputFlow {
    /// Evaluate this flow's predicate against case data
    ///
    /// An absent predicate is the default route and always matches.
    pub fn matches(&self, data: &serde_json::Value) -> bool {
        self.predicate.as_ref().map_or(true, |p| p.eval(data))
    }
}

/// The set of net elements atomically discarded when a task fires
#[derive(Debug, Clone, Default)]
pub struct CancellationSet {
    pub conditions: Vec<CondIdx>,
    pub tasks: Vec<TaskIdx>,
}

impl CancellationSet {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.tasks.is_empty()
    }
}

/// A transition in the net
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub split: SplitType,
    pub join: JoinType,
    pub multi_instance: Option<MultiInstance>,

    /// Input conditions (join side)
    pub inputs: Vec<CondIdx>,

    /// Output flows in declaration order (split side)
    pub outputs: Vec<OutputFlow>,

    /// Elements removed when this task fires
    pub cancellation: CancellationSet,
}

impl Task {
    /// Whether this task is multi-instance
    pub fn is_multi_instance(&self) -> bool {
        self.multi_instance.is_some()
    }

    /// Number of work-item instances to create when the task is enabled
    pub fn initial_instances(&self) -> u32 {
        self.multi_instance.map_or(1, |mi| mi.min)
    }

    /// Number of completed instances required for the task to complete
    pub fn completion_threshold(&self) -> u32 {
        self.multi_instance.map_or(1, |mi| mi.threshold)
    }
}

/// An immutable, validated process specification
///
/// Built via [`NetBuilder`](crate::NetBuilder); every structural invariant
/// from the modeling language holds by the time a `NetSpec` exists. Shared
/// read-only across all cases of the specification.
#[derive(Debug)]
pub struct NetSpec {
    id: SpecificationId,
    conditions: Vec<Condition>,
    tasks: Vec<Task>,
    condition_index: HashMap<ConditionId, CondIdx>,
    task_index: HashMap<TaskId, TaskIdx>,
    input_condition: CondIdx,
    output_condition: CondIdx,
}

impl NetSpec {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        id: SpecificationId,
        conditions: Vec<Condition>,
        tasks: Vec<Task>,
        condition_index: HashMap<ConditionId, CondIdx>,
        task_index: HashMap<TaskId, TaskIdx>,
        input_condition: CondIdx,
        output_condition: CondIdx,
    ) -> Self {
        Self {
            id,
            conditions,
            tasks,
            condition_index,
            task_index,
            input_condition,
            output_condition,
        }
    }

    pub fn id(&self) -> &SpecificationId {
        &self.id
    }

    /// The unique start condition; a case begins with one token here
    pub fn input_condition(&self) -> CondIdx {
        self.input_condition
    }

    /// The unique end condition; a token here completes the case
    pub fn output_condition(&self) -> CondIdx {
        self.output_condition
    }

    pub fn condition(&self, idx: CondIdx) -> &Condition {
        &self.conditions[idx.0]
    }

    pub fn task(&self, idx: TaskIdx) -> &Task {
        &self.tasks[idx.0]
    }

    pub fn condition_count(&self) -> usize {
        self.conditions.len()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Look up a condition index by id
    pub fn find_condition(&self, id: &ConditionId) -> Option<CondIdx> {
        self.condition_index.get(id).copied()
    }

    /// Look up a task index by id
    pub fn find_task(&self, id: &TaskId) -> Option<TaskIdx> {
        self.task_index.get(id).copied()
    }

    /// Iterate all conditions with their indices
    pub fn conditions(&self) -> impl Iterator<Item = (CondIdx, &Condition)> {
        self.conditions
            .iter()
            .enumerate()
            .map(|(i, c)| (CondIdx(i), c))
    }

    /// Iterate all tasks with their indices
    pub fn tasks(&self) -> impl Iterator<Item = (TaskIdx, &Task)> {
        self.tasks.iter().enumerate().map(|(i, t)| (TaskIdx(i), t))
    }

    /// Resolve a [`NodeRef`] to an arena index
    pub fn resolve(&self, node: &NodeRef) -> Option<ResolvedRef> {
        match node {
            NodeRef::Condition(id) => self.find_condition(id).map(ResolvedRef::Condition),
            NodeRef::Task(id) => self.find_task(id).map(ResolvedRef::Task),
        }
    }
}

/// A [`NodeRef`] resolved against a particular net
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedRef {
    Condition(CondIdx),
    Task(TaskIdx),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_instance_fixed() {
        let mi = MultiInstance::fixed(3);
        assert_eq!(mi.min, 3);
        assert_eq!(mi.max, 3);
        assert_eq!(mi.threshold, 3);
        assert_eq!(mi.creation, CreationMode::Static);
    }

    #[test]
    fn test_split_join_serialization() {
        assert_eq!(serde_json::to_string(&SplitType::Xor).unwrap(), "\"xor\"");
        assert_eq!(serde_json::to_string(&JoinType::And).unwrap(), "\"and\"");

        let join: JoinType = serde_json::from_str("\"or\"").unwrap();
        assert_eq!(join, JoinType::Or);
    }

    #[test]
    fn test_output_flow_default_route_matches() {
        let flow = OutputFlow {
            target: CondIdx(0),
            predicate: None,
        };
        assert!(flow.matches(&serde_json::json!({})));
    }
}
