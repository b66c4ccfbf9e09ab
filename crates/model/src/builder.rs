//! Fluent construction of validated net specifications
//!
//! [`NetBuilder`] collects declarations in any order, resolves names to arena
//! indices, materializes implicit conditions for task-to-task flows, runs the
//! structural validation pass, and assembles the immutable [`NetSpec`].

use std::collections::HashMap;

use crate::ids::{ConditionId, SpecificationId, TaskId};
use crate::net::{
    CancellationSet, CondIdx, Condition, CreationMode, JoinType, MultiInstance, NetSpec,
    OutputFlow, SplitType, Task, TaskIdx,
};
use crate::predicate::Predicate;
use crate::validate::{validate, StructuralError};

/// Declaration of a single task
///
/// # Example
///
/// ```
/// use weft_model::{TaskDef, SplitType, JoinType, MultiInstance};
///
/// let task = TaskDef::new("review")
///     .join(JoinType::And)
///     .split(SplitType::Xor)
///     .multi_instance(MultiInstance {
///         min: 2,
///         max: 5,
///         threshold: 3,
///         creation: weft_model::CreationMode::Dynamic,
///     });
/// ```
#[derive(Debug, Clone)]
pub struct TaskDef {
    id: String,
    split: SplitType,
    join: JoinType,
    multi_instance: Option<MultiInstance>,
    cancels: Vec<String>,
}

impl TaskDef {
    /// Declare a task with no routing (single input, single output)
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            split: SplitType::None,
            join: JoinType::None,
            multi_instance: None,
            cancels: Vec::new(),
        }
    }

    /// Set the split type
    pub fn split(mut self, split: SplitType) -> Self {
        self.split = split;
        self
    }

    /// Set the join type
    pub fn join(mut self, join: JoinType) -> Self {
        self.join = join;
        self
    }

    /// Make this a multi-instance task
    pub fn multi_instance(mut self, mi: MultiInstance) -> Self {
        self.multi_instance = Some(mi);
        self
    }

    /// Spawn `count` instances, all required for completion
    pub fn instances(self, count: u32) -> Self {
        self.multi_instance(MultiInstance::fixed(count))
    }

    /// Allow instances to be added at runtime, up to `max`
    pub fn dynamic_instances(mut self, min: u32, max: u32, threshold: u32) -> Self {
        self.multi_instance = Some(MultiInstance {
            min,
            max,
            threshold,
            creation: CreationMode::Dynamic,
        });
        self
    }

    /// Add net elements (conditions or tasks, by id) to this task's
    /// cancellation set
    pub fn cancels<I, S>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cancels.extend(elements.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Clone)]
struct RawFlow {
    from: String,
    to: String,
    predicate: Option<Predicate>,
}

/// Builder for [`NetSpec`]
///
/// Names share a single namespace: a condition and a task may not use the
/// same id. Flows may connect tasks directly; the builder inserts an implicit
/// condition between them, as the modeling language prescribes.
#[derive(Debug)]
pub struct NetBuilder {
    id: SpecificationId,
    conditions: Vec<String>,
    input: Option<String>,
    output: Option<String>,
    tasks: Vec<TaskDef>,
    flows: Vec<RawFlow>,
}

impl NetBuilder {
    pub fn new(id: impl Into<SpecificationId>) -> Self {
        Self {
            id: id.into(),
            conditions: Vec::new(),
            input: None,
            output: None,
            tasks: Vec::new(),
            flows: Vec::new(),
        }
    }

    /// Declare an ordinary condition
    pub fn condition(mut self, id: impl Into<String>) -> Self {
        self.conditions.push(id.into());
        self
    }

    /// Declare the net's unique input condition
    pub fn input_condition(mut self, id: impl Into<String>) -> Self {
        self.input = Some(id.into());
        self
    }

    /// Declare the net's unique output condition
    pub fn output_condition(mut self, id: impl Into<String>) -> Self {
        self.output = Some(id.into());
        self
    }

    /// Declare a task
    pub fn task(mut self, def: TaskDef) -> Self {
        self.tasks.push(def);
        self
    }

    /// Declare a flow between two elements
    ///
    /// On an XOR/OR split source this is the default route.
    pub fn flow(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.flows.push(RawFlow {
            from: from.into(),
            to: to.into(),
            predicate: None,
        });
        self
    }

    /// Declare a predicated flow leaving an XOR/OR split task
    pub fn flow_if(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        predicate: Predicate,
    ) -> Self {
        self.flows.push(RawFlow {
            from: from.into(),
            to: to.into(),
            predicate: Some(predicate),
        });
        self
    }

    /// Resolve, validate, and assemble the net
    pub fn build(self) -> Result<NetSpec, StructuralError> {
        let input_id = self.input.ok_or(StructuralError::MissingInputCondition)?;
        let output_id = self
            .output
            .clone()
            .ok_or(StructuralError::MissingOutputCondition)?;

        let mut arena = Arena::default();

        arena.add_condition(&input_id, false)?;
        arena.add_condition(&output_id, false)?;
        for id in &self.conditions {
            arena.add_condition(id, false)?;
        }
        for def in &self.tasks {
            arena.add_task(def)?;
        }

        for flow in &self.flows {
            arena.wire(flow)?;
        }

        arena.resolve_cancellation_sets(&self.tasks)?;

        let input = arena.condition_index[&ConditionId::new(input_id)];
        let output = arena.condition_index[&ConditionId::new(output_id)];

        validate(&arena.conditions, &arena.tasks, input, output)?;

        Ok(NetSpec::assemble(
            self.id,
            arena.conditions,
            arena.tasks,
            arena.condition_index,
            arena.task_index,
            input,
            output,
        ))
    }
}

#[derive(Default)]
struct Arena {
    conditions: Vec<Condition>,
    tasks: Vec<Task>,
    condition_index: HashMap<ConditionId, CondIdx>,
    task_index: HashMap<TaskId, TaskIdx>,
}

impl Arena {
    fn add_condition(&mut self, id: &str, implicit: bool) -> Result<CondIdx, StructuralError> {
        let cid = ConditionId::new(id);
        if self.condition_index.contains_key(&cid) || self.task_index.contains_key(&TaskId::new(id))
        {
            return Err(StructuralError::DuplicateId(id.to_string()));
        }

        let idx = CondIdx(self.conditions.len());
        self.conditions.push(Condition {
            id: cid.clone(),
            implicit,
            inputs: Vec::new(),
            outputs: Vec::new(),
        });
        self.condition_index.insert(cid, idx);
        Ok(idx)
    }

    fn add_task(&mut self, def: &TaskDef) -> Result<TaskIdx, StructuralError> {
        let tid = TaskId::new(&def.id);
        if self.task_index.contains_key(&tid)
            || self
                .condition_index
                .contains_key(&ConditionId::new(&def.id))
        {
            return Err(StructuralError::DuplicateId(def.id.clone()));
        }

        let idx = TaskIdx(self.tasks.len());
        self.tasks.push(Task {
            id: tid.clone(),
            split: def.split,
            join: def.join,
            multi_instance: def.multi_instance,
            inputs: Vec::new(),
            outputs: Vec::new(),
            cancellation: CancellationSet::default(),
        });
        self.task_index.insert(tid, idx);
        Ok(idx)
    }

    fn lookup(&self, name: &str) -> Option<Endpoint> {
        if let Some(&c) = self.condition_index.get(&ConditionId::new(name)) {
            return Some(Endpoint::Condition(c));
        }
        if let Some(&t) = self.task_index.get(&TaskId::new(name)) {
            return Some(Endpoint::Task(t));
        }
        None
    }

    fn wire(&mut self, flow: &RawFlow) -> Result<(), StructuralError> {
        let unknown_endpoint = |unknown: &str| StructuralError::UnknownFlowEndpoint {
            from: flow.from.clone(),
            to: flow.to.clone(),
            unknown: unknown.to_string(),
        };

        let from = self
            .lookup(&flow.from)
            .ok_or_else(|| unknown_endpoint(&flow.from))?;
        let to = self
            .lookup(&flow.to)
            .ok_or_else(|| unknown_endpoint(&flow.to))?;

        match (from, to) {
            (Endpoint::Condition(c), Endpoint::Task(t)) => {
                if flow.predicate.is_some() {
                    return Err(StructuralError::MisplacedPredicate {
                        from: flow.from.clone(),
                        to: flow.to.clone(),
                    });
                }
                self.conditions[c.0].outputs.push(t);
                self.tasks[t.0].inputs.push(c);
            }
            (Endpoint::Task(t), Endpoint::Condition(c)) => {
                self.add_task_output(t, c, flow)?;
            }
            (Endpoint::Task(a), Endpoint::Task(b)) => {
                // Task-to-task flows run through an implicit condition
                let name = format!("c{{{}_{}}}", flow.from, flow.to);
                let c = match self.lookup(&name) {
                    Some(Endpoint::Condition(c)) => c,
                    _ => self.add_condition(&name, true)?,
                };
                self.add_task_output(a, c, flow)?;
                self.conditions[c.0].outputs.push(b);
                self.tasks[b.0].inputs.push(c);
            }
            (Endpoint::Condition(_), Endpoint::Condition(_)) => {
                return Err(StructuralError::ConditionToCondition {
                    from: flow.from.clone(),
                    to: flow.to.clone(),
                });
            }
        }

        Ok(())
    }

    fn add_task_output(
        &mut self,
        t: TaskIdx,
        c: CondIdx,
        flow: &RawFlow,
    ) -> Result<(), StructuralError> {
        let task = &mut self.tasks[t.0];
        if flow.predicate.is_some() && !matches!(task.split, SplitType::Xor | SplitType::Or) {
            return Err(StructuralError::MisplacedPredicate {
                from: flow.from.clone(),
                to: flow.to.clone(),
            });
        }

        task.outputs.push(OutputFlow {
            target: c,
            predicate: flow.predicate.clone(),
        });
        self.conditions[c.0].inputs.push(t);
        Ok(())
    }

    fn resolve_cancellation_sets(&mut self, defs: &[TaskDef]) -> Result<(), StructuralError> {
        for def in defs {
            let tid = TaskId::new(&def.id);
            let idx = self.task_index[&tid];

            let mut set = CancellationSet::default();
            for name in &def.cancels {
                match self.lookup(name) {
                    Some(Endpoint::Condition(c)) => set.conditions.push(c),
                    Some(Endpoint::Task(t)) => set.tasks.push(t),
                    None => {
                        return Err(StructuralError::UnknownCancellationTarget {
                            task: tid,
                            unknown: name.clone(),
                        })
                    }
                }
            }
            self.tasks[idx.0].cancellation = set;
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Endpoint {
    Condition(CondIdx),
    Task(TaskIdx),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_net() -> NetBuilder {
        NetBuilder::new("linear")
            .input_condition("start")
            .output_condition("end")
            .task(TaskDef::new("a"))
            .task(TaskDef::new("b"))
            .flow("start", "a")
            .flow("a", "b")
            .flow("b", "end")
    }

    #[test]
    fn test_builds_linear_net_with_implicit_condition() {
        let net = linear_net().build().unwrap();

        assert_eq!(net.task_count(), 2);
        // start, end, plus the implicit condition between a and b
        assert_eq!(net.condition_count(), 3);

        let implicit = net
            .conditions()
            .find(|(_, c)| c.implicit)
            .map(|(_, c)| c.id.to_string())
            .unwrap();
        assert_eq!(implicit, "c{a_b}");
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = NetBuilder::new("dup")
            .input_condition("start")
            .output_condition("end")
            .task(TaskDef::new("start"))
            .flow("start", "start")
            .build()
            .unwrap_err();

        assert!(matches!(err, StructuralError::DuplicateId(id) if id == "start"));
    }

    #[test]
    fn test_unknown_flow_endpoint_rejected() {
        let err = NetBuilder::new("bad")
            .input_condition("start")
            .output_condition("end")
            .task(TaskDef::new("a"))
            .flow("start", "a")
            .flow("a", "end")
            .flow("a", "ghost")
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            StructuralError::UnknownFlowEndpoint { unknown, .. } if unknown == "ghost"
        ));
    }

    #[test]
    fn test_condition_to_condition_rejected() {
        let err = NetBuilder::new("bad")
            .input_condition("start")
            .output_condition("end")
            .flow("start", "end")
            .build()
            .unwrap_err();

        assert!(matches!(err, StructuralError::ConditionToCondition { .. }));
    }

    #[test]
    fn test_task_without_output_rejected() {
        let err = NetBuilder::new("bad")
            .input_condition("start")
            .output_condition("end")
            .task(TaskDef::new("a"))
            .task(TaskDef::new("b"))
            .flow("start", "a")
            .flow("a", "end")
            .flow("start", "b")
            .build()
            .unwrap_err();

        assert!(matches!(err, StructuralError::TaskHasNoOutput(id) if id.as_str() == "b"));
    }

    #[test]
    fn test_predicate_on_plain_split_rejected() {
        let err = NetBuilder::new("bad")
            .input_condition("start")
            .output_condition("end")
            .task(TaskDef::new("a"))
            .flow("start", "a")
            .flow_if("a", "end", Predicate::Always)
            .build()
            .unwrap_err();

        assert!(matches!(err, StructuralError::MisplacedPredicate { .. }));
    }

    #[test]
    fn test_plain_split_with_two_outputs_rejected() {
        let err = NetBuilder::new("bad")
            .input_condition("start")
            .output_condition("end")
            .condition("c1")
            .task(TaskDef::new("a"))
            .task(TaskDef::new("b").join(JoinType::And))
            .flow("start", "a")
            .flow("a", "c1")
            .flow("a", "b")
            .flow("c1", "b")
            .flow("b", "end")
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            StructuralError::RoutingArity { side: "output", .. }
        ));
    }

    #[test]
    fn test_invalid_multi_instance_bounds_rejected() {
        let err = NetBuilder::new("bad")
            .input_condition("start")
            .output_condition("end")
            .task(TaskDef::new("a").multi_instance(MultiInstance {
                min: 4,
                max: 5,
                threshold: 3,
                creation: CreationMode::Static,
            }))
            .flow("start", "a")
            .flow("a", "end")
            .build()
            .unwrap_err();

        assert!(matches!(err, StructuralError::InvalidMultiInstance { .. }));
    }

    #[test]
    fn test_cancellation_of_boundary_condition_rejected() {
        let err = NetBuilder::new("bad")
            .input_condition("start")
            .output_condition("end")
            .task(TaskDef::new("a").cancels(["end"]))
            .flow("start", "a")
            .flow("a", "end")
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            StructuralError::CancellationTargetsBoundary { .. }
        ));
    }

    #[test]
    fn test_disconnected_element_rejected() {
        let err = NetBuilder::new("bad")
            .input_condition("start")
            .output_condition("end")
            .condition("island")
            .task(TaskDef::new("a"))
            .flow("start", "a")
            .flow("a", "end")
            .build()
            .unwrap_err();

        assert!(matches!(err, StructuralError::Disconnected(id) if id == "island"));
    }

    #[test]
    fn test_cancellation_set_resolution() {
        let net = NetBuilder::new("cancel")
            .input_condition("start")
            .output_condition("end")
            .condition("c1")
            .task(TaskDef::new("a").split(SplitType::And))
            .task(TaskDef::new("b"))
            .task(TaskDef::new("killer").cancels(["c1", "b"]))
            .task(TaskDef::new("join").join(JoinType::Xor))
            .flow("start", "a")
            .flow("a", "c1")
            .flow("a", "killer")
            .flow("c1", "b")
            .flow("b", "join")
            .flow("killer", "join")
            .flow("join", "end")
            .build()
            .unwrap();

        let killer = net.find_task(&TaskId::new("killer")).unwrap();
        let set = &net.task(killer).cancellation;
        assert_eq!(set.conditions.len(), 1);
        assert_eq!(set.tasks.len(), 1);
        assert!(!set.is_empty());
    }
}
