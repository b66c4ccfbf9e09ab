//! Structural validation of nets at build time
//!
//! Every invariant here is checked before a [`NetSpec`](crate::NetSpec) can
//! exist, so the execution engine never has to re-verify net structure at
//! runtime. A violation is fatal to specification registration and never
//! reaches a running case.

use std::collections::VecDeque;

use crate::ids::{ConditionId, TaskId};
use crate::net::{CondIdx, Condition, JoinType, SplitType, Task, TaskIdx};

/// A net violates a structural invariant of the modeling language
#[derive(Debug, Clone, thiserror::Error)]
pub enum StructuralError {
    /// Two net elements share an id (ids are unique across conditions and tasks)
    #[error("duplicate net element id: {0}")]
    DuplicateId(String),

    /// A flow references an element that was never declared
    #[error("flow {from} -> {to} references unknown element {unknown}")]
    UnknownFlowEndpoint {
        from: String,
        to: String,
        unknown: String,
    },

    /// Conditions cannot flow directly into conditions
    #[error("flow {from} -> {to} connects two conditions")]
    ConditionToCondition { from: String, to: String },

    /// No input condition was designated
    #[error("net has no designated input condition")]
    MissingInputCondition,

    /// No output condition was designated
    #[error("net has no designated output condition")]
    MissingOutputCondition,

    /// The input condition must be a source (no incoming flows)
    #[error("input condition {0} has incoming flows")]
    InputConditionHasIncoming(ConditionId),

    /// The output condition must be a sink (no outgoing flows)
    #[error("output condition {0} has outgoing flows")]
    OutputConditionHasOutgoing(ConditionId),

    /// Every task needs at least one input flow
    #[error("task {0} has no input flow")]
    TaskHasNoInput(TaskId),

    /// Every task needs at least one output flow
    #[error("task {0} has no output flow")]
    TaskHasNoOutput(TaskId),

    /// A task with no split/join routing must have exactly one flow on that side
    #[error("task {task} has {count} {side} flows but declares no routing type")]
    RoutingArity {
        task: TaskId,
        side: &'static str,
        count: usize,
    },

    /// An element is not connected to the rest of the net
    #[error("element {0} is not connected to the input condition")]
    Disconnected(String),

    /// Predicates are only meaningful on flows leaving an XOR/OR split task
    #[error("flow {from} -> {to} carries a predicate but {from} is not an XOR/OR split")]
    MisplacedPredicate { from: String, to: String },

    /// An XOR split may declare at most one default (unpredicated) route
    #[error("XOR split task {0} declares more than one default route")]
    AmbiguousDefaultRoute(TaskId),

    /// Multi-instance bounds must satisfy 1 <= min <= threshold <= max
    #[error("task {task} has invalid multi-instance bounds: {reason}")]
    InvalidMultiInstance { task: TaskId, reason: String },

    /// A cancellation set references an element that does not exist
    #[error("task {task} cancellation set references unknown element {unknown}")]
    UnknownCancellationTarget { task: TaskId, unknown: String },

    /// The input/output conditions may never be cancelled
    #[error("task {task} cancellation set includes boundary condition {condition}")]
    CancellationTargetsBoundary {
        task: TaskId,
        condition: ConditionId,
    },
}

/// Validate an assembled arena before it becomes a `NetSpec`
///
/// The builder has already resolved ids to indices and rejected unknown
/// references; this pass checks the graph-level invariants.
pub(crate) fn validate(
    conditions: &[Condition],
    tasks: &[Task],
    input: CondIdx,
    output: CondIdx,
) -> Result<(), StructuralError> {
    check_boundaries(conditions, input, output)?;
    check_task_degrees(tasks)?;
    check_routing(tasks)?;
    check_multi_instance(tasks)?;
    check_cancellation(conditions, tasks, input, output)?;
    check_connectivity(conditions, tasks, input)?;
    Ok(())
}

fn check_boundaries(
    conditions: &[Condition],
    input: CondIdx,
    output: CondIdx,
) -> Result<(), StructuralError> {
    let input_cond = &conditions[input.0];
    if !input_cond.inputs.is_empty() {
        return Err(StructuralError::InputConditionHasIncoming(
            input_cond.id.clone(),
        ));
    }

    let output_cond = &conditions[output.0];
    if !output_cond.outputs.is_empty() {
        return Err(StructuralError::OutputConditionHasOutgoing(
            output_cond.id.clone(),
        ));
    }

    Ok(())
}

fn check_task_degrees(tasks: &[Task]) -> Result<(), StructuralError> {
    for task in tasks {
        if task.inputs.is_empty() {
            return Err(StructuralError::TaskHasNoInput(task.id.clone()));
        }
        if task.outputs.is_empty() {
            return Err(StructuralError::TaskHasNoOutput(task.id.clone()));
        }
    }
    Ok(())
}

fn check_routing(tasks: &[Task]) -> Result<(), StructuralError> {
    for task in tasks {
        if task.join == JoinType::None && task.inputs.len() > 1 {
            return Err(StructuralError::RoutingArity {
                task: task.id.clone(),
                side: "input",
                count: task.inputs.len(),
            });
        }
        if task.split == SplitType::None && task.outputs.len() > 1 {
            return Err(StructuralError::RoutingArity {
                task: task.id.clone(),
                side: "output",
                count: task.outputs.len(),
            });
        }

        if task.split == SplitType::Xor && task.outputs.len() > 1 {
            let defaults = task
                .outputs
                .iter()
                .filter(|f| f.predicate.is_none())
                .count();
            if defaults > 1 {
                return Err(StructuralError::AmbiguousDefaultRoute(task.id.clone()));
            }
        }
    }
    Ok(())
}

fn check_multi_instance(tasks: &[Task]) -> Result<(), StructuralError> {
    for task in tasks {
        let Some(mi) = task.multi_instance else {
            continue;
        };

        let reason = if mi.min == 0 {
            Some("min must be at least 1".to_string())
        } else if mi.min > mi.threshold {
            Some(format!("min {} exceeds threshold {}", mi.min, mi.threshold))
        } else if mi.threshold > mi.max {
            Some(format!("threshold {} exceeds max {}", mi.threshold, mi.max))
        } else {
            None
        };

        if let Some(reason) = reason {
            return Err(StructuralError::InvalidMultiInstance {
                task: task.id.clone(),
                reason,
            });
        }
    }
    Ok(())
}

fn check_cancellation(
    conditions: &[Condition],
    tasks: &[Task],
    input: CondIdx,
    output: CondIdx,
) -> Result<(), StructuralError> {
    for task in tasks {
        for &cond in &task.cancellation.conditions {
            if cond == input || cond == output {
                return Err(StructuralError::CancellationTargetsBoundary {
                    task: task.id.clone(),
                    condition: conditions[cond.0].id.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Undirected reachability from the input condition must cover the whole net
fn check_connectivity(
    conditions: &[Condition],
    tasks: &[Task],
    input: CondIdx,
) -> Result<(), StructuralError> {
    let mut seen_conditions = vec![false; conditions.len()];
    let mut seen_tasks = vec![false; tasks.len()];
    let mut queue: VecDeque<Node> = VecDeque::new();

    seen_conditions[input.0] = true;
    queue.push_back(Node::Condition(input));

    while let Some(node) = queue.pop_front() {
        match node {
            Node::Condition(c) => {
                let cond = &conditions[c.0];
                for &t in cond.inputs.iter().chain(cond.outputs.iter()) {
                    if !seen_tasks[t.0] {
                        seen_tasks[t.0] = true;
                        queue.push_back(Node::Task(t));
                    }
                }
            }
            Node::Task(t) => {
                let task = &tasks[t.0];
                let neighbors = task
                    .inputs
                    .iter()
                    .copied()
                    .chain(task.outputs.iter().map(|f| f.target));
                for c in neighbors {
                    if !seen_conditions[c.0] {
                        seen_conditions[c.0] = true;
                        queue.push_back(Node::Condition(c));
                    }
                }
            }
        }
    }

    for (i, seen) in seen_conditions.iter().enumerate() {
        if !seen {
            return Err(StructuralError::Disconnected(
                conditions[i].id.to_string(),
            ));
        }
    }
    for (i, seen) in seen_tasks.iter().enumerate() {
        if !seen {
            return Err(StructuralError::Disconnected(tasks[i].id.to_string()));
        }
    }

    Ok(())
}

enum Node {
    Condition(CondIdx),
    Task(TaskIdx),
}
