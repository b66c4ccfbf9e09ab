//! Enablement evaluation
//!
//! [`evaluate`] is a pure, deterministic function over a net and a marking:
//! no I/O, no clocks, no randomness. The case runner re-invokes it after
//! every marking mutation.
//!
//! AND and XOR joins are local decisions. OR-joins are not: an OR-join must
//! wait for tokens that can still arrive on its unmarked inputs, but must not
//! wait for branches that structurally cannot deliver one any more. That
//! decision is made here with a bounded, monotone reachability fixed-point
//! over the net graph.

use std::collections::BTreeSet;

use tracing::warn;
use weft_model::{CondIdx, JoinType, NetSpec, TaskIdx};

use crate::marking::Marking;

/// Tuning for the OR-join reachability analysis
#[derive(Debug, Clone, Default)]
pub struct EvalConfig {
    /// Iteration bound for the OR-join fixed-point
    ///
    /// `None` uses the net's size (conditions + tasks), which is always
    /// sufficient for the monotone search to converge. A lower explicit
    /// bound trades analysis work for [`UnresolvedJoin`] reports; an
    /// unresolved join is treated as blocked, never as enabled.
    pub max_iterations: Option<usize>,
}

impl EvalConfig {
    pub fn with_max_iterations(mut self, bound: usize) -> Self {
        self.max_iterations = Some(bound);
        self
    }

    fn bound_for(&self, net: &NetSpec) -> usize {
        self.max_iterations
            .unwrap_or(net.condition_count() + net.task_count())
    }
}

/// An OR-join whose reachability analysis did not converge within the bound
///
/// The task stays blocked (safety over liveness). Repeated reports for the
/// same task indicate either an unsound net or a bound configured too low.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedJoin {
    pub task: TaskIdx,
    pub iterations: usize,
}

/// Result of one evaluation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enablement {
    /// Tasks enabled in the evaluated marking, in arena order
    pub enabled: BTreeSet<TaskIdx>,

    /// OR-joins left undecided by the bounded analysis (blocked)
    pub unresolved: Vec<UnresolvedJoin>,
}

impl Enablement {
    pub fn is_enabled(&self, task: TaskIdx) -> bool {
        self.enabled.contains(&task)
    }
}

/// Compute the set of enabled tasks for a marking
///
/// Busy tasks are excluded: a task that has fired does not fire again until
/// its current work items resolve. Join rules:
///
/// - `And` (and `None`): every input condition marked
/// - `Xor`: exactly one input condition marked
/// - `Or`: at least one input marked, and no unmarked input can still
///   receive a token (see [`or_join_can_fire`])
pub fn evaluate(net: &NetSpec, marking: &Marking, config: &EvalConfig) -> Enablement {
    let mut result = Enablement::default();

    for (idx, task) in net.tasks() {
        if marking.is_busy(idx) {
            continue;
        }

        let enabled = match task.join {
            JoinType::And | JoinType::None => {
                task.inputs.iter().all(|&c| marking.is_marked(c))
            }
            JoinType::Xor => {
                task.inputs.iter().filter(|&&c| marking.is_marked(c)).count() == 1
            }
            JoinType::Or => match or_join_can_fire(net, marking, idx, config.bound_for(net)) {
                Ok(enabled) => enabled,
                Err(iterations) => {
                    warn!(
                        task = %task.id,
                        iterations,
                        "OR-join reachability analysis did not converge; task stays blocked"
                    );
                    result.unresolved.push(UnresolvedJoin {
                        task: idx,
                        iterations,
                    });
                    false
                }
            },
        };

        if enabled {
            result.enabled.insert(idx);
        }
    }

    result
}

/// Decide whether an OR-join may fire in the given marking
///
/// Enabled iff (a) at least one input condition is marked, and (b) no
/// currently unmarked input condition is still reachable.
///
/// Reachability is a monotone forward closure: seed with every marked
/// condition plus every output of a busy task (a fired task will complete
/// and produce tokens), then repeatedly let any task other than the join
/// under analysis contribute its outputs once its join could be satisfied
/// from the reachable set. The closure over-approximates (it ignores that a
/// single token cannot travel two branches), which errs on the side of
/// keeping the join blocked: premature firing would lose tokens, waiting
/// cannot.
///
/// Returns `Err(iterations)` if the closure did not stabilize within
/// `bound` rounds.
fn or_join_can_fire(
    net: &NetSpec,
    marking: &Marking,
    join: TaskIdx,
    bound: usize,
) -> Result<bool, usize> {
    let join_task = net.task(join);

    let any_marked = join_task.inputs.iter().any(|&c| marking.is_marked(c));
    if !any_marked {
        return Ok(false);
    }

    let reachable = reachable_conditions(net, marking, join, bound)?;

    let blocked = join_task
        .inputs
        .iter()
        .any(|&c| !marking.is_marked(c) && reachable.contains(&c));

    Ok(!blocked)
}

/// Conditions that could still receive a token, excluding firings of `join`
fn reachable_conditions(
    net: &NetSpec,
    marking: &Marking,
    join: TaskIdx,
    bound: usize,
) -> Result<BTreeSet<CondIdx>, usize> {
    let mut reachable: BTreeSet<CondIdx> =
        marking.marked_conditions().map(|(c, _)| c).collect();

    // Busy tasks have already consumed their inputs; their outputs are
    // guaranteed future arrivals (any of them, for a routing split)
    for t in marking.busy_tasks() {
        reachable.extend(net.task(t).outputs.iter().map(|f| f.target));
    }

    let mut fired: Vec<bool> = vec![false; net.task_count()];

    for round in 0..bound {
        let mut changed = false;

        for (idx, task) in net.tasks() {
            if idx == join || fired[idx.0] {
                continue;
            }

            let satisfiable = match task.join {
                JoinType::And => task.inputs.iter().all(|&c| reachable.contains(&c)),
                // For "could a token arrive" purposes a single reachable
                // input is enough for any disjunctive join
                JoinType::Or | JoinType::Xor | JoinType::None => {
                    task.inputs.iter().any(|&c| reachable.contains(&c))
                }
            };

            if satisfiable {
                fired[idx.0] = true;
                for flow in &task.outputs {
                    changed |= reachable.insert(flow.target);
                }
                // Marking a task as processed is progress even when its
                // outputs were already reachable
                changed = true;
            }
        }

        if !changed {
            return Ok(reachable);
        }

        // Last permitted round must have been the stabilizing one
        if round + 1 == bound {
            break;
        }
    }

    Err(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_model::{JoinType, NetBuilder, Predicate, SplitType, TaskDef, TaskId};

    fn idx(net: &NetSpec, id: &str) -> TaskIdx {
        net.find_task(&TaskId::new(id)).unwrap()
    }

    fn cidx(net: &NetSpec, id: &str) -> CondIdx {
        net.find_condition(&weft_model::ConditionId::new(id)).unwrap()
    }

    /// start -> a -> {c1, c2, c3} -> j(AND) -> end
    fn and_join_net() -> NetSpec {
        NetBuilder::new("and-join")
            .input_condition("start")
            .output_condition("end")
            .condition("c1")
            .condition("c2")
            .condition("c3")
            .task(TaskDef::new("a").split(SplitType::And))
            .task(TaskDef::new("j").join(JoinType::And))
            .flow("start", "a")
            .flow("a", "c1")
            .flow("a", "c2")
            .flow("a", "c3")
            .flow("c1", "j")
            .flow("c2", "j")
            .flow("c3", "j")
            .flow("j", "end")
            .build()
            .unwrap()
    }

    #[test]
    fn test_and_join_requires_every_input() {
        let net = and_join_net();
        let j = idx(&net, "j");
        let config = EvalConfig::default();

        let mut marking = Marking::new();
        marking.set_tokens(cidx(&net, "c1"), 1);
        assert!(!evaluate(&net, &marking, &config).is_enabled(j));

        marking.set_tokens(cidx(&net, "c2"), 1);
        assert!(!evaluate(&net, &marking, &config).is_enabled(j));

        marking.set_tokens(cidx(&net, "c3"), 1);
        assert!(evaluate(&net, &marking, &config).is_enabled(j));
    }

    #[test]
    fn test_busy_task_is_not_enabled() {
        let net = and_join_net();
        let a = idx(&net, "a");
        let config = EvalConfig::default();

        let mut marking = Marking::new();
        marking.set_tokens(cidx(&net, "start"), 1);
        assert!(evaluate(&net, &marking, &config).is_enabled(a));

        marking.set_busy(a, true);
        assert!(!evaluate(&net, &marking, &config).is_enabled(a));
    }

    #[test]
    fn test_xor_join_exactly_one() {
        let net = NetBuilder::new("xor-join")
            .input_condition("start")
            .output_condition("end")
            .condition("c1")
            .condition("c2")
            .task(TaskDef::new("a").split(SplitType::And))
            .task(TaskDef::new("j").join(JoinType::Xor))
            .flow("start", "a")
            .flow("a", "c1")
            .flow("a", "c2")
            .flow("c1", "j")
            .flow("c2", "j")
            .flow("j", "end")
            .build()
            .unwrap();
        let j = idx(&net, "j");
        let config = EvalConfig::default();

        let mut marking = Marking::new();
        assert!(!evaluate(&net, &marking, &config).is_enabled(j));

        marking.set_tokens(cidx(&net, "c1"), 1);
        assert!(evaluate(&net, &marking, &config).is_enabled(j));

        // Two marked inputs violate the XOR exclusivity assumption; the
        // task is not enabled rather than firing nondeterministically
        marking.set_tokens(cidx(&net, "c2"), 1);
        assert!(!evaluate(&net, &marking, &config).is_enabled(j));
    }

    /// start -> split(XOR) routes to b1 or b2; both branches feed j(OR)
    ///
    ///   split -> c_b1 -> b1 -> j_in1 -> j
    ///   split -> c_b2 -> b2 -> j_in2 -> j
    fn or_join_net() -> NetSpec {
        NetBuilder::new("or-join")
            .input_condition("start")
            .output_condition("end")
            .condition("c_b1")
            .condition("c_b2")
            .condition("j_in1")
            .condition("j_in2")
            .task(
                TaskDef::new("split")
                    .split(SplitType::Xor),
            )
            .task(TaskDef::new("b1"))
            .task(TaskDef::new("b2"))
            .task(TaskDef::new("j").join(JoinType::Or))
            .flow("start", "split")
            .flow_if("split", "c_b1", Predicate::equals("/route", "b1"))
            .flow("split", "c_b2")
            .flow("c_b1", "b1")
            .flow("c_b2", "b2")
            .flow("b1", "j_in1")
            .flow("b2", "j_in2")
            .flow("j_in1", "j")
            .flow("j_in2", "j")
            .flow("j", "end")
            .build()
            .unwrap()
    }

    #[test]
    fn test_or_join_safety_fires_without_dead_branch() {
        // The split routed to b1 only: j_in1 marked, nothing live on the
        // b2 branch. The OR-join must fire on j_in1 alone.
        let net = or_join_net();
        let j = idx(&net, "j");
        let config = EvalConfig::default();

        let mut marking = Marking::new();
        marking.set_tokens(cidx(&net, "j_in1"), 1);

        assert!(evaluate(&net, &marking, &config).is_enabled(j));
    }

    #[test]
    fn test_or_join_liveness_waits_for_arriving_branch() {
        // j_in1 marked, but a token sits on c_b2: b2 can still fire and
        // deliver to j_in2, so the OR-join must wait.
        let net = or_join_net();
        let j = idx(&net, "j");
        let config = EvalConfig::default();

        let mut marking = Marking::new();
        marking.set_tokens(cidx(&net, "j_in1"), 1);
        marking.set_tokens(cidx(&net, "c_b2"), 1);

        assert!(!evaluate(&net, &marking, &config).is_enabled(j));

        // Busy b2 (fired, not complete) is just as much a future arrival
        let mut marking = Marking::new();
        marking.set_tokens(cidx(&net, "j_in1"), 1);
        marking.set_busy(idx(&net, "b2"), true);

        assert!(!evaluate(&net, &marking, &config).is_enabled(j));

        // Once both inputs are marked the join fires
        let mut marking = Marking::new();
        marking.set_tokens(cidx(&net, "j_in1"), 1);
        marking.set_tokens(cidx(&net, "j_in2"), 1);

        assert!(evaluate(&net, &marking, &config).is_enabled(j));
    }

    #[test]
    fn test_or_join_unmarked_is_not_enabled() {
        let net = or_join_net();
        let j = idx(&net, "j");

        let marking = Marking::new();
        assert!(!evaluate(&net, &marking, &EvalConfig::default()).is_enabled(j));
    }

    #[test]
    fn test_or_join_ignores_firings_through_itself() {
        // A cyclic net: the only way to mark j's second input again is a
        // path through j itself. Since analysis excludes the join's own
        // firings, j must be enabled on one input.
        //
        //   start -> j(OR, XOR-split) -> end
        //                 \-> c_loop -> back -> j_in2 -> j
        let net = NetBuilder::new("or-cycle")
            .input_condition("start")
            .output_condition("end")
            .condition("c_loop")
            .condition("j_in2")
            .task(TaskDef::new("j").join(JoinType::Or).split(SplitType::Xor))
            .task(TaskDef::new("back"))
            .flow("start", "j")
            .flow_if("j", "c_loop", Predicate::equals("/again", true))
            .flow("j", "end")
            .flow("c_loop", "back")
            .flow("back", "j_in2")
            .flow("j_in2", "j")
            .build()
            .unwrap();
        let j = idx(&net, "j");

        let mut marking = Marking::new();
        marking.set_tokens(cidx(&net, "start"), 1);

        assert!(evaluate(&net, &marking, &EvalConfig::default()).is_enabled(j));
    }

    #[test]
    fn test_or_join_bound_exhaustion_blocks() {
        let net = or_join_net();
        let j = idx(&net, "j");

        let mut marking = Marking::new();
        marking.set_tokens(cidx(&net, "j_in1"), 1);

        // Would be enabled with a reasonable bound; a bound of zero leaves
        // the analysis unresolved and the join blocked
        let strangled = EvalConfig::default().with_max_iterations(0);
        let result = evaluate(&net, &marking, &strangled);

        assert!(!result.is_enabled(j));
        assert_eq!(
            result.unresolved,
            vec![UnresolvedJoin {
                task: j,
                iterations: 0
            }]
        );
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let net = or_join_net();
        let mut marking = Marking::new();
        marking.set_tokens(cidx(&net, "start"), 1);
        marking.set_tokens(cidx(&net, "j_in1"), 1);

        let config = EvalConfig::default();
        let a = evaluate(&net, &marking, &config);
        let b = evaluate(&net, &marking, &config);
        assert_eq!(a, b);
    }
}
