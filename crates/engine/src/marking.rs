//! Token markings
//!
//! A [`Marking`] is the mutable token state of one case: a multiset over the
//! net's conditions plus the set of busy tasks (fired but not yet complete).
//! Markings address conditions by arena index; the durable representation
//! (condition ids) lives in the delta log, not here.

use std::collections::{BTreeSet, HashMap};

use weft_model::{CondIdx, NetSpec, TaskIdx};

/// Token distribution and busy-task set for one case
///
/// Zero-count entries are never stored, so two markings with the same live
/// tokens compare equal regardless of mutation history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Marking {
    tokens: HashMap<CondIdx, u32>,
    busy: BTreeSet<TaskIdx>,
}

impl Marking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens currently on a condition
    pub fn tokens_at(&self, condition: CondIdx) -> u32 {
        self.tokens.get(&condition).copied().unwrap_or(0)
    }

    /// Whether a condition holds at least one token
    pub fn is_marked(&self, condition: CondIdx) -> bool {
        self.tokens_at(condition) > 0
    }

    /// Set a condition's token count to an absolute value
    pub fn set_tokens(&mut self, condition: CondIdx, count: u32) {
        if count == 0 {
            self.tokens.remove(&condition);
        } else {
            self.tokens.insert(condition, count);
        }
    }

    /// All conditions holding at least one token
    pub fn marked_conditions(&self) -> impl Iterator<Item = (CondIdx, u32)> + '_ {
        self.tokens.iter().map(|(&c, &n)| (c, n))
    }

    /// Total token count across the marking
    pub fn total_tokens(&self) -> u64 {
        self.tokens.values().map(|&n| u64::from(n)).sum()
    }

    pub fn is_busy(&self, task: TaskIdx) -> bool {
        self.busy.contains(&task)
    }

    pub fn set_busy(&mut self, task: TaskIdx, busy: bool) {
        if busy {
            self.busy.insert(task);
        } else {
            self.busy.remove(&task);
        }
    }

    /// Tasks that have fired but not yet completed
    pub fn busy_tasks(&self) -> impl Iterator<Item = TaskIdx> + '_ {
        self.busy.iter().copied()
    }

    /// Render the marking with condition ids, for snapshots and logs
    pub fn to_condition_counts(
        &self,
        net: &NetSpec,
    ) -> std::collections::BTreeMap<weft_model::ConditionId, u32> {
        self.tokens
            .iter()
            .map(|(&c, &n)| (net.condition(c).id.clone(), n))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_counts_are_not_stored() {
        let mut a = Marking::new();
        a.set_tokens(CondIdx(0), 2);
        a.set_tokens(CondIdx(1), 1);
        a.set_tokens(CondIdx(1), 0);

        let mut b = Marking::new();
        b.set_tokens(CondIdx(0), 2);

        assert_eq!(a, b);
        assert!(!a.is_marked(CondIdx(1)));
        assert_eq!(a.total_tokens(), 2);
    }

    #[test]
    fn test_busy_set() {
        let mut m = Marking::new();
        assert!(!m.is_busy(TaskIdx(3)));

        m.set_busy(TaskIdx(3), true);
        assert!(m.is_busy(TaskIdx(3)));
        assert_eq!(m.busy_tasks().collect::<Vec<_>>(), vec![TaskIdx(3)]);

        m.set_busy(TaskIdx(3), false);
        assert!(!m.is_busy(TaskIdx(3)));
    }
}
