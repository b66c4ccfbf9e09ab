//! Engine configuration

use crate::enablement::EvalConfig;

/// What the engine does when a work item fails
///
/// The decision belongs to net-level fault-handling configuration in a full
/// deployment; the engine default favors visibility over silent progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// A failed work item fails the whole case
    #[default]
    FailCase,

    /// The failure is recorded and the case continues; a task whose
    /// completion threshold became unreachable is abandoned
    Continue,
}

/// Configuration for the engine coordinator and its case runners
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// OR-join analysis tuning
    pub eval: EvalConfig,

    /// Work-item failure handling
    pub fault_policy: FaultPolicy,

    /// Capacity of each case runner's mailbox
    ///
    /// Senders back-pressure when a runner's queue is full; within one case
    /// events are processed strictly in receipt order regardless.
    pub mailbox_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            eval: EvalConfig::default(),
            fault_policy: FaultPolicy::default(),
            mailbox_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Set the OR-join analysis configuration
    pub fn with_eval(mut self, eval: EvalConfig) -> Self {
        self.eval = eval;
        self
    }

    /// Set the fault policy
    pub fn with_fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }

    /// Set the mailbox capacity
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }
}
