//! The per-case runner
//!
//! A `CaseRunner` owns one case's state and is its sole mutator. It consumes
//! a mailbox of [`CaseRequest`]s and processes one event at a time to
//! completion, including the persistence round-trip, before taking the
//! next, which serializes all state transitions for the case without any
//! shared locking.
//!
//! Every operation follows the same discipline:
//!
//! 1. Stage: decide the transition against a working copy of the state,
//!    recording each change as a [`CaseDelta`] (applied through the same
//!    pure function recovery replay uses).
//! 2. Persist: append the whole delta batch; the store makes it durable or
//!    rejects it atomically.
//! 3. Adopt: only after the durable ack does the staged state replace the
//!    live state and the caller get a success reply. On a store failure the
//!    staged copy is dropped and the live state is untouched.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use weft_model::{CondIdx, CreationMode, JoinType, NetSpec, SplitType, TaskId, TaskIdx};

use crate::case::msg::{CaseMsg, CaseRequest, CaseSnapshot};
use crate::config::{EngineConfig, FaultPolicy};
use crate::enablement::evaluate;
use crate::engine::CaseObserver;
use crate::error::EngineError;
use crate::persistence::CaseStore;
use crate::state::{CaseDelta, CaseState, CaseStatus};
use crate::workitem::{WorkItem, WorkItemStatus};

/// Terminal outcome reached while processing one event
enum Outcome {
    Completed,
    Cancelled(String),
    Failed(String),
}

/// A staged, not-yet-persisted case transition
///
/// Mutations are applied to a working copy of the state via the shared
/// [`CaseState::apply`] path while the corresponding deltas accumulate.
/// Dropping a `Txn` discards the transition entirely.
struct Txn {
    net: Arc<NetSpec>,
    config: EngineConfig,
    state: CaseState,
    deltas: Vec<CaseDelta>,
    created: Vec<Uuid>,
    cancelled: Vec<Uuid>,
    outcome: Option<Outcome>,
}

impl Txn {
    fn record(&mut self, delta: CaseDelta) -> Result<(), EngineError> {
        self.state.apply(&self.net, &delta)?;
        self.deltas.push(delta);
        Ok(())
    }

    fn set_tokens(&mut self, condition: CondIdx, count: u32) -> Result<(), EngineError> {
        let condition = self.net.condition(condition).id.clone();
        self.record(CaseDelta::TokensSet { condition, count })
    }

    fn add_token(&mut self, condition: CondIdx) -> Result<(), EngineError> {
        let count = self.state.marking.tokens_at(condition);
        self.set_tokens(condition, count + 1)
    }

    fn take_token(&mut self, condition: CondIdx) -> Result<(), EngineError> {
        let count = self.state.marking.tokens_at(condition);
        if count == 0 {
            return Err(EngineError::TokenAccounting(format!(
                "condition {} has no token to consume",
                self.net.condition(condition).id
            )));
        }
        self.set_tokens(condition, count - 1)
    }

    fn set_busy(&mut self, task: TaskIdx, busy: bool) -> Result<(), EngineError> {
        let task = self.net.task(task).id.clone();
        self.record(CaseDelta::TaskBusySet { task, busy })
    }

    fn set_item_status(
        &mut self,
        item: Uuid,
        status: WorkItemStatus,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        let current = self
            .state
            .work_items
            .get(&item)
            .ok_or(EngineError::WorkItemNotFound(item))?
            .status;

        if !current.can_transition_to(status) {
            return Err(EngineError::InvalidState {
                item,
                from: current,
                to: status,
            });
        }

        self.record(CaseDelta::WorkItemStatusSet {
            item,
            status,
            reason,
        })
    }

    fn set_case_status(
        &mut self,
        status: CaseStatus,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        self.record(CaseDelta::CaseStatusSet { status, reason })
    }

    /// Consume input tokens, mark the task busy, and apply its cancellation
    /// set: the task's firing, staged as one indivisible batch
    fn fire_task(&mut self, task: TaskIdx) -> Result<(), EngineError> {
        let enablement = evaluate(&self.net, &self.state.marking, &self.config.eval);
        if !enablement.is_enabled(task) {
            return Err(EngineError::TaskNotEnabled {
                task: self.net.task(task).id.clone(),
            });
        }

        self.consume_inputs(task)?;
        self.set_busy(task, true)?;
        self.apply_cancellation(task)
    }

    fn consume_inputs(&mut self, task: TaskIdx) -> Result<(), EngineError> {
        let join = self.net.task(task).join;
        let inputs = self.net.task(task).inputs.clone();

        match join {
            JoinType::And | JoinType::None => {
                for c in inputs {
                    self.take_token(c)?;
                }
            }
            // Exactly one input is marked (enablement guarantees it)
            JoinType::Xor => {
                let marked = inputs
                    .into_iter()
                    .find(|&c| self.state.marking.is_marked(c))
                    .ok_or_else(|| {
                        EngineError::TokenAccounting(format!(
                            "XOR-join task {} fired with no marked input",
                            self.net.task(task).id
                        ))
                    })?;
                self.take_token(marked)?;
            }
            // Every marked input contributes one token
            JoinType::Or => {
                for c in inputs {
                    if self.state.marking.is_marked(c) {
                        self.take_token(c)?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Empty every condition and withdraw every live work item named in the
    /// firing task's cancellation set
    fn apply_cancellation(&mut self, task: TaskIdx) -> Result<(), EngineError> {
        let set = self.net.task(task).cancellation.clone();
        if set.is_empty() {
            return Ok(());
        }
        let by = self.net.task(task).id.clone();

        for c in set.conditions {
            if self.state.marking.is_marked(c) {
                self.set_tokens(c, 0)?;
            }
        }

        for victim in set.tasks {
            let victim_id = self.net.task(victim).id.clone();
            let items: Vec<Uuid> = self
                .state
                .items_of_task(&victim_id)
                .filter(|w| w.status.is_live())
                .map(|w| w.id)
                .collect();

            for item in items {
                self.set_item_status(
                    item,
                    WorkItemStatus::Cancelled,
                    Some(format!("cancelled by task {by}")),
                )?;
                self.cancelled.push(item);
            }

            if self.state.marking.is_busy(victim) {
                self.set_busy(victim, false)?;
            }
        }

        info!(task = %by, "applied cancellation set");
        Ok(())
    }

    /// Clear the busy marker, produce output tokens per the task's split
    /// semantics, and propagate enablement
    fn complete_task(&mut self, task: TaskIdx) -> Result<(), EngineError> {
        self.set_busy(task, false)?;

        let split = self.net.task(task).split;
        let flows = self.net.task(task).outputs.clone();
        let data = self.state.data.clone();

        let produced: Vec<CondIdx> = match split {
            SplitType::And | SplitType::None => flows.iter().map(|f| f.target).collect(),
            SplitType::Xor => match flows.iter().find(|f| f.matches(&data)) {
                Some(f) => vec![f.target],
                None => {
                    let task = self.net.task(task).id.clone();
                    return self.fail_case(format!(
                        "no output flow matched for XOR split task {task}"
                    ));
                }
            },
            SplitType::Or => {
                let matched: Vec<CondIdx> = flows
                    .iter()
                    .filter(|f| f.matches(&data))
                    .map(|f| f.target)
                    .collect();
                if matched.is_empty() {
                    let task = self.net.task(task).id.clone();
                    return self.fail_case(format!(
                        "no output flow matched for OR split task {task}"
                    ));
                }
                matched
            }
        };

        for c in produced {
            self.add_token(c)?;
        }

        self.propagate()
    }

    /// React to a marking change: detect case completion, then create work
    /// items for newly enabled tasks (unless issuance is frozen)
    fn propagate(&mut self) -> Result<(), EngineError> {
        if self.state.marking.is_marked(self.net.output_condition()) {
            return self.complete_case();
        }

        if self.state.status != CaseStatus::Running {
            // Suspended: marking changes are recorded but no work is issued
            return Ok(());
        }

        let enablement = evaluate(&self.net, &self.state.marking, &self.config.eval);

        for task in enablement.enabled.iter().copied().collect::<Vec<_>>() {
            let (task_id, instances) = {
                let t = self.net.task(task);
                (t.id.clone(), t.initial_instances())
            };

            if self
                .state
                .items_of_task(&task_id)
                .any(|w| w.status.is_live())
            {
                continue;
            }

            let generation = self
                .state
                .items_of_task(&task_id)
                .map(|w| w.generation)
                .max()
                .unwrap_or(0)
                + 1;
            let data = self.state.data.clone();

            for instance in 0..instances {
                let item = WorkItem::new(
                    self.state.case_id,
                    task_id.clone(),
                    generation,
                    instance,
                    data.clone(),
                );
                self.created.push(item.id);
                self.record(CaseDelta::WorkItemCreated { item })?;
            }
        }

        Ok(())
    }

    fn cancel_live_items(&mut self, reason: &str) -> Result<(), EngineError> {
        let items: Vec<Uuid> = self.state.live_items().map(|w| w.id).collect();
        for item in items {
            self.set_item_status(item, WorkItemStatus::Cancelled, Some(reason.to_string()))?;
            self.cancelled.push(item);
        }
        Ok(())
    }

    fn complete_case(&mut self) -> Result<(), EngineError> {
        self.cancel_live_items("case completed")?;
        self.set_case_status(CaseStatus::Completed, None)?;
        self.outcome = Some(Outcome::Completed);
        Ok(())
    }

    fn fail_case(&mut self, reason: String) -> Result<(), EngineError> {
        warn!(case_id = %self.state.case_id, %reason, "failing case");
        self.cancel_live_items(&reason)?;
        self.set_case_status(CaseStatus::Failed, Some(reason.clone()))?;
        self.outcome = Some(Outcome::Failed(reason));
        Ok(())
    }
}

/// The single owner and mutator of one case's state
pub(crate) struct CaseRunner<S: CaseStore> {
    case_id: Uuid,
    net: Arc<NetSpec>,
    store: Arc<S>,
    observer: Arc<dyn CaseObserver>,
    config: EngineConfig,
    state: CaseState,
    sequence: i64,
}

impl<S: CaseStore> CaseRunner<S> {
    /// Create a case: persist the launch transition (initial token on the
    /// input condition plus initial work items) and return the runner
    #[instrument(skip(net, store, observer, config, data), fields(specification = %net.id()))]
    pub(crate) async fn launch(
        case_id: Uuid,
        net: Arc<NetSpec>,
        store: Arc<S>,
        observer: Arc<dyn CaseObserver>,
        config: EngineConfig,
        data: Value,
    ) -> Result<(Self, CaseSnapshot), EngineError> {
        store.create_case(case_id, net.id()).await?;

        let mut runner = Self {
            case_id,
            state: CaseState::new(case_id, net.id().clone()),
            sequence: 0,
            net,
            store,
            observer,
            config,
        };

        let mut txn = runner.begin();
        txn.record(CaseDelta::CaseLaunched {
            specification: runner.net.id().clone(),
            data,
        })?;
        let input = runner.net.input_condition();
        txn.set_tokens(input, 1)?;
        txn.propagate()?;

        let snapshot = runner.commit(txn).await?;
        info!(%case_id, "launched case");
        Ok((runner, snapshot))
    }

    /// Wrap recovered state in a runner without touching the store
    pub(crate) fn recovered(
        case_id: Uuid,
        net: Arc<NetSpec>,
        store: Arc<S>,
        observer: Arc<dyn CaseObserver>,
        config: EngineConfig,
        state: CaseState,
        sequence: i64,
    ) -> Self {
        Self {
            case_id,
            net,
            store,
            observer,
            config,
            state,
            sequence,
        }
    }

    /// Consume the mailbox until the case reaches a terminal state or the
    /// engine shuts down
    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<CaseMsg>) {
        while let Some(msg) = rx.recv().await {
            let result = self.handle(msg.request).await;
            let terminal = self.state.status.is_terminal();
            let _ = msg.reply.send(result);

            if terminal {
                debug!(
                    case_id = %self.case_id,
                    status = %self.state.status,
                    "case reached terminal state; runner stopping"
                );
                break;
            }
        }
        debug!(case_id = %self.case_id, "case runner stopped");
    }

    #[instrument(skip(self, request), fields(case_id = %self.case_id))]
    async fn handle(&mut self, request: CaseRequest) -> Result<CaseSnapshot, EngineError> {
        match request {
            CaseRequest::StartWorkItem { item } => self.start_work_item(item).await,
            CaseRequest::CompleteWorkItem { item, output } => {
                self.complete_work_item(item, output).await
            }
            CaseRequest::FailWorkItem { item, error } => self.fail_work_item(item, error).await,
            CaseRequest::CancelWorkItem { item, reason } => {
                self.cancel_work_item(item, reason).await
            }
            CaseRequest::AddInstance { task, data } => self.add_instance(task, data).await,
            CaseRequest::Cancel { reason } => self.cancel_case(reason).await,
            CaseRequest::Suspend => self.suspend().await,
            CaseRequest::Resume => self.resume().await,
            CaseRequest::Snapshot => Ok(self.snapshot()),
        }
    }

    async fn start_work_item(&mut self, item_id: Uuid) -> Result<CaseSnapshot, EngineError> {
        self.ensure_active()?;

        let item = self
            .state
            .work_items
            .get(&item_id)
            .cloned()
            .ok_or(EngineError::WorkItemNotFound(item_id))?;

        if item.status != WorkItemStatus::Enabled {
            return Err(EngineError::InvalidState {
                item: item_id,
                from: item.status,
                to: WorkItemStatus::Fired,
            });
        }

        let task = self
            .net
            .find_task(&item.task)
            .ok_or_else(|| EngineError::UnknownElement(item.task.to_string()))?;

        let mut txn = self.begin();

        // The first instance of a task to start fires the task: input
        // tokens are consumed and the cancellation set applied. Sibling
        // instances of an already-busy task just begin executing.
        if !txn.state.marking.is_busy(task) {
            txn.fire_task(task)?;
        }

        txn.set_item_status(item_id, WorkItemStatus::Fired, None)?;
        txn.set_item_status(item_id, WorkItemStatus::Executing, None)?;

        let snapshot = self.commit(txn).await?;
        info!(item = %item_id, task = %item.task, "work item started");
        Ok(snapshot)
    }

    async fn complete_work_item(
        &mut self,
        item_id: Uuid,
        output: Value,
    ) -> Result<CaseSnapshot, EngineError> {
        self.ensure_not_terminal()?;

        let item = self
            .state
            .work_items
            .get(&item_id)
            .cloned()
            .ok_or(EngineError::WorkItemNotFound(item_id))?;

        let task = self
            .net
            .find_task(&item.task)
            .ok_or_else(|| EngineError::UnknownElement(item.task.to_string()))?;

        let mut txn = self.begin();

        if let Some(merged) = merge_output(&txn.state.data, &output) {
            txn.record(CaseDelta::CaseDataSet { data: merged })?;
        }

        txn.set_item_status(item_id, WorkItemStatus::Complete, None)?;

        let threshold = self.net.task(task).completion_threshold();
        let completed = txn
            .state
            .items_of_task(&item.task)
            .filter(|w| w.generation == item.generation && w.status == WorkItemStatus::Complete)
            .count() as u32;

        if completed >= threshold && txn.state.marking.is_busy(task) {
            // Threshold met: remaining siblings are withdrawn and the task
            // produces its output tokens
            let siblings: Vec<Uuid> = txn
                .state
                .items_of_task(&item.task)
                .filter(|w| w.status.is_live())
                .map(|w| w.id)
                .collect();
            for sibling in siblings {
                txn.set_item_status(
                    sibling,
                    WorkItemStatus::Cancelled,
                    Some("completion threshold reached".to_string()),
                )?;
                txn.cancelled.push(sibling);
            }

            txn.complete_task(task)?;
        }

        let snapshot = self.commit(txn).await?;
        info!(item = %item_id, task = %item.task, "work item completed");
        Ok(snapshot)
    }

    async fn fail_work_item(
        &mut self,
        item_id: Uuid,
        error: String,
    ) -> Result<CaseSnapshot, EngineError> {
        self.ensure_not_terminal()?;

        let item = self
            .state
            .work_items
            .get(&item_id)
            .cloned()
            .ok_or(EngineError::WorkItemNotFound(item_id))?;

        let task = self
            .net
            .find_task(&item.task)
            .ok_or_else(|| EngineError::UnknownElement(item.task.to_string()))?;

        let mut txn = self.begin();
        txn.set_item_status(item_id, WorkItemStatus::Failed, Some(error.clone()))?;
        warn!(item = %item_id, task = %item.task, %error, "work item failed");

        match self.config.fault_policy {
            FaultPolicy::FailCase => {
                txn.fail_case(format!("work item for task {} failed: {error}", item.task))?;
            }
            FaultPolicy::Continue => {
                let threshold = self.net.task(task).completion_threshold();
                let completed = txn
                    .state
                    .items_of_task(&item.task)
                    .filter(|w| {
                        w.generation == item.generation && w.status == WorkItemStatus::Complete
                    })
                    .count() as u32;
                let live = txn
                    .state
                    .items_of_task(&item.task)
                    .filter(|w| w.generation == item.generation && w.status.is_live())
                    .count() as u32;

                if txn.state.marking.is_busy(task) && completed + live < threshold {
                    warn!(
                        task = %item.task,
                        completed,
                        live,
                        threshold,
                        "completion threshold unreachable; abandoning task"
                    );
                    let siblings: Vec<Uuid> = txn
                        .state
                        .items_of_task(&item.task)
                        .filter(|w| w.status.is_live())
                        .map(|w| w.id)
                        .collect();
                    for sibling in siblings {
                        txn.set_item_status(
                            sibling,
                            WorkItemStatus::Cancelled,
                            Some("completion threshold unreachable".to_string()),
                        )?;
                        txn.cancelled.push(sibling);
                    }
                    txn.set_busy(task, false)?;
                }
            }
        }

        self.commit(txn).await
    }

    async fn cancel_work_item(
        &mut self,
        item_id: Uuid,
        reason: String,
    ) -> Result<CaseSnapshot, EngineError> {
        self.ensure_not_terminal()?;

        let item = self
            .state
            .work_items
            .get(&item_id)
            .cloned()
            .ok_or(EngineError::WorkItemNotFound(item_id))?;

        let task = self
            .net
            .find_task(&item.task)
            .ok_or_else(|| EngineError::UnknownElement(item.task.to_string()))?;

        let mut txn = self.begin();
        txn.set_item_status(item_id, WorkItemStatus::Cancelled, Some(reason.clone()))?;
        txn.cancelled.push(item_id);

        // A deliberate withdrawal does not fail the case, but a busy task
        // whose completion threshold became unreachable is abandoned
        let threshold = self.net.task(task).completion_threshold();
        let completed = txn
            .state
            .items_of_task(&item.task)
            .filter(|w| w.generation == item.generation && w.status == WorkItemStatus::Complete)
            .count() as u32;
        let live = txn
            .state
            .items_of_task(&item.task)
            .filter(|w| w.generation == item.generation && w.status.is_live())
            .count() as u32;

        if txn.state.marking.is_busy(task) && completed + live < threshold {
            warn!(
                task = %item.task,
                "completion threshold unreachable after cancellation; abandoning task"
            );
            let siblings: Vec<Uuid> = txn
                .state
                .items_of_task(&item.task)
                .filter(|w| w.status.is_live())
                .map(|w| w.id)
                .collect();
            for sibling in siblings {
                txn.set_item_status(
                    sibling,
                    WorkItemStatus::Cancelled,
                    Some("completion threshold unreachable".to_string()),
                )?;
                txn.cancelled.push(sibling);
            }
            txn.set_busy(task, false)?;
        }

        let snapshot = self.commit(txn).await?;
        info!(item = %item_id, task = %item.task, %reason, "work item cancelled");
        Ok(snapshot)
    }

    async fn add_instance(
        &mut self,
        task_id: TaskId,
        data: Value,
    ) -> Result<CaseSnapshot, EngineError> {
        self.ensure_active()?;

        let task = self
            .net
            .find_task(&task_id)
            .ok_or_else(|| EngineError::UnknownElement(task_id.to_string()))?;

        let reject = |reason: &str| EngineError::InstanceCreation {
            task: task_id.clone(),
            reason: reason.to_string(),
        };

        let Some(mi) = self.net.task(task).multi_instance else {
            return Err(reject("task is not multi-instance"));
        };
        if mi.creation != CreationMode::Dynamic {
            return Err(reject("creation mode does not allow runtime instances"));
        }
        if !self.state.marking.is_busy(task) {
            return Err(reject("task has not fired"));
        }

        let generation = self
            .state
            .items_of_task(&task_id)
            .map(|w| w.generation)
            .max()
            .unwrap_or(0);
        let existing = self
            .state
            .items_of_task(&task_id)
            .filter(|w| w.generation == generation)
            .count() as u32;
        if existing >= mi.max {
            return Err(reject(&format!("instance limit {} reached", mi.max)));
        }
        let instance = self
            .state
            .items_of_task(&task_id)
            .filter(|w| w.generation == generation)
            .map(|w| w.instance)
            .max()
            .map_or(0, |i| i + 1);

        let mut txn = self.begin();
        let item = WorkItem::new(self.case_id, task_id.clone(), generation, instance, data);
        let item_id = item.id;
        txn.created.push(item_id);
        txn.record(CaseDelta::WorkItemCreated { item })?;

        let snapshot = self.commit(txn).await?;
        info!(task = %task_id, item = %item_id, instance, "added dynamic instance");
        Ok(snapshot)
    }

    async fn cancel_case(&mut self, reason: String) -> Result<CaseSnapshot, EngineError> {
        self.ensure_not_terminal()?;

        let mut txn = self.begin();
        txn.cancel_live_items(&reason)?;

        // Unconditionally discard the marking
        let marked: Vec<CondIdx> = txn
            .state
            .marking
            .marked_conditions()
            .map(|(c, _)| c)
            .collect();
        for c in marked {
            txn.set_tokens(c, 0)?;
        }
        let busy: Vec<TaskIdx> = txn.state.marking.busy_tasks().collect();
        for t in busy {
            txn.set_busy(t, false)?;
        }

        txn.set_case_status(CaseStatus::Cancelled, Some(reason.clone()))?;
        txn.outcome = Some(Outcome::Cancelled(reason.clone()));

        let snapshot = self.commit(txn).await?;
        info!(%reason, "case cancelled");
        Ok(snapshot)
    }

    async fn suspend(&mut self) -> Result<CaseSnapshot, EngineError> {
        match self.state.status {
            CaseStatus::Running => {}
            CaseStatus::Suspended => return Ok(self.snapshot()),
            status => {
                return Err(EngineError::CaseTerminated {
                    case: self.case_id,
                    status,
                })
            }
        }

        let mut txn = self.begin();
        txn.set_case_status(CaseStatus::Suspended, None)?;

        let in_flight: Vec<Uuid> = txn
            .state
            .work_items
            .values()
            .filter(|w| {
                matches!(
                    w.status,
                    WorkItemStatus::Fired | WorkItemStatus::Executing
                )
            })
            .map(|w| w.id)
            .collect();
        for item in in_flight {
            txn.set_item_status(item, WorkItemStatus::Suspended, None)?;
        }

        let snapshot = self.commit(txn).await?;
        info!("case suspended");
        Ok(snapshot)
    }

    async fn resume(&mut self) -> Result<CaseSnapshot, EngineError> {
        match self.state.status {
            CaseStatus::Suspended => {}
            CaseStatus::Running => return Ok(self.snapshot()),
            status => {
                return Err(EngineError::CaseTerminated {
                    case: self.case_id,
                    status,
                })
            }
        }

        let mut txn = self.begin();
        txn.set_case_status(CaseStatus::Running, None)?;

        let suspended: Vec<Uuid> = txn
            .state
            .work_items
            .values()
            .filter(|w| w.status == WorkItemStatus::Suspended)
            .map(|w| w.id)
            .collect();
        for item in suspended {
            txn.set_item_status(item, WorkItemStatus::Executing, None)?;
        }

        // Issue any work that was deferred while suspended
        txn.propagate()?;

        let snapshot = self.commit(txn).await?;
        info!("case resumed");
        Ok(snapshot)
    }

    // =========================================================================
    // Internal Methods
    // =========================================================================

    fn begin(&self) -> Txn {
        Txn {
            net: self.net.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
            deltas: Vec::new(),
            created: Vec::new(),
            cancelled: Vec::new(),
            outcome: None,
        }
    }

    /// Persist a staged transition and adopt it
    ///
    /// The append either records the whole batch or nothing; on failure the
    /// staged state is dropped and the error propagates to the caller.
    async fn commit(&mut self, txn: Txn) -> Result<CaseSnapshot, EngineError> {
        let Txn {
            state,
            deltas,
            created,
            cancelled,
            outcome,
            ..
        } = txn;

        if deltas.is_empty() {
            return Ok(self.snapshot());
        }

        let new_sequence = self.store.append(self.case_id, self.sequence, &deltas).await?;

        let status_changed = state.status != self.state.status;
        self.state = state;
        self.sequence = new_sequence;

        if status_changed {
            // The delta log is authoritative; the status column is a
            // queryable convenience
            if let Err(error) = self
                .store
                .set_case_status(self.case_id, self.state.status)
                .await
            {
                warn!(%error, "failed to update case status column");
            }
        }

        self.notify(&created, &cancelled, outcome.as_ref()).await;

        Ok(self.snapshot())
    }

    async fn notify(&self, created: &[Uuid], cancelled: &[Uuid], outcome: Option<&Outcome>) {
        if !created.is_empty() {
            let items: Vec<WorkItem> = created
                .iter()
                .filter_map(|id| self.state.work_items.get(id).cloned())
                .collect();
            self.observer.work_items_created(self.case_id, &items).await;
        }

        if !cancelled.is_empty() {
            let items: Vec<WorkItem> = cancelled
                .iter()
                .filter_map(|id| self.state.work_items.get(id).cloned())
                .collect();
            self.observer
                .work_items_cancelled(self.case_id, &items)
                .await;
        }

        match outcome {
            Some(Outcome::Completed) => {
                self.observer
                    .case_completed(self.case_id, &self.state.data)
                    .await;
            }
            Some(Outcome::Cancelled(reason)) => {
                self.observer.case_cancelled(self.case_id, reason).await;
            }
            Some(Outcome::Failed(reason)) => {
                self.observer.case_failed(self.case_id, reason).await;
            }
            None => {}
        }
    }

    fn snapshot(&self) -> CaseSnapshot {
        CaseSnapshot::from_state(&self.net, &self.state)
    }

    fn ensure_active(&self) -> Result<(), EngineError> {
        match self.state.status {
            CaseStatus::Running => Ok(()),
            CaseStatus::Suspended => Err(EngineError::CaseSuspended(self.case_id)),
            status => Err(EngineError::CaseTerminated {
                case: self.case_id,
                status,
            }),
        }
    }

    fn ensure_not_terminal(&self) -> Result<(), EngineError> {
        if self.state.status.is_terminal() {
            return Err(EngineError::CaseTerminated {
                case: self.case_id,
                status: self.state.status,
            });
        }
        Ok(())
    }
}

/// Merge a work item's output document into the case data
///
/// Objects merge key-by-key at the top level; `null` leaves the case data
/// untouched; any other value lands under a `result` key. Returns `None`
/// when nothing changes.
fn merge_output(data: &Value, output: &Value) -> Option<Value> {
    if output.is_null() {
        return None;
    }

    let mut base = match data {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };

    match output {
        Value::Object(map) => {
            for (k, v) in map {
                base.insert(k.clone(), v.clone());
            }
        }
        other => {
            base.insert("result".to_string(), other.clone());
        }
    }

    Some(Value::Object(base))
}
