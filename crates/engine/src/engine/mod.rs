//! Engine coordinator
//!
//! The [`Engine`] is the top-level entry point: it owns the specification
//! registry, maps case ids to their runners, and routes every external event
//! (launch, work-item transitions, cancellation, suspension) to the right
//! case mailbox. Cases are independent: each runs on its own task with its
//! own serialized event stream; there is no cross-case ordering.
//!
//! The engine is an explicitly constructed value with a defined lifecycle
//! (`new` … `shutdown`); nothing here is global.

mod observer;

pub use observer::{CaseObserver, NoopObserver};

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use weft_model::{NetSpec, SpecificationId, TaskId};

use crate::case::runner::CaseRunner;
use crate::case::{CaseMsg, CaseRequest, CaseSnapshot};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::persistence::{CaseFilter, CaseStore};
use crate::state::{CaseDelta, CaseState};

/// Mailbox and lifetime of one active case runner
struct CaseHandle {
    tx: mpsc::Sender<CaseMsg>,
    join: JoinHandle<()>,
}

/// The workflow engine: specification registry plus per-case runners
///
/// # Example
///
/// ```ignore
/// use weft_engine::{Engine, InMemoryCaseStore};
///
/// let engine = Engine::new(InMemoryCaseStore::new());
/// let spec_id = engine.register_specification(net)?;
/// let case = engine.launch_case(&spec_id, serde_json::json!({})).await?;
/// ```
pub struct Engine<S: CaseStore> {
    store: Arc<S>,
    observer: Arc<dyn CaseObserver>,
    config: EngineConfig,
    specifications: DashMap<SpecificationId, Arc<NetSpec>>,
    cases: DashMap<Uuid, CaseHandle>,
}

impl<S: CaseStore> Engine<S> {
    /// Create an engine with the given store and default configuration
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    /// Create an engine with custom configuration
    pub fn with_config(store: S, config: EngineConfig) -> Self {
        Self {
            store: Arc::new(store),
            observer: Arc::new(NoopObserver),
            config,
            specifications: DashMap::new(),
            cases: DashMap::new(),
        }
    }

    /// Attach the work-dispatch collaborator
    ///
    /// Call before launching cases; runners capture the observer at spawn.
    pub fn with_observer(mut self, observer: impl CaseObserver) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// Get a reference to the store
    pub fn store(&self) -> &S {
        &self.store
    }

    // =========================================================================
    // Specification Registry
    // =========================================================================

    /// Register a validated specification
    ///
    /// The net was structurally validated when built; registration only has
    /// to claim the id.
    pub fn register_specification(&self, net: NetSpec) -> Result<SpecificationId, EngineError> {
        let id = net.id().clone();
        match self.specifications.entry(id.clone()) {
            Entry::Occupied(_) => Err(EngineError::SpecificationExists(id)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(net));
                info!(specification = %id, "registered specification");
                Ok(id)
            }
        }
    }

    /// Look up a registered specification
    pub fn specification(&self, id: &SpecificationId) -> Option<Arc<NetSpec>> {
        self.specifications.get(id).map(|e| e.value().clone())
    }

    // =========================================================================
    // Case Operations
    // =========================================================================

    /// Launch a new case of a registered specification
    ///
    /// The initial marking (one token on the input condition) and the first
    /// work items are durably recorded before this returns.
    #[instrument(skip(self, data))]
    pub async fn launch_case(
        &self,
        specification: &SpecificationId,
        data: Value,
    ) -> Result<CaseSnapshot, EngineError> {
        let net = self
            .specification(specification)
            .ok_or_else(|| EngineError::SpecificationNotFound(specification.clone()))?;

        let case_id = Uuid::now_v7();
        let (runner, snapshot) = CaseRunner::launch(
            case_id,
            net,
            self.store.clone(),
            self.observer.clone(),
            self.config.clone(),
            data,
        )
        .await?;

        self.spawn_runner(case_id, runner);
        Ok(snapshot)
    }

    /// Begin executing an enabled work item
    pub async fn start_work_item(
        &self,
        case_id: Uuid,
        item: Uuid,
    ) -> Result<CaseSnapshot, EngineError> {
        self.call(case_id, CaseRequest::StartWorkItem { item }).await
    }

    /// Record a work item's successful completion
    pub async fn complete_work_item(
        &self,
        case_id: Uuid,
        item: Uuid,
        output: Value,
    ) -> Result<CaseSnapshot, EngineError> {
        self.call(case_id, CaseRequest::CompleteWorkItem { item, output })
            .await
    }

    /// Record a work item failure
    pub async fn fail_work_item(
        &self,
        case_id: Uuid,
        item: Uuid,
        error: impl Into<String>,
    ) -> Result<CaseSnapshot, EngineError> {
        self.call(
            case_id,
            CaseRequest::FailWorkItem {
                item,
                error: error.into(),
            },
        )
        .await
    }

    /// Withdraw a single work item without failing its case
    pub async fn cancel_work_item(
        &self,
        case_id: Uuid,
        item: Uuid,
        reason: impl Into<String>,
    ) -> Result<CaseSnapshot, EngineError> {
        self.call(
            case_id,
            CaseRequest::CancelWorkItem {
                item,
                reason: reason.into(),
            },
        )
        .await
    }

    /// Add a dynamic multi-instance sibling to a busy task
    pub async fn add_instance(
        &self,
        case_id: Uuid,
        task: TaskId,
        data: Value,
    ) -> Result<CaseSnapshot, EngineError> {
        self.call(case_id, CaseRequest::AddInstance { task, data })
            .await
    }

    /// Cancel a case: outstanding work items are withdrawn and the marking
    /// discarded
    pub async fn cancel_case(
        &self,
        case_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<CaseSnapshot, EngineError> {
        self.call(
            case_id,
            CaseRequest::Cancel {
                reason: reason.into(),
            },
        )
        .await
    }

    /// Freeze work issuance for a case without discarding its marking
    pub async fn suspend_case(&self, case_id: Uuid) -> Result<CaseSnapshot, EngineError> {
        self.call(case_id, CaseRequest::Suspend).await
    }

    /// Resume a suspended case
    pub async fn resume_case(&self, case_id: Uuid) -> Result<CaseSnapshot, EngineError> {
        self.call(case_id, CaseRequest::Resume).await
    }

    /// Current state of a case (active or archived)
    pub async fn case_snapshot(&self, case_id: Uuid) -> Result<CaseSnapshot, EngineError> {
        if self.cases.contains_key(&case_id) {
            match self.call(case_id, CaseRequest::Snapshot).await {
                Err(EngineError::CaseTerminated { .. }) => {}
                result => return result,
            }
        }

        let (net, state, _) = self.load_state(case_id).await?;
        Ok(CaseSnapshot::from_state(&net, &state))
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Rebuild one case from its persisted delta log
    ///
    /// Replays the log through the same application path live execution
    /// uses; a non-terminal case gets a fresh runner and continues exactly
    /// where the log ends.
    #[instrument(skip(self))]
    pub async fn recover_case(&self, case_id: Uuid) -> Result<CaseSnapshot, EngineError> {
        if let Some(handle) = self.cases.get(&case_id) {
            if !handle.tx.is_closed() {
                drop(handle);
                return self.call(case_id, CaseRequest::Snapshot).await;
            }
        }

        let (net, state, sequence) = self.load_state(case_id).await?;
        let snapshot = CaseSnapshot::from_state(&net, &state);

        if !state.status.is_terminal() {
            let runner = CaseRunner::recovered(
                case_id,
                net,
                self.store.clone(),
                self.observer.clone(),
                self.config.clone(),
                state,
                sequence,
            );
            self.spawn_runner(case_id, runner);
            info!(%case_id, "recovered case");
        }

        Ok(snapshot)
    }

    /// Recover every non-terminal case in the store
    ///
    /// Cases whose specification is not registered are skipped with a
    /// warning; register the specification and recover again.
    pub async fn recover_all(&self) -> Result<Vec<CaseSnapshot>, EngineError> {
        let records = self.store.list_cases(CaseFilter::active()).await?;

        let recoveries = join_all(
            records
                .iter()
                .map(|record| self.recover_case(record.case_id)),
        )
        .await;

        let mut snapshots = Vec::with_capacity(recoveries.len());
        for (record, result) in records.iter().zip(recoveries) {
            match result {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(error) => {
                    warn!(case_id = %record.case_id, %error, "failed to recover case");
                }
            }
        }

        Ok(snapshots)
    }

    /// Stop all case runners and wait for them to drain
    ///
    /// In-flight events finish processing (including their persistence
    /// round-trips); nothing new is accepted. Cases stay recoverable from
    /// the store.
    pub async fn shutdown(&self) {
        let case_ids: Vec<Uuid> = self.cases.iter().map(|e| *e.key()).collect();

        let mut joins = Vec::with_capacity(case_ids.len());
        for case_id in case_ids {
            if let Some((_, handle)) = self.cases.remove(&case_id) {
                drop(handle.tx);
                joins.push(handle.join);
            }
        }

        for join in joins {
            let _ = join.await;
        }

        info!("engine shut down");
    }

    // =========================================================================
    // Internal Methods
    // =========================================================================

    fn spawn_runner(&self, case_id: Uuid, runner: CaseRunner<S>) {
        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity);
        let join = tokio::spawn(runner.run(rx));
        self.cases.insert(case_id, CaseHandle { tx, join });
    }

    /// Route one request to a case mailbox and await the reply
    async fn call(
        &self,
        case_id: Uuid,
        request: CaseRequest,
    ) -> Result<CaseSnapshot, EngineError> {
        let tx = self
            .cases
            .get(&case_id)
            .map(|h| h.tx.clone())
            .ok_or(EngineError::CaseNotFound(case_id))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let msg = CaseMsg {
            request,
            reply: reply_tx,
        };

        if tx.send(msg).await.is_err() {
            return Err(self.runner_gone(case_id).await);
        }

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(self.runner_gone(case_id).await),
        }
    }

    /// The runner exited (terminal case); report its stored status
    async fn runner_gone(&self, case_id: Uuid) -> EngineError {
        self.cases.remove(&case_id);
        match self.store.case_status(case_id).await {
            Ok(status) => EngineError::CaseTerminated {
                case: case_id,
                status,
            },
            Err(error) => EngineError::Store(error),
        }
    }

    /// Replay a case's log into state, resolving its specification
    async fn load_state(
        &self,
        case_id: Uuid,
    ) -> Result<(Arc<NetSpec>, CaseState, i64), EngineError> {
        let log = self.store.load(case_id).await?;
        if log.is_empty() {
            return Err(EngineError::CaseNotFound(case_id));
        }

        let specification = match &log[0].1 {
            CaseDelta::CaseLaunched { specification, .. } => specification.clone(),
            _ => {
                return Err(EngineError::UnknownElement(
                    "delta log does not begin with case_launched".to_string(),
                ))
            }
        };

        let net = self
            .specification(&specification)
            .ok_or(EngineError::SpecificationNotFound(specification))?;

        let sequence = log.len() as i64;
        let state = CaseState::replay(&net, case_id, log.iter().map(|(_, d)| d))?;

        Ok((net, state, sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryCaseStore;
    use crate::state::CaseStatus;
    use crate::workitem::WorkItemStatus;
    use weft_model::{NetBuilder, TaskDef};

    fn linear_net(id: &str) -> NetSpec {
        NetBuilder::new(id)
            .input_condition("start")
            .output_condition("end")
            .task(TaskDef::new("a"))
            .flow("start", "a")
            .flow("a", "end")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_and_launch() {
        let engine = Engine::new(InMemoryCaseStore::new());
        let spec = engine.register_specification(linear_net("p")).unwrap();

        let snapshot = engine
            .launch_case(&spec, serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(snapshot.status, CaseStatus::Running);
        assert_eq!(snapshot.items_for_task("a").len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_specification_rejected() {
        let engine = Engine::new(InMemoryCaseStore::new());
        engine.register_specification(linear_net("p")).unwrap();

        let err = engine
            .register_specification(linear_net("p"))
            .unwrap_err();
        assert!(matches!(err, EngineError::SpecificationExists(_)));
    }

    #[tokio::test]
    async fn test_unknown_specification_rejected() {
        let engine = Engine::new(InMemoryCaseStore::new());
        let err = engine
            .launch_case(&SpecificationId::new("ghost"), Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SpecificationNotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_case_rejected() {
        let engine = Engine::new(InMemoryCaseStore::new());
        let err = engine
            .start_work_item(Uuid::now_v7(), Uuid::now_v7())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CaseNotFound(_)));
    }

    #[tokio::test]
    async fn test_run_case_through_engine() {
        let engine = Engine::new(InMemoryCaseStore::new());
        let spec = engine.register_specification(linear_net("p")).unwrap();

        let snapshot = engine.launch_case(&spec, Value::Null).await.unwrap();
        let case_id = snapshot.case_id;
        let item = snapshot.items_for_task("a")[0].id;

        engine.start_work_item(case_id, item).await.unwrap();
        let snapshot = engine
            .complete_work_item(case_id, item, Value::Null)
            .await
            .unwrap();

        assert_eq!(snapshot.status, CaseStatus::Completed);

        // The runner exits after a terminal transition; further events are
        // rejected with the stored terminal status
        let err = engine
            .start_work_item(case_id, item)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::CaseTerminated {
                status: CaseStatus::Completed,
                ..
            } | EngineError::CaseNotFound(_)
        ));

        // Archived snapshot still readable
        let archived = engine.case_snapshot(case_id).await.unwrap();
        assert_eq!(archived.status, CaseStatus::Completed);
    }

    #[tokio::test]
    async fn test_recover_case_resumes_execution() {
        let store = InMemoryCaseStore::new();
        let engine = Engine::new(store);
        let spec = engine.register_specification(linear_net("p")).unwrap();

        let snapshot = engine.launch_case(&spec, Value::Null).await.unwrap();
        let case_id = snapshot.case_id;
        let item = snapshot.items_for_task("a")[0].id;
        engine.start_work_item(case_id, item).await.unwrap();

        // Simulate a crash: drop all runners, keep the store
        engine.shutdown().await;

        let recovered = engine.recover_case(case_id).await.unwrap();
        assert_eq!(recovered.status, CaseStatus::Running);
        assert_eq!(
            recovered.items_for_task("a")[0].status,
            WorkItemStatus::Executing
        );

        // Execution continues where the log ends
        let snapshot = engine
            .complete_work_item(case_id, item, Value::Null)
            .await
            .unwrap();
        assert_eq!(snapshot.status, CaseStatus::Completed);
    }

    #[tokio::test]
    async fn test_recover_all_skips_terminal_cases() {
        let engine = Engine::new(InMemoryCaseStore::new());
        let spec = engine.register_specification(linear_net("p")).unwrap();

        let open = engine.launch_case(&spec, Value::Null).await.unwrap();
        let closed = engine.launch_case(&spec, Value::Null).await.unwrap();

        let item = closed.items_for_task("a")[0].id;
        engine.start_work_item(closed.case_id, item).await.unwrap();
        engine
            .complete_work_item(closed.case_id, item, Value::Null)
            .await
            .unwrap();

        engine.shutdown().await;

        let recovered = engine.recover_all().await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].case_id, open.case_id);
    }
}
