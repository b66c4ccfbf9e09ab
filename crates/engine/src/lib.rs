//! # Weft Case Execution Engine
//!
//! A workflow-net execution runtime: given an immutable, validated
//! [`NetSpec`](weft_model::NetSpec), the engine runs any number of concurrent
//! cases, advancing each case's token marking as tasks fire and complete,
//! with AND/OR/XOR split and join semantics, non-local OR-join analysis,
//! multi-instance tasks, atomic cancellation regions, and crash-recoverable
//! persistence.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │   (specification registry, routes events to case mailboxes)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼  one per active case
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        CaseRunner                            │
//! │  (owns the marking + work items, serializes all transitions, │
//! │   stages deltas → persists → adopts; evaluates enablement)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        CaseStore                             │
//! │   (append-only per-case delta log; in-memory or PostgreSQL)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Within one case every transition is strictly serialized and durably
//! persisted before the caller sees success; across cases there is no
//! ordering. Recovery replays a case's delta log through the same pure
//! application function the live path uses, so a replayed case is
//! byte-identical to the pre-crash state.
//!
//! ## Example
//!
//! ```
//! use weft_engine::{Engine, InMemoryCaseStore};
//! use weft_model::{NetBuilder, TaskDef};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), weft_engine::EngineError> {
//! let net = NetBuilder::new("hello")
//!     .input_condition("start")
//!     .output_condition("end")
//!     .task(TaskDef::new("greet"))
//!     .flow("start", "greet")
//!     .flow("greet", "end")
//!     .build()
//!     .expect("valid net");
//!
//! let engine = Engine::new(InMemoryCaseStore::new());
//! let spec = engine.register_specification(net)?;
//!
//! let case = engine.launch_case(&spec, serde_json::json!({})).await?;
//! let item = case.items_for_task("greet")[0].id;
//!
//! engine.start_work_item(case.case_id, item).await?;
//! let done = engine
//!     .complete_work_item(case.case_id, item, serde_json::json!({}))
//!     .await?;
//!
//! assert_eq!(done.status, weft_engine::CaseStatus::Completed);
//! # engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod case;
mod config;
mod enablement;
mod engine;
mod error;
mod marking;
mod persistence;
mod state;
mod workitem;

/// Prelude for common imports
pub mod prelude {
    pub use crate::case::{CaseRequest, CaseSnapshot};
    pub use crate::config::{EngineConfig, FaultPolicy};
    pub use crate::enablement::{evaluate, Enablement, EvalConfig};
    pub use crate::engine::{CaseObserver, Engine, NoopObserver};
    pub use crate::error::EngineError;
    pub use crate::marking::Marking;
    pub use crate::persistence::{
        CaseFilter, CaseRecord, CaseStore, InMemoryCaseStore, PgCaseStore, StoreError,
    };
    pub use crate::state::{CaseDelta, CaseState, CaseStatus};
    pub use crate::workitem::{WorkItem, WorkItemStatus};
}

// Re-export key types at crate root
pub use case::{CaseRequest, CaseSnapshot};
pub use config::{EngineConfig, FaultPolicy};
pub use enablement::{evaluate, Enablement, EvalConfig, UnresolvedJoin};
pub use engine::{CaseObserver, Engine, NoopObserver};
pub use error::EngineError;
pub use marking::Marking;
pub use persistence::{
    CaseFilter, CaseRecord, CaseStore, InMemoryCaseStore, PgCaseStore, StoreError,
};
pub use state::{CaseDelta, CaseState, CaseStatus};
pub use workitem::{WorkItem, WorkItemStatus};
