//! Engine error taxonomy
//!
//! Structural problems are rejected before a net ever runs (see
//! `weft_model::StructuralError`); everything here concerns a running engine.
//! Store failures are always fatal to the in-flight operation and never
//! swallowed: the case state observed by callers is the persisted state.

use uuid::Uuid;
use weft_model::{SpecificationId, TaskId};

use crate::persistence::StoreError;
use crate::state::CaseStatus;
use crate::workitem::WorkItemStatus;

/// Errors surfaced at the engine boundary
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No specification registered under this id
    #[error("specification not found: {0}")]
    SpecificationNotFound(SpecificationId),

    /// A specification with this id is already registered
    #[error("specification already registered: {0}")]
    SpecificationExists(SpecificationId),

    /// No case with this id is known to the engine
    #[error("case not found: {0}")]
    CaseNotFound(Uuid),

    /// The addressed work item does not exist in its case
    #[error("work item not found: {0}")]
    WorkItemNotFound(Uuid),

    /// An operation was attempted on a work item in a state that does not
    /// permit it; the case is unaffected
    #[error("work item {item} cannot transition from {from} to {to}")]
    InvalidState {
        item: Uuid,
        from: WorkItemStatus,
        to: WorkItemStatus,
    },

    /// A work item was started while its task holds no firing rights in the
    /// current marking (tokens were consumed elsewhere); the item stays
    /// `Enabled`
    #[error("task {task} is not enabled in the current marking")]
    TaskNotEnabled { task: TaskId },

    /// The case is suspended; work issuance is frozen until resume
    #[error("case {0} is suspended")]
    CaseSuspended(Uuid),

    /// The case reached a terminal state and accepts no further events
    #[error("case {case} is {status}")]
    CaseTerminated { case: Uuid, status: CaseStatus },

    /// A dynamic multi-instance creation request was rejected
    #[error("cannot create instance for task {task}: {reason}")]
    InstanceCreation { task: TaskId, reason: String },

    /// Internal token-conservation violation; indicates a bug or a corrupted
    /// delta log, never a user error
    #[error("token accounting violation: {0}")]
    TokenAccounting(String),

    /// A persisted delta references a net element the registered
    /// specification does not contain
    #[error("unknown net element in persisted state: {0}")]
    UnknownElement(String),

    /// Durable write or read failed; the in-flight operation was rolled back
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
