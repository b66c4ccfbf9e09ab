//! CaseStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use weft_model::SpecificationId;

use crate::state::{CaseDelta, CaseStatus};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Case not found
    #[error("case not found: {0}")]
    CaseNotFound(Uuid),

    /// Optimistic sequence check failed: another writer appended first, or
    /// the caller's view of the log is stale
    #[error("sequence conflict: expected {expected}, log is at {actual}")]
    SequenceConflict { expected: i64, actual: i64 },

    /// A case with this id already exists
    #[error("case already exists: {0}")]
    CaseExists(Uuid),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Filter for listing cases
#[derive(Debug, Clone, Default)]
pub struct CaseFilter {
    pub statuses: Option<Vec<CaseStatus>>,
    pub specification: Option<SpecificationId>,
}

impl CaseFilter {
    /// Cases that are not in a terminal state (recovery sweep)
    pub fn active() -> Self {
        Self {
            statuses: Some(vec![CaseStatus::Running, CaseStatus::Suspended]),
            specification: None,
        }
    }

    pub fn with_specification(mut self, specification: SpecificationId) -> Self {
        self.specification = Some(specification);
        self
    }
}

/// Summary row for a stored case
#[derive(Debug, Clone)]
pub struct CaseRecord {
    pub case_id: Uuid,
    pub specification: SpecificationId,
    pub status: CaseStatus,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

/// Store for case delta logs
///
/// Implementations must be thread-safe and must guarantee that appends to
/// one case's log never interleave: the sequence check makes concurrent
/// appends to the same case fail rather than corrupt ordering. There is no
/// ordering requirement across different cases.
#[async_trait]
pub trait CaseStore: Send + Sync + 'static {
    /// Register a new case with an empty delta log
    async fn create_case(
        &self,
        case_id: Uuid,
        specification: &SpecificationId,
    ) -> Result<(), StoreError>;

    /// Append deltas to a case's log (optimistic concurrency)
    ///
    /// `expected_sequence` is the number of deltas the caller believes are
    /// already in the log. The whole batch is durable before this returns;
    /// a failure guarantees none of the batch was recorded. Returns the new
    /// sequence.
    async fn append(
        &self,
        case_id: Uuid,
        expected_sequence: i64,
        deltas: &[CaseDelta],
    ) -> Result<i64, StoreError>;

    /// Load a case's full delta log in append order (for replay)
    async fn load(&self, case_id: Uuid) -> Result<Vec<(i64, CaseDelta)>, StoreError>;

    /// Update the queryable status column
    ///
    /// The delta log remains the source of truth; this column exists so
    /// status queries and recovery sweeps need not replay logs.
    async fn set_case_status(&self, case_id: Uuid, status: CaseStatus) -> Result<(), StoreError>;

    /// Read the queryable status column
    async fn case_status(&self, case_id: Uuid) -> Result<CaseStatus, StoreError>;

    /// List stored cases matching a filter
    async fn list_cases(&self, filter: CaseFilter) -> Result<Vec<CaseRecord>, StoreError>;
}
