//! In-memory implementation of CaseStore for testing

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;
use weft_model::SpecificationId;

use super::store::{CaseFilter, CaseRecord, CaseStore, StoreError};
use crate::state::{CaseDelta, CaseStatus};

/// Internal case row
struct CaseRow {
    specification: SpecificationId,
    status: CaseStatus,
    deltas: Vec<CaseDelta>,
    created_at: DateTime<Utc>,
}

/// In-memory implementation of [`CaseStore`]
///
/// Primarily for testing; provides the same semantics as the PostgreSQL
/// implementation, including the optimistic sequence check.
///
/// # Example
///
/// ```
/// use weft_engine::InMemoryCaseStore;
///
/// let store = InMemoryCaseStore::new();
/// assert_eq!(store.case_count(), 0);
/// ```
#[derive(Default)]
pub struct InMemoryCaseStore {
    cases: RwLock<HashMap<Uuid, CaseRow>>,
}

impl InMemoryCaseStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored cases
    pub fn case_count(&self) -> usize {
        self.cases.read().len()
    }

    /// Number of deltas persisted for one case
    pub fn delta_count(&self, case_id: Uuid) -> usize {
        self.cases
            .read()
            .get(&case_id)
            .map(|c| c.deltas.len())
            .unwrap_or(0)
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.cases.write().clear();
    }
}

#[async_trait]
impl CaseStore for InMemoryCaseStore {
    async fn create_case(
        &self,
        case_id: Uuid,
        specification: &SpecificationId,
    ) -> Result<(), StoreError> {
        let mut cases = self.cases.write();
        if cases.contains_key(&case_id) {
            return Err(StoreError::CaseExists(case_id));
        }

        cases.insert(
            case_id,
            CaseRow {
                specification: specification.clone(),
                status: CaseStatus::Running,
                deltas: Vec::new(),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn append(
        &self,
        case_id: Uuid,
        expected_sequence: i64,
        deltas: &[CaseDelta],
    ) -> Result<i64, StoreError> {
        let mut cases = self.cases.write();
        let case = cases
            .get_mut(&case_id)
            .ok_or(StoreError::CaseNotFound(case_id))?;

        let actual = case.deltas.len() as i64;
        if actual != expected_sequence {
            return Err(StoreError::SequenceConflict {
                expected: expected_sequence,
                actual,
            });
        }

        case.deltas.extend_from_slice(deltas);
        Ok(case.deltas.len() as i64)
    }

    async fn load(&self, case_id: Uuid) -> Result<Vec<(i64, CaseDelta)>, StoreError> {
        let cases = self.cases.read();
        let case = cases
            .get(&case_id)
            .ok_or(StoreError::CaseNotFound(case_id))?;

        Ok(case
            .deltas
            .iter()
            .enumerate()
            .map(|(i, d)| (i as i64, d.clone()))
            .collect())
    }

    async fn set_case_status(&self, case_id: Uuid, status: CaseStatus) -> Result<(), StoreError> {
        let mut cases = self.cases.write();
        let case = cases
            .get_mut(&case_id)
            .ok_or(StoreError::CaseNotFound(case_id))?;

        case.status = status;
        Ok(())
    }

    async fn case_status(&self, case_id: Uuid) -> Result<CaseStatus, StoreError> {
        let cases = self.cases.read();
        cases
            .get(&case_id)
            .map(|c| c.status)
            .ok_or(StoreError::CaseNotFound(case_id))
    }

    async fn list_cases(&self, filter: CaseFilter) -> Result<Vec<CaseRecord>, StoreError> {
        let cases = self.cases.read();
        let mut records: Vec<_> = cases
            .iter()
            .filter(|(_, row)| {
                if let Some(ref statuses) = filter.statuses {
                    if !statuses.contains(&row.status) {
                        return false;
                    }
                }
                if let Some(ref spec) = filter.specification {
                    if &row.specification != spec {
                        return false;
                    }
                }
                true
            })
            .map(|(&case_id, row)| CaseRecord {
                case_id,
                specification: row.specification.clone(),
                status: row.status,
                sequence: row.deltas.len() as i64,
                created_at: row.created_at,
            })
            .collect();

        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_model::ConditionId;

    fn delta(count: u32) -> CaseDelta {
        CaseDelta::TokensSet {
            condition: ConditionId::new("c"),
            count,
        }
    }

    #[tokio::test]
    async fn test_create_and_append() {
        let store = InMemoryCaseStore::new();
        let case_id = Uuid::now_v7();
        let spec = SpecificationId::new("test");

        store.create_case(case_id, &spec).await.unwrap();
        assert_eq!(store.case_count(), 1);

        let seq = store.append(case_id, 0, &[delta(1)]).await.unwrap();
        assert_eq!(seq, 1);

        let seq = store
            .append(case_id, 1, &[delta(0), delta(2)])
            .await
            .unwrap();
        assert_eq!(seq, 3);

        let log = store.load(case_id).await.unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].0, 0);
        assert_eq!(log[2].0, 2);
    }

    #[tokio::test]
    async fn test_duplicate_case_rejected() {
        let store = InMemoryCaseStore::new();
        let case_id = Uuid::now_v7();
        let spec = SpecificationId::new("test");

        store.create_case(case_id, &spec).await.unwrap();
        let result = store.create_case(case_id, &spec).await;
        assert!(matches!(result, Err(StoreError::CaseExists(_))));
    }

    #[tokio::test]
    async fn test_sequence_conflict() {
        let store = InMemoryCaseStore::new();
        let case_id = Uuid::now_v7();
        store
            .create_case(case_id, &SpecificationId::new("test"))
            .await
            .unwrap();

        store.append(case_id, 0, &[delta(1)]).await.unwrap();

        let result = store.append(case_id, 0, &[delta(2)]).await;
        assert!(matches!(
            result,
            Err(StoreError::SequenceConflict {
                expected: 0,
                actual: 1
            })
        ));

        // The conflicting batch left no trace
        assert_eq!(store.delta_count(case_id), 1);
    }

    #[tokio::test]
    async fn test_status_column() {
        let store = InMemoryCaseStore::new();
        let case_id = Uuid::now_v7();
        store
            .create_case(case_id, &SpecificationId::new("test"))
            .await
            .unwrap();

        assert_eq!(
            store.case_status(case_id).await.unwrap(),
            CaseStatus::Running
        );

        store
            .set_case_status(case_id, CaseStatus::Completed)
            .await
            .unwrap();
        assert_eq!(
            store.case_status(case_id).await.unwrap(),
            CaseStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_list_active_cases() {
        let store = InMemoryCaseStore::new();
        let spec = SpecificationId::new("test");

        let running = Uuid::now_v7();
        let done = Uuid::now_v7();
        store.create_case(running, &spec).await.unwrap();
        store.create_case(done, &spec).await.unwrap();
        store
            .set_case_status(done, CaseStatus::Completed)
            .await
            .unwrap();

        let active = store.list_cases(CaseFilter::active()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].case_id, running);
    }
}
