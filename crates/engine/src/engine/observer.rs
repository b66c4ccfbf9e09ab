//! Work-dispatch boundary
//!
//! The engine announces work-item and case lifecycle events through a
//! [`CaseObserver`]. The resourcing/worklist layer implements this trait to
//! learn about new work items, and calls back into the engine
//! (`start_work_item` / `complete_work_item` / `fail_work_item`) as the work
//! progresses. Every created item must eventually receive exactly one
//! terminal response or its case will not progress; that liveness
//! obligation rests with the collaborator.
//!
//! Notifications are emitted after the corresponding state delta is durably
//! persisted, never before.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::workitem::WorkItem;

/// Receiver of case and work-item lifecycle notifications
///
/// All methods default to no-ops so implementations subscribe only to what
/// they need. Implementations should return quickly; long-running reactions
/// belong on the collaborator's own tasks.
#[async_trait]
pub trait CaseObserver: Send + Sync + 'static {
    /// New work items were created (status `Enabled`)
    async fn work_items_created(&self, case_id: Uuid, items: &[WorkItem]) {
        let _ = (case_id, items);
    }

    /// Work items were cancelled (cancellation set, threshold, case end)
    async fn work_items_cancelled(&self, case_id: Uuid, items: &[WorkItem]) {
        let _ = (case_id, items);
    }

    /// A token reached the output condition; the case is complete
    async fn case_completed(&self, case_id: Uuid, data: &Value) {
        let _ = (case_id, data);
    }

    /// The case was explicitly cancelled
    async fn case_cancelled(&self, case_id: Uuid, reason: &str) {
        let _ = (case_id, reason);
    }

    /// The case failed (routing dead-end or fault policy)
    async fn case_failed(&self, case_id: Uuid, reason: &str) {
        let _ = (case_id, reason);
    }
}

/// Observer that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

#[async_trait]
impl CaseObserver for NoopObserver {}
