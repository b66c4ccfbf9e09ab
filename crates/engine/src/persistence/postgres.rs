//! PostgreSQL implementation of CaseStore
//!
//! Production persistence using PostgreSQL with:
//! - Optimistic concurrency via per-case sequence numbers
//! - Per-case append ordering enforced in a transaction
//! - Delta logs stored as JSONB for replay

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;
use weft_model::SpecificationId;

use super::store::{CaseFilter, CaseRecord, CaseStore, StoreError};
use crate::state::{CaseDelta, CaseStatus};

/// PostgreSQL implementation of [`CaseStore`]
///
/// Uses a connection pool for efficient database access. Appends for one
/// case run in a single transaction holding the case row lock, so one
/// case's delta stream never interleaves; appends across cases proceed
/// concurrently.
///
/// # Example
///
/// ```ignore
/// use weft_engine::PgCaseStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/weft").await?;
/// sqlx::raw_sql(PgCaseStore::MIGRATION).execute(&pool).await?;
/// let store = PgCaseStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PgCaseStore {
    pool: PgPool,
}

impl PgCaseStore {
    /// Schema bootstrap statements
    pub const MIGRATION: &'static str = r#"
        CREATE TABLE IF NOT EXISTS weft_cases (
            id             UUID PRIMARY KEY,
            specification  TEXT NOT NULL,
            status         TEXT NOT NULL DEFAULT 'running',
            sequence       BIGINT NOT NULL DEFAULT 0,
            created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at     TIMESTAMPTZ NOT NULL DEFAULT now()
        );

        CREATE TABLE IF NOT EXISTS weft_case_deltas (
            case_id      UUID NOT NULL REFERENCES weft_cases(id),
            sequence     BIGINT NOT NULL,
            delta        JSONB NOT NULL,
            appended_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (case_id, sequence)
        );

        CREATE INDEX IF NOT EXISTS idx_weft_cases_status
            ON weft_cases(status);
    "#;

    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CaseStore for PgCaseStore {
    #[instrument(skip(self))]
    async fn create_case(
        &self,
        case_id: Uuid,
        specification: &SpecificationId,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO weft_cases (id, specification, status)
            VALUES ($1, $2, 'running')
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(case_id)
        .bind(specification.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create case: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::CaseExists(case_id));
        }

        debug!(%case_id, %specification, "created case");
        Ok(())
    }

    #[instrument(skip(self, deltas))]
    async fn append(
        &self,
        case_id: Uuid,
        expected_sequence: i64,
        deltas: &[CaseDelta],
    ) -> Result<i64, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        // Lock the case row and check the sequence
        let row = sqlx::query(
            r#"
            SELECT sequence FROM weft_cases WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(case_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::CaseNotFound(case_id))?;

        let actual: i64 = row.get("sequence");
        if actual != expected_sequence {
            return Err(StoreError::SequenceConflict {
                expected: expected_sequence,
                actual,
            });
        }

        let mut new_sequence = actual;
        for delta in deltas {
            let delta_json = serde_json::to_value(delta)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO weft_case_deltas (case_id, sequence, delta)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(case_id)
            .bind(new_sequence)
            .bind(&delta_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

            new_sequence += 1;
        }

        sqlx::query(
            r#"
            UPDATE weft_cases SET sequence = $2, updated_at = now() WHERE id = $1
            "#,
        )
        .bind(case_id)
        .bind(new_sequence)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        debug!(%case_id, new_sequence, "appended deltas");
        Ok(new_sequence)
    }

    #[instrument(skip(self))]
    async fn load(&self, case_id: Uuid) -> Result<Vec<(i64, CaseDelta)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, delta
            FROM weft_case_deltas
            WHERE case_id = $1
            ORDER BY sequence
            "#,
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load deltas: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let mut deltas = Vec::with_capacity(rows.len());
        for row in rows {
            let seq: i64 = row.get("sequence");
            let data: serde_json::Value = row.get("delta");
            let delta: CaseDelta = serde_json::from_value(data)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            deltas.push((seq, delta));
        }

        Ok(deltas)
    }

    #[instrument(skip(self))]
    async fn set_case_status(&self, case_id: Uuid, status: CaseStatus) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE weft_cases SET status = $2, updated_at = now() WHERE id = $1
            "#,
        )
        .bind(case_id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::CaseNotFound(case_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn case_status(&self, case_id: Uuid) -> Result<CaseStatus, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT status FROM weft_cases WHERE id = $1
            "#,
        )
        .bind(case_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::CaseNotFound(case_id))?;

        let status: String = row.get("status");
        parse_case_status(&status)
    }

    #[instrument(skip(self))]
    async fn list_cases(&self, filter: CaseFilter) -> Result<Vec<CaseRecord>, StoreError> {
        let statuses: Option<Vec<String>> = filter
            .statuses
            .map(|s| s.iter().map(|st| st.to_string()).collect());

        let rows = sqlx::query(
            r#"
            SELECT id, specification, status, sequence, created_at
            FROM weft_cases
            WHERE ($1::text[] IS NULL OR status = ANY($1))
              AND ($2::text IS NULL OR specification = $2)
            ORDER BY created_at
            "#,
        )
        .bind(&statuses)
        .bind(filter.specification.as_ref().map(|s| s.as_str().to_string()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.get("status");
            let specification: String = row.get("specification");
            records.push(CaseRecord {
                case_id: row.get("id"),
                specification: SpecificationId::new(specification),
                status: parse_case_status(&status)?,
                sequence: row.get("sequence"),
                created_at: row.get("created_at"),
            });
        }

        Ok(records)
    }
}

fn parse_case_status(s: &str) -> Result<CaseStatus, StoreError> {
    match s {
        "running" => Ok(CaseStatus::Running),
        "suspended" => Ok(CaseStatus::Suspended),
        "completed" => Ok(CaseStatus::Completed),
        "cancelled" => Ok(CaseStatus::Cancelled),
        "failed" => Ok(CaseStatus::Failed),
        other => Err(StoreError::Serialization(format!(
            "unknown case status: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_status() {
        assert_eq!(parse_case_status("running").unwrap(), CaseStatus::Running);
        assert_eq!(
            parse_case_status("completed").unwrap(),
            CaseStatus::Completed
        );
        assert!(parse_case_status("bogus").is_err());
    }

    #[test]
    fn test_migration_creates_both_tables() {
        assert!(PgCaseStore::MIGRATION.contains("weft_cases"));
        assert!(PgCaseStore::MIGRATION.contains("weft_case_deltas"));
    }
}
