//! Postgres-backed queue and job store.
//!
//! Each aggregate is persisted whole as a JSONB `document`, with the columns
//! the worker filters on (`status`, `scheduled_at`, `license_number`, ...)
//! kept alongside it. Optimistic concurrency is enforced in the `WHERE`
//! clause of every write.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | QueueStoreError | Scenario |
//! |------------|----------------------|-----------------|----------|
//! | Database (unique violation) | `23505` | `AlreadyExists` | Duplicate primary key on insert |
//! | Database (other) | Any other | `Storage` | Constraint or SQL failure |
//! | PoolClosed | N/A | `Storage` | Connection pool was closed |
//! | Other | N/A | `Storage` | Network errors, connection failures, etc. |
//!
//! ## Claiming
//!
//! `claim()` is a single conditional `UPDATE ... WHERE id = $1 AND version = $2
//! AND status IN ('pending', 'failed')`. Zero affected rows means another
//! worker got there first.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};
use uuid::Uuid;

use harvestry_core::{AggregateRoot, ExpectedVersion, LicenseNumber, QueueItemId, SyncJobId};
use harvestry_sync::{QueueItem, QueueItemStatus, SyncJob};

use super::r#trait::{JobProgress, QueueStore, QueueStoreError, SyncJobStore};

/// Schema applied by [`PostgresSyncStore::migrate`].
pub const MIGRATION_SQL: &str = include_str!("../../migrations/0001_compliance_sync.sql");

#[derive(Debug, Clone)]
pub struct PostgresSyncStore {
    pool: Arc<PgPool>,
}

impl PostgresSyncStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), QueueStoreError> {
        sqlx::raw_sql(MIGRATION_SQL)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn item_version(&self, id: QueueItemId) -> Result<Option<i64>, QueueStoreError> {
        let row = sqlx::query("SELECT version FROM compliance_queue_items WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("item_version", e))?;
        row.map(|r| r.try_get::<i64, _>("version"))
            .transpose()
            .map_err(|e| QueueStoreError::Serialization(e.to_string()))
    }

    async fn job_version(&self, id: SyncJobId) -> Result<Option<i64>, QueueStoreError> {
        let row = sqlx::query("SELECT version FROM compliance_sync_jobs WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("job_version", e))?;
        row.map(|r| r.try_get::<i64, _>("version"))
            .transpose()
            .map_err(|e| QueueStoreError::Serialization(e.to_string()))
    }
}

fn expected(version: ExpectedVersion) -> Option<i64> {
    match version {
        ExpectedVersion::Any => None,
        ExpectedVersion::Exact(v) => Some(v as i64),
    }
}

fn decode_item(row: &PgRow) -> Result<QueueItem, QueueStoreError> {
    let Json(item): Json<QueueItem> = row
        .try_get("document")
        .map_err(|e| QueueStoreError::Serialization(format!("queue item document: {e}")))?;
    Ok(item)
}

fn decode_job(row: &PgRow) -> Result<SyncJob, QueueStoreError> {
    let Json(job): Json<SyncJob> = row
        .try_get("document")
        .map_err(|e| QueueStoreError::Serialization(format!("sync job document: {e}")))?;
    Ok(job)
}

#[async_trait]
impl QueueStore for PostgresSyncStore {
    #[instrument(
        skip(self, item),
        fields(item_id = %item.id_typed(), deduplicated = tracing::field::Empty),
        err
    )]
    async fn enqueue(&self, item: QueueItem) -> Result<QueueItemId, QueueStoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO compliance_queue_items (
                id, version, sync_job_id, license_number, status, depends_on_item_id,
                idempotency_key, scheduled_at, processed_at, created_at, updated_at, document
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (idempotency_key)
                WHERE status NOT IN ('completed', 'failed_permanent', 'cancelled')
                DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::from(item.id_typed()))
        .bind(item.version() as i64)
        .bind(Uuid::from(item.sync_job_id()))
        .bind(item.license_number().as_str())
        .bind(item.status().as_str())
        .bind(item.depends_on_item_id().map(Uuid::from))
        .bind(item.idempotency_key())
        .bind(item.scheduled_at())
        .bind(item.processed_at())
        .bind(item.created_at())
        .bind(item.updated_at())
        .bind(Json(&item))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("enqueue", e))?;

        if inserted.is_some() {
            return Ok(item.id_typed());
        }

        let existing = sqlx::query(
            r#"
            SELECT id FROM compliance_queue_items
            WHERE idempotency_key = $1
              AND status NOT IN ('completed', 'failed_permanent', 'cancelled')
            LIMIT 1
            "#,
        )
        .bind(item.idempotency_key())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("enqueue_lookup", e))?;

        let id: Uuid = existing
            .try_get("id")
            .map_err(|e| QueueStoreError::Serialization(e.to_string()))?;
        Span::current().record("deduplicated", true);
        Ok(QueueItemId::from_uuid(id))
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>, QueueStoreError> {
        let row = sqlx::query("SELECT document FROM compliance_queue_items WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_item", e))?;
        row.as_ref().map(decode_item).transpose()
    }

    #[instrument(skip(self, item), fields(item_id = %item.id_typed(), status = %item.status()), err)]
    async fn update(
        &self,
        item: &QueueItem,
        expected_version: ExpectedVersion,
    ) -> Result<(), QueueStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE compliance_queue_items
            SET version = $3,
                status = $4,
                scheduled_at = $5,
                processed_at = $6,
                updated_at = $7,
                document = $8
            WHERE id = $1 AND ($2::BIGINT IS NULL OR version = $2)
            "#,
        )
        .bind(Uuid::from(item.id_typed()))
        .bind(expected(expected_version))
        .bind(item.version() as i64)
        .bind(item.status().as_str())
        .bind(item.scheduled_at())
        .bind(item.processed_at())
        .bind(item.updated_at())
        .bind(Json(item))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_item", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.item_version(item.id_typed()).await? {
            None => Err(QueueStoreError::NotFound(format!("queue item {}", item.id_typed()))),
            Some(found) => Err(QueueStoreError::Conflict(format!(
                "queue item {}: expected {expected_version:?}, found {found}",
                item.id_typed()
            ))),
        }
    }

    #[instrument(skip(self, item), fields(item_id = %item.id_typed(), version = item.version()), err)]
    async fn claim(
        &self,
        item: &QueueItem,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, QueueStoreError> {
        let mut claimed = item.clone();
        if claimed.mark_processing(now).is_err() {
            return Ok(None);
        }

        let result = sqlx::query(
            r#"
            UPDATE compliance_queue_items
            SET version = $3,
                status = 'processing',
                processed_at = $4,
                updated_at = $4,
                document = $5
            WHERE id = $1
              AND version = $2
              AND status IN ('pending', 'failed')
            "#,
        )
        .bind(Uuid::from(item.id_typed()))
        .bind(item.version() as i64)
        .bind(claimed.version() as i64)
        .bind(now)
        .bind(Json(&claimed))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim", e))?;

        Ok((result.rows_affected() == 1).then_some(claimed))
    }

    #[instrument(skip(self, license), fields(license = %license, ready = tracing::field::Empty), err)]
    async fn next_ready_batch(
        &self,
        license: &LicenseNumber,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, QueueStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT q.document
            FROM compliance_queue_items q
            LEFT JOIN compliance_queue_items d ON d.id = q.depends_on_item_id
            WHERE q.license_number = $1
              AND q.status IN ('pending', 'failed')
              AND q.scheduled_at <= $2
              AND (q.depends_on_item_id IS NULL OR d.status = 'completed')
            ORDER BY q.scheduled_at ASC, q.created_at ASC, q.id ASC
            LIMIT $3
            "#,
        )
        .bind(license.as_str())
        .bind(now)
        .bind(batch_size as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("next_ready_batch", e))?;

        Span::current().record("ready", rows.len());
        rows.iter().map(decode_item).collect()
    }

    #[instrument(skip(self), err)]
    async fn job_progress(&self, job_id: SyncJobId) -> Result<JobProgress, QueueStoreError> {
        let rows = sqlx::query("SELECT id, status FROM compliance_queue_items WHERE sync_job_id = $1")
            .bind(Uuid::from(job_id))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("job_progress", e))?;

        let mut statuses = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row
                .try_get("id")
                .map_err(|e| QueueStoreError::Serialization(e.to_string()))?;
            let status: String = row
                .try_get("status")
                .map_err(|e| QueueStoreError::Serialization(e.to_string()))?;
            let status: QueueItemStatus = status
                .parse()
                .map_err(|e: harvestry_core::DomainError| QueueStoreError::Serialization(e.to_string()))?;
            statuses.push((QueueItemId::from_uuid(id), status));
        }
        Ok(JobProgress::from_statuses(statuses))
    }

    #[instrument(skip(self), err)]
    async fn release_stale_claims(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItemId>, QueueStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let rows = sqlx::query(
            r#"
            SELECT document
            FROM compliance_queue_items
            WHERE status = 'processing' AND processed_at < $1
            ORDER BY processed_at ASC
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("select_stale_claims", e))?;

        let mut released = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut item = decode_item(row)?;
            if item.release_claim(now).is_err() {
                continue;
            }
            sqlx::query(
                r#"
                UPDATE compliance_queue_items
                SET version = $2, status = $3, scheduled_at = $4, updated_at = $5, document = $6
                WHERE id = $1
                "#,
            )
            .bind(Uuid::from(item.id_typed()))
            .bind(item.version() as i64)
            .bind(item.status().as_str())
            .bind(item.scheduled_at())
            .bind(item.updated_at())
            .bind(Json(&item))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("release_claim", e))?;
            released.push(item.id_typed());
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        released.sort();
        Ok(released)
    }
}

#[async_trait]
impl SyncJobStore for PostgresSyncStore {
    #[instrument(skip(self, job), fields(job_id = %job.id_typed()), err)]
    async fn insert(&self, job: &SyncJob) -> Result<(), QueueStoreError> {
        sqlx::query(
            r#"
            INSERT INTO compliance_sync_jobs (
                id, version, site_id, license_number, status, document, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::from(job.id_typed()))
        .bind(job.version() as i64)
        .bind(Uuid::from(job.site_id()))
        .bind(job.license_number().as_str())
        .bind(job.status().as_str())
        .bind(Json(job))
        .bind(job.created_at())
        .bind(job.updated_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: SyncJobId) -> Result<Option<SyncJob>, QueueStoreError> {
        let row = sqlx::query("SELECT document FROM compliance_sync_jobs WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;
        row.as_ref().map(decode_job).transpose()
    }

    #[instrument(skip(self, job), fields(job_id = %job.id_typed(), status = %job.status()), err)]
    async fn update(
        &self,
        job: &SyncJob,
        expected_version: ExpectedVersion,
    ) -> Result<(), QueueStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE compliance_sync_jobs
            SET version = $3, status = $4, document = $5, updated_at = $6
            WHERE id = $1 AND ($2::BIGINT IS NULL OR version = $2)
            "#,
        )
        .bind(Uuid::from(job.id_typed()))
        .bind(expected(expected_version))
        .bind(job.version() as i64)
        .bind(job.status().as_str())
        .bind(Json(job))
        .bind(job.updated_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_job", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.job_version(job.id_typed()).await? {
            None => Err(QueueStoreError::NotFound(format!("sync job {}", job.id_typed()))),
            Some(found) => Err(QueueStoreError::Conflict(format!(
                "sync job {}: expected {expected_version:?}, found {found}",
                job.id_typed()
            ))),
        }
    }
}

/// Map SQLx errors to `QueueStoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> QueueStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => QueueStoreError::AlreadyExists(msg),
                _ => QueueStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            QueueStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => {
            QueueStoreError::NotFound(format!("unexpected row not found in {operation}"))
        }
        other => QueueStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
