use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use harvestry_core::{ExpectedVersion, LicenseNumber, QueueItemId, SyncJobId};
use harvestry_sync::{QueueItem, QueueItemStatus, SyncJob};

/// Queue/job store operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to
/// domain errors (invalid transitions), which the domain types report before a
/// store is ever touched.
///
/// ## Error Categories
///
/// - **NotFound**: The record to update does not exist
/// - **AlreadyExists**: Insert of an id that is already stored
/// - **Conflict**: Optimistic concurrency check failed (version mismatch)
/// - **Serialization**: A stored document could not be encoded/decoded
/// - **Storage**: Backend failure (connection, lock poisoning, SQL error)
#[derive(Debug, Error)]
pub enum QueueStoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Item counts for one sync job, derived from its queue items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub total: u32,
    /// Items that reached an outcome (terminal or awaiting manual review)
    pub processed: u32,
    pub successful: u32,
    /// FailedPermanent or ManualReviewRequired
    pub failed: u32,
    /// Pending, Processing or Failed (retry scheduled)
    pub outstanding: u32,
    pub failed_item_ids: Vec<QueueItemId>,
}

impl JobProgress {
    /// Fold item statuses into counts. Failed ids come out sorted.
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = (QueueItemId, QueueItemStatus)>,
    {
        let mut progress = JobProgress::default();
        for (id, status) in statuses {
            progress.total += 1;
            match status {
                QueueItemStatus::Pending | QueueItemStatus::Processing | QueueItemStatus::Failed => {
                    progress.outstanding += 1;
                }
                QueueItemStatus::Completed => {
                    progress.processed += 1;
                    progress.successful += 1;
                }
                QueueItemStatus::FailedPermanent | QueueItemStatus::ManualReviewRequired => {
                    progress.processed += 1;
                    progress.failed += 1;
                    progress.failed_item_ids.push(id);
                }
                QueueItemStatus::Cancelled => progress.processed += 1,
            }
        }
        progress.failed_item_ids.sort();
        progress
    }

    pub fn is_settled(&self) -> bool {
        self.outstanding == 0
    }
}

/// Durable queue of regulator operations.
///
/// ## Design Principles
///
/// - **Domain logic stays in `QueueItem`**: stores persist whole items and
///   never decide transitions themselves (the one exception is `claim`, which
///   must apply `mark_processing` atomically with the version check)
/// - **Optimistic locking**: every write carries the version the caller read;
///   a mismatch is a `Conflict`, never a silent overwrite
///
/// ## Claim Semantics
///
/// `claim()` moves an item Pending/Failed → Processing only if the stored
/// version still equals the snapshot's version and the status is still
/// claimable. Two workers racing on the same snapshot see exactly one
/// `Some(..)`; the other sees `None` and must skip the item.
///
/// ## Ready Batch Semantics
///
/// `next_ready_batch()` returns items for one license that are claimable,
/// due (`scheduled_at <= now`) and whose dependency (if any) is Completed,
/// ordered by `scheduled_at` then `created_at`.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new item, or return the id of a live (non-terminal) item that
    /// already carries the same idempotency key.
    async fn enqueue(&self, item: QueueItem) -> Result<QueueItemId, QueueStoreError>;

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>, QueueStoreError>;

    /// Persist a transitioned item. `expected_version` is the version the
    /// caller loaded before applying the transition.
    async fn update(
        &self,
        item: &QueueItem,
        expected_version: ExpectedVersion,
    ) -> Result<(), QueueStoreError>;

    /// Atomically claim `item` for processing (see type docs).
    async fn claim(
        &self,
        item: &QueueItem,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, QueueStoreError>;

    async fn next_ready_batch(
        &self,
        license: &LicenseNumber,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, QueueStoreError>;

    async fn job_progress(&self, job_id: SyncJobId) -> Result<JobProgress, QueueStoreError>;

    /// Return items claimed before `cutoff` and still Processing to Pending.
    async fn release_stale_claims(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItemId>, QueueStoreError>;
}

/// Durable store for sync job records.
#[async_trait]
pub trait SyncJobStore: Send + Sync {
    async fn insert(&self, job: &SyncJob) -> Result<(), QueueStoreError>;

    async fn get(&self, id: SyncJobId) -> Result<Option<SyncJob>, QueueStoreError>;

    async fn update(
        &self,
        job: &SyncJob,
        expected_version: ExpectedVersion,
    ) -> Result<(), QueueStoreError>;
}
