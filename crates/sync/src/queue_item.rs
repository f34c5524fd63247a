//! Queue item: one regulator operation with its own retry/backoff state machine.
//!
//! ```text
//!   Pending ──mark_processing──▶ Processing ──complete──▶ Completed
//!      ▲  ▲                          │
//!      │  └──────release_claim───────┤
//!      │                             ├──fail (retries left)──▶ Failed ──mark_processing──▶ …
//!      │                             ├──fail (exhausted) / fail_permanently──▶ FailedPermanent
//!      └──schedule── ManualReview ◀──┘ require_manual_review
//!
//!   any non-terminal ──cancel──▶ Cancelled
//! ```

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use harvestry_core::{
    AggregateRoot, DomainError, DomainResult, HarvestryEntityId, LicenseNumber, QueueItemId,
    SiteId, SyncJobId,
};

use crate::backoff::RetryPolicy;
use crate::endpoint::{EntityType, OperationType};
use crate::idempotency::idempotency_key;

/// Recorded when a stale claim is handed back to the queue.
pub const CLAIM_EXPIRED: &str = "CLAIM_EXPIRED";

/// Recorded alongside the reason when an item is escalated.
pub const MANUAL_REVIEW: &str = "MANUAL_REVIEW";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    /// Waiting for its scheduled time (and dependency, if any)
    Pending,
    /// Claimed by a worker; outcome not yet recorded
    Processing,
    Completed,
    /// Failed, will be retried after backoff
    Failed,
    /// Retries exhausted or the request itself was invalid
    FailedPermanent,
    /// Needs a human decision (e.g. the regulator already holds the tag)
    ManualReviewRequired,
    Cancelled,
}

impl QueueItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueItemStatus::Completed | QueueItemStatus::FailedPermanent | QueueItemStatus::Cancelled
        )
    }

    /// Statuses a worker may claim from.
    pub fn is_claimable(&self) -> bool {
        matches!(self, QueueItemStatus::Pending | QueueItemStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "pending",
            QueueItemStatus::Processing => "processing",
            QueueItemStatus::Completed => "completed",
            QueueItemStatus::Failed => "failed",
            QueueItemStatus::FailedPermanent => "failed_permanent",
            QueueItemStatus::ManualReviewRequired => "manual_review_required",
            QueueItemStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueItemStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => QueueItemStatus::Pending,
            "processing" => QueueItemStatus::Processing,
            "completed" => QueueItemStatus::Completed,
            "failed" => QueueItemStatus::Failed,
            "failed_permanent" => QueueItemStatus::FailedPermanent,
            "manual_review_required" => QueueItemStatus::ManualReviewRequired,
            "cancelled" => QueueItemStatus::Cancelled,
            other => {
                return Err(DomainError::validation(format!(
                    "unknown queue item status: {other}"
                )));
            }
        })
    }
}

/// Input for [`QueueItem::create`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQueueItem {
    pub sync_job_id: SyncJobId,
    pub site_id: SiteId,
    pub license_number: LicenseNumber,
    pub entity_type: EntityType,
    pub operation_type: OperationType,
    pub harvestry_entity_id: HarvestryEntityId,
    pub payload: serde_json::Value,
    pub depends_on_item_id: Option<QueueItemId>,
    pub max_retries: u32,
    /// Separates repeated operations against the same entity in the idempotency key.
    pub discriminator: Option<String>,
    /// Regulator id already known for the target record (needed by delete routes).
    pub external_id: Option<i64>,
}

impl NewQueueItem {
    pub fn new(
        sync_job_id: SyncJobId,
        site_id: SiteId,
        license_number: LicenseNumber,
        entity_type: EntityType,
        operation_type: OperationType,
        harvestry_entity_id: HarvestryEntityId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            sync_job_id,
            site_id,
            license_number,
            entity_type,
            operation_type,
            harvestry_entity_id,
            payload,
            depends_on_item_id: None,
            max_retries: RetryPolicy::default().max_retries,
            discriminator: None,
            external_id: None,
        }
    }

    pub fn depends_on(mut self, item_id: QueueItemId) -> Self {
        self.depends_on_item_id = Some(item_id);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_discriminator(mut self, discriminator: impl Into<String>) -> Self {
        self.discriminator = Some(discriminator.into());
        self
    }

    pub fn with_external_id(mut self, external_id: i64) -> Self {
        self.external_id = Some(external_id);
        self
    }
}

/// Aggregate root: QueueItem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    id: QueueItemId,
    version: u64,
    sync_job_id: SyncJobId,
    site_id: SiteId,
    license_number: LicenseNumber,
    entity_type: EntityType,
    operation_type: OperationType,
    harvestry_entity_id: HarvestryEntityId,
    depends_on_item_id: Option<QueueItemId>,
    payload: serde_json::Value,
    external_id: Option<i64>,
    external_label: Option<String>,
    status: QueueItemStatus,
    retry_count: u32,
    max_retries: u32,
    scheduled_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    error_code: Option<String>,
    idempotency_key: String,
    last_backoff_ms: Option<u64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AggregateRoot for QueueItem {
    type Id = QueueItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl QueueItem {
    /// Create a Pending item, eligible immediately.
    pub fn create(new: NewQueueItem, now: DateTime<Utc>) -> DomainResult<Self> {
        if new.sync_job_id.is_nil() {
            return Err(DomainError::validation("sync job id is required"));
        }
        if new.site_id.is_nil() {
            return Err(DomainError::validation("site id is required"));
        }
        if new.harvestry_entity_id.is_nil() {
            return Err(DomainError::validation("harvestry entity id is required"));
        }
        if new.discriminator.as_deref().is_some_and(|d| d.trim().is_empty()) {
            return Err(DomainError::validation("discriminator cannot be blank"));
        }

        let idempotency_key = idempotency_key(
            &new.license_number,
            new.entity_type,
            new.harvestry_entity_id,
            new.operation_type,
            new.discriminator.as_deref(),
        );

        Ok(Self {
            id: QueueItemId::new(),
            version: 1,
            sync_job_id: new.sync_job_id,
            site_id: new.site_id,
            license_number: new.license_number,
            entity_type: new.entity_type,
            operation_type: new.operation_type,
            harvestry_entity_id: new.harvestry_entity_id,
            depends_on_item_id: new.depends_on_item_id,
            payload: new.payload,
            external_id: new.external_id,
            external_label: None,
            status: QueueItemStatus::Pending,
            retry_count: 0,
            max_retries: new.max_retries,
            scheduled_at: now,
            processed_at: None,
            completed_at: None,
            error_message: None,
            error_code: None,
            idempotency_key,
            last_backoff_ms: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id_typed(&self) -> QueueItemId {
        self.id
    }

    pub fn sync_job_id(&self) -> SyncJobId {
        self.sync_job_id
    }

    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    pub fn license_number(&self) -> &LicenseNumber {
        &self.license_number
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    pub fn harvestry_entity_id(&self) -> HarvestryEntityId {
        self.harvestry_entity_id
    }

    pub fn depends_on_item_id(&self) -> Option<QueueItemId> {
        self.depends_on_item_id
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn external_id(&self) -> Option<i64> {
        self.external_id
    }

    pub fn external_label(&self) -> Option<&str> {
        self.external_label.as_deref()
    }

    pub fn status(&self) -> QueueItemStatus {
        self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn scheduled_at(&self) -> DateTime<Utc> {
        self.scheduled_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    /// Backoff applied by the most recent retryable failure.
    pub fn last_backoff(&self) -> Option<Duration> {
        self.last_backoff_ms.map(Duration::from_millis)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn can_retry(&self) -> bool {
        self.status == QueueItemStatus::Failed && self.retry_count < self.max_retries
    }

    /// Claimable status, due, and dependency (if any) Completed.
    ///
    /// `dependency_status` looks up another item's status; an unknown
    /// dependency keeps this item blocked.
    pub fn is_ready_for_processing<F>(&self, now: DateTime<Utc>, dependency_status: F) -> bool
    where
        F: FnOnce(QueueItemId) -> Option<QueueItemStatus>,
    {
        if !self.status.is_claimable() || self.scheduled_at > now {
            return false;
        }
        match self.depends_on_item_id {
            None => true,
            Some(dep) => dependency_status(dep) == Some(QueueItemStatus::Completed),
        }
    }

    /// Claim the item for dispatch.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.is_claimable() {
            return Err(DomainError::invalid_transition(format!(
                "cannot start processing from {}",
                self.status
            )));
        }
        if self.scheduled_at > now {
            return Err(DomainError::invalid_transition(format!(
                "item is not due until {}",
                self.scheduled_at
            )));
        }
        self.status = QueueItemStatus::Processing;
        self.processed_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Record success. A `None` id/label keeps whatever an earlier partial success stored.
    pub fn complete(
        &mut self,
        external_id: Option<i64>,
        external_label: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if self.status != QueueItemStatus::Processing {
            return Err(DomainError::invalid_transition(format!(
                "cannot complete from {}",
                self.status
            )));
        }
        self.status = QueueItemStatus::Completed;
        if external_id.is_some() {
            self.external_id = external_id;
        }
        if external_label.is_some() {
            self.external_label = external_label;
        }
        self.error_message = None;
        self.error_code = None;
        self.completed_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Record a retryable failure using the default retry policy.
    pub fn fail(
        &mut self,
        message: impl Into<String>,
        code: Option<&str>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let policy = RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        };
        self.fail_with_policy(message, code, &policy, now)
    }

    /// Record a retryable failure.
    ///
    /// `retry_count` increments (never past `max_retries`); with retries left the
    /// item becomes Failed and is rescheduled by `policy`'s backoff, otherwise it
    /// becomes FailedPermanent. The lower of the item's `max_retries` and
    /// `policy.max_retries` applies.
    pub fn fail_with_policy(
        &mut self,
        message: impl Into<String>,
        code: Option<&str>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_failable("fail")?;
        self.retry_count = (self.retry_count + 1).min(self.max_retries);
        self.error_message = Some(message.into());
        self.error_code = code.map(str::to_string);

        if self.retry_count < self.max_retries && policy.should_retry(self.retry_count) {
            let delay = policy.delay_for_retry(self.retry_count);
            self.status = QueueItemStatus::Failed;
            self.scheduled_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
            self.last_backoff_ms = Some(delay.as_millis() as u64);
        } else {
            self.status = QueueItemStatus::FailedPermanent;
            self.completed_at = Some(now);
        }
        self.touch(now);
        Ok(())
    }

    /// Record a failure no retry can fix (the request itself was rejected).
    pub fn fail_permanently(
        &mut self,
        message: impl Into<String>,
        code: Option<&str>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_failable("fail permanently")?;
        self.retry_count = (self.retry_count + 1).min(self.max_retries);
        self.status = QueueItemStatus::FailedPermanent;
        self.error_message = Some(message.into());
        self.error_code = code.map(str::to_string);
        self.completed_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Escalate to a human: the failure is real but retrying cannot resolve it.
    pub fn require_manual_review(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_failable("require manual review")?;
        self.status = QueueItemStatus::ManualReviewRequired;
        self.error_message = Some(reason.into());
        self.error_code = Some(MANUAL_REVIEW.to_string());
        self.touch(now);
        Ok(())
    }

    /// Override the earliest processing time.
    ///
    /// On an item awaiting manual review this is the "resolved, try again" path
    /// and re-opens it as Pending.
    pub fn schedule(&mut self, at: DateTime<Utc>, now: DateTime<Utc>) -> DomainResult<()> {
        if self.is_terminal() || self.status == QueueItemStatus::Processing {
            return Err(DomainError::invalid_transition(format!(
                "cannot reschedule from {}",
                self.status
            )));
        }
        if self.status == QueueItemStatus::ManualReviewRequired {
            self.status = QueueItemStatus::Pending;
        }
        self.scheduled_at = at;
        self.touch(now);
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        if self.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "cannot cancel from {}",
                self.status
            )));
        }
        self.status = QueueItemStatus::Cancelled;
        self.error_message = Some(reason.into());
        self.error_code = None;
        self.completed_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Hand a claim back after the claiming worker went away mid-dispatch.
    ///
    /// Does not count as a retry: whether the regulator saw the request is
    /// unknown, and the idempotency key covers a duplicate submission.
    pub fn release_claim(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != QueueItemStatus::Processing {
            return Err(DomainError::invalid_transition(format!(
                "cannot release claim from {}",
                self.status
            )));
        }
        self.status = QueueItemStatus::Pending;
        self.scheduled_at = now;
        self.error_message = Some("claim expired before an outcome was recorded".to_string());
        self.error_code = Some(CLAIM_EXPIRED.to_string());
        self.touch(now);
        Ok(())
    }

    fn ensure_failable(&self, action: &str) -> DomainResult<()> {
        match self.status {
            QueueItemStatus::Pending | QueueItemStatus::Processing | QueueItemStatus::Failed => Ok(()),
            other => Err(DomainError::invalid_transition(format!(
                "cannot {action} from {other}"
            ))),
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }
}
