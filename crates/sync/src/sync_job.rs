//! Sync job: batch-level orchestration record for one license and direction.

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use harvestry_core::{
    AggregateRoot, DomainError, DomainResult, LicenseNumber, SiteId, StateCode, SyncJobId,
};

/// Default number of job-level retries.
pub const DEFAULT_JOB_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Pull regulator state into Harvestry
    Inbound,
    /// Push Harvestry mutations to the regulator
    Outbound,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Inbound => "inbound",
            SyncDirection::Outbound => "outbound",
        }
    }
}

impl FromStr for SyncDirection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(SyncDirection::Inbound),
            "outbound" => Ok(SyncDirection::Outbound),
            other => Err(DomainError::validation(format!(
                "unknown sync direction: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncJobStatus {
    Pending,
    Processing,
    Completed,
    /// Failed cycle; may be started again
    Failed,
    FailedPermanent,
    Cancelled,
}

impl SyncJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncJobStatus::Completed | SyncJobStatus::FailedPermanent | SyncJobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncJobStatus::Pending => "pending",
            SyncJobStatus::Processing => "processing",
            SyncJobStatus::Completed => "completed",
            SyncJobStatus::Failed => "failed",
            SyncJobStatus::FailedPermanent => "failed_permanent",
            SyncJobStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for SyncJobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncJobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => SyncJobStatus::Pending,
            "processing" => SyncJobStatus::Processing,
            "completed" => SyncJobStatus::Completed,
            "failed" => SyncJobStatus::Failed,
            "failed_permanent" => SyncJobStatus::FailedPermanent,
            "cancelled" => SyncJobStatus::Cancelled,
            other => {
                return Err(DomainError::validation(format!(
                    "unknown sync job status: {other}"
                )));
            }
        })
    }
}

/// Aggregate root: SyncJob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    id: SyncJobId,
    version: u64,
    site_id: SiteId,
    license_number: LicenseNumber,
    state_code: StateCode,
    direction: SyncDirection,
    status: SyncJobStatus,
    total_items: u32,
    processed_items: u32,
    successful_items: u32,
    failed_items: u32,
    retry_count: u32,
    max_retries: u32,
    error_message: Option<String>,
    error_details: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    last_heartbeat_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl AggregateRoot for SyncJob {
    type Id = SyncJobId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl SyncJob {
    pub fn create(
        site_id: SiteId,
        license_number: LicenseNumber,
        state_code: StateCode,
        direction: SyncDirection,
        max_retries: Option<u32>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if site_id.is_nil() {
            return Err(DomainError::validation("site id is required"));
        }

        Ok(Self {
            id: SyncJobId::new(),
            version: 1,
            site_id,
            license_number,
            state_code,
            direction,
            status: SyncJobStatus::Pending,
            total_items: 0,
            processed_items: 0,
            successful_items: 0,
            failed_items: 0,
            retry_count: 0,
            max_retries: max_retries.unwrap_or(DEFAULT_JOB_MAX_RETRIES),
            error_message: None,
            error_details: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            last_heartbeat_at: None,
            updated_at: now,
        })
    }

    pub fn id_typed(&self) -> SyncJobId {
        self.id
    }

    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    pub fn license_number(&self) -> &LicenseNumber {
        &self.license_number
    }

    pub fn state_code(&self) -> &StateCode {
        &self.state_code
    }

    pub fn direction(&self) -> SyncDirection {
        self.direction
    }

    pub fn status(&self) -> SyncJobStatus {
        self.status
    }

    pub fn total_items(&self) -> u32 {
        self.total_items
    }

    pub fn processed_items(&self) -> u32 {
        self.processed_items
    }

    pub fn successful_items(&self) -> u32 {
        self.successful_items
    }

    pub fn failed_items(&self) -> u32 {
        self.failed_items
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn error_details(&self) -> Option<&str> {
        self.error_details.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn last_heartbeat_at(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn can_retry(&self) -> bool {
        self.status == SyncJobStatus::Failed && self.retry_count < self.max_retries
    }

    /// `None` before the job was started; otherwise wall time from start to
    /// completion (or to `now` while still running).
    pub fn duration(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let started = self.started_at?;
        Some(self.completed_at.unwrap_or(now) - started)
    }

    /// Processing job whose last heartbeat is older than `timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        if self.status != SyncJobStatus::Processing {
            return false;
        }
        let Some(last) = self.last_heartbeat_at.or(self.started_at) else {
            return false;
        };
        match chrono::Duration::from_std(timeout) {
            Ok(timeout) => now - last > timeout,
            Err(_) => false,
        }
    }

    /// Begin a processing cycle. A Failed job may be started again (retry);
    /// counters from the previous cycle are reset.
    pub fn start(&mut self, total_items: u32, now: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            SyncJobStatus::Pending => {}
            SyncJobStatus::Failed if self.retry_count < self.max_retries => {}
            other => {
                return Err(DomainError::invalid_transition(format!(
                    "cannot start sync job from {other}"
                )));
            }
        }
        self.status = SyncJobStatus::Processing;
        self.total_items = total_items;
        self.processed_items = 0;
        self.successful_items = 0;
        self.failed_items = 0;
        self.started_at = Some(now);
        self.completed_at = None;
        self.last_heartbeat_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Grow the item count of a running cycle (items queued after `start`).
    pub fn set_total_items(&mut self, total_items: u32, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != SyncJobStatus::Processing {
            return Err(DomainError::invalid_transition(format!(
                "cannot change item count while {}",
                self.status
            )));
        }
        if total_items < self.processed_items {
            return Err(DomainError::validation(format!(
                "total ({total_items}) below processed ({})",
                self.processed_items
            )));
        }
        self.total_items = total_items;
        self.touch(now);
        Ok(())
    }

    /// Overwrite the progress counters and refresh the heartbeat.
    pub fn record_progress(
        &mut self,
        processed: u32,
        successful: u32,
        failed: u32,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if self.status != SyncJobStatus::Processing {
            return Err(DomainError::invalid_transition(format!(
                "cannot record progress while {}",
                self.status
            )));
        }
        if successful.saturating_add(failed) > processed {
            return Err(DomainError::validation(format!(
                "successful ({successful}) + failed ({failed}) exceeds processed ({processed})"
            )));
        }
        if processed > self.total_items {
            return Err(DomainError::validation(format!(
                "processed ({processed}) exceeds total ({})",
                self.total_items
            )));
        }
        self.processed_items = processed;
        self.successful_items = successful;
        self.failed_items = failed;
        self.last_heartbeat_at = Some(now);
        self.touch(now);
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != SyncJobStatus::Processing {
            return Err(DomainError::invalid_transition(format!(
                "cannot complete sync job from {}",
                self.status
            )));
        }
        self.status = SyncJobStatus::Completed;
        self.error_message = None;
        self.error_details = None;
        self.completed_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// End the cycle as failed. Retries remaining leave the job Failed
    /// (restartable); otherwise it becomes FailedPermanent.
    pub fn fail(
        &mut self,
        message: impl Into<String>,
        details: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if !matches!(self.status, SyncJobStatus::Pending | SyncJobStatus::Processing) {
            return Err(DomainError::invalid_transition(format!(
                "cannot fail sync job from {}",
                self.status
            )));
        }
        self.retry_count = (self.retry_count + 1).min(self.max_retries);
        self.status = if self.retry_count < self.max_retries {
            SyncJobStatus::Failed
        } else {
            SyncJobStatus::FailedPermanent
        };
        self.error_message = Some(message.into());
        self.error_details = details;
        self.completed_at = Some(now);
        self.touch(now);
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        if self.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "cannot cancel sync job from {}",
                self.status
            )));
        }
        self.status = SyncJobStatus::Cancelled;
        self.error_message = Some(reason.into());
        self.completed_at = Some(now);
        self.touch(now);
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }
}
