//! Compliance sync worker.
//!
//! Each tick:
//! 1. hands back claims older than `claim_timeout`
//! 2. asks the license directory which licenses have work due
//! 3. per license (up to `max_concurrent_licenses` at once): resolves the
//!    jurisdiction rules, fetches a ready batch and dispatches it strictly in
//!    order, sleeping `60_000 / rate_limit` ms between regulator calls
//! 4. re-summarises every sync job touched by the batch
//!
//! A failing license is logged and reported; it never aborts the others. A
//! panicking regulator adapter fails the item it was dispatching with code
//! `EXCEPTION`; any other panic inside a license is reported as that
//! license's failure.

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use harvestry_core::{AggregateRoot, ExpectedVersion, SyncJobId};
use harvestry_jurisdiction::JurisdictionRulesFactory;
use harvestry_sync::{
    EndpointError, QueueItem, QueueItemStatus, SyncJobStatus, inter_call_delay, resolve_endpoint,
};

use crate::config::WorkerConfig;
use crate::external::{
    ApiContext, ApiResponse, CredentialDecryptor, DueLicense, FailureClass, LicenseCredentials,
    LicenseDirectory, LicenseDirectoryError, RegulatorApi, RegulatorError, classify, dispatch,
};
use crate::queue_store::{QueueStore, QueueStoreError, SyncJobStore};

/// Collaborators the worker is constructed with.
#[derive(Clone)]
pub struct SyncWorkerDeps {
    pub queue: Arc<dyn QueueStore>,
    pub jobs: Arc<dyn SyncJobStore>,
    pub licenses: Arc<dyn LicenseDirectory>,
    pub api: Arc<dyn RegulatorApi>,
    pub credentials: Arc<dyn CredentialDecryptor>,
    pub rules: Arc<JurisdictionRulesFactory>,
}

/// Result of dispatching one claimed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ItemOutcome {
    Completed,
    /// Failed; retry scheduled after backoff
    Retrying,
    FailedPermanent,
    ManualReview,
}

impl ItemOutcome {
    fn from_status(status: QueueItemStatus) -> Option<Self> {
        match status {
            QueueItemStatus::Completed => Some(ItemOutcome::Completed),
            QueueItemStatus::Failed => Some(ItemOutcome::Retrying),
            QueueItemStatus::FailedPermanent => Some(ItemOutcome::FailedPermanent),
            QueueItemStatus::ManualReviewRequired => Some(ItemOutcome::ManualReview),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemOutcome::Completed => "completed",
            ItemOutcome::Retrying => "retrying",
            ItemOutcome::FailedPermanent => "failed_permanent",
            ItemOutcome::ManualReview => "manual_review",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LicenseFailure {
    pub license_number: String,
    pub error: String,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub licenses_seen: usize,
    pub items_dispatched: usize,
    pub items_succeeded: usize,
    /// Retrying or FailedPermanent
    pub items_failed: usize,
    pub items_escalated: usize,
    /// Items another worker claimed first
    pub claims_lost: usize,
    /// Stale Processing items handed back at tick start
    pub claims_released: usize,
    pub license_failures: Vec<LicenseFailure>,
    pub cancelled: bool,
}

impl TickReport {
    pub fn has_activity(&self) -> bool {
        self.items_dispatched > 0
            || self.claims_lost > 0
            || self.claims_released > 0
            || !self.license_failures.is_empty()
    }

    fn absorb(&mut self, license: &LicenseReport) {
        self.items_dispatched += license.dispatched;
        self.items_succeeded += license.succeeded;
        self.items_failed += license.failed;
        self.items_escalated += license.escalated;
        self.claims_lost += license.claims_lost;
    }
}

#[derive(Debug, Default)]
struct LicenseReport {
    dispatched: usize,
    succeeded: usize,
    failed: usize,
    escalated: usize,
    claims_lost: usize,
}

impl LicenseReport {
    fn record(&mut self, outcome: ItemOutcome) {
        self.dispatched += 1;
        match outcome {
            ItemOutcome::Completed => self.succeeded += 1,
            ItemOutcome::Retrying | ItemOutcome::FailedPermanent => self.failed += 1,
            ItemOutcome::ManualReview => self.escalated += 1,
        }
    }
}

/// What happened when a claimed item was sent (or not) to the regulator.
enum Execution {
    Response(ApiResponse),
    Transport(RegulatorError),
    NoEndpoint(EndpointError),
}

impl Execution {
    fn called_regulator(&self) -> bool {
        matches!(self, Execution::Response(_) | Execution::Transport(_))
    }
}

/// Everything a license's batch needs, resolved once before the first claim.
struct LicenseSession<'a> {
    license: &'a DueLicense,
    base_url: &'static str,
    delay: Duration,
    credentials: LicenseCredentials,
}

enum ItemStep {
    ClaimLost,
    Done {
        outcome: ItemOutcome,
        called_regulator: bool,
    },
}

pub struct SyncWorker {
    config: WorkerConfig,
    deps: SyncWorkerDeps,
}

impl SyncWorker {
    pub fn new(config: WorkerConfig, deps: SyncWorkerDeps) -> Self {
        Self { config, deps }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Poll on `config.interval` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            enabled = self.config.enabled,
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            max_concurrent_licenses = self.config.max_concurrent_licenses,
            "compliance sync worker started"
        );

        let mut interval = tokio::time::interval(self.config.interval.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            if !self.config.enabled {
                debug!("compliance sync disabled; skipping tick");
                continue;
            }

            match self.tick(&cancel).await {
                Ok(report) if report.has_activity() => info!(
                    licenses = report.licenses_seen,
                    dispatched = report.items_dispatched,
                    succeeded = report.items_succeeded,
                    failed = report.items_failed,
                    escalated = report.items_escalated,
                    claims_lost = report.claims_lost,
                    claims_released = report.claims_released,
                    license_failures = report.license_failures.len(),
                    "compliance sync tick finished"
                ),
                Ok(report) => debug!(licenses = report.licenses_seen, "compliance sync tick found no work"),
                Err(err) => error!(error = %err, "could not load licenses due for sync"),
            }
        }

        info!("compliance sync worker stopped");
    }

    /// Run one tick. Only a license directory failure is returned as an error;
    /// per-license failures are collected in the report.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<TickReport, LicenseDirectoryError> {
        let mut report = TickReport::default();
        report.claims_released = self.release_stale_claims().await;

        let licenses = self.deps.licenses.licenses_due_for_sync().await?;
        report.licenses_seen = licenses.len();

        let results: Vec<_> = stream::iter(licenses.iter())
            .map(|license| async move {
                let mut license_report = LicenseReport::default();
                let result =
                    AssertUnwindSafe(self.process_license(license, cancel, &mut license_report))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            Err(anyhow::anyhow!("license sync panicked: {}", panic_message(&*panic)))
                        });
                (license, license_report, result)
            })
            .buffer_unordered(self.config.max_concurrent_licenses.max(1))
            .collect()
            .await;

        for (license, license_report, result) in results {
            report.absorb(&license_report);
            if let Err(err) = result {
                let message = format!("{err:#}");
                error!(
                    license = %license.license_number,
                    state = %license.state_code,
                    error = %message,
                    "license sync failed"
                );
                report.license_failures.push(LicenseFailure {
                    license_number: license.license_number.to_string(),
                    error: message,
                });
            }
        }

        report.cancelled = cancel.is_cancelled();
        Ok(report)
    }

    async fn release_stale_claims(&self) -> usize {
        let now = Utc::now();
        let Ok(timeout) = chrono::Duration::from_std(self.config.claim_timeout) else {
            return 0;
        };

        match self.deps.queue.release_stale_claims(now - timeout, now).await {
            Ok(released) => {
                for item_id in &released {
                    warn!(item_id = %item_id, "released stale queue item claim");
                }
                released.len()
            }
            Err(err) => {
                error!(error = %err, "could not release stale queue item claims");
                0
            }
        }
    }

    async fn process_license(
        &self,
        license: &DueLicense,
        cancel: &CancellationToken,
        report: &mut LicenseReport,
    ) -> anyhow::Result<()> {
        let rules = self.deps.rules.rules_for(&license.state_code)?;
        let delay = inter_call_delay(rules.api_rate_limit_per_minute());
        let base_url = rules.api_base_url(license.use_sandbox);

        let batch = self
            .deps
            .queue
            .next_ready_batch(&license.license_number, self.config.batch_size, Utc::now())
            .await
            .context("fetching ready batch")?;

        if batch.is_empty() {
            return Ok(());
        }
        // A key that cannot be decrypted is a license configuration fault; no
        // item is claimed, so none is charged a retry for it.
        let credentials = self
            .deps
            .credentials
            .decrypt_license(license)
            .context("decrypting license credentials")?;

        debug!(
            license = %license.license_number,
            jurisdiction = rules.state_code(),
            items = batch.len(),
            delay_ms = delay.as_millis() as u64,
            "processing license batch"
        );

        let session = LicenseSession {
            license,
            base_url,
            delay,
            credentials,
        };
        let mut touched_jobs = BTreeSet::new();
        let dispatched = self
            .dispatch_batch(&session, &batch, cancel, report, &mut touched_jobs)
            .await;

        for job_id in touched_jobs {
            if let Err(err) = self.reconcile_job(job_id).await {
                warn!(job_id = %job_id, error = %format!("{err:#}"), "could not update sync job progress");
            }
        }

        dispatched
    }

    async fn dispatch_batch(
        &self,
        session: &LicenseSession<'_>,
        batch: &[QueueItem],
        cancel: &CancellationToken,
        report: &mut LicenseReport,
        touched_jobs: &mut BTreeSet<SyncJobId>,
    ) -> anyhow::Result<()> {
        let mut throttle = false;

        for item in batch {
            if cancel.is_cancelled() {
                debug!(license = %session.license.license_number, "cancellation observed; stopping batch");
                break;
            }
            if throttle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(session.delay) => {}
                }
            }

            touched_jobs.insert(item.sync_job_id());
            match self.process_item(session, item).await? {
                ItemStep::ClaimLost => {
                    report.claims_lost += 1;
                    throttle = false;
                }
                ItemStep::Done {
                    outcome,
                    called_regulator,
                } => {
                    report.record(outcome);
                    throttle = called_regulator;
                }
            }
        }

        Ok(())
    }

    async fn process_item(&self, session: &LicenseSession<'_>, item: &QueueItem) -> anyhow::Result<ItemStep> {
        let license = session.license;
        let claimed = self
            .deps
            .queue
            .claim(item, Utc::now())
            .await
            .context("claiming queue item")?;
        let Some(mut current) = claimed else {
            warn!(
                license = %license.license_number,
                item_id = %item.id_typed(),
                "queue item claimed elsewhere; skipping"
            );
            return Ok(ItemStep::ClaimLost);
        };
        let claimed_version = current.version();

        let execution = self.execute(session, &current).await;
        let called_regulator = execution.called_regulator();
        let now = Utc::now();
        let policy = &self.config.retry_policy;

        match execution {
            Execution::Response(response) if response.is_success => {
                current.complete(response.external_id(), response.external_label(), now)?;
            }
            Execution::Response(response) => {
                let code = format!("HTTP_{}", response.status_code);
                match classify(&response) {
                    FailureClass::Transient => {
                        current.fail_with_policy(response.failure_message(), Some(&code), policy, now)?
                    }
                    FailureClass::Permanent => {
                        current.fail_permanently(response.failure_message(), Some(&code), now)?
                    }
                    FailureClass::Conflict => {
                        current.require_manual_review(response.failure_message(), now)?
                    }
                }
            }
            Execution::Transport(err) => {
                current.fail_with_policy(err.to_string(), Some(err.code()), policy, now)?;
            }
            Execution::NoEndpoint(err @ EndpointError::Unsupported { .. }) => {
                current.fail_with_policy(err.to_string(), Some(err.code()), policy, now)?;
            }
            Execution::NoEndpoint(err @ EndpointError::MissingExternalId { .. }) => {
                current.fail_permanently(err.to_string(), Some(err.code()), now)?;
            }
        }

        match self
            .deps
            .queue
            .update(&current, ExpectedVersion::Exact(claimed_version))
            .await
        {
            Ok(()) => {}
            Err(QueueStoreError::Conflict(msg)) => {
                warn!(
                    license = %license.license_number,
                    item_id = %current.id_typed(),
                    error = %msg,
                    "queue item changed while in flight; outcome dropped"
                );
                return Ok(ItemStep::ClaimLost);
            }
            Err(err) => return Err(err).context("recording queue item outcome"),
        }

        let outcome = ItemOutcome::from_status(current.status())
            .context("queue item left without an outcome")?;
        log_outcome(license, &current, outcome);

        Ok(ItemStep::Done {
            outcome,
            called_regulator,
        })
    }

    async fn execute(&self, session: &LicenseSession<'_>, item: &QueueItem) -> Execution {
        let license = session.license;
        let endpoint =
            match resolve_endpoint(item.entity_type(), item.operation_type(), item.external_id()) {
                Ok(endpoint) => endpoint,
                Err(err) => return Execution::NoEndpoint(err),
            };

        let ctx = ApiContext {
            license_number: &license.license_number,
            base_url: session.base_url,
            credentials: &session.credentials,
        };

        debug!(
            license = %license.license_number,
            item_id = %item.id_typed(),
            method = %endpoint.method,
            endpoint = %endpoint.path,
            "dispatching queue item"
        );

        let call = dispatch(self.deps.api.as_ref(), ctx, &endpoint, item.payload());
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(response)) => Execution::Response(response),
            Ok(Err(err)) => Execution::Transport(err),
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(
                    license = %license.license_number,
                    item_id = %item.id_typed(),
                    error = %message,
                    "regulator adapter panicked"
                );
                Execution::Transport(RegulatorError::Unexpected(format!("adapter panicked: {message}")))
            }
        }
    }

    /// Bring a sync job's status and counters in line with its items.
    async fn reconcile_job(&self, job_id: SyncJobId) -> anyhow::Result<()> {
        let Some(mut job) = self.deps.jobs.get(job_id).await? else {
            warn!(job_id = %job_id, "queue items reference an unknown sync job");
            return Ok(());
        };
        if job.is_terminal() {
            return Ok(());
        }

        let progress = self.deps.queue.job_progress(job_id).await?;
        let expected = ExpectedVersion::Exact(job.version());
        let now = Utc::now();

        match job.status() {
            SyncJobStatus::Pending => job.start(progress.total, now)?,
            SyncJobStatus::Failed if job.can_retry() && !progress.is_settled() => {
                job.start(progress.total, now)?
            }
            SyncJobStatus::Processing => {}
            _ => return Ok(()),
        }

        if job.total_items() != progress.total {
            debug!(
                job_id = %job_id,
                from = job.total_items(),
                to = progress.total,
                "sync job item count changed"
            );
            job.set_total_items(progress.total, now)?;
        }

        job.record_progress(progress.processed, progress.successful, progress.failed, now)?;

        if progress.is_settled() {
            if progress.failed == 0 {
                job.complete(now)?;
                info!(job_id = %job_id, items = progress.total, "sync job completed");
            } else {
                let ids: Vec<String> = progress.failed_item_ids.iter().map(ToString::to_string).collect();
                job.fail(
                    format!("{} of {} items failed", progress.failed, progress.total),
                    Some(format!("failed items: {}", ids.join(", "))),
                    now,
                )?;
                warn!(
                    job_id = %job_id,
                    failed = progress.failed,
                    total = progress.total,
                    status = %job.status(),
                    "sync job failed"
                );
            }
        }

        self.deps.jobs.update(&job, expected).await?;
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn log_outcome(license: &DueLicense, item: &QueueItem, outcome: ItemOutcome) {
    match outcome {
        ItemOutcome::Completed => debug!(
            license = %license.license_number,
            item_id = %item.id_typed(),
            external_id = item.external_id(),
            outcome = outcome.as_str(),
            "queue item synced"
        ),
        ItemOutcome::Retrying => warn!(
            license = %license.license_number,
            item_id = %item.id_typed(),
            retry_count = item.retry_count(),
            next_attempt_at = %item.scheduled_at(),
            error_code = item.error_code(),
            error = item.error_message(),
            outcome = outcome.as_str(),
            "queue item failed; retry scheduled"
        ),
        ItemOutcome::FailedPermanent | ItemOutcome::ManualReview => warn!(
            license = %license.license_number,
            item_id = %item.id_typed(),
            retry_count = item.retry_count(),
            error_code = item.error_code(),
            error = item.error_message(),
            outcome = outcome.as_str(),
            "queue item failed without further retries"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_follows_item_status() {
        assert_eq!(
            ItemOutcome::from_status(QueueItemStatus::Completed),
            Some(ItemOutcome::Completed)
        );
        assert_eq!(
            ItemOutcome::from_status(QueueItemStatus::Failed),
            Some(ItemOutcome::Retrying)
        );
        assert_eq!(
            ItemOutcome::from_status(QueueItemStatus::ManualReviewRequired),
            Some(ItemOutcome::ManualReview)
        );
        assert_eq!(ItemOutcome::from_status(QueueItemStatus::Processing), None);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(&*payload), "owned boom");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }

    #[test]
    fn license_report_buckets_outcomes() {
        let mut license = LicenseReport::default();
        license.record(ItemOutcome::Completed);
        license.record(ItemOutcome::Retrying);
        license.record(ItemOutcome::FailedPermanent);
        license.record(ItemOutcome::ManualReview);
        license.claims_lost = 1;

        let mut report = TickReport::default();
        report.absorb(&license);
        assert_eq!(report.items_dispatched, 4);
        assert_eq!(report.items_succeeded, 1);
        assert_eq!(report.items_failed, 2);
        assert_eq!(report.items_escalated, 1);
        assert_eq!(report.claims_lost, 1);
        assert!(report.has_activity());
        assert!(!TickReport::default().has_activity());
    }
}
