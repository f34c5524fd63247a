//! Compliance sync domain (pure, deterministic given a clock value).
//!
//! - `QueueItem`: one regulator operation with its own retry/backoff state machine
//! - `SyncJob`: batch-level orchestration record aggregating progress
//! - `RetryPolicy` / `inter_call_delay`: backoff and rate-limit arithmetic
//! - `resolve_endpoint`: the static `(entity, operation) -> endpoint` table
//!
//! Transitions take `now` explicitly; persistence and dispatch live in
//! `harvestry-infra`.

pub mod backoff;
pub mod endpoint;
pub mod idempotency;
pub mod queue_item;
pub mod sync_job;

pub use backoff::{RetryPolicy, inter_call_delay};
pub use endpoint::{Endpoint, EndpointError, EntityType, HttpMethod, OperationType, resolve_endpoint};
pub use idempotency::idempotency_key;
pub use queue_item::{CLAIM_EXPIRED, MANUAL_REVIEW, NewQueueItem, QueueItem, QueueItemStatus};
pub use sync_job::{DEFAULT_JOB_MAX_RETRIES, SyncDirection, SyncJob, SyncJobStatus};
