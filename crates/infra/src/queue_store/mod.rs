//! Persistence boundary for sync jobs and their queued regulator operations.
//!
//! The worker only depends on the `QueueStore` / `SyncJobStore` traits; the
//! in-memory store backs tests and dev, the Postgres store production.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemorySyncStore;
pub use postgres::{MIGRATION_SQL, PostgresSyncStore};
pub use r#trait::{JobProgress, QueueStore, QueueStoreError, SyncJobStore};
