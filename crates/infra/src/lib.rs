//! Infrastructure layer: storage, config, external service ports and the sync worker.

pub mod config;
pub mod external;
pub mod queue_store;
pub mod workers;


pub use config::{ConfigError, WorkerConfig};
pub use queue_store::{
    InMemorySyncStore, JobProgress, PostgresSyncStore, QueueStore, QueueStoreError, SyncJobStore,
};
pub use workers::{SyncWorker, SyncWorkerDeps, TickReport};
