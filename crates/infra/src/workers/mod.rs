//! Background workers.

pub mod sync_worker;

pub use sync_worker::{ItemOutcome, LicenseFailure, SyncWorker, SyncWorkerDeps, TickReport};
