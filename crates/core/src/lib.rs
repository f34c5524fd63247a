//! `harvestry-core`: domain foundation building blocks for compliance sync.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;
pub mod license;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{HarvestryEntityId, QueueItemId, SiteId, SyncJobId};
pub use license::{LicenseNumber, StateCode};
pub use value_object::ValueObject;
