//! # Repository Layer
//!
//! Repositories encapsulating SeaORM access for the hierarchy and the sync
//! engine's state. Each borrows any [`sea_orm::ConnectionTrait`], so the same
//! code runs on the pool or inside a transaction.

pub mod hierarchy;
pub mod sequence;
pub mod sync_configuration;
pub mod sync_conflict;
pub mod sync_job;
pub mod sync_operation;
pub mod sync_performance_metric;

pub use hierarchy::{HierarchyRepository, NewLocation};
pub use sequence::SequenceRepository;
pub use sync_configuration::{ConfigurationInput, SyncConfigurationRepository};
pub use sync_conflict::{ConflictRepository, ConflictResolution, NewConflict};
pub use sync_job::{NewSyncJob, SyncJobRepository};
pub use sync_operation::{ClaimFilter, Completion, NewOperation, OperationLedger, PendingStats};
pub use sync_performance_metric::{MetricQuery, MetricRepository};
