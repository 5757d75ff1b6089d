//! # Data Models
//!
//! SeaORM entities for the chain hierarchy and the sync engine's state.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod chain;
pub mod enums;
pub mod location;
pub mod region;
pub mod sync_configuration;
pub mod sync_conflict;
pub mod sync_job;
pub mod sync_operation;
pub mod sync_performance_metric;
pub mod sync_sequence;

pub use chain::Entity as Chain;
pub use location::Entity as Location;
pub use region::Entity as Region;
pub use sync_configuration::Entity as SyncConfiguration;
pub use sync_conflict::Entity as SyncConflict;
pub use sync_job::Entity as SyncJob;
pub use sync_operation::Entity as SyncOperation;
pub use sync_performance_metric::Entity as SyncPerformanceMetric;
pub use sync_sequence::Entity as SyncSequence;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "chain-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
