//! Typed status and kind columns shared by the sync tables.
//!
//! All of them are persisted as snake_case text so the schema stays readable
//! from SQL and portable between SQLite and Postgres.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Which way changes flow for a synchronized table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Every location pushes to every other location.
    #[sea_orm(string_value = "bidirectional")]
    Bidirectional,
    /// Only the authoritative location pushes, to everyone else.
    #[sea_orm(string_value = "top_down")]
    #[serde(alias = "top-down")]
    TopDown,
    /// Every non-authoritative location pushes to the authoritative one.
    #[sea_orm(string_value = "bottom_up")]
    #[serde(alias = "bottom-up")]
    BottomUp,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    /// Snapshot the source table and push every record.
    #[sea_orm(string_value = "full")]
    Full,
    /// Every pending operation for the (source, target, table) triple.
    #[sea_orm(string_value = "incremental")]
    Incremental,
    /// Only pending operations of the job's own batch.
    #[sea_orm(string_value = "delta")]
    Delta,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "conflict")]
    Conflict,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    #[sea_orm(string_value = "insert")]
    Insert,
    #[sea_orm(string_value = "update")]
    Update,
    #[sea_orm(string_value = "delete")]
    Delete,
    #[sea_orm(string_value = "bulk_update")]
    BulkUpdate,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "conflict")]
    Conflict,
}

impl OperationStatus {
    /// Terminal states never change again, except `conflict → completed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Conflict)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// At least one field diverges between source and target.
    #[sea_orm(string_value = "data_mismatch")]
    DataMismatch,
    /// The source image is older than the target's.
    #[sea_orm(string_value = "version_conflict")]
    VersionConflict,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "resolved")]
    Resolved,
}

macro_rules! display_as_db_value {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.to_value())
                }
            }
        )+
    };
}

display_as_db_value!(
    SyncDirection,
    SyncType,
    JobStatus,
    OperationKind,
    OperationStatus,
    ConflictType,
    ConflictStatus,
);
