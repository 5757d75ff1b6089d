//! SyncConfiguration entity model
//!
//! One row per (chain, table): how the table is synchronized across the
//! chain's locations. Written by chain administrators, read on every
//! scheduling pass and on every captured mutation.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

use super::enums::SyncDirection;

/// Field used for version ordering when the rules do not name one.
pub const DEFAULT_TIMESTAMP_FIELD: &str = "updated_at";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_configurations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub chain_id: Uuid,
    pub table_name: String,
    pub sync_direction: SyncDirection,
    /// Stored as free text so a misconfigured value can be detected and reported.
    pub resolution_strategy: String,
    pub batch_size: i32,
    pub frequency_minutes: i32,
    /// Overrides the built-in table weight when non-zero.
    pub priority_weight: i32,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub field_rules: Option<JsonValue>,
    /// Authoritative location for top-down and bottom-up tables.
    pub source_location_id: Option<Uuid>,
    /// Optional whitelist of target locations.
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub target_location_ids: Option<JsonValue>,
    pub is_active: bool,
    pub last_run_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::chain::Entity",
        from = "Column::ChainId",
        to = "super::chain::Column::Id",
        on_delete = "Cascade"
    )]
    Chain,
    #[sea_orm(has_many = "super::sync_job::Entity")]
    SyncJob,
}

impl Related<super::chain::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Chain.def()
    }
}

impl Related<super::sync_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncJob.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Field-level filter rules applied to captured images.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FieldRules {
    /// When set, only these fields are propagated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_fields: Option<Vec<String>>,
    /// Fields never propagated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_fields: Vec<String>,
    /// Last-modified field used for version ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_field: Option<String>,
}

impl FieldRules {
    pub fn timestamp_field(&self) -> &str {
        self.timestamp_field
            .as_deref()
            .unwrap_or(DEFAULT_TIMESTAMP_FIELD)
    }

    /// Apply include/exclude filters to a record image. The timestamp field
    /// always survives so version ordering keeps working.
    pub fn filter_image(&self, image: &JsonValue) -> JsonValue {
        let JsonValue::Object(map) = image else {
            return image.clone();
        };
        let ts = self.timestamp_field();
        let filtered = map
            .iter()
            .filter(|(key, _)| {
                if key.as_str() == ts {
                    return true;
                }
                if self.exclude_fields.iter().any(|f| f == *key) {
                    return false;
                }
                match &self.include_fields {
                    Some(include) => include.iter().any(|f| f == *key),
                    None => true,
                }
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        JsonValue::Object(filtered)
    }
}

impl Model {
    /// Parsed field rules; malformed JSON degrades to no filtering.
    pub fn rules(&self) -> FieldRules {
        self.field_rules
            .as_ref()
            .and_then(|raw| serde_json::from_value(raw.clone()).ok())
            .unwrap_or_default()
    }

    /// Explicit target whitelist, if configured.
    pub fn target_ids(&self) -> Option<Vec<Uuid>> {
        self.target_location_ids
            .as_ref()
            .and_then(|raw| serde_json::from_value::<Vec<Uuid>>(raw.clone()).ok())
            .filter(|ids| !ids.is_empty())
    }
}
