//! # Performance Metric Repository
//!
//! Insert-only store for health rollups plus the range query behind the
//! metrics endpoint.

use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use uuid::Uuid;

use crate::models::sync_performance_metric::{ActiveModel, Column, Entity, Model};

/// Range filter for metric reads.
#[derive(Debug, Clone, Default)]
pub struct MetricQuery {
    pub table_name: Option<String>,
    pub from: Option<DateTimeWithTimeZone>,
    pub to: Option<DateTimeWithTimeZone>,
    pub limit: Option<u64>,
}

pub struct MetricRepository<'a, C: ConnectionTrait> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> MetricRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    pub async fn insert(&self, metric: ActiveModel) -> Result<Model, DbErr> {
        metric.insert(self.db).await
    }

    /// Rollups for a chain, newest window first.
    pub async fn list(&self, chain_id: Uuid, query: &MetricQuery) -> Result<Vec<Model>, DbErr> {
        let mut select = Entity::find().filter(Column::ChainId.eq(chain_id));
        if let Some(table) = &query.table_name {
            select = select.filter(Column::TableName.eq(table.as_str()));
        }
        if let Some(from) = query.from {
            select = select.filter(Column::WindowEnd.gte(from));
        }
        if let Some(to) = query.to {
            select = select.filter(Column::WindowEnd.lte(to));
        }
        select
            .order_by_desc(Column::WindowEnd)
            .order_by_asc(Column::TableName)
            .limit(query.limit.unwrap_or(500))
            .all(self.db)
            .await
    }
}
