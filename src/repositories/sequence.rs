//! # Batch Sequence Service
//!
//! Per-chain monotonic counter backing batch identifiers. Callers that need
//! the allocation to be atomic with other writes pass a transaction.

use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::models::sync_sequence::{ActiveModel, Column, Entity};

/// Renders the batch identifier for sequence value `n` of a chain.
pub fn format_batch_id(chain_id: Uuid, n: i64) -> String {
    format!("{chain_id}:{n:012}")
}

pub struct SequenceRepository<'a, C: ConnectionTrait> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> SequenceRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    /// Advance the chain's counter and return the new value.
    pub async fn next_value(&self, chain_id: Uuid) -> Result<i64, DbErr> {
        // Make sure the row exists; a concurrent creator wins harmlessly
        Entity::insert(ActiveModel {
            chain_id: Set(chain_id),
            last_value: Set(0),
            updated_at: Set(Utc::now().fixed_offset()),
        })
        .on_conflict(OnConflict::column(Column::ChainId).do_nothing().to_owned())
        .do_nothing()
        .exec(self.db)
        .await?;

        // The increment is a single UPDATE so concurrent allocators serialize on the row
        Entity::update_many()
            .col_expr(Column::LastValue, Expr::col(Column::LastValue).add(1))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::ChainId.eq(chain_id))
            .exec(self.db)
            .await?;

        let row = Entity::find_by_id(chain_id)
            .one(self.db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("sync_sequences[{chain_id}]")))?;
        Ok(row.last_value)
    }

    /// Allocate a fresh batch identifier for the chain.
    pub async fn next_batch_id(&self, chain_id: Uuid) -> Result<String, DbErr> {
        let n = self.next_value(chain_id).await?;
        Ok(format_batch_id(chain_id, n))
    }
}
