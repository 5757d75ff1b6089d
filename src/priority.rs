//! Deterministic sync priority scoring.
//!
//! `score = 1000 + table weight + operation weight + location priority`.
//! Higher scores run first; equal scores run in creation order.

use crate::models::enums::OperationKind;

pub const BASE_PRIORITY: i32 = 1000;

/// Shared reference data other tables point at.
const REFERENCE_TABLES: &[&str] = &["categories", "locations", "users", "roles", "menu_items"];
/// Documents every site must hold the same version of.
const DOCUMENT_TABLES: &[&str] = &["documents", "sop_documents", "training_materials"];

/// Built-in weight for a table: reference data > documents > transactional rows.
pub fn table_weight(table: &str) -> i32 {
    if REFERENCE_TABLES.contains(&table) {
        300
    } else if DOCUMENT_TABLES.contains(&table) {
        200
    } else {
        100
    }
}

/// Deletes first since they risk dangling references elsewhere.
pub fn operation_weight(kind: OperationKind) -> i32 {
    match kind {
        OperationKind::Delete => 400,
        OperationKind::Insert => 300,
        OperationKind::Update => 200,
        OperationKind::BulkUpdate => 100,
    }
}

pub fn calculate_sync_priority(table: &str, kind: OperationKind, location_priority: i32) -> i32 {
    calculate_weighted_priority(table_weight(table), kind, location_priority)
}

/// Same score with an explicit table weight (a configuration override).
pub fn calculate_weighted_priority(
    table_weight: i32,
    kind: OperationKind,
    location_priority: i32,
) -> i32 {
    BASE_PRIORITY
        .saturating_add(table_weight)
        .saturating_add(operation_weight(kind))
        .saturating_add(location_priority)
}

/// Configured weight when non-zero, else the built-in one.
pub fn effective_table_weight(table: &str, configured: i32) -> i32 {
    if configured != 0 {
        configured
    } else {
        table_weight(table)
    }
}
