//! Per-location table stores.
//!
//! The engine never builds SQL against a location's tables; each
//! (location, table) pair resolves to a typed [`TableAdapter`] registered
//! at startup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::StoreError;

#[async_trait]
pub trait TableAdapter: Send + Sync {
    /// Current image of a record, `None` when absent.
    async fn get(&self, record_id: &str) -> Result<Option<JsonValue>, StoreError>;

    /// Write a full record image; `None` deletes. Deleting an absent record succeeds.
    async fn apply_image(&self, record_id: &str, image: Option<&JsonValue>)
    -> Result<(), StoreError>;

    /// Snapshot of every record, used by full syncs.
    async fn scan(&self) -> Result<Vec<(String, JsonValue)>, StoreError> {
        Err(StoreError::Unsupported("scan".to_string()))
    }
}

type AdapterKey = (Uuid, String);

/// Adapters keyed by (location, table).
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<AdapterKey, Arc<dyn TableAdapter>>>,
    in_memory_fallback: bool,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that provisions an empty in-memory store for unknown pairs.
    pub fn with_in_memory_fallback() -> Self {
        Self {
            adapters: RwLock::default(),
            in_memory_fallback: true,
        }
    }

    pub fn register(&self, location_id: Uuid, table: &str, adapter: Arc<dyn TableAdapter>) {
        let mut adapters = self
            .adapters
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        adapters.insert((location_id, table.to_string()), adapter);
    }

    pub fn resolve(&self, location_id: Uuid, table: &str) -> Result<Arc<dyn TableAdapter>, StoreError> {
        let key = (location_id, table.to_string());
        {
            let adapters = self
                .adapters
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(adapter) = adapters.get(&key) {
                return Ok(adapter.clone());
            }
        }

        if !self.in_memory_fallback {
            return Err(StoreError::NoAdapter {
                location_id,
                table: table.to_string(),
            });
        }

        let mut adapters = self
            .adapters
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let adapter = adapters
            .entry(key)
            .or_insert_with(|| Arc::new(InMemoryTableAdapter::new()) as Arc<dyn TableAdapter>);
        Ok(adapter.clone())
    }
}

/// Map-backed store. Failure injection makes the next N writes fail.
#[derive(Debug, Default)]
pub struct InMemoryTableAdapter {
    records: Mutex<HashMap<String, JsonValue>>,
    failing_writes: Mutex<u32>,
    failure: Mutex<Option<StoreError>>,
}

impl InMemoryTableAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (String, JsonValue)>,
    {
        Self {
            records: Mutex::new(records.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Fail the next `count` writes with `error`.
    pub fn fail_next_writes(&self, count: u32, error: StoreError) {
        *self.lock_failing() = count;
        *self
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(error);
    }

    pub fn insert(&self, record_id: &str, image: JsonValue) {
        self.lock_records().insert(record_id.to_string(), image);
    }

    pub fn snapshot(&self, record_id: &str) -> Option<JsonValue> {
        self.lock_records().get(record_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, HashMap<String, JsonValue>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_failing(&self) -> std::sync::MutexGuard<'_, u32> {
        self.failing_writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn injected_failure(&self) -> Option<StoreError> {
        let mut remaining = self.lock_failing();
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        let failure = self
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Some(
            failure
                .clone()
                .unwrap_or_else(|| StoreError::Unavailable("injected failure".to_string())),
        )
    }
}

#[async_trait]
impl TableAdapter for InMemoryTableAdapter {
    async fn get(&self, record_id: &str) -> Result<Option<JsonValue>, StoreError> {
        Ok(self.lock_records().get(record_id).cloned())
    }

    async fn apply_image(
        &self,
        record_id: &str,
        image: Option<&JsonValue>,
    ) -> Result<(), StoreError> {
        if let Some(error) = self.injected_failure() {
            return Err(error);
        }
        let mut records = self.lock_records();
        match image {
            Some(image) => {
                records.insert(record_id.to_string(), image.clone());
            }
            None => {
                records.remove(record_id);
            }
        }
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<(String, JsonValue)>, StoreError> {
        let mut rows: Vec<_> = self
            .lock_records()
            .iter()
            .map(|(id, image)| (id.clone(), image.clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unknown_pair_without_fallback_is_an_error() {
        let registry = AdapterRegistry::new();
        let err = registry.resolve(Uuid::new_v4(), "orders").err();
        assert!(matches!(err, Some(StoreError::NoAdapter { .. })));
    }

    #[tokio::test]
    async fn fallback_provisions_one_store_per_pair() {
        let registry = AdapterRegistry::with_in_memory_fallback();
        let location = Uuid::new_v4();

        let first = registry.resolve(location, "orders").unwrap();
        first.apply_image("1", Some(&json!({"a": 1}))).await.unwrap();

        let again = registry.resolve(location, "orders").unwrap();
        assert_eq!(again.get("1").await.unwrap(), Some(json!({"a": 1})));

        let other = registry.resolve(location, "menus").unwrap();
        assert_eq!(other.get("1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn deleting_absent_record_succeeds() {
        let adapter = InMemoryTableAdapter::new();
        assert!(adapter.apply_image("missing", None).await.is_ok());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let adapter = InMemoryTableAdapter::new();
        adapter.fail_next_writes(1, StoreError::Rejected("fk".into()));

        let first = adapter.apply_image("1", Some(&json!({}))).await;
        assert_eq!(first, Err(StoreError::Rejected("fk".into())));
        assert!(adapter.apply_image("1", Some(&json!({}))).await.is_ok());
        assert_eq!(adapter.len(), 1);
    }
}
