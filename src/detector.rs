//! Conflict detection.
//!
//! Pure functions over JSON record images; safe to call concurrently.
//! The timestamp field drives version ordering and is left out of the
//! field diff. When the capture carried a before-image, only fields the
//! source actually changed are compared, and a target value equal to the
//! source's before value is not a divergence (the target never touched it).

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

use crate::models::enums::ConflictType;
use crate::models::sync_configuration::DEFAULT_TIMESTAMP_FIELD;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ConflictResult {
    pub has_conflict: bool,
    pub conflict_type: Option<ConflictType>,
    pub conflicting_fields: Vec<String>,
}

impl ConflictResult {
    fn none() -> Self {
        Self {
            has_conflict: false,
            conflict_type: None,
            conflicting_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConflictDetector {
    timestamp_field: String,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(DEFAULT_TIMESTAMP_FIELD)
    }
}

impl ConflictDetector {
    pub fn new(timestamp_field: impl Into<String>) -> Self {
        Self {
            timestamp_field: timestamp_field.into(),
        }
    }

    pub fn timestamp_field(&self) -> &str {
        &self.timestamp_field
    }

    /// Compare a source image with the target's current image.
    pub fn detect(&self, source: &JsonValue, target: &JsonValue) -> ConflictResult {
        self.detect_change(None, source, target)
    }

    /// Like [`detect`](Self::detect), narrowed by the source's before-image.
    pub fn detect_change(
        &self,
        before: Option<&JsonValue>,
        after: &JsonValue,
        target: &JsonValue,
    ) -> ConflictResult {
        let (Some(after_map), Some(target_map)) = (after.as_object(), target.as_object()) else {
            return ConflictResult::none();
        };
        let before_map = before.and_then(JsonValue::as_object);

        let mut fields: Vec<String> = after_map
            .iter()
            .filter(|(field, _)| field.as_str() != self.timestamp_field)
            .filter(|(field, value)| {
                let Some(current) = target_map.get(field.as_str()) else {
                    return false;
                };
                if current.is_null() || current == *value {
                    return false;
                }
                match before_map {
                    // Unchanged by the source, or untouched by the target
                    Some(base) => {
                        let base_value = base.get(field.as_str());
                        base_value != Some(*value) && base_value != Some(current)
                    }
                    None => true,
                }
            })
            .map(|(field, _)| field.clone())
            .collect();

        let stale = match (
            after_map.get(&self.timestamp_field).and_then(parse_timestamp),
            target_map.get(&self.timestamp_field).and_then(parse_timestamp),
        ) {
            (Some(source_ts), Some(target_ts)) => source_ts < target_ts,
            _ => false,
        };

        if stale {
            fields.push(self.timestamp_field.clone());
            return ConflictResult {
                has_conflict: true,
                conflict_type: Some(ConflictType::VersionConflict),
                conflicting_fields: fields,
            };
        }

        if fields.is_empty() {
            return ConflictResult::none();
        }

        ConflictResult {
            has_conflict: true,
            conflict_type: Some(ConflictType::DataMismatch),
            conflicting_fields: fields,
        }
    }
}

/// Fields of `after` that differ from `before`; every field when there is no before-image.
pub fn changed_fields(before: Option<&JsonValue>, after: &JsonValue) -> Vec<String> {
    let Some(after_map) = after.as_object() else {
        return Vec::new();
    };
    let before_map = before.and_then(JsonValue::as_object);
    after_map
        .iter()
        .filter(|(field, value)| match before_map {
            Some(base) => base.get(field.as_str()) != Some(*value),
            None => true,
        })
        .map(|(field, _)| field.clone())
        .collect()
}

/// Last-modified value as RFC 3339 text or integer epoch milliseconds.
pub fn parse_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        JsonValue::Number(number) => number
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_images_never_conflict() {
        let detector = ConflictDetector::default();
        let image = json!({"title": "A", "body": null, "updated_at": "2025-01-01T00:00:00Z"});
        assert!(!detector.detect(&image, &image).has_conflict);
    }

    #[test]
    fn differing_non_null_field_is_data_mismatch() {
        let detector = ConflictDetector::default();
        let source = json!({"title": "A", "updated_at": "2025-01-02T00:00:00Z"});
        let target = json!({"title": "B", "updated_at": "2025-01-01T00:00:00Z"});

        let result = detector.detect(&source, &target);
        assert!(result.has_conflict);
        assert_eq!(result.conflict_type, Some(ConflictType::DataMismatch));
        assert_eq!(result.conflicting_fields, vec!["title".to_string()]);
    }

    #[test]
    fn null_or_missing_target_field_is_not_a_conflict() {
        let detector = ConflictDetector::default();
        let source = json!({"title": "A", "notes": "n"});
        let target = json!({"title": null});
        assert!(!detector.detect(&source, &target).has_conflict);
    }

    #[test]
    fn stale_source_is_version_conflict_even_when_fields_match() {
        let detector = ConflictDetector::default();
        let source = json!({"title": "A", "updated_at": "2025-01-01T00:00:00Z"});
        let target = json!({"title": "A", "updated_at": "2025-01-02T00:00:00Z"});

        let result = detector.detect(&source, &target);
        assert!(result.has_conflict);
        assert_eq!(result.conflict_type, Some(ConflictType::VersionConflict));
        assert_eq!(result.conflicting_fields, vec!["updated_at".to_string()]);
    }

    #[test]
    fn newer_timestamp_alone_is_not_a_mismatch() {
        let detector = ConflictDetector::default();
        let source = json!({"title": "A", "updated_at": "2025-01-02T00:00:00Z"});
        let target = json!({"title": "A", "updated_at": "2025-01-01T00:00:00Z"});
        assert!(!detector.detect(&source, &target).has_conflict);
    }

    #[test]
    fn field_untouched_at_target_is_not_a_divergence() {
        let detector = ConflictDetector::default();
        let before = json!({"title": "Old", "description": "Old Desc", "updated_at": 1});
        let after = json!({"title": "Old", "description": "New Desc", "updated_at": 3});
        let target = json!({"title": "Updated", "description": "Old Desc", "updated_at": 2});

        assert!(!detector.detect_change(Some(&before), &after, &target).has_conflict);
    }

    #[test]
    fn epoch_millis_and_rfc3339_compare_on_one_timeline() {
        let detector = ConflictDetector::default();
        // 1_700_000_000_000 ms is 2023-11-14T22:13:20Z
        let source = json!({"updated_at": 1_700_000_000_000_i64});
        let target = json!({"updated_at": "2023-11-14T22:13:21Z"});
        assert_eq!(
            detector.detect(&source, &target).conflict_type,
            Some(ConflictType::VersionConflict)
        );
    }

    #[test]
    fn changed_fields_without_before_is_everything() {
        let after = json!({"a": 1, "b": 2});
        assert_eq!(changed_fields(None, &after).len(), 2);
        let before = json!({"a": 1, "b": 1});
        assert_eq!(changed_fields(Some(&before), &after), vec!["b".to_string()]);
    }
}
