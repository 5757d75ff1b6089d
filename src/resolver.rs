//! Conflict resolution policies.
//!
//! Each strategy is a [`ResolutionPolicy`]; [`ConflictResolver`] picks one
//! from the configured strategy name. Policies are pure and never fail.

use std::fmt;

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use utoipa::ToSchema;

use crate::detector::{ConflictResult, parse_timestamp};
use crate::models::enums::ConflictType;

pub const STRATEGY_FALLBACK_METRIC: &str = "sync_resolver_strategy_fallback_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    LastWriteWins,
    PriorityBased,
    MergeStrategy,
    Manual,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LastWriteWins => "last_write_wins",
            Self::PriorityBased => "priority_based",
            Self::MergeStrategy => "merge_strategy",
            Self::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "last_write_wins" => Some(Self::LastWriteWins),
            "priority_based" => Some(Self::PriorityBased),
            "merge_strategy" => Some(Self::MergeStrategy),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    /// Unknown names fall back to last-write-wins; the fallback is reported, never silent.
    pub fn parse_or_default(value: &str) -> StrategyChoice {
        match Self::parse(value) {
            Some(strategy) => StrategyChoice {
                strategy,
                fallback: false,
            },
            None => {
                tracing::warn!(
                    configured = value,
                    "Unknown resolution strategy, falling back to last_write_wins"
                );
                counter!(STRATEGY_FALLBACK_METRIC).increment(1);
                StrategyChoice {
                    strategy: Self::LastWriteWins,
                    fallback: true,
                }
            }
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyChoice {
    pub strategy: ResolutionStrategy,
    pub fallback: bool,
}

/// The images a policy sees.
#[derive(Debug, Clone, Copy)]
pub struct ConflictImages<'a> {
    pub source: &'a JsonValue,
    pub target: &'a JsonValue,
    /// Source before-image, when the capture recorded one.
    pub base: Option<&'a JsonValue>,
    pub timestamp_field: &'a str,
}

impl<'a> ConflictImages<'a> {
    fn source_ts(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.source.get(self.timestamp_field).and_then(parse_timestamp)
    }

    fn target_ts(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.target.get(self.timestamp_field).and_then(parse_timestamp)
    }
}

pub trait ResolutionPolicy: Send + Sync {
    fn resolve(&self, images: &ConflictImages<'_>) -> JsonValue;
}

/// Newer image wins; ties and missing timestamps go to the source.
pub struct LastWriteWins;

impl ResolutionPolicy for LastWriteWins {
    fn resolve(&self, images: &ConflictImages<'_>) -> JsonValue {
        match (images.source_ts(), images.target_ts()) {
            (Some(source), Some(target)) if target > source => images.target.clone(),
            _ => images.source.clone(),
        }
    }
}

/// The source location is authoritative.
pub struct PriorityBased;

impl ResolutionPolicy for PriorityBased {
    fn resolve(&self, images: &ConflictImages<'_>) -> JsonValue {
        images.source.clone()
    }
}

/// Field-level merge starting from the target image.
///
/// A source field overwrites when the target lacks it, when it is the
/// timestamp and the source's is strictly newer, or when the source changed
/// it relative to the base while the target still holds the base value.
pub struct Merge;

impl ResolutionPolicy for Merge {
    fn resolve(&self, images: &ConflictImages<'_>) -> JsonValue {
        let (Some(source), Some(target)) = (images.source.as_object(), images.target.as_object())
        else {
            return images.target.clone();
        };
        let base = images.base.and_then(JsonValue::as_object);
        let source_newer = match (images.source_ts(), images.target_ts()) {
            (Some(s), Some(t)) => s > t,
            _ => false,
        };

        let mut merged: Map<String, JsonValue> = target.clone();
        for (field, value) in source {
            let overwrite = match target.get(field) {
                None => true,
                Some(_) if field == images.timestamp_field => source_newer,
                Some(current) => base.is_some_and(|base| {
                    let base_value = base.get(field);
                    base_value != Some(value) && base_value == Some(current)
                }),
            };
            if overwrite {
                merged.insert(field.clone(), value.clone());
            }
        }
        JsonValue::Object(merged)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Policy for an automatic strategy; `None` for manual.
    pub fn policy(strategy: ResolutionStrategy) -> Option<&'static dyn ResolutionPolicy> {
        match strategy {
            ResolutionStrategy::LastWriteWins => Some(&LastWriteWins),
            ResolutionStrategy::PriorityBased => Some(&PriorityBased),
            ResolutionStrategy::MergeStrategy => Some(&Merge),
            ResolutionStrategy::Manual => None,
        }
    }

    pub fn resolve(
        &self,
        strategy: ResolutionStrategy,
        images: &ConflictImages<'_>,
    ) -> Option<JsonValue> {
        Self::policy(strategy).map(|policy| policy.resolve(images))
    }
}

/// Review-queue priority: operation priority raised by conflict breadth and staleness.
pub fn conflict_priority(operation_priority: i32, result: &ConflictResult) -> i32 {
    let breadth = i32::try_from(result.conflicting_fields.len())
        .unwrap_or(i32::MAX)
        .saturating_mul(10);
    let staleness = match result.conflict_type {
        Some(ConflictType::VersionConflict) => 50,
        _ => 0,
    };
    operation_priority
        .saturating_add(breadth)
        .saturating_add(staleness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn images<'a>(
        source: &'a JsonValue,
        target: &'a JsonValue,
        base: Option<&'a JsonValue>,
    ) -> ConflictImages<'a> {
        ConflictImages {
            source,
            target,
            base,
            timestamp_field: "updated_at",
        }
    }

    #[test]
    fn last_write_wins_is_symmetric() {
        let older = json!({"title": "old", "updated_at": "2025-01-01T00:00:00Z"});
        let newer = json!({"title": "new", "updated_at": "2025-01-02T00:00:00Z"});

        assert_eq!(LastWriteWins.resolve(&images(&older, &newer, None)), newer);
        assert_eq!(LastWriteWins.resolve(&images(&newer, &older, None)), newer);
    }

    #[test]
    fn last_write_wins_tie_goes_to_source() {
        let a = json!({"title": "a", "updated_at": "2025-01-01T00:00:00Z"});
        let b = json!({"title": "b", "updated_at": "2025-01-01T00:00:00Z"});
        assert_eq!(LastWriteWins.resolve(&images(&a, &b, None)), a);
    }

    #[test]
    fn priority_based_takes_source() {
        let source = json!({"title": "hq"});
        let target = json!({"title": "store", "updated_at": "2099-01-01T00:00:00Z"});
        assert_eq!(PriorityBased.resolve(&images(&source, &target, None)), source);
    }

    #[test]
    fn merge_without_base_keeps_target_values_and_adds_missing_fields() {
        let source = json!({"title": "src", "extra": 1, "updated_at": "2025-01-01T00:00:00Z"});
        let target = json!({"title": "tgt", "updated_at": "2025-01-02T00:00:00Z"});

        let merged = Merge.resolve(&images(&source, &target, None));
        assert_eq!(
            merged,
            json!({"title": "tgt", "extra": 1, "updated_at": "2025-01-02T00:00:00Z"})
        );
    }

    #[test]
    fn merge_combines_disjoint_edits() {
        let base = json!({"title": "Old", "description": "Old Desc", "updated_at": "2025-01-01T00:00:00Z"});
        let source = json!({"title": "Updated Title", "description": "Old Desc", "updated_at": "2025-01-01T01:00:00Z"});
        let target = json!({"title": "Old", "description": "New Desc", "updated_at": "2025-01-01T02:00:00Z"});

        let merged = Merge.resolve(&images(&source, &target, Some(&base)));
        assert_eq!(
            merged,
            json!({"title": "Updated Title", "description": "New Desc", "updated_at": "2025-01-01T02:00:00Z"})
        );
    }

    #[test]
    fn merge_takes_newer_source_timestamp() {
        let source = json!({"updated_at": "2025-01-03T00:00:00Z"});
        let target = json!({"updated_at": "2025-01-02T00:00:00Z"});
        assert_eq!(Merge.resolve(&images(&source, &target, None)), source);
    }

    #[test]
    fn unknown_strategy_falls_back_loudly() {
        let choice = ResolutionStrategy::parse_or_default("coin_flip");
        assert_eq!(choice.strategy, ResolutionStrategy::LastWriteWins);
        assert!(choice.fallback);

        let choice = ResolutionStrategy::parse_or_default("merge_strategy");
        assert_eq!(choice.strategy, ResolutionStrategy::MergeStrategy);
        assert!(!choice.fallback);
    }

    #[test]
    fn manual_has_no_policy() {
        assert!(ConflictResolver::policy(ResolutionStrategy::Manual).is_none());
    }

    #[test]
    fn conflict_priority_rewards_breadth_and_staleness() {
        let mismatch = ConflictResult {
            has_conflict: true,
            conflict_type: Some(ConflictType::DataMismatch),
            conflicting_fields: vec!["a".into(), "b".into()],
        };
        let stale = ConflictResult {
            has_conflict: true,
            conflict_type: Some(ConflictType::VersionConflict),
            conflicting_fields: vec!["updated_at".into()],
        };
        assert_eq!(conflict_priority(1000, &mismatch), 1020);
        assert_eq!(conflict_priority(1000, &stale), 1060);
    }
}
