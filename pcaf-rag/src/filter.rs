//! Metadata filters shared by search, lookup and delete-by-filter.
//!
//! A [`MetadataFilter`] is a conjunction of per-key predicates. Each predicate
//! is one of: membership in a list, an inclusive numeric range, or equality.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::document::DocumentMetadata;

/// Inclusive numeric bounds; a missing side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NumericRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl NumericRange {
    fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

/// A single predicate against one metadata field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// The field must equal one of the listed values.
    AnyOf(Vec<Value>),
    /// The field must be numeric and inside the bounds.
    Range(NumericRange),
    /// The field must equal the value.
    Equals(Value),
}

impl FilterValue {
    fn matches(&self, field: Option<&Value>) -> bool {
        let Some(field) = field else {
            return false;
        };
        match self {
            Self::AnyOf(options) => options.iter().any(|o| values_equal(field, o)),
            Self::Range(range) => field.as_f64().is_some_and(|v| range.contains(v)),
            Self::Equals(expected) => values_equal(field, expected),
        }
    }
}

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::AnyOf(items),
            Value::Object(ref map) => match serde_json::from_value::<NumericRange>(value.clone()) {
                Ok(range) if !map.is_empty() => Self::Range(range),
                _ => Self::Equals(value),
            },
            other => Self::Equals(other),
        }
    }
}

/// Numbers compare by value so `3` matches `3.0`; everything else structurally.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

/// A conjunction of field predicates. An empty filter matches everything.
///
/// # Example
///
/// ```rust,ignore
/// let filter = MetadataFilter::new()
///     .eq("type", "loan_analysis")
///     .range("dataQuality", None, Some(3.0))
///     .any_of("riskLevel", ["low", "medium"]);
/// assert!(filter.matches(&doc.metadata));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter {
    entries: BTreeMap<String, FilterValue>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key == value`.
    pub fn eq(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(key, FilterValue::Equals(value.into()))
    }

    /// Require the field to be one of `values`.
    pub fn any_of<I, V>(self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.with(key, FilterValue::AnyOf(values.into_iter().map(Into::into).collect()))
    }

    /// Require `min <= field <= max`.
    pub fn range(self, key: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        self.with(key, FilterValue::Range(NumericRange { min, max }))
    }

    /// Add or replace the predicate for `key`.
    pub fn with(mut self, key: impl Into<String>, value: FilterValue) -> Self {
        self.entries.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FilterValue)> {
        self.entries.iter()
    }

    /// True when every predicate passes. A predicate on an absent field fails.
    pub fn matches(&self, metadata: &DocumentMetadata) -> bool {
        self.entries.iter().all(|(key, predicate)| predicate.matches(metadata.get(key).as_ref()))
    }

    /// Translate into a Chroma `where` clause; `None` for an empty filter.
    pub fn to_chroma_where(&self) -> Option<Value> {
        let mut clauses = Vec::new();
        for (key, predicate) in &self.entries {
            match predicate {
                FilterValue::AnyOf(values) => clauses.push(json!({ key: { "$in": values } })),
                FilterValue::Equals(value) => clauses.push(json!({ key: { "$eq": value } })),
                FilterValue::Range(range) => {
                    if let Some(min) = range.min {
                        clauses.push(json!({ key: { "$gte": min } }));
                    }
                    if let Some(max) = range.max {
                        clauses.push(json!({ key: { "$lte": max } }));
                    }
                }
            }
        }
        match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(json!({ "$and": clauses })),
        }
    }
}

impl FromIterator<(String, FilterValue)> for MetadataFilter {
    fn from_iter<T: IntoIterator<Item = (String, FilterValue)>>(iter: T) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> DocumentMetadata {
        DocumentMetadata::new("loan_analysis", "loan_service")
            .with_data_quality(2.0)
            .with_tags(["ev"])
            .with_field("riskLevel", "low")
            .with_field("emissionIntensity", 1.5)
    }

    #[test]
    fn empty_filter_matches() {
        assert!(MetadataFilter::new().matches(&meta()));
    }

    #[test]
    fn list_range_and_equality() {
        let m = meta();
        assert!(MetadataFilter::new().any_of("riskLevel", ["low", "medium"]).matches(&m));
        assert!(!MetadataFilter::new().any_of("riskLevel", ["high"]).matches(&m));
        assert!(MetadataFilter::new().range("dataQuality", Some(1.0), Some(2.0)).matches(&m));
        assert!(MetadataFilter::new().range("dataQuality", None, Some(2.0)).matches(&m));
        assert!(!MetadataFilter::new().range("dataQuality", Some(2.5), None).matches(&m));
        assert!(MetadataFilter::new().eq("dataQuality", 2).matches(&m));
        assert!(!MetadataFilter::new().eq("type", "other").matches(&m));
    }

    #[test]
    fn range_on_missing_or_text_field_fails() {
        let m = meta();
        assert!(!MetadataFilter::new().range("absent", Some(0.0), None).matches(&m));
        assert!(!MetadataFilter::new().range("riskLevel", None, None).matches(&m));
    }

    #[test]
    fn deserializes_by_shape() {
        let filter: MetadataFilter = serde_json::from_value(json!({
            "riskLevel": ["low"],
            "dataQuality": {"max": 3},
            "type": "loan_analysis",
        }))
        .unwrap();
        assert!(filter.matches(&meta()));
        let entries: Vec<_> = filter.iter().map(|(_, v)| v.clone()).collect();
        assert!(entries.iter().any(|v| matches!(v, FilterValue::Range(_))));
        assert!(entries.iter().any(|v| matches!(v, FilterValue::AnyOf(_))));
    }

    #[test]
    fn chroma_where_uses_and_for_multiple_clauses() {
        let filter = MetadataFilter::new().eq("type", "x");
        assert_eq!(filter.to_chroma_where(), Some(json!({"type": {"$eq": "x"}})));
        let filter = filter.range("dataQuality", Some(1.0), Some(3.0));
        let clause = filter.to_chroma_where().unwrap();
        assert_eq!(clause["$and"].as_array().unwrap().len(), 3);
        assert_eq!(MetadataFilter::new().to_chroma_where(), None);
    }

    #[test]
    fn from_value_classifies_objects() {
        assert!(matches!(FilterValue::from(json!({"min": 1})), FilterValue::Range(_)));
        assert!(matches!(FilterValue::from(json!({"other": 1})), FilterValue::Equals(_)));
        assert!(matches!(FilterValue::from(json!([1, 2])), FilterValue::AnyOf(_)));
    }
}
