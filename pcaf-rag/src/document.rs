//! Data types for stored documents and search results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A retrievable unit: rendered text, a metadata envelope and an optional embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Identifier, unique within its collection.
    pub id: String,
    /// Human-readable rendering of the source record.
    pub content: String,
    /// Metadata used for filtering and ranking.
    pub metadata: DocumentMetadata,
    /// Vector embedding. `None` until generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Document {
    /// Create a document without an embedding.
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        metadata: DocumentMetadata,
    ) -> Self {
        Self { id: id.into(), content: content.into(), metadata, embedding: None }
    }

    /// Attach a precomputed embedding.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Whether the document carries a usable (present and non-zero) embedding.
    ///
    /// All-zero vectors are the fallback produced by a failed embedding call and
    /// are treated the same as a missing embedding.
    pub fn is_embedded(&self) -> bool {
        self.embedding.as_deref().is_some_and(|e| e.iter().any(|v| *v != 0.0))
    }
}

/// The metadata envelope carried by every [`Document`].
///
/// The five well-known fields are typed; anything else lands in `extra` and is
/// serialized flat alongside them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    /// Document category, e.g. `loan_analysis`.
    #[serde(rename = "type")]
    pub doc_type: String,
    /// Origin identifier.
    pub source: String,
    /// Last-modified instant. Refreshed by the store on every upsert.
    pub timestamp: DateTime<Utc>,
    /// PCAF data quality score, 1 (best) to 5 (worst).
    pub data_quality: f64,
    /// Coarse filtering tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Domain-specific fields (loan id, emission figures, risk level, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DocumentMetadata {
    /// Create metadata stamped with the current time and a neutral quality score of 3.
    pub fn new(doc_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            doc_type: doc_type.into(),
            source: source.into(),
            timestamp: Utc::now(),
            data_quality: 3.0,
            tags: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_data_quality(mut self, score: f64) -> Self {
        self.data_quality = score;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set a domain-specific field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Look up a field by its serialized name, including the typed ones.
    ///
    /// `type`, `source`, `timestamp` (RFC 3339), `dataQuality` and `tags` resolve
    /// to the typed fields; every other key is read from `extra`.
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            "type" => Some(Value::from(self.doc_type.as_str())),
            "source" => Some(Value::from(self.source.as_str())),
            "timestamp" => Some(Value::from(self.timestamp.to_rfc3339())),
            "dataQuality" => Some(Value::from(self.data_quality)),
            "tags" => Some(Value::from(self.tags.clone())),
            other => self.extra.get(other).cloned(),
        }
    }

    /// Merge a partial update: typed keys overwrite their fields, others go to `extra`.
    ///
    /// Values of the wrong shape for a typed key are ignored.
    pub fn merge(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            match key.as_str() {
                "type" => {
                    if let Some(s) = value.as_str() {
                        self.doc_type = s.to_string();
                    }
                }
                "source" => {
                    if let Some(s) = value.as_str() {
                        self.source = s.to_string();
                    }
                }
                "timestamp" => {
                    let parsed = value.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok());
                    if let Some(ts) = parsed {
                        self.timestamp = ts.with_timezone(&Utc);
                    }
                }
                "dataQuality" => {
                    if let Some(q) = value.as_f64() {
                        self.data_quality = q;
                    }
                }
                "tags" => {
                    if let Some(items) = value.as_array() {
                        self.tags =
                            items.iter().filter_map(|t| t.as_str().map(str::to_string)).collect();
                    }
                }
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// A matched [`Document`] with its similarity and composite relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// The collection the document was found in.
    pub collection: String,
    /// The matched document.
    pub document: Document,
    /// Cosine similarity between the query and document embeddings, in `[-1, 1]`.
    pub similarity: f32,
    /// Similarity adjusted by quality, recency and tag bonuses, at most 1.0.
    pub relevance_score: f32,
}
