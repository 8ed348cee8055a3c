//! Document store trait and the report types it returns.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::Document;
use crate::error::Result;
use crate::filter::MetadataFilter;

/// Names of the collections the ingestion pipeline writes to.
pub mod collections {
    pub const PORTFOLIO_DOCUMENTS: &str = "portfolio_documents";
    pub const LOAN_DOCUMENTS: &str = "loan_documents";
    pub const ANALYTICS_DOCUMENTS: &str = "analytics_documents";
    pub const BANK_TARGETS: &str = "bank_targets";
    pub const HISTORICAL_REPORTS: &str = "historical_reports";
    pub const CLIENT_INSIGHTS: &str = "client_insights";

    /// Every well-known collection, in creation order.
    pub const ALL: [&str; 6] = [
        PORTFOLIO_DOCUMENTS,
        LOAN_DOCUMENTS,
        ANALYTICS_DOCUMENTS,
        BANK_TARGETS,
        HISTORICAL_REPORTS,
        CLIENT_INSIGHTS,
    ];

    /// Human-readable description for a collection name.
    pub fn describe(name: &str) -> &'static str {
        match name {
            PORTFOLIO_DOCUMENTS => "Portfolio summaries and overview documents",
            LOAN_DOCUMENTS => "Individual loan analyses and details",
            ANALYTICS_DOCUMENTS => "Portfolio analytics, sector and risk analyses",
            BANK_TARGETS => "Bank climate targets and commitments",
            HISTORICAL_REPORTS => "Historical emissions reports and trends",
            CLIENT_INSIGHTS => "Client-provided documents and insights",
            _ => "Document collection",
        }
    }
}

/// Descriptive view of a collection. Count and last-updated are derived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionInfo {
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub document_count: usize,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Outcome of [`DocumentStore::add_documents`]. Per-document failures are counted, not raised.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddReport {
    pub added: usize,
    pub updated: usize,
    pub errors: usize,
}

impl AddReport {
    pub fn stored(&self) -> usize {
        self.added + self.updated
    }

    pub fn merge(&mut self, other: AddReport) {
        self.added += other.added;
        self.updated += other.updated;
        self.errors += other.errors;
    }
}

/// Outcome of [`DocumentStore::delete_documents`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub deleted: usize,
    pub not_found: usize,
}

/// Statistics computed on demand over one collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    pub document_count: usize,
    pub avg_data_quality: f64,
    pub type_distribution: BTreeMap<String, usize>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl CollectionStats {
    /// Compute stats over a slice of documents.
    pub fn from_documents<'a>(documents: impl IntoIterator<Item = &'a Document>) -> Self {
        let mut stats = Self::default();
        let mut quality_sum = 0.0;
        for doc in documents {
            stats.document_count += 1;
            quality_sum += doc.metadata.data_quality;
            *stats.type_distribution.entry(doc.metadata.doc_type.clone()).or_default() += 1;
            if stats.last_updated.is_none_or(|t| doc.metadata.timestamp > t) {
                stats.last_updated = Some(doc.metadata.timestamp);
            }
        }
        if stats.document_count > 0 {
            stats.avg_data_quality = quality_sum / stats.document_count as f64;
        }
        stats
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Store health snapshot. Produced even when the backend is unreachable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreHealth {
    pub status: HealthStatus,
    pub collections: Vec<String>,
    pub total_documents: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

impl StoreHealth {
    pub fn unhealthy() -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            collections: Vec::new(),
            total_documents: 0,
            last_activity: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Selection for [`DocumentStore::get_documents`].
#[derive(Debug, Clone, Default)]
pub struct DocumentQuery {
    pub ids: Option<Vec<String>>,
    pub filter: Option<MetadataFilter>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl DocumentQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { ids: Some(ids.into_iter().map(Into::into).collect()), ..Self::default() }
    }

    pub fn filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// What to remove in [`DocumentStore::delete_documents`].
#[derive(Debug, Clone)]
pub enum DeleteSelector {
    Ids(Vec<String>),
    Filter(MetadataFilter),
}

/// A document with its raw cosine similarity against a query embedding.
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub collection: String,
    pub document: Document,
    pub similarity: f32,
}

/// A named-collection document store.
///
/// Implementations hold collections of [`Document`]s keyed by id. "Not found"
/// is never an error: missing ids are skipped or counted. Errors are reserved
/// for structural problems (backend unreachable, bad configuration).
///
/// # Example
///
/// ```rust,ignore
/// use pcaf_rag::{DocumentStore, InMemoryDocumentStore, HashEmbeddingProvider};
///
/// let store = InMemoryDocumentStore::new(Arc::new(HashEmbeddingProvider::default()));
/// store.create_collection("loan_documents", None).await?;
/// let report = store.add_documents("loan_documents", docs).await?;
/// assert_eq!(report.errors, 0);
/// ```
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Get-or-create a collection.
    async fn create_collection(
        &self,
        name: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<CollectionInfo>;

    /// List all collections with derived counts.
    async fn list_collections(&self) -> Result<Vec<CollectionInfo>>;

    /// Remove a collection and its documents. Returns `false` if it did not exist.
    async fn delete_collection(&self, name: &str) -> Result<bool>;

    /// Upsert documents, embedding any that lack an embedding.
    ///
    /// Existing ids are overwritten and counted as `updated`; every stored
    /// document gets a fresh `timestamp`. A failing document increments
    /// `errors` and is not stored.
    async fn add_documents(&self, collection: &str, documents: Vec<Document>) -> Result<AddReport>;

    /// Fetch documents by id and/or filter, paginated, in insertion order.
    async fn get_documents(&self, collection: &str, query: DocumentQuery) -> Result<Vec<Document>>;

    /// Partially update content and/or metadata. Missing ids are skipped.
    ///
    /// Returns the number of documents changed.
    async fn update_documents(
        &self,
        collection: &str,
        ids: &[String],
        content: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<usize>;

    /// Delete by id list or by filter.
    async fn delete_documents(
        &self,
        collection: &str,
        selector: DeleteSelector,
    ) -> Result<DeleteReport>;

    /// Empty a collection, keeping its name.
    async fn clear_collection(&self, collection: &str) -> Result<()>;

    /// Count, average quality, type distribution and last update.
    async fn collection_stats(&self, collection: &str) -> Result<CollectionStats>;

    /// Backend health. Never fails; an unreachable backend reports `Unhealthy`.
    async fn health_check(&self) -> StoreHealth;

    /// Score embedded documents in one collection against `embedding`.
    ///
    /// Documents without a usable embedding, failing `filter`, or scoring below
    /// `min_similarity` are dropped. Results keep the store's encounter order.
    async fn similarity_scan(
        &self,
        collection: &str,
        embedding: &[f32],
        filter: Option<&MetadataFilter>,
        min_similarity: f32,
    ) -> Result<Vec<ScoredDocument>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentMetadata;

    #[test]
    fn stats_of_nothing_are_zeroed() {
        let stats = CollectionStats::from_documents(std::iter::empty());
        assert_eq!(stats.document_count, 0);
        assert_eq!(stats.avg_data_quality, 0.0);
        assert!(stats.type_distribution.is_empty());
        assert_eq!(stats.last_updated, None);
    }

    #[test]
    fn stats_average_quality_and_types() {
        let docs = [
            Document::new("a", "", DocumentMetadata::new("loan", "s").with_data_quality(2.0)),
            Document::new("b", "", DocumentMetadata::new("loan", "s").with_data_quality(4.0)),
            Document::new("c", "", DocumentMetadata::new("risk", "s").with_data_quality(3.0)),
        ];
        let stats = CollectionStats::from_documents(&docs);
        assert_eq!(stats.document_count, 3);
        assert!((stats.avg_data_quality - 3.0).abs() < 1e-9);
        assert_eq!(stats.type_distribution["loan"], 2);
        assert!(stats.last_updated.is_some());
    }

    #[test]
    fn unknown_collections_get_generic_description() {
        assert_eq!(collections::describe("elsewhere"), "Document collection");
        assert_ne!(collections::describe(collections::BANK_TARGETS), "Document collection");
    }
}
