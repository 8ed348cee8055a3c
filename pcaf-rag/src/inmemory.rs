//! In-memory document store.
//!
//! [`InMemoryDocumentStore`] keeps every collection in process memory behind a
//! `tokio::sync::RwLock`. Documents are held in insertion order so scans and
//! pagination are reproducible. It backs the tests and the local pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::document::Document;
use crate::embedding::{EmbeddingProvider, cosine_similarity};
use crate::error::{RagError, Result};
use crate::filter::MetadataFilter;
use crate::vectorstore::{
    AddReport, CollectionInfo, CollectionStats, DeleteReport, DeleteSelector, DocumentQuery,
    DocumentStore, HealthStatus, ScoredDocument, StoreHealth, collections,
};

const BACKEND: &str = "InMemory";

#[derive(Debug)]
struct Collection {
    created_at: DateTime<Utc>,
    metadata: Map<String, Value>,
    documents: Vec<Document>,
}

impl Collection {
    fn new(metadata: Map<String, Value>) -> Self {
        Self { created_at: Utc::now(), metadata, documents: Vec::new() }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.documents.iter().position(|d| d.id == id)
    }

    fn info(&self, name: &str) -> CollectionInfo {
        let description = self
            .metadata
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_else(|| collections::describe(name))
            .to_string();
        CollectionInfo {
            name: name.to_string(),
            description,
            created_at: self.created_at,
            document_count: self.documents.len(),
            last_updated: self.documents.iter().map(|d| d.metadata.timestamp).max(),
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    collections: BTreeMap<String, Collection>,
    last_activity: Option<DateTime<Utc>>,
}

impl State {
    fn collection_mut(&mut self, name: &str) -> &mut Collection {
        self.collections.entry(name.to_string()).or_insert_with(|| Collection::new(Map::new()))
    }

    fn touch(&mut self) {
        self.last_activity = Some(Utc::now());
    }
}

/// An in-memory [`DocumentStore`].
///
/// Missing embeddings are generated through the injected [`EmbeddingProvider`].
///
/// # Example
///
/// ```rust,ignore
/// use pcaf_rag::{InMemoryDocumentStore, HashEmbeddingProvider};
///
/// let store = InMemoryDocumentStore::new(Arc::new(HashEmbeddingProvider::default()));
/// ```
pub struct InMemoryDocumentStore {
    embedder: Arc<dyn EmbeddingProvider>,
    state: RwLock<State>,
}

impl InMemoryDocumentStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder, state: RwLock::new(State::default()) }
    }

    /// Make sure `document` has an embedding of the right length.
    async fn prepare(&self, document: &mut Document) -> Result<()> {
        let expected = self.embedder.dimensions();
        match &document.embedding {
            Some(embedding) if embedding.len() != expected => {
                Err(RagError::DimensionMismatch { expected, actual: embedding.len() })
            }
            Some(_) => Ok(()),
            None => {
                let embedding = self.embedder.embed(&document.content).await?;
                if embedding.len() != expected {
                    return Err(RagError::DimensionMismatch { expected, actual: embedding.len() });
                }
                document.embedding = Some(embedding);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn create_collection(
        &self,
        name: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<CollectionInfo> {
        let mut state = self.state.write().await;
        let collection = state
            .collections
            .entry(name.to_string())
            .or_insert_with(|| Collection::new(metadata.unwrap_or_default()));
        Ok(collection.info(name))
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let state = self.state.read().await;
        Ok(state.collections.iter().map(|(name, c)| c.info(name)).collect())
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let existed = state.collections.remove(name).is_some();
        if existed {
            state.touch();
        }
        Ok(existed)
    }

    async fn add_documents(&self, collection: &str, documents: Vec<Document>) -> Result<AddReport> {
        let mut report = AddReport::default();
        let mut ready = Vec::with_capacity(documents.len());
        for mut document in documents {
            match self.prepare(&mut document).await {
                Ok(()) => ready.push(document),
                Err(e) => {
                    warn!(
                        collection,
                        document.id = %document.id,
                        error = %e,
                        "failed to add document"
                    );
                    report.errors += 1;
                }
            }
        }

        let mut state = self.state.write().await;
        let now = Utc::now();
        let target = state.collection_mut(collection);
        for mut document in ready {
            document.metadata.timestamp = now;
            match target.position(&document.id) {
                Some(index) => {
                    target.documents[index] = document;
                    report.updated += 1;
                }
                None => {
                    target.documents.push(document);
                    report.added += 1;
                }
            }
        }
        state.touch();

        debug!(
            collection,
            added = report.added,
            updated = report.updated,
            errors = report.errors,
            "stored documents"
        );
        Ok(report)
    }

    async fn get_documents(&self, collection: &str, query: DocumentQuery) -> Result<Vec<Document>> {
        let state = self.state.read().await;
        let Some(target) = state.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let selected = target
            .documents
            .iter()
            .filter(|d| query.ids.as_ref().is_none_or(|ids| ids.iter().any(|id| *id == d.id)))
            .filter(|d| query.filter.as_ref().is_none_or(|f| f.matches(&d.metadata)))
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(selected)
    }

    async fn update_documents(
        &self,
        collection: &str,
        ids: &[String],
        content: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<usize> {
        let embedding = match &content {
            Some(text) => match self.embedder.embed(text).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    warn!(collection, error = %e, "re-embedding updated content failed");
                    None
                }
            },
            None => None,
        };

        let mut state = self.state.write().await;
        let Some(target) = state.collections.get_mut(collection) else {
            return Ok(0);
        };
        let now = Utc::now();
        let mut changed = 0;
        for id in ids {
            let Some(index) = target.position(id) else {
                continue;
            };
            let document = &mut target.documents[index];
            if let Some(text) = &content {
                document.content = text.clone();
                document.embedding = embedding.clone();
            }
            document.metadata.timestamp = now;
            if let Some(patch) = &metadata {
                document.metadata.merge(patch);
            }
            changed += 1;
        }
        if changed > 0 {
            state.touch();
        }
        Ok(changed)
    }

    async fn delete_documents(
        &self,
        collection: &str,
        selector: DeleteSelector,
    ) -> Result<DeleteReport> {
        let mut state = self.state.write().await;
        let Some(target) = state.collections.get_mut(collection) else {
            let not_found = match &selector {
                DeleteSelector::Ids(ids) => ids.len(),
                DeleteSelector::Filter(_) => 0,
            };
            return Ok(DeleteReport { deleted: 0, not_found });
        };

        let mut report = DeleteReport::default();
        match selector {
            DeleteSelector::Ids(ids) => {
                for id in &ids {
                    match target.position(id) {
                        Some(index) => {
                            target.documents.remove(index);
                            report.deleted += 1;
                        }
                        None => report.not_found += 1,
                    }
                }
            }
            DeleteSelector::Filter(filter) => {
                let before = target.documents.len();
                target.documents.retain(|d| !filter.matches(&d.metadata));
                report.deleted = before - target.documents.len();
            }
        }
        if report.deleted > 0 {
            state.touch();
        }
        Ok(report)
    }

    async fn clear_collection(&self, collection: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.collection_mut(collection).documents.clear();
        state.touch();
        debug!(collection, "cleared collection");
        Ok(())
    }

    async fn collection_stats(&self, collection: &str) -> Result<CollectionStats> {
        let state = self.state.read().await;
        Ok(state
            .collections
            .get(collection)
            .map(|c| CollectionStats::from_documents(&c.documents))
            .unwrap_or_default())
    }

    async fn health_check(&self) -> StoreHealth {
        let state = self.state.read().await;
        StoreHealth {
            status: HealthStatus::Healthy,
            collections: state.collections.keys().cloned().collect(),
            total_documents: state.collections.values().map(|c| c.documents.len()).sum(),
            last_activity: state.last_activity,
        }
    }

    async fn similarity_scan(
        &self,
        collection: &str,
        embedding: &[f32],
        filter: Option<&MetadataFilter>,
        min_similarity: f32,
    ) -> Result<Vec<ScoredDocument>> {
        let state = self.state.read().await;
        let Some(target) = state.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let scored = target
            .documents
            .iter()
            .filter(|d| d.is_embedded())
            .filter(|d| filter.is_none_or(|f| f.matches(&d.metadata)))
            .filter_map(|d| {
                let similarity = cosine_similarity(d.embedding.as_deref()?, embedding);
                (similarity >= min_similarity).then(|| ScoredDocument {
                    collection: collection.to_string(),
                    document: d.clone(),
                    similarity,
                })
            })
            .collect();
        Ok(scored)
    }
}
