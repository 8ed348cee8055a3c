//! Similarity search over a [`DocumentStore`].
//!
//! The [`SearchEngine`] embeds the query once, scans the requested collection
//! (or every collection), keeps candidates that pass the metadata filter and
//! the similarity threshold, reranks them and truncates to the limit.
//!
//! # Example
//!
//! ```rust,ignore
//! use pcaf_rag::{SearchEngine, SearchOptions, InMemoryDocumentStore, HashEmbeddingProvider};
//!
//! let embedder = Arc::new(HashEmbeddingProvider::default());
//! let engine = SearchEngine::builder()
//!     .embedding_provider(embedder.clone())
//!     .store(Arc::new(InMemoryDocumentStore::new(embedder)))
//!     .build()?;
//!
//! let results = engine.search("electric vehicle emissions", &SearchOptions::default()).await?;
//! ```

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::SearchOptions;
use crate::document::{Document, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::filter::MetadataFilter;
use crate::reranker::{RelevanceReranker, Reranker};
use crate::vectorstore::{DocumentQuery, DocumentStore};

/// Query-side entry point to the document store.
///
/// Construct one via [`SearchEngine::builder()`].
pub struct SearchEngine {
    embedding_provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn DocumentStore>,
    reranker: Arc<dyn Reranker>,
}

impl SearchEngine {
    pub fn builder() -> SearchEngineBuilder {
        SearchEngineBuilder::default()
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedding_provider
    }

    /// Rank documents against `query`.
    ///
    /// Results are ordered by relevance score descending, ties in encounter
    /// order, and hold at most `options.limit` entries. An empty or missing
    /// collection yields an empty list.
    ///
    /// # Errors
    ///
    /// Propagates embedding and store failures.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let query_embedding = self.embedding_provider.embed(query).await.map_err(|e| {
            error!(error = %e, "embedding failed during search");
            e
        })?;

        let collections = match &options.collection {
            Some(name) => vec![name.clone()],
            None => self.store.list_collections().await?.into_iter().map(|c| c.name).collect(),
        };

        let mut candidates = Vec::new();
        for collection in &collections {
            let scored = self
                .store
                .similarity_scan(
                    collection,
                    &query_embedding,
                    options.filter.as_ref(),
                    options.min_similarity,
                )
                .await
                .map_err(|e| {
                    error!(collection = %collection, error = %e, "similarity scan failed");
                    e
                })?;
            debug!(collection = %collection, candidates = scored.len(), "scanned collection");
            candidates.extend(scored.into_iter().map(|s| SearchResult {
                collection: s.collection,
                document: s.document,
                similarity: s.similarity,
                relevance_score: s.similarity,
            }));
        }

        let mut results = self.reranker.rerank(query, candidates).await?;
        results.truncate(options.limit);

        info!(
            result_count = results.len(),
            collections = collections.len(),
            "search completed"
        );
        Ok(results)
    }

    /// Documents matching `filter` in one collection, or in every collection.
    pub async fn documents_by_metadata(
        &self,
        filter: &MetadataFilter,
        collection: Option<&str>,
    ) -> Result<Vec<Document>> {
        let collections = match collection {
            Some(name) => vec![name.to_string()],
            None => self.store.list_collections().await?.into_iter().map(|c| c.name).collect(),
        };
        let mut documents = Vec::new();
        for name in &collections {
            let found =
                self.store.get_documents(name, DocumentQuery::all().filter(filter.clone())).await?;
            documents.extend(found);
        }
        Ok(documents)
    }
}

/// Builder for [`SearchEngine`]. The reranker defaults to [`RelevanceReranker`].
#[derive(Default)]
pub struct SearchEngineBuilder {
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    store: Option<Arc<dyn DocumentStore>>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl SearchEngineBuilder {
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the embedding provider or store is missing.
    pub fn build(self) -> Result<SearchEngine> {
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let store =
            self.store.ok_or_else(|| RagError::ConfigError("store is required".to_string()))?;
        Ok(SearchEngine {
            embedding_provider,
            store,
            reranker: self.reranker.unwrap_or_else(|| Arc::new(RelevanceReranker::new())),
        })
    }
}
