//! Document store, embeddings and relevance-ranked search for financed-emissions
//! retrieval.
//!
//! This crate provides:
//! - [`Document`] and its metadata envelope
//! - [`EmbeddingProvider`] with a deterministic hash implementation
//! - [`DocumentStore`] with in-memory and Chroma HTTP backends, selected by [`StoreConfig`]
//! - [`SearchEngine`] with metadata filtering and relevance reranking

pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod inmemory;
pub mod reranker;
pub mod search;
pub mod vectorstore;

#[cfg(feature = "chroma")]
pub mod chroma;
#[cfg(feature = "openai")]
pub mod openai;

pub use config::{ChromaConfig, SearchOptions, SearchOptionsBuilder, StoreConfig};
pub use document::{Document, DocumentMetadata, SearchResult};
pub use embedding::{
    DEFAULT_DIMENSIONS, EmbeddingProvider, FallbackEmbeddingProvider, HashEmbeddingProvider,
    cosine_similarity,
};
pub use error::{RagError, Result};
pub use filter::{FilterValue, MetadataFilter, NumericRange};
pub use inmemory::InMemoryDocumentStore;
pub use reranker::{RelevanceReranker, Reranker};
pub use search::{SearchEngine, SearchEngineBuilder};
pub use vectorstore::{
    AddReport, CollectionInfo, CollectionStats, DeleteReport, DeleteSelector, DocumentQuery,
    DocumentStore, HealthStatus, ScoredDocument, StoreHealth, collections,
};

#[cfg(feature = "chroma")]
pub use chroma::ChromaDocumentStore;
#[cfg(feature = "openai")]
pub use openai::OpenAIEmbeddingProvider;
