//! HTTP-backed document store speaking the Chroma REST API.
//!
//! This module is only available when the `chroma` feature is enabled.
//!
//! Embeddings are computed client-side through the injected provider and sent
//! with every write and query. Metadata is flattened to scalars on the wire:
//! `tags` becomes a comma-joined string and `timestamp` an RFC 3339 string.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::ChromaConfig;
use crate::document::{Document, DocumentMetadata};
use crate::embedding::{EmbeddingProvider, cosine_similarity};
use crate::error::{RagError, Result};
use crate::filter::MetadataFilter;
use crate::vectorstore::{
    AddReport, CollectionInfo, CollectionStats, DeleteReport, DeleteSelector, DocumentQuery,
    DocumentStore, HealthStatus, ScoredDocument, StoreHealth, collections,
};

const SERVICE: &str = "chroma";
const BACKEND: &str = "Chroma";

/// A [`DocumentStore`] backed by a remote Chroma server.
///
/// # Example
///
/// ```rust,ignore
/// use pcaf_rag::{ChromaConfig, ChromaDocumentStore, HashEmbeddingProvider};
///
/// let embedder = Arc::new(HashEmbeddingProvider::default());
/// let store = ChromaDocumentStore::new(ChromaConfig::default(), embedder)?;
/// let health = store.health_check().await;
/// ```
pub struct ChromaDocumentStore {
    client: reqwest::Client,
    config: ChromaConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    last_activity: RwLock<Option<DateTime<Utc>>>,
}

impl ChromaDocumentStore {
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the base URL is empty.
    pub fn new(config: ChromaConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(RagError::ConfigError("chroma base_url must not be empty".to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            config,
            embedder,
            last_activity: RwLock::new(None),
        })
    }

    /// Wipe every collection on the server.
    pub async fn reset(&self) -> Result<()> {
        self.call(Method::POST, "/api/v1/reset", None, self.config.timeout).await?;
        warn!(base_url = %self.config.base_url, "vector store reset");
        self.touch().await;
        Ok(())
    }

    async fn touch(&self) {
        *self.last_activity.write().await = Some(Utc::now());
    }

    fn collection_path(name: &str, action: &str) -> String {
        if action.is_empty() {
            format!("/api/v1/collections/{name}")
        } else {
            format!("/api/v1/collections/{name}/{action}")
        }
    }

    /// Send one request; non-2xx becomes [`RagError::HttpStatus`], an elapsed
    /// timeout [`RagError::Timeout`]. Non-JSON success bodies read as `{}`.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let mut request = self.client.request(method.clone(), &url).timeout(timeout);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        debug!(%method, %url, "vector store request");
        let response = request.send().await.map_err(|e| classify(e, timeout))?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));
        let text = response.text().await.map_err(|e| classify(e, timeout))?;

        if !status.is_success() {
            error!(%method, %url, status = status.as_u16(), "vector store API error");
            return Err(RagError::HttpStatus { status: status.as_u16(), body: text });
        }
        if !is_json || text.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T> {
        let value = self.call(method, path, body, self.config.timeout).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let path = Self::collection_path(collection, "count");
        let value = self.call(Method::GET, &path, None, self.config.timeout).await?;
        let count = value.as_u64().or_else(|| value.get("count").and_then(Value::as_u64));
        Ok(count.unwrap_or(0) as usize)
    }

    async fn fetch(&self, collection: &str, body: Value) -> Result<GetResponse> {
        let path = Self::collection_path(collection, "get");
        match self.call_as::<GetResponse>(Method::POST, &path, Some(body)).await {
            Err(RagError::HttpStatus { status: 404, .. }) => Ok(GetResponse::default()),
            other => other,
        }
    }

    async fn existing_ids(&self, collection: &str, ids: &[String]) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.fetch(collection, json!({ "ids": ids, "include": [] })).await?.ids)
    }

    async fn embed_missing(&self, document: &mut Document) -> Result<()> {
        let expected = self.embedder.dimensions();
        if document.embedding.is_none() {
            document.embedding = Some(self.embedder.embed(&document.content).await?);
        }
        let actual = document.embedding.as_ref().map_or(0, Vec::len);
        if actual != expected {
            return Err(RagError::DimensionMismatch { expected, actual });
        }
        Ok(())
    }

    async fn write(&self, collection: &str, action: &str, documents: &[Document]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let body = json!({
            "ids": documents.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            "documents": documents.iter().map(|d| d.content.as_str()).collect::<Vec<_>>(),
            "embeddings": documents
                .iter()
                .map(|d| d.embedding.clone().unwrap_or_default())
                .collect::<Vec<_>>(),
            "metadatas": documents
                .iter()
                .map(|d| to_wire_metadata(&d.metadata))
                .collect::<Vec<_>>(),
        });
        let path = Self::collection_path(collection, action);
        self.call(Method::POST, &path, Some(body), self.config.timeout).await?;
        Ok(())
    }
}

fn classify(e: reqwest::Error, after: Duration) -> RagError {
    if e.is_timeout() {
        error!(service = SERVICE, ?after, "request timed out");
        RagError::Timeout { service: SERVICE.to_string(), after }
    } else {
        error!(service = SERVICE, error = %e, "request failed");
        RagError::Network { service: SERVICE.to_string(), message: e.to_string() }
    }
}

// ── wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CollectionRecord {
    name: String,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GetResponse {
    ids: Vec<String>,
    documents: Option<Vec<Option<String>>>,
    metadatas: Option<Vec<Option<Map<String, Value>>>>,
    embeddings: Option<Vec<Option<Vec<f32>>>>,
}

impl GetResponse {
    fn into_documents(self) -> Vec<Document> {
        let GetResponse { ids, documents, metadatas, embeddings } = self;
        ids.into_iter()
            .enumerate()
            .map(|(i, id)| {
                let content = documents
                    .as_ref()
                    .and_then(|d| d.get(i).cloned().flatten())
                    .unwrap_or_default();
                let metadata = metadatas
                    .as_ref()
                    .and_then(|m| m.get(i).cloned().flatten())
                    .unwrap_or_default();
                let embedding = embeddings.as_ref().and_then(|e| e.get(i).cloned().flatten());
                Document { id, content, metadata: from_wire_metadata(metadata), embedding }
            })
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    distances: Option<Vec<Vec<Option<f32>>>>,
    documents: Option<Vec<Vec<Option<String>>>>,
    metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
    embeddings: Option<Vec<Vec<Option<Vec<f32>>>>>,
}

/// Flatten metadata into Chroma's scalar-only representation.
fn to_wire_metadata(metadata: &DocumentMetadata) -> Map<String, Value> {
    let mut wire = Map::new();
    for (key, value) in &metadata.extra {
        let flat = match value {
            Value::Array(_) | Value::Object(_) => Value::from(value.to_string()),
            Value::Null => continue,
            scalar => scalar.clone(),
        };
        wire.insert(key.clone(), flat);
    }
    wire.insert("type".into(), Value::from(metadata.doc_type.as_str()));
    wire.insert("source".into(), Value::from(metadata.source.as_str()));
    wire.insert("timestamp".into(), Value::from(metadata.timestamp.to_rfc3339()));
    wire.insert("dataQuality".into(), Value::from(metadata.data_quality));
    wire.insert("tags".into(), Value::from(metadata.tags.join(",")));
    wire
}

/// Inverse of [`to_wire_metadata`]; missing well-known fields get defaults.
fn from_wire_metadata(mut wire: Map<String, Value>) -> DocumentMetadata {
    let mut take_str = |key: &str| match wire.remove(key) {
        Some(Value::String(s)) => s,
        _ => String::new(),
    };
    let doc_type = take_str("type");
    let source = take_str("source");
    let timestamp = take_str("timestamp");
    let tags = take_str("tags");
    let data_quality = wire.remove("dataQuality").and_then(|v| v.as_f64()).unwrap_or(3.0);
    DocumentMetadata {
        doc_type,
        source,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        data_quality,
        tags: tags.split(',').filter(|t| !t.is_empty()).map(str::to_string).collect(),
        extra: wire,
    }
}

#[async_trait]
impl DocumentStore for ChromaDocumentStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn create_collection(
        &self,
        name: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<CollectionInfo> {
        let mut requested = metadata.unwrap_or_default();
        requested.entry("description").or_insert_with(|| Value::from(collections::describe(name)));
        requested.entry("created_at").or_insert_with(|| Value::from(Utc::now().to_rfc3339()));
        requested.entry("hnsw:space").or_insert_with(|| Value::from("cosine"));

        let record: CollectionRecord = self
            .call_as(
                Method::POST,
                "/api/v1/collections",
                Some(json!({ "name": name, "metadata": requested, "get_or_create": true })),
            )
            .await?;
        let document_count = self.count(name).await?;
        Ok(collection_info(record, document_count))
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let listed =
            self.call(Method::GET, "/api/v1/collections", None, self.config.timeout).await?;
        let records: Vec<CollectionRecord> = match listed {
            Value::Array(items) => serde_json::from_value(Value::Array(items))?,
            _ => Vec::new(),
        };
        let mut infos = Vec::with_capacity(records.len());
        for record in records {
            let count = self.count(&record.name).await?;
            infos.push(collection_info(record, count));
        }
        Ok(infos)
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        let path = Self::collection_path(name, "");
        match self.call(Method::DELETE, &path, None, self.config.timeout).await {
            Ok(_) => {
                info!(collection = name, "deleted collection");
                self.touch().await;
                Ok(true)
            }
            Err(RagError::HttpStatus { status: 404, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn add_documents(&self, collection: &str, documents: Vec<Document>) -> Result<AddReport> {
        self.create_collection(collection, None).await?;

        let mut report = AddReport::default();
        let now = Utc::now();
        let mut ready = Vec::with_capacity(documents.len());
        for mut document in documents {
            match self.embed_missing(&mut document).await {
                Ok(()) => {
                    document.metadata.timestamp = now;
                    ready.push(document);
                }
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

        let ids: Vec<String> = ready.iter().map(|d| d.id.clone()).collect();
        let existing = self.existing_ids(collection, &ids).await?;
        let (updates, inserts): (Vec<Document>, Vec<Document>) =
            ready.into_iter().partition(|d| existing.contains(&d.id));

        self.write(collection, "add", &inserts).await?;
        self.write(collection, "update", &updates).await?;
        report.added = inserts.len();
        report.updated = updates.len();
        self.touch().await;

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
        let mut body = json!({ "include": ["documents", "metadatas", "embeddings"] });
        if let Some(ids) = &query.ids {
            body["ids"] = json!(ids);
        }
        if let Some(clause) = query.filter.as_ref().and_then(MetadataFilter::to_chroma_where) {
            body["where"] = clause;
        }
        if let Some(limit) = query.limit {
            body["limit"] = json!(limit);
        }
        if query.offset > 0 {
            body["offset"] = json!(query.offset);
        }
        Ok(self.fetch(collection, body).await?.into_documents())
    }

    async fn update_documents(
        &self,
        collection: &str,
        ids: &[String],
        content: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<usize> {
        let mut found =
            self.get_documents(collection, DocumentQuery::ids(ids.iter().cloned())).await?;
        if found.is_empty() {
            return Ok(0);
        }
        let embedding = match &content {
            Some(text) => Some(self.embedder.embed(text).await?),
            None => None,
        };
        let now = Utc::now();
        for document in &mut found {
            if let Some(text) = &content {
                document.content = text.clone();
                document.embedding = embedding.clone();
            }
            document.metadata.timestamp = now;
            if let Some(patch) = &metadata {
                document.metadata.merge(patch);
            }
        }
        self.write(collection, "update", &found).await?;
        self.touch().await;
        Ok(found.len())
    }

    async fn delete_documents(
        &self,
        collection: &str,
        selector: DeleteSelector,
    ) -> Result<DeleteReport> {
        let (targets, not_found) = match selector {
            DeleteSelector::Ids(ids) => {
                let existing = self.existing_ids(collection, &ids).await?;
                let not_found = ids.len().saturating_sub(existing.len());
                (existing, not_found)
            }
            DeleteSelector::Filter(filter) => {
                let matched: Vec<String> = self
                    .get_documents(collection, DocumentQuery::all())
                    .await?
                    .into_iter()
                    .filter(|d| filter.matches(&d.metadata))
                    .map(|d| d.id)
                    .collect();
                (matched, 0)
            }
        };
        if !targets.is_empty() {
            self.call(
                Method::POST,
                &Self::collection_path(collection, "delete"),
                Some(json!({ "ids": targets })),
                self.config.timeout,
            )
            .await?;
            self.touch().await;
        }
        Ok(DeleteReport { deleted: targets.len(), not_found })
    }

    async fn clear_collection(&self, collection: &str) -> Result<()> {
        let ids = self.fetch(collection, json!({ "include": [] })).await?.ids;
        if !ids.is_empty() {
            self.call(
                Method::POST,
                &Self::collection_path(collection, "delete"),
                Some(json!({ "ids": ids })),
                self.config.timeout,
            )
            .await?;
        }
        self.touch().await;
        debug!(collection, "cleared collection");
        Ok(())
    }

    async fn collection_stats(&self, collection: &str) -> Result<CollectionStats> {
        let documents =
            self.fetch(collection, json!({ "include": ["metadatas"] })).await?.into_documents();
        Ok(CollectionStats::from_documents(&documents))
    }

    async fn health_check(&self) -> StoreHealth {
        let heartbeat =
            self.call(Method::GET, "/api/v1/heartbeat", None, self.config.heartbeat_timeout).await;
        if let Err(e) = heartbeat {
            warn!(error = %e, "vector store heartbeat failed");
            return StoreHealth::unhealthy();
        }
        match self.list_collections().await {
            Ok(infos) => StoreHealth {
                status: HealthStatus::Healthy,
                total_documents: infos.iter().map(|c| c.document_count).sum(),
                collections: infos.into_iter().map(|c| c.name).collect(),
                last_activity: *self.last_activity.read().await,
            },
            Err(e) => {
                warn!(error = %e, "vector store listing failed during health check");
                StoreHealth::unhealthy()
            }
        }
    }

    async fn similarity_scan(
        &self,
        collection: &str,
        embedding: &[f32],
        filter: Option<&MetadataFilter>,
        min_similarity: f32,
    ) -> Result<Vec<ScoredDocument>> {
        let total = match self.count(collection).await {
            Ok(n) => n,
            Err(RagError::HttpStatus { status: 404, .. }) => 0,
            Err(e) => return Err(e),
        };
        if total == 0 {
            return Ok(Vec::new());
        }

        let mut body = json!({
            "query_embeddings": [embedding],
            "n_results": total,
            "include": ["documents", "metadatas", "embeddings", "distances"],
        });
        if let Some(clause) = filter.and_then(MetadataFilter::to_chroma_where) {
            body["where"] = clause;
        }
        let path = Self::collection_path(collection, "query");
        let response: QueryResponse = self.call_as(Method::POST, &path, Some(body)).await?;

        let ids = first_row(Some(response.ids));
        let distances = first_row(response.distances);
        let documents = first_row(response.documents);
        let metadatas = first_row(response.metadatas);
        let embeddings = first_row(response.embeddings);

        let mut scored = Vec::new();
        for (i, id) in ids.into_iter().enumerate() {
            let document = Document {
                id,
                content: documents.get(i).cloned().flatten().unwrap_or_default(),
                metadata: from_wire_metadata(
                    metadatas.get(i).cloned().flatten().unwrap_or_default(),
                ),
                embedding: embeddings.get(i).cloned().flatten(),
            };
            if !document.is_embedded() || filter.is_some_and(|f| !f.matches(&document.metadata)) {
                continue;
            }
            let similarity = match &document.embedding {
                Some(stored) => cosine_similarity(stored, embedding),
                None => (1.0 - distances.get(i).copied().flatten().unwrap_or(1.0)).clamp(-1.0, 1.0),
            };
            if similarity >= min_similarity {
                let collection = collection.to_string();
                scored.push(ScoredDocument { collection, document, similarity });
            }
        }
        Ok(scored)
    }
}

/// Query responses nest one row per query embedding; only one is ever sent.
fn first_row<T>(rows: Option<Vec<Vec<T>>>) -> Vec<T> {
    rows.and_then(|rows| rows.into_iter().next()).unwrap_or_default()
}

fn collection_info(record: CollectionRecord, document_count: usize) -> CollectionInfo {
    let metadata = record.metadata.unwrap_or_default();
    let description = metadata
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_else(|| collections::describe(&record.name))
        .to_string();
    let created_at = metadata
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    CollectionInfo {
        name: record.name,
        description,
        created_at,
        document_count,
        last_updated: None,
        metadata,
    }
}
