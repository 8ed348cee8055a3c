//! The extract, transform, embed and store pipeline.
//!
//! A run pulls the portfolio (and optionally client data), renders every
//! selected entity class into documents, embeds them in batches and upserts
//! them into the collection mapped from each document type. Only one run may
//! be in flight per [`RunTracker`].
//!
//! # Example
//!
//! ```rust,ignore
//! use pcaf_pipeline::{EtlPipeline, RunOptions, StaticPortfolioSource};
//!
//! let pipeline = EtlPipeline::builder()
//!     .portfolio_source(Arc::new(StaticPortfolioSource::new(loans)))
//!     .store(store)
//!     .embedding_provider(embedder)
//!     .build()?;
//! let report = pipeline.run(RunOptions::full()).await?;
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use pcaf_rag::{AddReport, Document, DocumentStore, EmbeddingProvider, collections};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::portfolio::{ClientData, PortfolioMetrics, PortfolioSnapshot, score_bucket};
use crate::render;
use crate::source::{ClientDataSource, PortfolioSource};
use crate::status::{RunGuard, RunStatus, RunTracker, Stage};

/// Entity classes a run can render. `Portfolio` covers the overview and the
/// analytics report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Loans,
    Portfolio,
    Sectors,
    Risks,
}

impl DataType {
    pub const ALL: [DataType; 4] =
        [DataType::Loans, DataType::Portfolio, DataType::Sectors, DataType::Risks];
}

/// Per-run options; unset fields fall back to the [`PipelineConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    /// Clear destination collections before upserting.
    pub full_refresh: bool,
    pub data_types: Vec<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_client_documents: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_loans: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            full_refresh: false,
            data_types: DataType::ALL.to_vec(),
            include_client_documents: None,
            max_loans: None,
        }
    }
}

impl RunOptions {
    /// Every data type with a full refresh.
    pub fn full() -> Self {
        Self { full_refresh: true, ..Self::default() }
    }

    pub fn with_data_types(mut self, data_types: impl IntoIterator<Item = DataType>) -> Self {
        self.data_types = data_types.into_iter().collect();
        self
    }

    pub fn with_max_loans(mut self, max_loans: usize) -> Self {
        self.max_loans = Some(max_loans);
        self
    }

    pub fn with_client_documents(mut self, include: bool) -> Self {
        self.include_client_documents = Some(include);
        self
    }

    fn includes(&self, data_type: DataType) -> bool {
        self.data_types.contains(&data_type)
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub run_id: Uuid,
    /// Documents rendered.
    pub total_records_processed: usize,
    /// Documents added or updated in the store.
    pub documents_stored: usize,
    pub successful_embeddings: usize,
    pub failed_embeddings: usize,
    pub collections_updated: Vec<String>,
    pub documents_by_type: BTreeMap<String, usize>,
    pub data_quality_distribution: BTreeMap<String, usize>,
    pub processing_time_ms: u64,
    /// Weighted average data quality of the portfolio.
    pub data_quality_score: f64,
    /// Degraded-path failures that did not abort the run.
    pub errors: Vec<String>,
    pub last_run_timestamp: DateTime<Utc>,
}

/// Render every selected entity class. Aggregates always use the whole
/// portfolio; only individual loan documents are capped at `max_loans`.
pub fn render_documents(
    snapshot: &PortfolioSnapshot,
    client: Option<&ClientData>,
    options: &RunOptions,
    max_loans: usize,
    now: DateTime<Utc>,
) -> Vec<Document> {
    let loans = &snapshot.loans;
    let mut documents = Vec::new();

    if options.includes(DataType::Portfolio) {
        let metrics = PortfolioMetrics::compute(loans, &snapshot.summary);
        documents.push(render::portfolio_overview(&snapshot.summary, &metrics, now));
        documents.push(render::analytics_report(&metrics, now));
    }
    if options.includes(DataType::Loans) {
        documents.extend(loans.iter().take(max_loans).map(render::loan_analysis));
    }
    if options.includes(DataType::Sectors) {
        documents.extend(render::sector_analyses(loans, now));
    }
    if options.includes(DataType::Risks) {
        documents.extend(render::risk_profiles(loans, now));
    }
    if let Some(client) = client {
        documents.extend(render::client_documents(&client.documents));
        documents.extend(render::bank_targets(&client.bank_targets, now));
        documents.extend(render::historical_reports(&client.reports, now));
    }
    documents
}

/// Collections a full refresh clears: every collection a selected data type
/// writes to, whether or not it renders anything this run, plus the client
/// collections when client data was extracted.
pub fn destination_collections(
    options: &RunOptions,
    with_client_data: bool,
) -> BTreeSet<&'static str> {
    let mut destinations = BTreeSet::new();
    for data_type in &options.data_types {
        match data_type {
            DataType::Loans => {
                destinations.insert(collections::LOAN_DOCUMENTS);
            }
            DataType::Portfolio => {
                destinations.insert(collections::PORTFOLIO_DOCUMENTS);
                destinations.insert(collections::ANALYTICS_DOCUMENTS);
            }
            DataType::Sectors | DataType::Risks => {
                destinations.insert(collections::ANALYTICS_DOCUMENTS);
            }
        }
    }
    if with_client_data {
        destinations.extend([
            collections::CLIENT_INSIGHTS,
            collections::BANK_TARGETS,
            collections::HISTORICAL_REPORTS,
        ]);
    }
    destinations
}

pub struct EtlPipeline {
    config: PipelineConfig,
    portfolio: Arc<dyn PortfolioSource>,
    client_data: Option<Arc<dyn ClientDataSource>>,
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    tracker: Arc<RunTracker>,
    last_report: RwLock<Option<PipelineReport>>,
}

impl EtlPipeline {
    pub fn builder() -> EtlPipelineBuilder {
        EtlPipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn portfolio_source(&self) -> &Arc<dyn PortfolioSource> {
        &self.portfolio
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<RunTracker> {
        &self.tracker
    }

    pub fn status(&self) -> RunStatus {
        self.tracker.status()
    }

    pub async fn last_report(&self) -> Option<PipelineReport> {
        self.last_report.read().await.clone()
    }

    /// Execute one run.
    ///
    /// # Errors
    ///
    /// Fails with [`PipelineError::AlreadyRunning`] without side effects if
    /// another run is in flight. Portfolio extraction and store failures abort
    /// the run, are recorded as the tracker's `last_error`, and are returned.
    pub async fn run(&self, options: RunOptions) -> Result<PipelineReport> {
        let guard = self.tracker.begin()?;
        let run_id = guard.run_id();
        let started = Instant::now();
        let span =
            info_span!("pipeline_run", run_id = %run_id, full_refresh = options.full_refresh);

        match self.execute(&guard, &options).instrument(span).await {
            Ok(mut report) => {
                report.processing_time_ms = started.elapsed().as_millis() as u64;
                info!(
                    run_id = %run_id,
                    documents = report.total_records_processed,
                    stored = report.documents_stored,
                    failed_embeddings = report.failed_embeddings,
                    elapsed_ms = report.processing_time_ms,
                    "pipeline run completed"
                );
                guard.complete(
                    report.total_records_processed,
                    report.successful_embeddings,
                    report.processing_time_ms,
                );
                *self.last_report.write().await = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                error!(
                    run_id = %run_id,
                    error = %e,
                    upstream = e.is_upstream(),
                    "pipeline run failed"
                );
                guard.fail(&e);
                Err(e)
            }
        }
    }

    async fn execute(&self, guard: &RunGuard, options: &RunOptions) -> Result<PipelineReport> {
        let mut errors = Vec::new();

        guard.advance(Stage::Extracting);
        let snapshot = self.portfolio.portfolio().await?;
        let client = self.extract_client_data(options, &mut errors).await;
        info!(
            loans = snapshot.loans.len(),
            client_data = client.is_some(),
            "extracted source data"
        );

        guard.advance(Stage::Transforming);
        let now = Utc::now();
        let max_loans = options.max_loans.unwrap_or(self.config.max_loans);
        let documents = render_documents(&snapshot, client.as_ref(), options, max_loans, now);
        let refresh =
            options.full_refresh.then(|| destination_collections(options, client.is_some()));
        let total = documents.len();
        let mut documents_by_type = BTreeMap::new();
        let mut data_quality_distribution = BTreeMap::new();
        for document in &documents {
            *documents_by_type.entry(document.metadata.doc_type.clone()).or_insert(0) += 1;
            let bucket = score_bucket(document.metadata.data_quality);
            *data_quality_distribution.entry(bucket).or_insert(0) += 1;
        }
        debug!(documents = total, max_loans, "rendered documents");

        guard.advance(Stage::Embedding);
        let documents = self.embed(documents, &mut errors).await;
        let successful_embeddings = documents.iter().filter(|d| d.is_embedded()).count();

        guard.advance(Stage::Storing);
        let (stored, collections_updated) = self.persist(documents, refresh, &mut errors).await?;

        guard.advance(Stage::Completing);
        Ok(PipelineReport {
            run_id: guard.run_id(),
            total_records_processed: total,
            documents_stored: stored.stored(),
            successful_embeddings,
            failed_embeddings: total - successful_embeddings,
            collections_updated,
            documents_by_type,
            data_quality_distribution,
            processing_time_ms: 0,
            data_quality_score: PortfolioMetrics::compute(&snapshot.loans, &snapshot.summary)
                .weighted_avg_data_quality,
            errors,
            last_run_timestamp: now,
        })
    }

    async fn extract_client_data(
        &self,
        options: &RunOptions,
        errors: &mut Vec<String>,
    ) -> Option<ClientData> {
        if !options.include_client_documents.unwrap_or(self.config.include_client_documents) {
            return None;
        }
        let source = self.client_data.as_ref()?;
        match source.client_data().await {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(error = %e, "client document extraction failed, continuing without it");
                errors.push(format!("client documents: {e}"));
                None
            }
        }
    }

    /// Embed in batches. A failed batch keeps zero vectors so its documents
    /// are stored but never match a search.
    async fn embed(&self, mut documents: Vec<Document>, errors: &mut Vec<String>) -> Vec<Document> {
        let dimensions = self.embedder.dimensions();
        let batch_size = self.config.batch_size.max(1);
        let batches = documents.len().div_ceil(batch_size);

        for (index, batch) in documents.chunks_mut(batch_size).enumerate() {
            let result = {
                let texts: Vec<&str> = batch.iter().map(|d| d.content.as_str()).collect();
                self.embedder.embed_batch(&texts).await
            };
            match result {
                Ok(vectors) if vectors.len() == batch.len() => {
                    for (document, vector) in batch.iter_mut().zip(vectors) {
                        document.embedding = Some(vector);
                    }
                    debug!(batch = index + 1, batches, size = batch.len(), "embedded batch");
                }
                outcome => {
                    let reason = match outcome {
                        Err(e) => e.to_string(),
                        Ok(vectors) => {
                            format!("expected {} vectors, got {}", batch.len(), vectors.len())
                        }
                    };
                    warn!(
                        batch = index + 1,
                        batches,
                        error = %reason,
                        "embedding batch failed, storing without embeddings"
                    );
                    errors.push(format!("embedding batch {}: {reason}", index + 1));
                    for document in batch.iter_mut() {
                        document.embedding = Some(vec![0.0; dimensions]);
                    }
                }
            }

            if index + 1 < batches && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }
        }
        documents
    }

    /// Group by destination collection and upsert. With `refresh`, those
    /// collections and the grouped ones are cleared first.
    async fn persist(
        &self,
        documents: Vec<Document>,
        refresh: Option<BTreeSet<&'static str>>,
        errors: &mut Vec<String>,
    ) -> Result<(AddReport, Vec<String>)> {
        let mut grouped: BTreeMap<&'static str, Vec<Document>> = BTreeMap::new();
        for document in documents {
            let collection = render::collection_for(&document.metadata.doc_type);
            grouped.entry(collection).or_default().push(document);
        }

        if let Some(mut cleared) = refresh {
            cleared.extend(grouped.keys().copied());
            try_join_all(cleared.iter().map(|collection| self.store.clear_collection(collection)))
                .await?;
            info!(collections = cleared.len(), "cleared destination collections");
        }

        let mut total = AddReport::default();
        let mut updated = Vec::with_capacity(grouped.len());
        for (collection, documents) in grouped {
            let report = self.store.add_documents(collection, documents).await?;
            info!(
                collection,
                added = report.added,
                updated = report.updated,
                errors = report.errors,
                "stored collection"
            );
            if report.errors > 0 {
                errors.push(format!("{collection}: {} documents failed to store", report.errors));
            }
            total.merge(report);
            updated.push(collection.to_string());
        }
        Ok((total, updated))
    }
}

/// Builder for [`EtlPipeline`]; the config defaults to [`PipelineConfig::default`].
#[derive(Default)]
pub struct EtlPipelineBuilder {
    config: Option<PipelineConfig>,
    portfolio: Option<Arc<dyn PortfolioSource>>,
    client_data: Option<Arc<dyn ClientDataSource>>,
    store: Option<Arc<dyn DocumentStore>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    tracker: Option<Arc<RunTracker>>,
}

impl EtlPipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn portfolio_source(mut self, source: Arc<dyn PortfolioSource>) -> Self {
        self.portfolio = Some(source);
        self
    }

    pub fn client_data_source(mut self, source: Arc<dyn ClientDataSource>) -> Self {
        self.client_data = Some(source);
        self
    }

    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(provider);
        self
    }

    /// Share a tracker with another component.
    pub fn tracker(mut self, tracker: Arc<RunTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the portfolio source, store or
    /// embedding provider is missing.
    pub fn build(self) -> Result<EtlPipeline> {
        let missing = |what: &str| PipelineError::Config(format!("{what} is required"));
        Ok(EtlPipeline {
            config: self.config.unwrap_or_default(),
            portfolio: self.portfolio.ok_or_else(|| missing("portfolio source"))?,
            client_data: self.client_data,
            store: self.store.ok_or_else(|| missing("document store"))?,
            embedder: self.embedder.ok_or_else(|| missing("embedding provider"))?,
            tracker: self.tracker.unwrap_or_default(),
            last_report: RwLock::new(None),
        })
    }
}
