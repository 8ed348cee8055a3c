//! End-to-end runs of the extract-transform pipeline against the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pcaf_pipeline::source::{ClientDataSource, PortfolioSource};
use pcaf_pipeline::{
    ClientData, DataType, EtlPipeline, IncomingLoan, LoanRecord, PipelineConfig, PipelineError,
    PortfolioSnapshot, RunOptions, Stage, StaticClientDataSource, StaticPortfolioSource,
};
use pcaf_rag::{
    Document, DocumentMetadata, DocumentQuery, DocumentStore, EmbeddingProvider,
    HashEmbeddingProvider, InMemoryDocumentStore, RagError,
};
use pcaf_telemetry::EventRecorder;
use serde_json::json;
use tokio::sync::Notify;
use tracing::Level;

const DIMS: usize = 64;

fn loan(id: &str, balance: f64, quality: f64, fuel: &str) -> LoanRecord {
    let incoming: IncomingLoan = serde_json::from_value(json!({
        "loan_id": id,
        "outstanding_balance": balance,
        "financed_emissions": balance / 10_000.0,
        "data_quality_score": quality,
        "vehicle_make": "Ford",
        "vehicle_model": "F-150",
        "fuel_type": fuel,
    }))
    .unwrap();
    incoming.into()
}

fn loans(count: usize) -> Vec<LoanRecord> {
    (0..count).map(|i| loan(&format!("L{i}"), 20_000.0, 2.0 + (i % 3) as f64, "Gasoline")).collect()
}

fn config(batch_size: usize) -> PipelineConfig {
    PipelineConfig::builder().batch_size(batch_size).batch_delay(Duration::ZERO).build().unwrap()
}

fn store() -> Arc<InMemoryDocumentStore> {
    Arc::new(InMemoryDocumentStore::new(Arc::new(HashEmbeddingProvider::new(DIMS))))
}

fn pipeline_with(
    source: Arc<dyn PortfolioSource>,
    store: Arc<InMemoryDocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
) -> EtlPipeline {
    EtlPipeline::builder()
        .config(config(batch_size))
        .portfolio_source(source)
        .store(store)
        .embedding_provider(embedder)
        .build()
        .unwrap()
}

async fn count(store: &InMemoryDocumentStore, collection: &str) -> usize {
    store.get_documents(collection, DocumentQuery::all()).await.unwrap().len()
}

/// Blocks until released, then serves the given loans.
struct GatedSource {
    gate: Notify,
    loans: Vec<LoanRecord>,
}

#[async_trait]
impl PortfolioSource for GatedSource {
    async fn portfolio(&self) -> pcaf_pipeline::Result<PortfolioSnapshot> {
        self.gate.notified().await;
        Ok(PortfolioSnapshot::from_loans(self.loans.clone()))
    }
}

struct DownSource;

#[async_trait]
impl PortfolioSource for DownSource {
    async fn portfolio(&self) -> pcaf_pipeline::Result<PortfolioSnapshot> {
        Err(PipelineError::Upstream {
            service: "portfolio_api".into(),
            message: "HTTP 503: unavailable".into(),
        })
    }
}

struct DownClientSource;

#[async_trait]
impl ClientDataSource for DownClientSource {
    async fn client_data(&self) -> pcaf_pipeline::Result<ClientData> {
        Err(PipelineError::Upstream {
            service: "documents_api".into(),
            message: "connection refused".into(),
        })
    }
}

/// Fails its second batch call.
struct FlakyEmbedder {
    calls: AtomicUsize,
    inner: HashEmbeddingProvider,
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn embed(&self, text: &str) -> pcaf_rag::Result<Vec<f32>> {
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> pcaf_rag::Result<Vec<Vec<f32>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(RagError::EmbeddingError {
                provider: "flaky".into(),
                message: "rate limited".into(),
            });
        }
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

#[tokio::test]
async fn full_run_routes_documents_by_type() {
    let store = store();
    let pipeline = pipeline_with(
        Arc::new(StaticPortfolioSource::new(loans(5))),
        store.clone(),
        Arc::new(HashEmbeddingProvider::new(DIMS)),
        4,
    );

    let report = pipeline.run(RunOptions::full()).await.unwrap();

    assert_eq!(report.documents_by_type["loan_analysis"], 5);
    assert_eq!(report.documents_by_type["portfolio_overview"], 1);
    assert_eq!(report.documents_by_type["analytics_report"], 1);
    assert_eq!(report.documents_by_type["sector_analysis"], 1);
    assert_eq!(report.documents_by_type["risk_profile"], 3);
    assert_eq!(report.total_records_processed, 11);
    assert_eq!(report.documents_stored, 11);
    assert_eq!(report.successful_embeddings, 11);
    assert_eq!(report.failed_embeddings, 0);
    assert!(report.errors.is_empty());
    assert_eq!(
        report.collections_updated,
        vec!["analytics_documents", "loan_documents", "portfolio_documents"]
    );

    assert_eq!(count(&store, "loan_documents").await, 5);
    assert_eq!(count(&store, "portfolio_documents").await, 1);
    assert_eq!(count(&store, "analytics_documents").await, 5);

    let status = pipeline.status();
    assert!(!status.is_running);
    assert_eq!(status.stage, Stage::Idle);
    assert_eq!(status.metrics.total_runs, 1);
    assert_eq!(status.metrics.records_processed, 11);
    assert_eq!(pipeline.last_report().await.map(|r| r.run_id), Some(report.run_id));
}

#[tokio::test]
async fn loan_cap_comes_from_options_then_config() {
    let store = store();
    let pipeline = pipeline_with(
        Arc::new(StaticPortfolioSource::new(loans(12))),
        store.clone(),
        Arc::new(HashEmbeddingProvider::new(DIMS)),
        25,
    );

    let options = RunOptions::default().with_data_types([DataType::Loans]).with_max_loans(3);
    let report = pipeline.run(options).await.unwrap();
    assert_eq!(report.documents_by_type["loan_analysis"], 3);
    assert_eq!(report.collections_updated, vec!["loan_documents"]);
}

#[tokio::test]
async fn second_run_fails_fast_while_first_is_in_flight() {
    let source = Arc::new(GatedSource { gate: Notify::new(), loans: loans(2) });
    let pipeline = Arc::new(pipeline_with(
        source.clone(),
        store(),
        Arc::new(HashEmbeddingProvider::new(DIMS)),
        25,
    ));

    let first = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.run(RunOptions::default()).await }
    });
    while !pipeline.tracker().is_running() {
        tokio::task::yield_now().await;
    }

    let second = pipeline.run(RunOptions::default()).await;
    assert!(matches!(second, Err(PipelineError::AlreadyRunning)));
    let status = pipeline.status();
    assert!(status.is_running);
    assert_eq!(status.stage, Stage::Extracting);
    assert_eq!(status.metrics.total_runs, 0);

    source.gate.notify_one();
    first.await.unwrap().unwrap();
    assert!(!pipeline.tracker().is_running());
    assert_eq!(pipeline.status().metrics.total_runs, 1);
}

#[tokio::test]
async fn failed_embedding_batch_stores_zero_vectors() {
    let store = store();
    let embedder = Arc::new(FlakyEmbedder {
        calls: AtomicUsize::new(0),
        inner: HashEmbeddingProvider::new(DIMS),
    });
    let source = Arc::new(StaticPortfolioSource::new(loans(5)));
    let pipeline = pipeline_with(source, store.clone(), embedder, 2);

    let options = RunOptions::default().with_data_types([DataType::Loans]);
    let report = pipeline.run(options).await.unwrap();

    assert_eq!(report.total_records_processed, 5);
    assert_eq!(report.documents_stored, 5);
    assert_eq!(report.successful_embeddings, 3);
    assert_eq!(report.failed_embeddings, 2);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("embedding batch 2"));

    let stored = store.get_documents("loan_documents", DocumentQuery::all()).await.unwrap();
    assert_eq!(stored.iter().filter(|d| !d.is_embedded()).count(), 2);
}

#[tokio::test]
async fn full_refresh_clears_only_destination_collections() {
    let store = store();
    let stale = Document::new("stale", "old loan", DocumentMetadata::new("loan_analysis", "test"));
    let keep =
        Document::new("keep", "client note", DocumentMetadata::new("client_document", "test"));
    store.add_documents("loan_documents", vec![stale.clone()]).await.unwrap();
    store.add_documents("client_insights", vec![keep]).await.unwrap();

    let pipeline = pipeline_with(
        Arc::new(StaticPortfolioSource::new(loans(3))),
        store.clone(),
        Arc::new(HashEmbeddingProvider::new(DIMS)),
        25,
    );

    pipeline.run(RunOptions::default().with_data_types([DataType::Loans])).await.unwrap();
    assert_eq!(
        count(&store, "loan_documents").await,
        4,
        "incremental runs keep existing documents"
    );

    pipeline.run(RunOptions::full().with_data_types([DataType::Loans])).await.unwrap();
    let loans = store.get_documents("loan_documents", DocumentQuery::all()).await.unwrap();
    assert_eq!(loans.len(), 3);
    assert!(loans.iter().all(|d| d.id.starts_with("loan_L")));
    assert_eq!(count(&store, "client_insights").await, 1);
}

#[tokio::test]
async fn full_refresh_clears_selected_collections_that_render_nothing() {
    let store = store();
    let old =
        Document::new("loan_OLD", "retired loan", DocumentMetadata::new("loan_analysis", "test"));
    store.add_documents("loan_documents", vec![old]).await.unwrap();
    let pipeline = pipeline_with(
        Arc::new(StaticPortfolioSource::new(Vec::new())),
        store.clone(),
        Arc::new(HashEmbeddingProvider::new(DIMS)),
        25,
    );

    let options = RunOptions::full().with_data_types([DataType::Loans]);
    let report = pipeline.run(options).await.unwrap();

    assert_eq!(report.total_records_processed, 0);
    assert_eq!(count(&store, "loan_documents").await, 0);
}

#[tokio::test]
async fn success_rate_is_the_embedded_share_of_the_last_run() {
    let embedder = Arc::new(FlakyEmbedder {
        calls: AtomicUsize::new(0),
        inner: HashEmbeddingProvider::new(DIMS),
    });
    let source = Arc::new(StaticPortfolioSource::new(loans(4)));
    let pipeline = pipeline_with(source, store(), embedder, 2);

    let options = RunOptions::default().with_data_types([DataType::Loans]);
    let report = pipeline.run(options.clone()).await.unwrap();
    assert_eq!((report.successful_embeddings, report.failed_embeddings), (2, 2));
    assert_eq!(pipeline.status().metrics.success_rate, 50.0);

    // only the second batch call fails, so the next run embeds everything
    pipeline.run(options).await.unwrap();
    let metrics = pipeline.status().metrics;
    assert_eq!(metrics.success_rate, 100.0);
    assert_eq!(metrics.records_processed, 4);
}

#[tokio::test]
async fn portfolio_failure_is_recorded_and_returned() {
    let embedder = Arc::new(HashEmbeddingProvider::new(DIMS));
    let pipeline = pipeline_with(Arc::new(DownSource), store(), embedder, 25);

    let err = pipeline.run(RunOptions::default()).await.unwrap_err();
    assert!(err.is_upstream());

    let status = pipeline.status();
    assert!(!status.is_running);
    assert_eq!(status.stage, Stage::Idle);
    assert_eq!(status.metrics.failed_runs, 1);
    assert_eq!(status.metrics.success_rate, 0.0);
    assert!(status.last_error.unwrap().contains("HTTP 503"));
    assert!(pipeline.last_report().await.is_none());
}

#[tokio::test]
async fn client_data_failure_is_a_warning() {
    let recorder = EventRecorder::new();
    let _guard = tracing::subscriber::set_default(recorder.subscriber());

    let store = store();
    let pipeline = EtlPipeline::builder()
        .config(config(25))
        .portfolio_source(Arc::new(StaticPortfolioSource::new(loans(2))))
        .client_data_source(Arc::new(DownClientSource))
        .store(store.clone())
        .embedding_provider(Arc::new(HashEmbeddingProvider::new(DIMS)))
        .build()
        .unwrap();

    let report = pipeline.run(RunOptions::default()).await.unwrap();
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("connection refused"));
    assert_eq!(count(&store, "loan_documents").await, 2);

    let warnings = recorder.events_at(Level::WARN);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].message, "client document extraction failed, continuing without it");
    assert!(warnings[0].has_field("run_id", &report.run_id.to_string()));
}

#[tokio::test]
async fn client_documents_land_in_their_collections() {
    let client: ClientData = serde_json::from_value(json!({
        "documents": [{
            "id": "memo-1",
            "title": "Fleet transition memo",
            "content": "Client plans to electrify 40% of its fleet by 2027.",
            "type": "strategy",
            "metadata": {
                "createdDate": "2025-05-01T00:00:00Z",
                "lastModified": "2025-05-02T00:00:00Z",
                "dataQuality": 2,
                "confidenceLevel": 0.85,
                "tags": ["fleet"]
            }
        }],
        "bankTargets": [],
        "reports": []
    }))
    .unwrap();

    let store = store();
    let pipeline = EtlPipeline::builder()
        .config(config(25))
        .portfolio_source(Arc::new(StaticPortfolioSource::new(loans(1))))
        .client_data_source(Arc::new(StaticClientDataSource::new(client)))
        .store(store.clone())
        .embedding_provider(Arc::new(HashEmbeddingProvider::new(DIMS)))
        .build()
        .unwrap();

    let report = pipeline.run(RunOptions::default()).await.unwrap();
    assert_eq!(report.documents_by_type["client_document"], 1);
    assert_eq!(count(&store, "client_insights").await, 1);

    let without = pipeline.run(RunOptions::default().with_client_documents(false)).await.unwrap();
    assert!(!without.documents_by_type.contains_key("client_document"));
}
