//! Wiring from environment and flags to stores, engines and pipelines.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use pcaf_pipeline::source::PortfolioSource;
use pcaf_pipeline::{
    EtlPipeline, HttpPortfolioSource, Orchestrator, OrchestratorConfig, PipelineConfig,
    PortfolioApiConfig, StaticPortfolioSource,
};
use pcaf_rag::{
    DEFAULT_DIMENSIONS, DocumentStore, EmbeddingProvider, FallbackEmbeddingProvider,
    HashEmbeddingProvider, SearchEngine, StoreConfig,
};
use tracing::info;

/// Shared handles for one CLI invocation.
pub struct App {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub store: Arc<dyn DocumentStore>,
    pub engine: Arc<SearchEngine>,
}

impl App {
    pub fn from_env() -> Result<Self> {
        let embedder = embedder_from_env()?;
        let store = StoreConfig::from_env()
            .context("invalid document store configuration")?
            .build(embedder.clone())?;
        let engine = SearchEngine::builder()
            .embedding_provider(embedder.clone())
            .store(store.clone())
            .build()?;
        Ok(Self { embedder, store, engine: Arc::new(engine) })
    }

    /// Pipeline reading from `portfolio` when given, else from the backend API.
    pub async fn pipeline(&self, portfolio: Option<&Path>) -> Result<Arc<EtlPipeline>> {
        let source = portfolio_source(portfolio).await?;
        let pipeline = EtlPipeline::builder()
            .config(PipelineConfig::from_env()?)
            .portfolio_source(source)
            .store(self.store.clone())
            .embedding_provider(self.embedder.clone())
            .build()?;
        Ok(Arc::new(pipeline))
    }

    /// One-shot orchestrator; no timers are armed from the CLI.
    pub async fn orchestrator(&self, portfolio: Option<&Path>) -> Result<Orchestrator> {
        let config = OrchestratorConfig {
            enable_scheduled_runs: false,
            auto_start: false,
            ..Default::default()
        };
        Ok(Orchestrator::new(self.pipeline(portfolio).await?, config))
    }
}

fn embedder_from_env() -> Result<Arc<dyn EmbeddingProvider>> {
    let kind = std::env::var("PCAF_EMBEDDER").unwrap_or_else(|_| "hash".to_string());
    let inner: Arc<dyn EmbeddingProvider> = match kind.trim().to_lowercase().as_str() {
        "hash" => Arc::new(HashEmbeddingProvider::new(DEFAULT_DIMENSIONS)),
        #[cfg(feature = "openai")]
        "openai" => Arc::new(pcaf_rag::OpenAIEmbeddingProvider::from_env()?),
        other => bail!("unsupported PCAF_EMBEDDER '{other}'"),
    };
    info!(embedder = %kind, dimensions = inner.dimensions(), "embedding provider selected");
    Ok(Arc::new(FallbackEmbeddingProvider::new(inner)))
}

async fn portfolio_source(path: Option<&Path>) -> Result<Arc<dyn PortfolioSource>> {
    if let Some(path) = path {
        let source = StaticPortfolioSource::from_json_file(path)
            .await
            .with_context(|| format!("failed to load portfolio snapshot {}", path.display()))?;
        return Ok(Arc::new(source));
    }
    match PortfolioApiConfig::from_env()? {
        Some(config) => Ok(Arc::new(HttpPortfolioSource::new(config)?)),
        None => bail!("no portfolio source: pass --portfolio FILE or set PCAF_API_URL"),
    }
}
