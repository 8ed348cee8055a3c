//! Ingestion and orchestration for financed-emissions retrieval.
//!
//! This crate turns portfolio data into searchable documents:
//! - [`EtlPipeline`] extracts loans and client data, renders documents, embeds
//!   them in batches and stores them by collection
//! - [`Orchestrator`] runs the pipeline on schedules and reports health
//! - [`UploadService`] ingests CSV and JSON loan uploads and searches them
//! - [`analytics`] aggregates stored uploads into statistics and insights
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pcaf_pipeline::{EtlPipeline, RunOptions, StaticPortfolioSource};
//!
//! let pipeline = EtlPipeline::builder()
//!     .portfolio_source(Arc::new(StaticPortfolioSource::from_json_file("portfolio.json").await?))
//!     .store(store)
//!     .embedding_provider(embedder)
//!     .build()?;
//! let report = pipeline.run(RunOptions::full()).await?;
//! ```

pub mod analytics;
pub mod config;
pub mod error;
pub mod etl;
pub mod loan;
pub mod orchestrator;
pub mod portfolio;
pub mod render;
pub mod risk;
pub mod source;
pub mod status;
pub mod upload;

pub use analytics::{
    LoanDataAnalytics, PortfolioInsight, generate_portfolio_insights, loan_data_analytics,
};
pub use config::{OrchestratorConfig, PipelineConfig, PipelineConfigBuilder, PortfolioApiConfig};
pub use error::{PipelineError, Result};
pub use etl::{DataType, EtlPipeline, EtlPipelineBuilder, PipelineReport, RunOptions};
pub use loan::{IncomingLoan, LegacyLoanRecord, LoanRecord};
pub use orchestrator::{
    DataQualityReport, Frequency, Orchestrator, PipelineHealth, QuickStartReport, Schedule,
    ScheduleConfig, SystemStatus,
};
pub use portfolio::{ClientData, PortfolioMetrics, PortfolioSnapshot, PortfolioSummary};
pub use risk::RiskLevel;
pub use source::{
    ClientDataSource, HttpPortfolioSource, PortfolioSource, StaticClientDataSource,
    StaticPortfolioSource,
};
pub use status::{RunStatus, RunTracker, Stage};
pub use upload::{
    Instrument, LoanUpload, ProcessingResult, UploadMetadata, UploadSearchOptions, UploadService,
    UploadStatus, UploadedLoan,
};
