//! Pipeline, portfolio API and orchestrator settings.

use std::time::Duration;

use crate::error::{PipelineError, Result};

/// Batching and capping parameters for an ingestion run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Documents per embedding call.
    pub batch_size: usize,
    /// Upper bound on loans rendered into individual documents per run.
    pub max_loans: usize,
    /// Pause between embedding batches.
    pub batch_delay: Duration,
    pub include_client_documents: bool,
    /// Label of the embedding model, reported in logs.
    pub embedding_model: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            max_loans: 100,
            batch_delay: Duration::from_millis(100),
            include_client_documents: true,
            embedding_model: "text-embedding-ada-002".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Read `PCAF_BATCH_SIZE`, `PCAF_MAX_LOANS` and `PCAF_BATCH_DELAY_MS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(size) = parse_var::<usize>(&lookup, "PCAF_BATCH_SIZE")? {
            builder = builder.batch_size(size);
        }
        if let Some(max) = parse_var::<usize>(&lookup, "PCAF_MAX_LOANS")? {
            builder = builder.max_loans(max);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "PCAF_BATCH_DELAY_MS")? {
            builder = builder.batch_delay(Duration::from_millis(ms));
        }
        builder.build()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn max_loans(mut self, max: usize) -> Self {
        self.config.max_loans = max;
        self
    }

    pub fn batch_delay(mut self, delay: Duration) -> Self {
        self.config.batch_delay = delay;
        self
    }

    pub fn include_client_documents(mut self, include: bool) -> Self {
        self.config.include_client_documents = include;
        self
    }

    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.config.embedding_model = model.into();
        self
    }

    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if `batch_size` or `max_loans` is zero.
    pub fn build(self) -> Result<PipelineConfig> {
        if self.config.batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be greater than zero".to_string()));
        }
        if self.config.max_loans == 0 {
            return Err(PipelineError::Config("max_loans must be greater than zero".to_string()));
        }
        Ok(self.config)
    }
}

/// Connection settings for the portfolio backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioApiConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
}

impl PortfolioApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), auth_token: None, timeout: Duration::from_secs(30) }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read `PCAF_API_URL`, `PCAF_API_TOKEN` and `PCAF_API_TIMEOUT_MS`.
    /// Returns `Ok(None)` when no URL is configured.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let Some(url) = lookup("PCAF_API_URL").filter(|u| !u.trim().is_empty()) else {
            return Ok(None);
        };
        let mut config = Self::new(url.trim());
        config.auth_token = lookup("PCAF_API_TOKEN").filter(|t| !t.is_empty());
        if let Some(ms) = parse_var::<u64>(&lookup, "PCAF_API_TIMEOUT_MS")? {
            config.timeout = Duration::from_millis(ms);
        }
        Ok(Some(config))
    }
}

/// Scheduler behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Wait before the single retry of a failed scheduled run.
    pub retry_backoff: Duration,
    pub enable_scheduled_runs: bool,
    /// Run a full refresh from `initialize()` when the source has loans.
    pub auto_start: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_secs(60),
            enable_scheduled_runs: true,
            auto_start: true,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| PipelineError::Config(format!("{key} ({raw}) is invalid: {e}"))),
    }
}
