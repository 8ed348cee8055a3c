//! External data sources consumed by the pipeline.
//!
//! [`PortfolioSource`] supplies loans and their summary; [`ClientDataSource`]
//! supplies the optional client documents, climate targets and reports. Both
//! are injected into the pipeline, so tests can swap in the static variants.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::config::PortfolioApiConfig;
use crate::error::{PipelineError, Result};
use crate::loan::{IncomingLoan, LoanRecord};
use crate::portfolio::{ClientData, PortfolioSnapshot, PortfolioSummary};

const PORTFOLIO_SERVICE: &str = "portfolio_api";

/// Source of portfolio loans.
#[async_trait]
pub trait PortfolioSource: Send + Sync {
    /// Fetch every loan together with the portfolio summary.
    async fn portfolio(&self) -> Result<PortfolioSnapshot>;
}

/// Source of auxiliary client documents.
#[async_trait]
pub trait ClientDataSource: Send + Sync {
    async fn client_data(&self) -> Result<ClientData>;
}

/// Portfolio backend client for `GET /api/v1/loans/portfolio`.
///
/// # Example
///
/// ```rust,ignore
/// use pcaf_pipeline::{HttpPortfolioSource, PortfolioApiConfig};
///
/// let source = HttpPortfolioSource::new(PortfolioApiConfig::new("http://localhost:8080"))?;
/// let snapshot = source.portfolio().await?;
/// println!("{} loans", snapshot.loans.len());
/// ```
pub struct HttpPortfolioSource {
    client: reqwest::Client,
    config: PortfolioApiConfig,
}

impl HttpPortfolioSource {
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the base URL is empty.
    pub fn new(config: PortfolioApiConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(PipelineError::Config(
                "portfolio API base_url must not be empty".to_string(),
            ));
        }
        Ok(Self { client: reqwest::Client::new(), config })
    }
}

#[derive(Deserialize)]
struct PortfolioEnvelope {
    data: PortfolioPayload,
}

#[derive(Deserialize)]
struct PortfolioPayload {
    #[serde(default)]
    loans: Vec<IncomingLoan>,
    #[serde(default)]
    analytics: Option<WireAnalytics>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAnalytics {
    total_loans: Option<usize>,
    total_outstanding_balance: Option<f64>,
    total_financed_emissions: Option<f64>,
    weighted_avg_data_quality: Option<f64>,
}

impl PortfolioPayload {
    /// Backend analytics take precedence; figures it omits are computed from
    /// the loans.
    fn into_snapshot(self) -> PortfolioSnapshot {
        let received = self.loans.len();
        let loans: Vec<LoanRecord> =
            self.loans.into_iter().map(LoanRecord::from).filter(|l| !l.is_deleted).collect();
        if loans.len() < received {
            debug!(skipped = received - loans.len(), "dropped soft-deleted loans");
        }
        let computed = PortfolioSummary::from_loans(&loans);
        let summary = match self.analytics {
            None => computed,
            Some(wire) => {
                let total_loans = wire.total_loans.unwrap_or(computed.total_loans);
                let outstanding =
                    wire.total_outstanding_balance.unwrap_or(computed.total_outstanding_balance);
                PortfolioSummary {
                    total_loans,
                    total_loan_amount: outstanding,
                    total_outstanding_balance: outstanding,
                    total_financed_emissions: wire
                        .total_financed_emissions
                        .unwrap_or(computed.total_financed_emissions),
                    average_data_quality_score: wire
                        .weighted_avg_data_quality
                        .unwrap_or(computed.average_data_quality_score),
                    loan_count: total_loans,
                }
            }
        };
        PortfolioSnapshot { loans, summary }
    }
}

#[async_trait]
impl PortfolioSource for HttpPortfolioSource {
    async fn portfolio(&self) -> Result<PortfolioSnapshot> {
        let url = format!("{}/api/v1/loans/portfolio", self.config.base_url.trim_end_matches('/'));
        let mut request = self.client.get(&url).timeout(self.config.timeout);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        debug!(%url, "portfolio request");
        let response = request.send().await.map_err(|e| classify(e, self.config.timeout))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| classify(e, self.config.timeout))?;
        if !status.is_success() {
            error!(%url, status = status.as_u16(), "portfolio request failed");
            return Err(PipelineError::upstream(
                PORTFOLIO_SERVICE,
                format!("HTTP {}: {body}", status.as_u16()),
            ));
        }

        let envelope: PortfolioEnvelope = serde_json::from_str(&body)?;
        let snapshot = envelope.data.into_snapshot();
        info!(loans = snapshot.loans.len(), "portfolio fetched");
        Ok(snapshot)
    }
}

fn classify(e: reqwest::Error, after: Duration) -> PipelineError {
    if e.is_timeout() {
        PipelineError::Timeout { service: PORTFOLIO_SERVICE.to_string(), after }
    } else {
        PipelineError::upstream(PORTFOLIO_SERVICE, e.to_string())
    }
}

/// A fixed portfolio, either built in memory or read from a JSON snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticPortfolioSource {
    snapshot: PortfolioSnapshot,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    Envelope(PortfolioEnvelope),
    Payload(PortfolioPayload),
    Loans(Vec<IncomingLoan>),
}

impl StaticPortfolioSource {
    pub fn new(loans: Vec<LoanRecord>) -> Self {
        Self { snapshot: PortfolioSnapshot::from_loans(loans) }
    }

    pub fn from_snapshot(snapshot: PortfolioSnapshot) -> Self {
        Self { snapshot }
    }

    /// Parse a snapshot in any of the shapes the backend produces: the full
    /// `{"data": {...}}` envelope, a bare `{"loans": [...]}` payload or a plain
    /// array of loans.
    pub fn from_json(json: &str) -> Result<Self> {
        let payload = match serde_json::from_str::<SnapshotFile>(json)? {
            SnapshotFile::Envelope(envelope) => envelope.data,
            SnapshotFile::Payload(payload) => payload,
            SnapshotFile::Loans(loans) => PortfolioPayload { loans, analytics: None },
        };
        Ok(Self { snapshot: payload.into_snapshot() })
    }

    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::Parse(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }
}

#[async_trait]
impl PortfolioSource for StaticPortfolioSource {
    async fn portfolio(&self) -> Result<PortfolioSnapshot> {
        Ok(self.snapshot.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticClientDataSource {
    data: ClientData,
}

impl StaticClientDataSource {
    pub fn new(data: ClientData) -> Self {
        Self { data }
    }
}

#[async_trait]
impl ClientDataSource for StaticClientDataSource {
    async fn client_data(&self) -> Result<ClientData> {
        Ok(self.data.clone())
    }
}
