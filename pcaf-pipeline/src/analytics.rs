//! Aggregate statistics and insights over stored uploaded loans.

use std::collections::BTreeMap;

use pcaf_rag::{Document, MetadataFilter, SearchEngine};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::Result;
use crate::portfolio::{percent, score_bucket};
use crate::render::doc_types;
use crate::upload::Instrument;

const TOP_EMITTERS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentStats {
    pub count: usize,
    pub avg_emissions: f64,
    pub avg_data_quality: f64,
    pub compliance_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskDistribution {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Emitter {
    pub loan_id: String,
    pub emissions: f64,
    pub instrument: Option<Instrument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanDataAnalytics {
    pub total_loans: usize,
    pub by_instrument: BTreeMap<String, InstrumentStats>,
    pub risk_distribution: RiskDistribution,
    /// Highest emitters first.
    pub top_emitters: Vec<Emitter>,
    pub data_quality_distribution: BTreeMap<String, usize>,
}

impl LoanDataAnalytics {
    /// Fold stored `uploaded_loan` documents into statistics. Documents with
    /// no data quality count as score 5.
    pub fn from_documents(documents: &[Document]) -> Self {
        let mut analytics = Self {
            total_loans: documents.len(),
            by_instrument: Instrument::ALL
                .iter()
                .map(|i| (i.as_str().to_string(), InstrumentStats::default()))
                .collect(),
            ..Self::default()
        };

        let mut compliant: BTreeMap<String, usize> = BTreeMap::new();
        let mut emitters = Vec::with_capacity(documents.len());
        for doc in documents {
            let metadata = &doc.metadata;
            let instrument =
                metadata.get("instrument").and_then(|v| v.as_str().map(str::to_string));
            let emissions = metadata.get("emissions").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let quality = if metadata.data_quality > 0.0 { metadata.data_quality } else { 5.0 };
            let is_compliant =
                metadata.get("isCompliant").and_then(|v| v.as_bool()).unwrap_or(false);

            if let Some(name) = &instrument {
                let stats = analytics.by_instrument.entry(name.clone()).or_default();
                stats.count += 1;
                stats.avg_emissions += emissions;
                stats.avg_data_quality += quality;
                if is_compliant {
                    *compliant.entry(name.clone()).or_default() += 1;
                }
            }

            let risk = &mut analytics.risk_distribution;
            match quality {
                q if q <= 2.0 => risk.low += 1,
                q if q <= 3.0 => risk.medium += 1,
                _ => risk.high += 1,
            }
            *analytics.data_quality_distribution.entry(score_bucket(quality)).or_default() += 1;

            emitters.push(Emitter {
                loan_id: metadata
                    .get("loanId")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
                emissions,
                instrument: instrument.and_then(|i| i.parse().ok()),
            });
        }

        for (name, stats) in &mut analytics.by_instrument {
            if stats.count > 0 {
                let count = stats.count as f64;
                stats.avg_emissions /= count;
                stats.avg_data_quality /= count;
                let compliant = compliant.get(name).copied().unwrap_or(0);
                stats.compliance_rate = percent(compliant as f64, count);
            }
        }

        emitters.sort_by(|a, b| b.emissions.total_cmp(&a.emissions));
        emitters.truncate(TOP_EMITTERS);
        analytics.top_emitters = emitters;
        analytics
    }

    /// Loan-weighted compliance across instruments, zero when empty.
    pub fn overall_compliance(&self) -> f64 {
        if self.total_loans == 0 {
            return 0.0;
        }
        let weighted: f64 =
            self.by_instrument.values().map(|s| s.compliance_rate * s.count as f64).sum();
        weighted / self.total_loans as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Risk,
    Opportunity,
    Compliance,
    Performance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioInsight {
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub title: String,
    pub description: String,
    pub impact: Impact,
    pub action_items: Vec<String>,
    pub affected_loans: Vec<String>,
}

fn actions(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Insights derived from [`LoanDataAnalytics`]; empty when no loans are stored.
pub fn portfolio_insights(analytics: &LoanDataAnalytics) -> Vec<PortfolioInsight> {
    let mut insights = Vec::new();
    let total = analytics.total_loans;
    if total == 0 {
        return insights;
    }

    let high = analytics.risk_distribution.high;
    if high as f64 > total as f64 * 0.2 {
        insights.push(PortfolioInsight {
            kind: InsightKind::Risk,
            title: "High Data Quality Risk Detected".to_string(),
            description: format!(
                "{high} loans ({:.1}%) have PCAF scores above 3, indicating poor data quality.",
                percent(high as f64, total as f64)
            ),
            impact: Impact::High,
            action_items: actions(&[
                "Implement data collection improvements",
                "Engage borrowers for better data",
                "Consider third-party data sources",
            ]),
            affected_loans: analytics
                .top_emitters
                .iter()
                .take(5)
                .map(|e| e.loan_id.clone())
                .collect(),
        });
    }

    let auto = analytics.by_instrument.get(Instrument::AutoLoans.as_str());
    if let Some(auto) = auto.filter(|s| s.count > 0 && s.avg_emissions > 3.0) {
        insights.push(PortfolioInsight {
            kind: InsightKind::Opportunity,
            title: "EV Transition Opportunity".to_string(),
            description: format!(
                "Auto loan portfolio has high average emissions ({:.1} tCO2e). \
                 Promoting EV financing could reduce emissions significantly.",
                auto.avg_emissions
            ),
            impact: Impact::Medium,
            action_items: actions(&[
                "Launch EV-specific loan products",
                "Offer preferential rates for EVs",
                "Partner with EV manufacturers",
            ]),
            affected_loans: Vec::new(),
        });
    }

    let compliance = analytics.overall_compliance();
    if compliance < 80.0 {
        insights.push(PortfolioInsight {
            kind: InsightKind::Compliance,
            title: "PCAF Compliance Below Target".to_string(),
            description: format!(
                "Portfolio compliance rate is {compliance:.1}%, below the 80% target. \
                 Focus on data quality improvements."
            ),
            impact: Impact::High,
            action_items: actions(&[
                "Prioritize data quality initiatives",
                "Implement automated data validation",
                "Train staff on PCAF requirements",
            ]),
            affected_loans: Vec::new(),
        });
    }
    insights
}

/// Statistics over every stored uploaded loan, or those of one upload.
pub async fn loan_data_analytics(
    engine: &SearchEngine,
    upload_id: Option<&str>,
) -> Result<LoanDataAnalytics> {
    let mut filter = MetadataFilter::new().eq("type", doc_types::UPLOADED_LOAN);
    if let Some(id) = upload_id {
        filter = filter.eq("uploadId", id);
    }
    let documents = engine.documents_by_metadata(&filter, None).await.inspect_err(|e| {
        error!(upload_id, error = %e, "failed to load uploaded loans");
    })?;
    debug!(upload_id, documents = documents.len(), "computing loan data analytics");
    Ok(LoanDataAnalytics::from_documents(&documents))
}

/// [`portfolio_insights`] over [`loan_data_analytics`].
pub async fn generate_portfolio_insights(
    engine: &SearchEngine,
    upload_id: Option<&str>,
) -> Result<Vec<PortfolioInsight>> {
    Ok(portfolio_insights(&loan_data_analytics(engine, upload_id).await?))
}
