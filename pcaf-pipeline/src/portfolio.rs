//! Portfolio-level aggregates and the auxiliary client data the pipeline renders.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::loan::{COMPLIANCE_THRESHOLD, LoanRecord};

/// Headline totals for a portfolio.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub total_loans: usize,
    pub total_loan_amount: f64,
    pub total_outstanding_balance: f64,
    pub total_financed_emissions: f64,
    pub average_data_quality_score: f64,
    pub loan_count: usize,
}

impl PortfolioSummary {
    /// Totals computed directly from loan records; the quality score is
    /// balance-weighted.
    pub fn from_loans(loans: &[LoanRecord]) -> Self {
        let total_outstanding_balance: f64 = loans.iter().map(|l| l.outstanding_balance).sum();
        Self {
            total_loans: loans.len(),
            total_loan_amount: loans.iter().map(|l| l.loan_amount).sum(),
            total_outstanding_balance,
            total_financed_emissions: loans.iter().map(LoanRecord::financed_emissions).sum(),
            average_data_quality_score: weighted_data_quality(loans, total_outstanding_balance),
            loan_count: loans.len(),
        }
    }
}

/// Loans plus their summary, as returned by a portfolio source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PortfolioSnapshot {
    pub loans: Vec<LoanRecord>,
    pub summary: PortfolioSummary,
}

impl PortfolioSnapshot {
    pub fn from_loans(loans: Vec<LoanRecord>) -> Self {
        let summary = PortfolioSummary::from_loans(&loans);
        Self { loans, summary }
    }
}

/// PCAF metrics derived from a portfolio.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioMetrics {
    pub total_loans: usize,
    pub total_loan_value: f64,
    pub total_outstanding_balance: f64,
    pub total_financed_emissions: f64,
    /// PCAF Box 8 weighted data quality score.
    pub weighted_avg_data_quality: f64,
    pub avg_attribution_factor: f64,
    /// kg CO2e per dollar outstanding, expressed per $1,000.
    pub emission_intensity_per_dollar: f64,
    /// Annual tCO2e per financed vehicle.
    pub physical_emission_intensity: f64,
    pub waci: f64,
    pub emissions_by_fuel_type: BTreeMap<String, f64>,
    pub emissions_by_vehicle_type: BTreeMap<String, f64>,
    pub loans_by_data_quality: BTreeMap<String, usize>,
    pub data_quality_distribution: BTreeMap<String, f64>,
    pub pcaf_compliant_loans: usize,
    pub high_risk_loans: usize,
}

impl PortfolioMetrics {
    /// Compute metrics; portfolio totals come from `summary`, everything else
    /// from the loans themselves.
    pub fn compute(loans: &[LoanRecord], summary: &PortfolioSummary) -> Self {
        let total_outstanding_balance = summary.total_outstanding_balance;
        let total_financed_emissions = summary.total_financed_emissions;
        let count = loans.len();

        let mut metrics = Self {
            total_loans: count,
            total_loan_value: summary.total_loan_amount,
            total_outstanding_balance,
            total_financed_emissions,
            weighted_avg_data_quality: weighted_data_quality(loans, total_outstanding_balance),
            avg_attribution_factor: mean(
                loans.iter().map(|l| l.emissions_data.attribution_factor),
                count,
            ),
            emission_intensity_per_dollar: if total_outstanding_balance > 0.0 {
                total_financed_emissions * 1000.0 / total_outstanding_balance
            } else {
                0.0
            },
            physical_emission_intensity: mean(
                loans.iter().map(|l| l.emissions_data.annual_emissions_tco2e),
                count,
            ),
            waci: waci(loans),
            loans_by_data_quality: score_buckets(0),
            data_quality_distribution: score_buckets(0.0),
            ..Default::default()
        };

        for loan in loans {
            let financed = loan.financed_emissions();
            *metrics
                .emissions_by_fuel_type
                .entry(loan.vehicle_details.fuel_type.clone())
                .or_default() += financed;
            *metrics
                .emissions_by_vehicle_type
                .entry(loan.vehicle_details.vehicle_type.clone())
                .or_default() += financed;

            let bucket = score_bucket(loan.data_quality());
            *metrics.loans_by_data_quality.entry(bucket.clone()).or_default() += 1;
            *metrics.data_quality_distribution.entry(bucket).or_default() += financed;

            if loan.data_quality() <= COMPLIANCE_THRESHOLD {
                metrics.pcaf_compliant_loans += 1;
            }
            if loan.data_quality() >= 4.0 || loan.emissions_data.attribution_factor > 0.9 {
                metrics.high_risk_loans += 1;
            }
        }
        metrics
    }

    /// Share of compliant loans in percent, zero for an empty portfolio.
    pub fn compliance_rate(&self) -> f64 {
        percent(self.pcaf_compliant_loans as f64, self.total_loans as f64)
    }
}

/// The `floor(score)` bucket label used by quality distributions.
pub fn score_bucket(score: f64) -> String {
    format!("{}", score.floor() as i64)
}

pub(crate) fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 { part / whole * 100.0 } else { 0.0 }
}

fn score_buckets<T: Copy>(zero: T) -> BTreeMap<String, T> {
    (1..=5).map(|score| (score.to_string(), zero)).collect()
}

fn mean(values: impl Iterator<Item = f64>, count: usize) -> f64 {
    if count == 0 { 0.0 } else { values.sum::<f64>() / count as f64 }
}

fn weighted_data_quality(loans: &[LoanRecord], total_outstanding_balance: f64) -> f64 {
    if total_outstanding_balance <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = loans.iter().map(|l| l.outstanding_balance * l.data_quality()).sum();
    weighted / total_outstanding_balance
}

fn waci(loans: &[LoanRecord]) -> f64 {
    let total: f64 = loans.iter().map(|l| l.outstanding_balance).sum();
    if total <= 0.0 {
        return 0.0;
    }
    loans.iter().map(|l| l.financed_emissions() * (l.outstanding_balance / total)).sum()
}

/// A report or narrative authored outside the portfolio backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientDocument {
    pub id: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub title: String,
    pub content: String,
    pub metadata: ClientDocumentMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientDocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporting_period: Option<String>,
    pub created_date: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub data_quality: f64,
    pub confidence_level: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    OnTrack,
    AtRisk,
    Behind,
}

impl TargetStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnTrack => "on_track",
            Self::AtRisk => "at_risk",
            Self::Behind => "behind",
        }
    }
}

/// A climate target the bank has committed to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BankTarget {
    pub id: String,
    pub target_type: String,
    pub target_value: f64,
    pub current_value: f64,
    pub unit: String,
    pub deadline: DateTime<Utc>,
    pub status: TargetStatus,
    pub description: String,
}

impl BankTarget {
    /// Progress towards the target in percent.
    pub fn progress(&self) -> f64 {
        percent(self.current_value, self.target_value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A periodic client report, newest first in [`ClientData::reports`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientReport {
    pub id: String,
    pub client_id: String,
    pub report_type: String,
    pub generated_date: DateTime<Utc>,
    pub reporting_period: ReportingPeriod,
}

/// Everything a client data source contributes to a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientData {
    #[serde(default)]
    pub documents: Vec<ClientDocument>,
    #[serde(default)]
    pub bank_targets: Vec<BankTarget>,
    #[serde(default)]
    pub reports: Vec<ClientReport>,
}


#[cfg(test)]
mod tests {
    use super::fixtures::loan;
    use super::*;

    #[test]
    fn metrics_weight_quality_by_balance() {
        let loans = vec![
            loan("a", 30_000.0, 3.0, 2.0, "Gasoline"),
            loan("b", 10_000.0, 1.0, 4.0, "Electric"),
        ];
        let summary = PortfolioSummary::from_loans(&loans);
        let metrics = PortfolioMetrics::compute(&loans, &summary);

        assert_eq!(metrics.total_loans, 2);
        assert!((metrics.weighted_avg_data_quality - 2.5).abs() < 1e-9);
        assert!((metrics.emission_intensity_per_dollar - 0.1).abs() < 1e-9);
        assert!((metrics.waci - 2.5).abs() < 1e-9);
        assert!((metrics.physical_emission_intensity - 4.0).abs() < 1e-9);
        assert_eq!(metrics.pcaf_compliant_loans, 1);
        assert_eq!(metrics.high_risk_loans, 1);
        assert_eq!(metrics.loans_by_data_quality["2"], 1);
        assert_eq!(metrics.loans_by_data_quality["4"], 1);
        assert_eq!(metrics.loans_by_data_quality["5"], 0);
        assert_eq!(metrics.emissions_by_fuel_type["Electric"], 1.0);
        assert!((metrics.compliance_rate() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn empty_portfolio_has_no_nan() {
        let metrics = PortfolioMetrics::compute(&[], &PortfolioSummary::default());
        assert_eq!(metrics.avg_attribution_factor, 0.0);
        assert_eq!(metrics.weighted_avg_data_quality, 0.0);
        assert_eq!(metrics.compliance_rate(), 0.0);
    }

    #[test]
    fn target_progress_guards_zero_target() {
        let target = BankTarget {
            id: "t".into(),
            target_type: "emissions_reduction".into(),
            target_value: 0.0,
            current_value: 3.0,
            unit: "%".into(),
            deadline: Utc::now(),
            status: TargetStatus::Behind,
            description: "Reduce".into(),
        };
        assert_eq!(target.progress(), 0.0);
    }

    mod properties {
        use proptest::prelude::*;

        use super::super::fixtures::loan;
        use super::*;

        fn loans() -> impl Strategy<Value = Vec<LoanRecord>> {
            let row = (1_000.0f64..500_000.0, 0.0f64..50.0, 1u8..=5);
            prop::collection::vec(row, 1..40).prop_map(|rows| {
                rows.into_iter()
                    .enumerate()
                    .map(|(i, (balance, financed, quality))| {
                        loan(&format!("P{i}"), balance, financed, f64::from(quality), "Gasoline")
                    })
                    .collect()
            })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn weighted_quality_stays_within_loan_scores(loans in loans()) {
                let summary = PortfolioSummary::from_loans(&loans);
                let metrics = PortfolioMetrics::compute(&loans, &summary);
                let lo = loans.iter().map(|l| l.data_quality()).fold(f64::INFINITY, f64::min);
                let hi = loans.iter().map(|l| l.data_quality()).fold(f64::NEG_INFINITY, f64::max);
                prop_assert!(metrics.weighted_avg_data_quality >= lo - 1e-9);
                prop_assert!(metrics.weighted_avg_data_quality <= hi + 1e-9);
            }

            #[test]
            fn every_loan_lands_in_one_quality_bucket(loans in loans()) {
                let summary = PortfolioSummary::from_loans(&loans);
                let metrics = PortfolioMetrics::compute(&loans, &summary);
                prop_assert_eq!(metrics.loans_by_data_quality.values().sum::<usize>(), loans.len());
                prop_assert!(metrics.compliance_rate() <= 100.0);
            }
        }
    }
}
