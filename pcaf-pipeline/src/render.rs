//! Rendering of source records into retrievable documents.
//!
//! Every renderer is a pure function of its input plus an explicit `now`, so
//! re-running the pipeline over unchanged data yields identical content. The
//! metadata envelope carries the numeric fields later used for filtering.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use pcaf_rag::{Document, DocumentMetadata, collections};

use crate::loan::LoanRecord;
use crate::portfolio::{
    BankTarget, ClientDocument, ClientReport, PortfolioMetrics, PortfolioSummary, TargetStatus,
    percent,
};
use crate::risk::{RiskLevel, loan_risk, portfolio_risk, sector_risk};

/// Document type tags written to `metadata.type`.
pub mod doc_types {
    pub const PORTFOLIO_OVERVIEW: &str = "portfolio_overview";
    pub const LOAN_ANALYSIS: &str = "loan_analysis";
    pub const ANALYTICS_REPORT: &str = "analytics_report";
    pub const SECTOR_ANALYSIS: &str = "sector_analysis";
    pub const RISK_PROFILE: &str = "risk_profile";
    pub const CLIENT_DOCUMENT: &str = "client_document";
    pub const BANK_TARGETS: &str = "bank_targets";
    pub const HISTORICAL_ANALYSIS: &str = "historical_analysis";
    pub const UPLOADED_LOAN: &str = "uploaded_loan";
}

const PORTFOLIO_SOURCE: &str = "portfolio_service";
const CLIENT_SOURCE: &str = "client_documents_service";

/// Destination collection for a document type; unknown types land in
/// `client_insights`.
pub fn collection_for(doc_type: &str) -> &'static str {
    match doc_type {
        doc_types::PORTFOLIO_OVERVIEW => collections::PORTFOLIO_DOCUMENTS,
        doc_types::LOAN_ANALYSIS => collections::LOAN_DOCUMENTS,
        doc_types::ANALYTICS_REPORT | doc_types::SECTOR_ANALYSIS | doc_types::RISK_PROFILE => {
            collections::ANALYTICS_DOCUMENTS
        }
        doc_types::BANK_TARGETS => collections::BANK_TARGETS,
        doc_types::HISTORICAL_ANALYSIS => collections::HISTORICAL_REPORTS,
        _ => collections::CLIENT_INSIGHTS,
    }
}

pub fn portfolio_overview(
    summary: &PortfolioSummary,
    metrics: &PortfolioMetrics,
    now: DateTime<Utc>,
) -> Document {
    let wdqs = metrics.weighted_avg_data_quality;
    let composition = metrics
        .emissions_by_fuel_type
        .iter()
        .map(|(fuel, emissions)| {
            format!(
                "- {fuel}: {emissions:.0} tCO2e ({:.1}%)",
                percent(*emissions, summary.total_financed_emissions)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let content = format!(
        "PORTFOLIO OVERVIEW AND PERFORMANCE

Executive Summary:
- Total Loans: {total_loans}
- Portfolio Value: ${value:.1}M
- Outstanding Balance: ${outstanding:.1}M
- Total Financed Emissions: {emissions:.0} tCO2e
- Average Data Quality Score: {avg_quality:.2}/5

PCAF Compliance:
- Weighted Average Data Quality: {wdqs:.2}/5
- Compliant Loans: {compliant}/{loans} ({compliance:.1}%)
- High Risk Loans: {high_risk}
- Box 8 WDQS Status: {wdqs_status}

Emissions Performance:
- Emission Intensity: {intensity:.2} kg CO2e per $1,000
- Physical Emission Intensity: {physical:.2} tCO2e per vehicle
- WACI: {waci:.2} tCO2e
- Average Attribution Factor: {attribution:.1}%

Portfolio Composition:
{composition}",
        total_loans = summary.total_loans,
        value = summary.total_loan_amount / 1_000_000.0,
        outstanding = summary.total_outstanding_balance / 1_000_000.0,
        emissions = summary.total_financed_emissions,
        avg_quality = summary.average_data_quality_score,
        compliant = metrics.pcaf_compliant_loans,
        loans = metrics.total_loans,
        compliance = metrics.compliance_rate(),
        high_risk = metrics.high_risk_loans,
        wdqs_status = if wdqs <= 3.0 { "COMPLIANT" } else { "NON-COMPLIANT" },
        intensity = metrics.emission_intensity_per_dollar,
        physical = metrics.physical_emission_intensity,
        waci = metrics.waci,
        attribution = metrics.avg_attribution_factor * 100.0,
    );

    let metadata = DocumentMetadata::new(doc_types::PORTFOLIO_OVERVIEW, PORTFOLIO_SOURCE)
        .with_timestamp(now)
        .with_data_quality(summary.average_data_quality_score)
        .with_tags(["portfolio", "overview", "pcaf", "emissions", "performance"])
        .with_field("totalLoans", summary.total_loans)
        .with_field("emissionIntensity", metrics.emission_intensity_per_dollar)
        .with_field(
            "riskLevel",
            portfolio_risk(wdqs, metrics.emission_intensity_per_dollar).as_str(),
        );
    Document::new("portfolio_overview", content.trim(), metadata)
}

pub fn loan_analysis(loan: &LoanRecord) -> Document {
    let vehicle = &loan.vehicle_details;
    let emissions = &loan.emissions_data;
    let intensity = loan.emission_intensity();
    let quality = loan.data_quality();
    let efficiency =
        vehicle.efficiency_mpg.map_or_else(|| "N/A".to_string(), |mpg| mpg.to_string());
    let assessment = loan.quality_assessment();

    let mut content = format!(
        "LOAN ANALYSIS - {id}

Borrower: {borrower}
Loan Details:
- Amount: ${amount}
- Outstanding: ${outstanding}
- Rate: {rate:.2}%
- Term: {term} months

Vehicle Information:
- Make/Model: {make} {model}
- Year: {year}
- Type: {vehicle_type}
- Fuel: {fuel}
- Efficiency: {efficiency} MPG

Emissions Analysis:
- Annual Emissions: {annual:.2} tCO2e
- Financed Emissions: {financed:.2} tCO2e
- Attribution Factor: {attribution:.1}%
- Emission Intensity: {intensity:.2} kg CO2e/$1k
- PCAF Score: {quality}/5
- Compliance: {compliance}",
        id = loan.loan_id,
        borrower = loan.borrower_name,
        amount = grouped(loan.loan_amount),
        outstanding = grouped(loan.outstanding_balance),
        rate = loan.interest_rate * 100.0,
        term = loan.term_months,
        make = vehicle.make,
        model = vehicle.model,
        year = vehicle.year,
        vehicle_type = vehicle.vehicle_type,
        fuel = vehicle.fuel_type,
        annual = emissions.annual_emissions_tco2e,
        financed = emissions.financed_emissions_tco2e,
        attribution = emissions.attribution_factor * 100.0,
        compliance = if loan.is_compliant() { "Compliant" } else { "Non-compliant" },
    );
    if !assessment.warnings.is_empty() {
        content.push_str("\n\nData Quality Warnings:");
        content.extend(assessment.warnings.iter().map(|w| format!("\n- {w}")));
    }
    if !assessment.recommendations.is_empty() {
        content.push_str("\n\nRecommended Actions:");
        content.extend(assessment.recommendations.iter().map(|r| format!("\n- {r}")));
    }

    let metadata = DocumentMetadata::new(doc_types::LOAN_ANALYSIS, PORTFOLIO_SOURCE)
        .with_timestamp(loan.updated_at)
        .with_data_quality(quality)
        .with_tags([
            "loan".to_string(),
            "vehicle".to_string(),
            vehicle.fuel_type.to_lowercase(),
            vehicle.vehicle_type.to_lowercase(),
            if loan.is_compliant() { "compliant" } else { "non-compliant" }.to_string(),
        ])
        .with_field("loanId", loan.loan_id.as_str())
        .with_field("sector", loan.sector())
        .with_field("fuelType", vehicle.fuel_type.as_str())
        .with_field("financedEmissions", emissions.financed_emissions_tco2e)
        .with_field("emissionIntensity", intensity)
        .with_field("pcafScore", quality)
        .with_field("riskLevel", loan_risk(quality, intensity).as_str())
        .with_field("qualityWarnings", assessment.warnings.len());
    Document::new(format!("loan_{}", loan.loan_id), content, metadata)
}

pub fn analytics_report(metrics: &PortfolioMetrics, now: DateTime<Utc>) -> Document {
    let mut fuels: Vec<(&String, &f64)> = metrics.emissions_by_fuel_type.iter().collect();
    fuels.sort_by(|a, b| b.1.total_cmp(a.1));
    let fuel_lines = fuels
        .iter()
        .map(|(fuel, emissions)| {
            format!(
                "- {fuel}: {emissions:.0} tCO2e ({:.1}%)",
                percent(**emissions, metrics.total_financed_emissions)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let quality_lines = metrics
        .loans_by_data_quality
        .iter()
        .map(|(score, count)| {
            format!(
                "- Score {score}: {count} loans ({:.1}%)",
                percent(*count as f64, metrics.total_loans as f64)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let content = format!(
        "COMPREHENSIVE PORTFOLIO ANALYTICS

Portfolio Metrics:
- Total Loans: {total_loans}
- Total Value: ${value:.1}M
- Outstanding Balance: ${outstanding:.1}M
- Total Emissions: {emissions:.0} tCO2e

PCAF Analysis:
- WDQS: {wdqs:.2}/5
- Compliant Loans: {compliant}/{total_loans}
- High Risk Loans: {high_risk}
- Compliance Rate: {compliance:.1}%

Emission Metrics:
- Intensity per Dollar: {intensity:.2} kg CO2e/$1k
- Physical Intensity: {physical:.2} tCO2e/vehicle
- WACI: {waci:.2} tCO2e
- Avg Attribution: {attribution:.1}%

Fuel Type Distribution:
{fuel_lines}

Data Quality Distribution:
{quality_lines}",
        total_loans = metrics.total_loans,
        value = metrics.total_loan_value / 1_000_000.0,
        outstanding = metrics.total_outstanding_balance / 1_000_000.0,
        emissions = metrics.total_financed_emissions,
        wdqs = metrics.weighted_avg_data_quality,
        compliant = metrics.pcaf_compliant_loans,
        high_risk = metrics.high_risk_loans,
        compliance = metrics.compliance_rate(),
        intensity = metrics.emission_intensity_per_dollar,
        physical = metrics.physical_emission_intensity,
        waci = metrics.waci,
        attribution = metrics.avg_attribution_factor * 100.0,
    );

    let metadata = DocumentMetadata::new(doc_types::ANALYTICS_REPORT, PORTFOLIO_SOURCE)
        .with_timestamp(now)
        .with_data_quality(metrics.weighted_avg_data_quality)
        .with_tags(["analytics", "metrics", "pcaf", "waci", "emissions", "performance"])
        .with_field("waci", metrics.waci)
        .with_field("emissionIntensity", metrics.emission_intensity_per_dollar);
    Document::new("portfolio_analytics", content.trim(), metadata)
}

/// One document per sector, in sector name order.
pub fn sector_analyses(loans: &[LoanRecord], now: DateTime<Utc>) -> Vec<Document> {
    let mut groups: BTreeMap<&str, Vec<&LoanRecord>> = BTreeMap::new();
    for loan in loans {
        groups.entry(loan.sector()).or_default().push(loan);
    }

    groups
        .into_iter()
        .map(|(sector, members)| {
            let aggregate = Aggregate::of(&members);
            let risk = sector_risk(aggregate.avg_quality, aggregate.intensity, members.len());
            let content = format!(
                "Sector Analysis - {sector}:
- Total Loans: {count}
- Sector Value: ${value:.1}M
- Sector Emissions: {emissions:.0} tCO2e
- Emissions Intensity: {intensity:.2} kg CO2e/$1k
- Average Data Quality: {quality:.1}/5
- Portfolio Share: {share:.1}%

Performance vs Portfolio:
- Intensity Comparison: {comparison}
- Data Quality: {quality_status}
- Risk Level: {risk}",
                count = members.len(),
                value = aggregate.balance / 1_000_000.0,
                emissions = aggregate.emissions,
                intensity = aggregate.intensity,
                quality = aggregate.avg_quality,
                share = percent(members.len() as f64, loans.len() as f64),
                comparison =
                    if aggregate.intensity <= 2.5 { "Below average" } else { "Above average" },
                quality_status =
                    if aggregate.avg_quality <= 3.0 { "Compliant" } else { "Needs improvement" },
            );

            let metadata = DocumentMetadata::new(doc_types::SECTOR_ANALYSIS, PORTFOLIO_SOURCE)
                .with_timestamp(now)
                .with_data_quality(aggregate.avg_quality)
                .with_tags(["sector".to_string(), sector.to_lowercase(), risk.to_string()])
                .with_field("sector", sector)
                .with_field("loanCount", members.len())
                .with_field("emissionIntensity", aggregate.intensity)
                .with_field("pcafScore", aggregate.avg_quality)
                .with_field("riskLevel", risk.as_str());
            let slug = sector.to_lowercase().split_whitespace().collect::<Vec<_>>().join("_");
            let id = format!("sector_{slug}");
            Document::new(id, content, metadata)
        })
        .collect()
}

/// One document per risk bucket (low, medium, high), empty buckets included.
pub fn risk_profiles(loans: &[LoanRecord], now: DateTime<Utc>) -> Vec<Document> {
    RiskLevel::ALL
        .into_iter()
        .map(|level| {
            let members: Vec<&LoanRecord> = loans
                .iter()
                .filter(|l| loan_risk(l.data_quality(), l.emission_intensity()) == level)
                .collect();
            let aggregate = Aggregate::of(&members);
            let quality_issues = members.iter().filter(|l| l.data_quality() > 3.0).count();
            let high_emission = members
                .iter()
                .filter(|l| l.outstanding_balance > 0.0 && l.emission_intensity() > 3.0)
                .count();
            let missing = members
                .iter()
                .filter(|l| !l.has_vehicle_data() || l.financed_emissions() == 0.0)
                .count();

            let content = format!(
                "Risk Profile Analysis - {upper} Risk:
- Loans in Category: {count}
- Total Value: ${value:.1}M
- Total Emissions: {emissions:.0} tCO2e
- Average Data Quality: {quality:.1}/5
- Portfolio Share: {share:.1}%

Risk Characteristics:
- Data Quality Issues: {quality_issues} loans
- High Emission Loans: {high_emission} loans
- Missing Data: {missing} loans

Recommended Actions:
{actions}",
                upper = level.as_str().to_uppercase(),
                count = members.len(),
                value = aggregate.balance / 1_000_000.0,
                emissions = aggregate.emissions,
                quality = aggregate.avg_quality,
                share = percent(members.len() as f64, loans.len() as f64),
                actions = recommendations(level),
            );

            let metadata = DocumentMetadata::new(doc_types::RISK_PROFILE, PORTFOLIO_SOURCE)
                .with_timestamp(now)
                .with_data_quality(aggregate.avg_quality)
                .with_tags(["risk", level.as_str(), "profile"])
                .with_field("loanCount", members.len())
                .with_field("emissionIntensity", aggregate.intensity)
                .with_field("pcafScore", aggregate.avg_quality)
                .with_field("riskLevel", level.as_str());
            Document::new(format!("risk_profile_{level}"), content, metadata)
        })
        .collect()
}

fn recommendations(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Low => {
            "- Continue monitoring\n\
             - Maintain data quality standards\n\
             - Consider portfolio expansion"
        }
        RiskLevel::Medium => {
            "- Improve data collection for high-value loans\n\
             - Monitor emissions trends\n\
             - Implement quarterly reviews"
        }
        RiskLevel::High => {
            "- Immediate data quality improvement required\n\
             - Consider loan restructuring\n\
             - Implement enhanced monitoring\n\
             - Prioritize EV transition support"
        }
    }
}

pub fn client_documents(documents: &[ClientDocument]) -> Vec<Document> {
    documents
        .iter()
        .map(|doc| {
            let tags = doc
                .metadata
                .tags
                .iter()
                .cloned()
                .chain(["client".to_string(), "document".to_string()]);
            let metadata = DocumentMetadata::new(doc_types::CLIENT_DOCUMENT, CLIENT_SOURCE)
                .with_timestamp(doc.metadata.last_modified)
                .with_data_quality(doc.metadata.data_quality)
                .with_tags(tags)
                .with_field("originalType", doc.doc_type.as_str())
                .with_field("confidenceLevel", doc.metadata.confidence_level);
            let content = format!("{}\n\n{}", doc.title, doc.content);
            Document::new(format!("client_{}", doc.id), content, metadata)
        })
        .collect()
}

/// `None` when there are no targets.
pub fn bank_targets(targets: &[BankTarget], now: DateTime<Utc>) -> Option<Document> {
    if targets.is_empty() {
        return None;
    }
    let commitments = targets
        .iter()
        .map(|t| {
            format!(
                "{description}\n\
                 - Target: {target} {unit}\n\
                 - Current: {current:.2} {unit}\n\
                 - Progress: {progress:.1}%\n\
                 - Status: {status}\n\
                 - Deadline: {deadline}",
                description = t.description,
                target = t.target_value,
                unit = t.unit,
                current = t.current_value,
                progress = t.progress(),
                status = t.status.as_str().to_uppercase(),
                deadline = t.deadline.format("%Y-%m-%d"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    let with_status = |status: TargetStatus| targets.iter().filter(|t| t.status == status).count();
    let on_track = with_status(TargetStatus::OnTrack);

    let content = format!(
        "CLIMATE TARGETS AND GOALS

Strategic Commitments:
{commitments}

Performance Summary:
- On Track: {on_track} targets
- At Risk: {at_risk} targets
- Behind: {behind} targets
- Achievement Rate: {rate:.1}%",
        at_risk = with_status(TargetStatus::AtRisk),
        behind = with_status(TargetStatus::Behind),
        rate = percent(on_track as f64, targets.len() as f64),
    );

    let metadata = DocumentMetadata::new(doc_types::BANK_TARGETS, CLIENT_SOURCE)
        .with_timestamp(now)
        .with_data_quality(4.0)
        .with_tags(["targets", "goals", "climate", "net-zero", "strategy"])
        .with_field("targetCount", targets.len());
    Some(Document::new("bank_targets", content, metadata))
}

/// `None` when there are no reports. Reports are expected newest first.
pub fn historical_reports(reports: &[ClientReport], now: DateTime<Utc>) -> Option<Document> {
    let (newest, oldest) = (reports.first()?, reports.last()?);
    let recent = reports
        .iter()
        .take(6)
        .map(|r| {
            format!("- {}: {} report", r.reporting_period.start.format("%Y-%m-%d"), r.report_type)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let content = format!(
        "HISTORICAL PERFORMANCE TRENDS

Report Summary:
- Total Reports: {count}
- Period: {start} to {end}
- Frequency: Monthly

Key Trends:
- Portfolio Growth: Consistent expansion
- Data Quality: Improving over time
- Emissions Intensity: Trending toward targets
- EV Adoption: Increasing share

Recent Reports:
{recent}",
        count = reports.len(),
        start = oldest.reporting_period.start.format("%Y-%m-%d"),
        end = newest.reporting_period.end.format("%Y-%m-%d"),
    );

    let metadata = DocumentMetadata::new(doc_types::HISTORICAL_ANALYSIS, CLIENT_SOURCE)
        .with_timestamp(now)
        .with_data_quality(3.5)
        .with_tags(["historical", "trends", "performance", "time-series"])
        .with_field("reportCount", reports.len());
    Some(Document::new("historical_reports", content, metadata))
}

/// Balance, emissions and quality totals over a group of loans.
struct Aggregate {
    balance: f64,
    emissions: f64,
    intensity: f64,
    avg_quality: f64,
}

impl Aggregate {
    fn of(loans: &[&LoanRecord]) -> Self {
        let balance: f64 = loans.iter().map(|l| l.outstanding_balance).sum();
        let emissions: f64 = loans.iter().map(|l| l.financed_emissions()).sum();
        let avg_quality = if loans.is_empty() {
            5.0
        } else {
            loans.iter().map(|l| l.data_quality()).sum::<f64>() / loans.len() as f64
        };
        Self {
            balance,
            emissions,
            intensity: if balance > 0.0 { emissions / balance * 1000.0 } else { 0.0 },
            avg_quality,
        }
    }
}

/// Format with thousands separators and at most three decimals.
pub(crate) fn grouped(value: f64) -> String {
    let text = format!("{:.3}", value.abs());
    let (int, frac) = text.split_once('.').unwrap_or((text.as_str(), ""));
    let frac = frac.trim_end_matches('0');

    let mut out = String::with_capacity(text.len() + int.len() / 3 + 1);
    if value < 0.0 && text.chars().any(|c| c.is_ascii_digit() && c != '0') {
        out.push('-');
    }
    for (i, ch) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if !frac.is_empty() {
        out.push('.');
        out.push_str(frac);
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::loan::DataQualityAssessment;
    use crate::portfolio::fixtures::loan;
    use crate::portfolio::{ClientDocumentMetadata, ReportingPeriod};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn grouped_matches_locale_formatting() {
        assert_eq!(grouped(25_000.0), "25,000");
        assert_eq!(grouped(1_234_567.5), "1,234,567.5");
        assert_eq!(grouped(999.0), "999");
        assert_eq!(grouped(0.0), "0");
        assert_eq!(grouped(-1200.25), "-1,200.25");
    }

    #[test]
    fn type_to_collection_mapping() {
        assert_eq!(collection_for("portfolio_overview"), "portfolio_documents");
        assert_eq!(collection_for("loan_analysis"), "loan_documents");
        assert_eq!(collection_for("risk_profile"), "analytics_documents");
        assert_eq!(collection_for("sector_analysis"), "analytics_documents");
        assert_eq!(collection_for("bank_targets"), "bank_targets");
        assert_eq!(collection_for("historical_analysis"), "historical_reports");
        assert_eq!(collection_for("client_document"), "client_insights");
        assert_eq!(collection_for("something_else"), "client_insights");
    }

    #[test]
    fn loan_document_carries_filterable_fields() {
        let record = loan("L-1", 20_000.0, 100.0, 4.0, "Gasoline");
        let doc = loan_analysis(&record);

        assert_eq!(doc.id, "loan_L-1");
        assert!(doc.content.starts_with("LOAN ANALYSIS - L-1"));
        assert!(doc.content.contains("- Outstanding: $20,000"));
        assert!(doc.content.contains("- Rate: 5.00%"));
        assert!(doc.content.contains("- Compliance: Non-compliant"));
        assert_eq!(doc.metadata.doc_type, "loan_analysis");
        assert_eq!(doc.metadata.timestamp, record.updated_at);
        assert_eq!(
            doc.metadata.tags,
            vec!["loan", "vehicle", "gasoline", "sedan", "non-compliant"]
        );
        assert_eq!(doc.metadata.get("emissionIntensity").and_then(|v| v.as_f64()), Some(5.0));
        assert_eq!(doc.metadata.get("riskLevel"), Some("medium".into()));
    }

    #[test]
    fn loan_document_lists_assessment_findings() {
        let mut record = loan("L-2", 20_000.0, 10.0, 4.0, "Diesel");
        assert!(!loan_analysis(&record).content.contains("Data Quality Warnings"));

        record.data_quality_assessment = Some(DataQualityAssessment {
            overall_score: 4.0,
            warnings: vec!["Mileage estimated from regional average".into()],
            recommendations: vec!["Collect odometer readings".into()],
            ..Default::default()
        });
        let doc = loan_analysis(&record);

        assert!(doc.content.ends_with(
            "Data Quality Warnings:\n- Mileage estimated from regional average\n\n\
             Recommended Actions:\n- Collect odometer readings"
        ));
        assert_eq!(doc.metadata.get("qualityWarnings").and_then(|v| v.as_u64()), Some(1));
    }

    #[test]
    fn rendering_is_deterministic() {
        let loans = vec![
            loan("a", 10_000.0, 2.0, 2.0, "Electric"),
            loan("b", 5_000.0, 1.0, 3.0, "Diesel"),
        ];
        let summary = PortfolioSummary::from_loans(&loans);
        let metrics = PortfolioMetrics::compute(&loans, &summary);
        assert_eq!(
            portfolio_overview(&summary, &metrics, now()),
            portfolio_overview(&summary, &metrics, now())
        );
        assert_eq!(analytics_report(&metrics, now()), analytics_report(&metrics, now()));
        assert_eq!(sector_analyses(&loans, now()), sector_analyses(&loans, now()));
    }

    #[test]
    fn overview_reports_wdqs_status() {
        let loans = vec![loan("a", 10_000.0, 2.0, 2.0, "Electric")];
        let summary = PortfolioSummary::from_loans(&loans);
        let metrics = PortfolioMetrics::compute(&loans, &summary);
        let doc = portfolio_overview(&summary, &metrics, now());
        assert_eq!(doc.id, "portfolio_overview");
        assert!(doc.content.contains("Box 8 WDQS Status: COMPLIANT"));
        assert!(doc.content.contains("- Electric: 2 tCO2e (100.0%)"));
        assert_eq!(doc.metadata.data_quality, 2.0);
    }

    #[test]
    fn analytics_sorts_fuels_by_emissions() {
        let loans = vec![
            loan("a", 10_000.0, 1.0, 2.0, "Electric"),
            loan("b", 10_000.0, 9.0, 2.0, "Diesel"),
        ];
        let summary = PortfolioSummary::from_loans(&loans);
        let doc = analytics_report(&PortfolioMetrics::compute(&loans, &summary), now());
        let diesel = doc.content.find("- Diesel").unwrap();
        let electric = doc.content.find("- Electric").unwrap();
        assert!(diesel < electric);
        assert!(doc.content.contains("- Score 2: 2 loans (100.0%)"));
    }

    #[test]
    fn sectors_group_and_flag_small_samples() {
        let mut trucks = loan("t", 10_000.0, 1.0, 2.0, "Diesel");
        trucks.sector = Some("Heavy Trucks".into());
        let loans = vec![loan("a", 10_000.0, 1.0, 2.0, "Gasoline"), trucks];
        let docs = sector_analyses(&loans, now());

        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["sector_heavy_trucks", "sector_motor_vehicle"]);
        assert!(docs[0].content.contains("Portfolio Share: 50.0%"));
        assert!(docs.iter().all(|d| d.metadata.get("riskLevel") == Some("high".into())));
    }

    #[test]
    fn risk_profiles_bucket_every_loan_once() {
        let loans = vec![
            loan("low", 10_000.0, 10.0, 2.0, "Electric"),
            loan("medium", 10_000.0, 10.0, 4.0, "Gasoline"),
            loan("high", 10_000.0, 60.0, 2.0, "Diesel"),
        ];
        let docs = risk_profiles(&loans, now());
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].id, "risk_profile_low");
        for doc in &docs {
            assert!(doc.content.contains("- Loans in Category: 1"));
        }
        assert!(docs[2].content.contains("Prioritize EV transition support"));
        assert!(docs[2].content.contains("- High Emission Loans: 1 loans"));
    }

    #[test]
    fn empty_risk_bucket_defaults_to_worst_quality() {
        let docs = risk_profiles(&[], now());
        assert!(docs.iter().all(|d| d.metadata.data_quality == 5.0));
        assert!(docs[0].content.contains("- Portfolio Share: 0.0%"));
    }

    #[test]
    fn client_and_auxiliary_documents() {
        let doc = ClientDocument {
            id: "r1".into(),
            doc_type: "portfolio_report".into(),
            title: "Q1 Report".into(),
            content: "Emissions fell.".into(),
            metadata: ClientDocumentMetadata {
                client_id: None,
                reporting_period: None,
                created_date: now(),
                last_modified: now(),
                data_quality: 2.0,
                confidence_level: 0.9,
                tags: vec!["quarterly".into()],
            },
        };
        let rendered = client_documents(&[doc]);
        assert_eq!(rendered[0].id, "client_r1");
        assert_eq!(rendered[0].content, "Q1 Report\n\nEmissions fell.");
        assert_eq!(rendered[0].metadata.tags, vec!["quarterly", "client", "document"]);

        assert!(bank_targets(&[], now()).is_none());
        assert!(historical_reports(&[], now()).is_none());

        let report = ClientReport {
            id: "m1".into(),
            client_id: "c".into(),
            report_type: "monthly".into(),
            generated_date: now(),
            reporting_period: ReportingPeriod { start: now(), end: now() },
        };
        let history = historical_reports(&[report], now()).unwrap();
        assert_eq!(history.metadata.doc_type, "historical_analysis");
        assert!(history.content.contains("- 2026-03-01: monthly report"));
    }
}
