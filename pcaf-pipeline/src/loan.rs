//! Loan records as delivered by the portfolio backend.
//!
//! The backend serves two shapes: the current nested record with
//! `vehicle_details` and `emissions_data`, and an older flat record. Both are
//! accepted through [`IncomingLoan`] and normalised into [`LoanRecord`] at the
//! boundary so nothing downstream has to care which one arrived.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Sector assigned to loans that do not carry one.
pub const DEFAULT_SECTOR: &str = "Motor Vehicle";

/// Highest PCAF score still considered compliant.
pub const COMPLIANCE_THRESHOLD: f64 = 3.0;

/// Financed vehicle of an auto loan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VehicleDetails {
    #[serde(default)]
    pub make: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub year: i32,
    #[serde(rename = "type", default)]
    pub vehicle_type: String,
    #[serde(default)]
    pub fuel_type: String,
    #[serde(default)]
    pub value_at_origination: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efficiency_mpg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annual_mileage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vin: Option<String>,
}

/// Emission figures attributed to a loan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmissionsData {
    #[serde(default)]
    pub annual_emissions_tco2e: f64,
    #[serde(default)]
    pub attribution_factor: f64,
    #[serde(default)]
    pub financed_emissions_tco2e: f64,
    #[serde(default)]
    pub scope_1_emissions: f64,
    #[serde(default)]
    pub scope_2_emissions: f64,
    #[serde(default)]
    pub scope_3_emissions: f64,
    /// PCAF score, 1 (best) to 5 (worst).
    pub data_quality_score: f64,
    #[serde(default)]
    pub pcaf_data_option: String,
    #[serde(default)]
    pub calculation_method: String,
    #[serde(default)]
    pub emission_factor_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_calculated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DataQualityAssessment {
    pub overall_score: f64,
    #[serde(default)]
    pub category_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// A normalised portfolio loan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoanRecord {
    pub loan_id: String,
    #[serde(default = "default_borrower")]
    pub borrower_name: String,
    pub loan_amount: f64,
    pub outstanding_balance: f64,
    #[serde(default = "default_interest_rate")]
    pub interest_rate: f64,
    #[serde(default = "default_term_months")]
    pub term_months: u32,
    #[serde(default)]
    pub origination_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    pub vehicle_details: VehicleDetails,
    pub emissions_data: EmissionsData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_quality_assessment: Option<DataQualityAssessment>,
    /// Soft-deleted on the backend; dropped when a snapshot is built.
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_borrower() -> String {
    "N/A".to_string()
}

fn default_interest_rate() -> f64 {
    0.05
}

fn default_term_months() -> u32 {
    60
}

impl LoanRecord {
    pub fn data_quality(&self) -> f64 {
        self.emissions_data.data_quality_score
    }

    pub fn financed_emissions(&self) -> f64 {
        self.emissions_data.financed_emissions_tco2e
    }

    /// Financed emissions per $1,000 outstanding; zero without a balance.
    pub fn emission_intensity(&self) -> f64 {
        if self.outstanding_balance > 0.0 {
            self.financed_emissions() / self.outstanding_balance * 1000.0
        } else {
            0.0
        }
    }

    pub fn is_compliant(&self) -> bool {
        self.data_quality() <= COMPLIANCE_THRESHOLD
    }

    pub fn sector(&self) -> &str {
        self.sector.as_deref().filter(|s| !s.is_empty()).unwrap_or(DEFAULT_SECTOR)
    }

    /// `false` when make or model is absent or a placeholder.
    pub fn has_vehicle_data(&self) -> bool {
        let known = |s: &str| !s.trim().is_empty() && !s.eq_ignore_ascii_case("unknown");
        known(&self.vehicle_details.make) && known(&self.vehicle_details.model)
    }

    /// The stored assessment, or one derived from the PCAF score.
    pub fn quality_assessment(&self) -> DataQualityAssessment {
        self.data_quality_assessment.clone().unwrap_or_else(|| DataQualityAssessment {
            overall_score: self.data_quality(),
            ..Default::default()
        })
    }
}

/// Older flat loan shape still served by some backends.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyLoanRecord {
    pub loan_id: String,
    #[serde(default)]
    pub borrower_name: Option<String>,
    #[serde(default)]
    pub outstanding_balance: f64,
    #[serde(default)]
    pub vehicle_make: Option<String>,
    #[serde(default)]
    pub vehicle_model: Option<String>,
    #[serde(default)]
    pub vehicle_year: Option<i32>,
    #[serde(default)]
    pub vehicle_type: Option<String>,
    #[serde(default)]
    pub fuel_type: Option<String>,
    #[serde(default)]
    pub annual_mileage: Option<f64>,
    #[serde(default)]
    pub estimated_km_per_year: Option<f64>,
    #[serde(default)]
    pub annual_emissions: Option<f64>,
    #[serde(default)]
    pub financed_emissions: f64,
    #[serde(default)]
    pub attribution_factor: Option<f64>,
    #[serde(default)]
    pub data_quality_score: Option<f64>,
    #[serde(default)]
    pub pcaf_data_option: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl From<LegacyLoanRecord> for LoanRecord {
    fn from(legacy: LegacyLoanRecord) -> Self {
        let financed = legacy.financed_emissions;
        let quality = legacy.data_quality_score.filter(|q| *q > 0.0).unwrap_or(5.0);
        let make = legacy.vehicle_make.filter(|m| !m.is_empty());
        let fuel_type = legacy.fuel_type.filter(|f| !f.is_empty()).unwrap_or_else(|| {
            let tesla = make.as_deref().is_some_and(|m| m.to_lowercase().contains("tesla"));
            if tesla { "Electric" } else { "Gasoline" }.to_string()
        });

        Self {
            borrower_name: legacy
                .borrower_name
                .filter(|b| !b.is_empty())
                .unwrap_or_else(default_borrower),
            loan_amount: legacy.outstanding_balance,
            outstanding_balance: legacy.outstanding_balance,
            interest_rate: default_interest_rate(),
            term_months: default_term_months(),
            origination_date: legacy.created_at.to_rfc3339(),
            sector: legacy.sector,
            vehicle_details: VehicleDetails {
                make: make.unwrap_or_else(|| "Unknown".to_string()),
                model: legacy
                    .vehicle_model
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Unknown".to_string()),
                year: legacy.vehicle_year.unwrap_or_else(|| Utc::now().year()),
                vehicle_type: legacy.vehicle_type.unwrap_or_else(|| "Sedan".to_string()),
                fuel_type,
                value_at_origination: legacy.outstanding_balance,
                efficiency_mpg: Some(30.0),
                annual_mileage: Some(
                    legacy.annual_mileage.or(legacy.estimated_km_per_year).unwrap_or(12_000.0),
                ),
                vin: Some(legacy.loan_id.clone()),
            },
            emissions_data: EmissionsData {
                annual_emissions_tco2e: legacy.annual_emissions.unwrap_or(financed * 2.0),
                attribution_factor: legacy.attribution_factor.unwrap_or(0.8),
                financed_emissions_tco2e: financed,
                scope_1_emissions: financed * 0.8,
                scope_2_emissions: financed * 0.1,
                scope_3_emissions: financed * 0.1,
                data_quality_score: quality,
                pcaf_data_option: legacy
                    .pcaf_data_option
                    .unwrap_or_else(|| "option_3b".to_string()),
                calculation_method: "PCAF Standard".to_string(),
                emission_factor_source: "EPA".to_string(),
                last_calculated: Some(legacy.updated_at),
            },
            data_quality_assessment: Some(DataQualityAssessment {
                overall_score: quality,
                ..Default::default()
            }),
            is_deleted: false,
            created_at: legacy.created_at,
            updated_at: legacy.updated_at,
            loan_id: legacy.loan_id,
        }
    }
}

/// Either loan shape, as it arrives over the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IncomingLoan {
    Nested(Box<LoanRecord>),
    Legacy(Box<LegacyLoanRecord>),
}

impl From<IncomingLoan> for LoanRecord {
    fn from(incoming: IncomingLoan) -> Self {
        match incoming {
            IncomingLoan::Nested(loan) => *loan,
            IncomingLoan::Legacy(legacy) => LoanRecord::from(*legacy),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn nested_shape_keeps_values_and_fills_defaults() {
        let value = json!({
            "loan_id": "L1",
            "loan_amount": 30000.0,
            "outstanding_balance": 20000.0,
            "vehicle_details": {
                "make": "Tesla",
                "model": "Model 3",
                "year": 2023,
                "type": "Sedan",
                "fuel_type": "Electric",
                "value_at_origination": 40000.0
            },
            "emissions_data": {
                "financed_emissions_tco2e": 1.5,
                "attribution_factor": 0.5,
                "data_quality_score": 2.0
            }
        });
        let loan: LoanRecord = serde_json::from_value::<IncomingLoan>(value).unwrap().into();
        assert_eq!(loan.borrower_name, "N/A");
        assert_eq!(loan.term_months, 60);
        assert!((loan.interest_rate - 0.05).abs() < f64::EPSILON);
        assert!((loan.emission_intensity() - 0.075).abs() < 1e-9);
        assert!(loan.is_compliant());
        assert_eq!(loan.sector(), DEFAULT_SECTOR);
        assert_eq!(loan.quality_assessment().overall_score, 2.0);
    }

    #[test]
    fn legacy_shape_is_normalised() {
        let value = json!({
            "loan_id": "OLD-7",
            "outstanding_balance": 10000.0,
            "vehicle_make": "Tesla",
            "financed_emissions": 3.0,
            "data_quality_score": 4.0,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-02-01T00:00:00Z"
        });
        let loan: LoanRecord = serde_json::from_value::<IncomingLoan>(value).unwrap().into();
        assert_eq!(loan.loan_amount, 10000.0);
        assert_eq!(loan.vehicle_details.fuel_type, "Electric");
        assert_eq!(loan.vehicle_details.model, "Unknown");
        assert_eq!(loan.vehicle_details.annual_mileage, Some(12_000.0));
        assert_eq!(loan.emissions_data.annual_emissions_tco2e, 6.0);
        assert_eq!(loan.emissions_data.attribution_factor, 0.8);
        assert_eq!(loan.emissions_data.pcaf_data_option, "option_3b");
        assert!(!loan.is_compliant());
        assert!(!loan.has_vehicle_data());
    }

    #[test]
    fn legacy_without_make_defaults_to_gasoline_and_worst_quality() {
        let value = json!({"loan_id": "OLD-8", "outstanding_balance": 0.0});
        let loan: LoanRecord = serde_json::from_value::<IncomingLoan>(value).unwrap().into();
        assert_eq!(loan.vehicle_details.fuel_type, "Gasoline");
        assert_eq!(loan.data_quality(), 5.0);
        assert_eq!(loan.emission_intensity(), 0.0);
    }
}
