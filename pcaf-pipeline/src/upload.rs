//! Ingestion of user-uploaded loan files.
//!
//! Uploads arrive as CSV or JSON for one of three PCAF instruments. They are
//! validated as a whole before anything is stored, rendered into one
//! `uploaded_loan` document per loan, and written to a collection dedicated to
//! the upload.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use csv::StringRecord;
use pcaf_rag::{Document, DocumentMetadata, MetadataFilter, SearchEngine, SearchOptions};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::loan::COMPLIANCE_THRESHOLD;
use crate::portfolio::percent;
use crate::render::{doc_types, grouped};

/// Score assumed when neither the loan nor the upload carries one.
pub const DEFAULT_UPLOAD_SCORE: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instrument {
    AutoLoans,
    CommercialRealEstate,
    ProjectFinance,
}

impl Instrument {
    pub const ALL: [Instrument; 3] =
        [Instrument::AutoLoans, Instrument::CommercialRealEstate, Instrument::ProjectFinance];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoLoans => "auto_loans",
            Self::CommercialRealEstate => "commercial_real_estate",
            Self::ProjectFinance => "project_finance",
        }
    }

    /// tCO2e per dollar outstanding, used when a loan carries no emissions.
    pub fn emission_factor(self) -> f64 {
        match self {
            Self::AutoLoans => 0.0003,
            Self::CommercialRealEstate => 0.0001,
            Self::ProjectFinance => 0.0005,
        }
    }

    fn label(self) -> String {
        self.as_str().replace('_', " ").to_uppercase()
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Instrument {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|i| i.as_str() == s.trim())
            .ok_or_else(|| {
                PipelineError::Validation(vec![format!("Invalid PCAF instrument type: {s}")])
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedVehicle {
    pub make: String,
    pub model: String,
    pub year: i32,
    pub fuel_type: String,
    /// Annual tCO2e.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emissions: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efficiency: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDetails {
    pub property_type: String,
    #[serde(default)]
    pub square_footage: f64,
    #[serde(default)]
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_rating: Option<String>,
    /// kWh per year.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annual_energy_use: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emissions: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetails {
    pub project_type: String,
    #[serde(default)]
    pub sector: String,
    #[serde(default)]
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_emissions: Option<f64>,
    #[serde(default)]
    pub project_status: String,
}

/// One loan of an upload. Missing numbers deserialize as zero so validation
/// can report them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedLoan {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<Instrument>,
    #[serde(default)]
    pub loan_amount: f64,
    #[serde(default)]
    pub outstanding_balance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origination_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maturity_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interest_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub borrower_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_details: Option<UploadedVehicle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_details: Option<PropertyDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_details: Option<ProjectDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcaf_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_quality_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<Map<String, Value>>,
}

impl UploadedLoan {
    /// Emissions from the instrument details, else estimated from the
    /// outstanding balance.
    pub fn emissions(&self, instrument: Instrument) -> f64 {
        let reported = self
            .vehicle_details
            .as_ref()
            .and_then(|v| v.emissions)
            .or_else(|| self.property_details.as_ref().and_then(|p| p.emissions))
            .or_else(|| self.project_details.as_ref().and_then(|p| p.expected_emissions))
            .filter(|e| *e > 0.0);
        reported.unwrap_or(self.outstanding_balance * instrument.emission_factor())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub upload_id: String,
    pub upload_date: DateTime<Utc>,
    /// Usually the uploaded file name.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_id: Option<String>,
    /// Score applied to loans without their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_quality: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanUpload {
    pub instrument: Instrument,
    pub loans: Vec<UploadedLoan>,
    pub metadata: UploadMetadata,
}

impl LoanUpload {
    fn score_of(&self, loan: &UploadedLoan) -> f64 {
        loan.pcaf_score
            .filter(|s| *s > 0.0)
            .or(self.metadata.data_quality.filter(|s| *s > 0.0))
            .unwrap_or(DEFAULT_UPLOAD_SCORE)
    }

    /// Check the whole upload, collecting every violation.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Validation`] listing each problem found.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.metadata.upload_id.trim().is_empty() {
            errors.push("Upload ID is required".to_string());
        }
        if self.loans.is_empty() {
            errors.push("No loan data provided".to_string());
        }
        for loan in &self.loans {
            if loan.id.trim().is_empty() {
                errors.push("Loan missing ID".to_string());
            }
            if loan.loan_amount.is_nan() || loan.loan_amount <= 0.0 {
                errors.push(format!("Loan {}: Invalid loan amount", loan.id));
            }
            if loan.outstanding_balance.is_nan() || loan.outstanding_balance < 0.0 {
                errors.push(format!("Loan {}: Invalid outstanding balance", loan.id));
            }
        }
        if errors.is_empty() { Ok(()) } else { Err(PipelineError::Validation(errors)) }
    }

    /// `uploaded_loans_{instrument}_{upload id}` with every non-alphanumeric
    /// character of the id replaced by `_`.
    pub fn collection_name(&self) -> String {
        let id: String = self
            .metadata
            .upload_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("uploaded_loans_{}_{id}", self.instrument)
    }

    fn render(&self, loan: &UploadedLoan) -> Document {
        let instrument = loan.instrument.unwrap_or(self.instrument);
        let score = self.score_of(loan);
        let compliant = score <= COMPLIANCE_THRESHOLD;
        let emissions = loan.emissions(instrument);

        let mut content = format!(
            "LOAN ANALYSIS - {id}

Upload Information:
- Upload ID: {upload_id}
- Source: {source}
- Upload Date: {upload_date}
- Instrument: {label}

Loan Details:
- Loan Amount: ${amount}
- Outstanding Balance: ${outstanding}
- Origination Date: {origination}
- Interest Rate: {rate}
- Borrower: {borrower}
",
            id = loan.id,
            upload_id = self.metadata.upload_id,
            source = self.metadata.source,
            upload_date = self.metadata.upload_date.format("%Y-%m-%d"),
            label = instrument.label(),
            amount = grouped(loan.loan_amount),
            outstanding = grouped(loan.outstanding_balance),
            origination = loan
                .origination_date
                .as_deref()
                .and_then(|d| d.split('T').next())
                .filter(|d| !d.is_empty())
                .unwrap_or("N/A"),
            rate = loan.interest_rate.map_or_else(|| "N/A".to_string(), |r| format!("{r:.2}%")),
            borrower = loan.borrower_name.as_deref().unwrap_or("Not specified"),
        );

        let mut tags = vec![instrument.as_str().to_string(), doc_types::UPLOADED_LOAN.to_string()];
        let mut extra = Map::new();
        if let Some(vehicle) = &loan.vehicle_details {
            content.push_str(&format!(
                "
Vehicle Information:
- Make/Model: {} {}
- Year: {}
- Fuel Type: {}
- Annual Emissions: {} tCO2e
- Efficiency: {}
",
                vehicle.make,
                vehicle.model,
                vehicle.year,
                vehicle.fuel_type,
                fixed_or_na(vehicle.emissions),
                vehicle.efficiency.map_or_else(|| "N/A".to_string(), |e| e.to_string()),
            ));
            tags.push(vehicle.fuel_type.to_lowercase());
            tags.push(vehicle.make.to_lowercase());
            extra.insert("vehicleMake".into(), vehicle.make.clone().into());
            extra.insert("vehicleModel".into(), vehicle.model.clone().into());
            extra.insert("fuelType".into(), vehicle.fuel_type.clone().into());
            extra.insert("vehicleYear".into(), vehicle.year.into());
        }
        if let Some(property) = &loan.property_details {
            content.push_str(&format!(
                "
Property Information:
- Type: {}
- Square Footage: {} sq ft
- Location: {}
- Energy Rating: {}
- Annual Energy Use: {} kWh
- Annual Emissions: {} tCO2e
",
                property.property_type,
                grouped(property.square_footage),
                property.location,
                property.energy_rating.as_deref().unwrap_or("N/A"),
                property.annual_energy_use.map_or_else(|| "N/A".to_string(), grouped),
                fixed_or_na(property.emissions),
            ));
            tags.push(property.property_type.to_lowercase());
            tags.push("real_estate".to_string());
            extra.insert("propertyType".into(), property.property_type.clone().into());
            extra.insert("squareFootage".into(), property.square_footage.into());
            extra.insert("propertyLocation".into(), property.location.clone().into());
        }
        if let Some(project) = &loan.project_details {
            content.push_str(&format!(
                "
Project Information:
- Type: {}
- Sector: {}
- Location: {}
- Status: {}
- Capacity: {}
- Expected Emissions: {} tCO2e
",
                project.project_type,
                project.sector,
                project.location,
                project.project_status,
                project.capacity.map_or_else(|| "N/A".to_string(), |c| c.to_string()),
                fixed_or_na(project.expected_emissions),
            ));
            let project_type_lower = project.project_type.to_lowercase();
            let project_tag = project_type_lower.split_whitespace().collect::<Vec<_>>();
            tags.push(project_tag.join("_"));
            tags.push("project_finance".to_string());
            extra.insert("projectType".into(), project.project_type.clone().into());
            extra.insert("projectSector".into(), project.sector.clone().into());
            extra.insert("projectStatus".into(), project.project_status.clone().into());
            extra.insert("projectLocation".into(), project.location.clone().into());
        }
        content.push_str(&format!(
            "
PCAF Assessment:
- Data Quality Score: {score}/5
- Compliance Status: {}
- Data Quality Notes: {}",
            if compliant { "COMPLIANT" } else { "NON-COMPLIANT" },
            loan.data_quality_notes.as_deref().unwrap_or("None"),
        ));
        tags.push(if compliant { "compliant" } else { "non_compliant" }.to_string());
        tags.push(format!("pcaf_{score}"));

        let source = self.metadata.source.as_str();
        let mut metadata = DocumentMetadata::new(doc_types::UPLOADED_LOAN, source)
            .with_timestamp(self.metadata.upload_date)
            .with_data_quality(score)
            .with_tags(tags)
            .with_field("instrument", instrument.as_str())
            .with_field("loanId", loan.id.as_str())
            .with_field("uploadId", self.metadata.upload_id.as_str())
            .with_field("loanAmount", loan.loan_amount)
            .with_field("outstandingBalance", loan.outstanding_balance)
            .with_field("emissions", emissions)
            .with_field("pcafScore", score)
            .with_field("isCompliant", compliant);
        metadata.extra.extend(extra);

        Document::new(format!("{}_{}", self.metadata.upload_id, loan.id), content.trim(), metadata)
    }
}

fn fixed_or_na(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{v:.2}"))
}

/// Per-upload totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub by_instrument: BTreeMap<String, usize>,
    pub avg_data_quality: f64,
    pub total_emissions: f64,
    /// Percentage of loans with a score of 3 or better.
    pub compliance_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub success: bool,
    pub upload_id: String,
    pub total_loans: usize,
    pub processed_loans: usize,
    pub embedded_documents: usize,
    pub collection_name: String,
    pub processing_time_ms: u64,
    pub errors: Vec<String>,
    pub summary: UploadSummary,
}

/// Parse a CSV upload: a header row, then one loan per line. Rows with fewer
/// fields than the header are skipped.
///
/// # Errors
///
/// Returns [`PipelineError::Parse`] for malformed CSV or a non-numeric value
/// in a numeric column.
pub fn parse_csv(content: &str, instrument: Instrument) -> Result<Vec<UploadedLoan>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());
    let headers = reader.headers()?.clone();

    let mut loans = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() < headers.len() {
            continue;
        }
        let row = Row { headers: &headers, record: &record, line: index + 2 };
        loans.push(row.loan(index + 1, instrument)?);
    }
    Ok(loans)
}

struct Row<'a> {
    headers: &'a StringRecord,
    record: &'a StringRecord,
    line: usize,
}

impl<'a> Row<'a> {
    fn text(&self, column: &str) -> Option<&'a str> {
        let index = self.headers.iter().position(|h| h == column)?;
        self.record.get(index).filter(|v| !v.is_empty())
    }

    fn text_or(&self, column: &str, default: &str) -> String {
        self.text(column).unwrap_or(default).to_string()
    }

    fn number(&self, column: &str) -> Result<Option<f64>> {
        self.text(column)
            .map(|raw| {
                raw.parse::<f64>().map_err(|_| {
                    let line = self.line;
                    let message = format!("line {line}: {column} value '{raw}' is not a number");
                    PipelineError::Parse(message)
                })
            })
            .transpose()
    }

    fn loan(&self, ordinal: usize, instrument: Instrument) -> Result<UploadedLoan> {
        let mut loan = UploadedLoan {
            id: self.text("id").map_or_else(|| format!("loan_{ordinal}"), str::to_string),
            instrument: Some(instrument),
            loan_amount: self.number("loanAmount")?.unwrap_or(0.0),
            outstanding_balance: self.number("outstandingBalance")?.unwrap_or(0.0),
            origination_date: self.text("originationDate").map(str::to_string),
            maturity_date: self.text("maturityDate").map(str::to_string),
            interest_rate: self.number("interestRate")?,
            borrower_name: self.text("borrowerName").map(str::to_string),
            pcaf_score: Some(self.number("pcafScore")?.unwrap_or(DEFAULT_UPLOAD_SCORE)),
            data_quality_notes: self.text("dataQualityNotes").map(str::to_string),
            ..UploadedLoan::default()
        };

        match instrument {
            Instrument::AutoLoans => {
                let year = self.number("year")?.map_or(2020, |y| y as i32);
                loan.vehicle_details = Some(UploadedVehicle {
                    make: self.text_or("make", "Unknown"),
                    model: self.text_or("model", "Unknown"),
                    year,
                    fuel_type: self.text_or("fuelType", "Gasoline"),
                    emissions: Some(self.number("emissions")?.unwrap_or(4.0)),
                    efficiency: self.number("efficiency")?,
                });
            }
            Instrument::CommercialRealEstate => {
                loan.property_details = Some(PropertyDetails {
                    property_type: self.text_or("propertyType", "Other"),
                    square_footage: self.number("squareFootage")?.unwrap_or(0.0),
                    location: self.text_or("location", "Unknown"),
                    energy_rating: self.text("energyRating").map(str::to_string),
                    annual_energy_use: self.number("annualEnergyUse")?,
                    emissions: self.number("emissions")?,
                });
            }
            Instrument::ProjectFinance => {
                loan.project_details = Some(ProjectDetails {
                    project_type: self.text_or("projectType", "Other"),
                    sector: self.text_or("sector", "Unknown"),
                    location: self.text_or("location", "Unknown"),
                    capacity: self.number("capacity")?,
                    expected_emissions: self.number("expectedEmissions")?,
                    project_status: self.text_or("projectStatus", "Operational"),
                });
            }
        }
        Ok(loan)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonUpload {
    Many(Vec<UploadedLoan>),
    One(Box<UploadedLoan>),
}

/// Parse a JSON upload: a single loan object or an array of them.
pub fn parse_json(content: &str) -> Result<Vec<UploadedLoan>> {
    Ok(match serde_json::from_str::<JsonUpload>(content)? {
        JsonUpload::Many(loans) => loans,
        JsonUpload::One(loan) => vec![*loan],
    })
}

/// Parse by file extension (`.csv` or `.json`, case-insensitive).
pub fn parse_upload_file(
    file_name: &str,
    content: &str,
    instrument: Instrument,
) -> Result<Vec<UploadedLoan>> {
    let lower = file_name.to_lowercase();
    if lower.ends_with(".json") {
        parse_json(content)
    } else if lower.ends_with(".csv") {
        parse_csv(content, instrument)
    } else {
        Err(PipelineError::Validation(vec!["Please upload a CSV or JSON file".to_string()]))
    }
}

/// `upload_{unix millis}_{9 random characters}`.
pub fn generate_upload_id() -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("upload_{}_{suffix}", Utc::now().timestamp_millis())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    #[default]
    Idle,
    Uploading,
    Processing,
    Complete,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadState {
    pub status: UploadStatus,
    /// First error of the failed attempt.
    pub error: Option<String>,
    pub result: Option<ProcessingResult>,
}

/// Lifecycle of the current upload: `idle → uploading → processing →
/// complete | error`, with [`reset`](Self::reset) to retry from scratch.
#[derive(Debug)]
pub struct UploadTracker {
    state: watch::Sender<UploadState>,
}

impl Default for UploadTracker {
    fn default() -> Self {
        let (state, _) = watch::channel(UploadState::default());
        Self { state }
    }
}

impl UploadTracker {
    pub fn state(&self) -> UploadState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadState> {
        self.state.subscribe()
    }

    pub fn reset(&self) {
        self.state.send_replace(UploadState::default());
    }

    fn uploading(&self) {
        let state = UploadState { status: UploadStatus::Uploading, ..UploadState::default() };
        self.state.send_replace(state);
    }

    fn processing(&self) {
        self.state.send_modify(|s| s.status = UploadStatus::Processing);
    }

    fn complete(&self, result: ProcessingResult) {
        self.state.send_modify(|s| {
            s.status = UploadStatus::Complete;
            s.result = Some(result);
        });
    }

    fn fail(&self, error: &PipelineError) {
        let first = match error {
            PipelineError::Validation(errors) => {
                errors.first().cloned().unwrap_or_else(|| error.to_string())
            }
            other => other.to_string(),
        };
        self.state.send_modify(|s| {
            s.status = UploadStatus::Error;
            s.error = Some(first);
        });
    }
}

/// Filters for [`UploadService::search_uploaded_loans`].
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSearchOptions {
    pub instrument: Option<Instrument>,
    pub upload_id: Option<String>,
    /// Keep loans whose score is at most this.
    pub max_data_quality: Option<f64>,
    pub max_emissions: Option<f64>,
    pub limit: usize,
}

impl Default for UploadSearchOptions {
    fn default() -> Self {
        Self {
            instrument: None,
            upload_id: None,
            max_data_quality: None,
            max_emissions: None,
            limit: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedLoanMatch {
    pub loan: UploadedLoan,
    pub similarity: f32,
    pub relevance_score: f32,
    pub insights: Vec<String>,
}

/// Upload processing and search over uploaded loans.
pub struct UploadService {
    engine: Arc<SearchEngine>,
    tracker: UploadTracker,
}

impl UploadService {
    pub fn new(engine: Arc<SearchEngine>) -> Self {
        Self { engine, tracker: UploadTracker::default() }
    }

    pub fn engine(&self) -> &Arc<SearchEngine> {
        &self.engine
    }

    pub fn tracker(&self) -> &UploadTracker {
        &self.tracker
    }

    /// Validate, render and store an upload.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Validation`] before storing anything if the
    /// upload is invalid, or the store error if writing fails outright.
    /// Individual documents the store rejects are listed in
    /// [`ProcessingResult::errors`].
    pub async fn process_upload(&self, upload: &LoanUpload) -> Result<ProcessingResult> {
        let started = Instant::now();
        let upload_id = upload.metadata.upload_id.as_str();
        info!(
            upload_id,
            instrument = %upload.instrument,
            loans = upload.loans.len(),
            "processing upload"
        );

        upload.validate().inspect_err(|e| warn!(upload_id, error = %e, "upload rejected"))?;

        let collection = upload.collection_name();
        let mut summary = UploadSummary {
            by_instrument: Instrument::ALL.iter().map(|i| (i.as_str().to_string(), 0)).collect(),
            ..UploadSummary::default()
        };
        let mut total_quality = 0.0;
        let mut compliant = 0usize;
        let mut documents = Vec::with_capacity(upload.loans.len());
        for loan in &upload.loans {
            let instrument = loan.instrument.unwrap_or(upload.instrument);
            let score = upload.score_of(loan);
            summary.total_emissions += loan.emissions(instrument);
            total_quality += score;
            if score <= COMPLIANCE_THRESHOLD {
                compliant += 1;
            }
            *summary.by_instrument.entry(instrument.as_str().to_string()).or_default() += 1;
            documents.push(upload.render(loan));
        }
        let processed = documents.len();
        summary.avg_data_quality =
            if processed > 0 { total_quality / processed as f64 } else { 0.0 };
        summary.compliance_rate = percent(compliant as f64, processed as f64);

        let report =
            self.engine.store().add_documents(&collection, documents).await.inspect_err(|e| {
                error!(upload_id, collection = %collection, error = %e, "failed to store upload");
            })?;
        let mut errors = Vec::new();
        if report.errors > 0 {
            errors.push(format!("{} documents failed to embed or store", report.errors));
        }

        let result = ProcessingResult {
            success: true,
            upload_id: upload_id.to_string(),
            total_loans: upload.loans.len(),
            processed_loans: processed,
            embedded_documents: report.stored(),
            collection_name: collection,
            processing_time_ms: started.elapsed().as_millis() as u64,
            errors,
            summary,
        };
        info!(
            upload_id,
            processed = result.processed_loans,
            embedded = result.embedded_documents,
            avg_quality = result.summary.avg_data_quality,
            compliance_rate = result.summary.compliance_rate,
            "upload processed"
        );
        Ok(result)
    }

    /// Parse a file and process it, driving the [`UploadTracker`] through its
    /// states. A fresh upload id is generated unless one is given.
    pub async fn ingest_file(
        &self,
        file_name: &str,
        content: &str,
        instrument: Instrument,
        upload_id: Option<String>,
    ) -> Result<ProcessingResult> {
        self.tracker.uploading();
        let loans = parse_upload_file(file_name, content, instrument)
            .inspect_err(|e| self.tracker.fail(e))?;

        let upload = LoanUpload {
            instrument,
            loans,
            metadata: UploadMetadata {
                upload_id: upload_id.unwrap_or_else(generate_upload_id),
                upload_date: Utc::now(),
                source: file_name.to_string(),
                bank_id: None,
                data_quality: Some(DEFAULT_UPLOAD_SCORE),
            },
        };
        self.tracker.processing();
        match self.process_upload(&upload).await {
            Ok(result) => {
                self.tracker.complete(result.clone());
                Ok(result)
            }
            Err(e) => {
                self.tracker.fail(&e);
                Err(e)
            }
        }
    }

    /// Semantic search restricted to uploaded loans, across every upload
    /// collection unless filtered.
    pub async fn search_uploaded_loans(
        &self,
        query: &str,
        options: &UploadSearchOptions,
    ) -> Result<Vec<UploadedLoanMatch>> {
        let mut filter = MetadataFilter::new().eq("type", doc_types::UPLOADED_LOAN);
        if let Some(instrument) = options.instrument {
            filter = filter.eq("instrument", instrument.as_str());
        }
        if let Some(upload_id) = &options.upload_id {
            filter = filter.eq("uploadId", upload_id.as_str());
        }
        if let Some(max) = options.max_data_quality {
            filter = filter.range("dataQuality", None, Some(max));
        }
        if let Some(max) = options.max_emissions {
            filter = filter.range("emissions", None, Some(max));
        }
        let search = SearchOptions::builder()
            .limit(options.limit)
            .min_similarity(0.3)
            .filter(filter)
            .build()?;

        let results = self.engine.search(query, &search).await?;
        Ok(results
            .into_iter()
            .map(|result| {
                let loan = reconstruct_loan(&result.document.metadata);
                let insights = loan_insights(&loan);
                UploadedLoanMatch {
                    loan,
                    similarity: result.similarity,
                    relevance_score: result.relevance_score,
                    insights,
                }
            })
            .collect())
    }
}

/// Rebuild the loan fields carried in an `uploaded_loan` metadata envelope.
pub fn reconstruct_loan(metadata: &DocumentMetadata) -> UploadedLoan {
    let text = |key: &str| metadata.get(key).and_then(|v| v.as_str().map(str::to_string));
    let number = |key: &str| metadata.get(key).and_then(|v| v.as_f64());
    let emissions = number("emissions");

    let mut loan = UploadedLoan {
        id: text("loanId").unwrap_or_default(),
        instrument: text("instrument").and_then(|i| i.parse().ok()),
        loan_amount: number("loanAmount").unwrap_or(0.0),
        outstanding_balance: number("outstandingBalance").unwrap_or(0.0),
        pcaf_score: number("pcafScore"),
        ..UploadedLoan::default()
    };
    if let Some(make) = text("vehicleMake") {
        loan.vehicle_details = Some(UploadedVehicle {
            make,
            model: text("vehicleModel").unwrap_or_default(),
            year: number("vehicleYear").map_or(0, |y| y as i32),
            fuel_type: text("fuelType").unwrap_or_default(),
            emissions,
            efficiency: None,
        });
    }
    if let Some(property_type) = text("propertyType") {
        loan.property_details = Some(PropertyDetails {
            property_type,
            square_footage: number("squareFootage").unwrap_or(0.0),
            location: text("propertyLocation").unwrap_or_default(),
            energy_rating: None,
            annual_energy_use: None,
            emissions,
        });
    }
    if let Some(project_type) = text("projectType") {
        loan.project_details = Some(ProjectDetails {
            project_type,
            sector: text("projectSector").unwrap_or_default(),
            location: text("projectLocation").unwrap_or_default(),
            capacity: None,
            expected_emissions: emissions,
            project_status: text("projectStatus").unwrap_or_default(),
        });
    }
    loan
}

/// Short remarks on a matched loan's data quality and emissions.
pub fn loan_insights(loan: &UploadedLoan) -> Vec<String> {
    let mut insights = Vec::new();
    let score = loan.pcaf_score.unwrap_or(5.0);
    if score > COMPLIANCE_THRESHOLD {
        insights.push(format!(
            "High data quality risk (PCAF {score}/5) - consider data improvement initiatives"
        ));
    }
    if let Some(vehicle) = &loan.vehicle_details {
        let emissions = vehicle.emissions.unwrap_or(0.0);
        if emissions > 4.0 {
            insights.push("High-emission vehicle - consider EV refinancing program".to_string());
        } else if emissions < 1.0 {
            insights.push("Low-emission vehicle - good for green portfolio metrics".to_string());
        }
    }
    if score <= COMPLIANCE_THRESHOLD {
        insights.push("PCAF compliant - contributes to regulatory requirements".to_string());
    }
    insights
}
