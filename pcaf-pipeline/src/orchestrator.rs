//! Scheduling and lifecycle around the [`EtlPipeline`].
//!
//! The orchestrator owns a registry of named schedules and one timer task per
//! armed schedule. Timer tasks hold only a weak reference to the orchestrator,
//! so dropping the last handle stops them. A scheduled run that finds the
//! pipeline busy is skipped and logged; it fires again on the next tick.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pcaf_rag::StoreHealth;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::OrchestratorConfig;
use crate::error::{PipelineError, Result};
use crate::etl::{DataType, EtlPipeline, PipelineReport, RunOptions};
use crate::status::RunStatus;

/// How often a schedule fires. `Realtime` schedules have no timer and only
/// run through [`Orchestrator::trigger_schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Realtime,
    Hourly,
    Daily,
    Weekly,
}

impl Frequency {
    pub fn period(self) -> Option<Duration> {
        match self {
            Self::Realtime => None,
            Self::Hourly => Some(Duration::from_secs(60 * 60)),
            Self::Daily => Some(Duration::from_secs(24 * 60 * 60)),
            Self::Weekly => Some(Duration::from_secs(7 * 24 * 60 * 60)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    pub full_refresh: bool,
    pub data_types: Vec<DataType>,
    pub notify_on_completion: bool,
    /// Retry once after the orchestrator's backoff when a run fails.
    pub retry_on_failure: bool,
}

impl ScheduleConfig {
    fn run_options(&self) -> RunOptions {
        RunOptions { full_refresh: self.full_refresh, ..RunOptions::default() }
            .with_data_types(self.data_types.iter().copied())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub name: String,
    pub frequency: Frequency,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub config: ScheduleConfig,
}

impl Schedule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        frequency: Frequency,
        config: ScheduleConfig,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            frequency,
            enabled: true,
            last_run: None,
            next_run: None,
            config,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let period = self.frequency.period()?;
        chrono::Duration::from_std(period).ok().map(|p| from + p)
    }
}

/// Daily full refresh (enabled), hourly incremental and realtime critical
/// (both disabled).
pub fn default_schedules() -> Vec<Schedule> {
    vec![
        Schedule::new(
            "daily_full_refresh",
            "Daily Full Refresh",
            Frequency::Daily,
            ScheduleConfig {
                full_refresh: true,
                data_types: DataType::ALL.to_vec(),
                notify_on_completion: true,
                retry_on_failure: true,
            },
        ),
        Schedule::new(
            "hourly_incremental",
            "Hourly Incremental Update",
            Frequency::Hourly,
            ScheduleConfig {
                full_refresh: false,
                data_types: vec![DataType::Loans, DataType::Portfolio],
                notify_on_completion: false,
                retry_on_failure: true,
            },
        )
        .enabled(false),
        Schedule::new(
            "realtime_critical",
            "Real-time Critical Updates",
            Frequency::Realtime,
            ScheduleConfig {
                full_refresh: false,
                data_types: vec![DataType::Loans],
                notify_on_completion: false,
                retry_on_failure: false,
            },
        )
        .enabled(false),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQualityIssue {
    #[serde(rename = "type")]
    pub issue_type: String,
    pub severity: Severity,
    pub description: String,
    pub affected_records: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQualityReport {
    /// Mean PCAF score over loans that carry one; 5 when none do.
    pub overall_score: f64,
    pub issues: Vec<DataQualityIssue>,
    pub recommendations: Vec<String>,
}

const RECOMMENDATIONS: [&str; 4] = [
    "Prioritize collecting vehicle specifications for high-value loans",
    "Implement automated emission calculations for missing data",
    "Focus on improving loans with PCAF scores ≥4",
    "Consider third-party data providers for missing information",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickStartReport {
    pub success: bool,
    pub documents_created: usize,
    pub collections_populated: Vec<String>,
    pub processing_time_ms: u64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub is_initialized: bool,
    pub store_health: StoreHealth,
    pub total_documents: usize,
    pub collections: Vec<String>,
    /// Hours since the last successful run; 24 when there has been none.
    pub data_freshness_hours: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineHealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineHealth {
    pub status: PipelineHealthStatus,
    pub last_successful_run: Option<DateTime<Utc>>,
    /// Percentage of failed runs.
    pub failure_rate: f64,
    pub average_run_time_ms: f64,
    pub data_freshness_hours: f64,
}

/// Handle to the scheduler. See the module docs.
///
/// # Example
///
/// ```rust,ignore
/// use pcaf_pipeline::{Orchestrator, OrchestratorConfig};
///
/// let orchestrator = Orchestrator::new(Arc::new(pipeline), OrchestratorConfig::default());
/// orchestrator.initialize().await?;
/// let report = orchestrator.trigger_schedule("daily_full_refresh").await?;
/// ```
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    pipeline: Arc<EtlPipeline>,
    config: OrchestratorConfig,
    schedules: RwLock<BTreeMap<String, Schedule>>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    started: AtomicBool,
    initialized: AtomicBool,
}

impl Orchestrator {
    /// An orchestrator with the [`default_schedules`]; no timers run until
    /// [`start`](Self::start).
    pub fn new(pipeline: Arc<EtlPipeline>, config: OrchestratorConfig) -> Self {
        let schedules = default_schedules().into_iter().map(|s| (s.id.clone(), s)).collect();
        Self {
            inner: Arc::new(Inner {
                pipeline,
                config,
                schedules: RwLock::new(schedules),
                timers: Mutex::new(HashMap::new()),
                started: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    pub fn pipeline(&self) -> &Arc<EtlPipeline> {
        &self.inner.pipeline
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Arm a timer for every enabled, timer-driven schedule. Does nothing when
    /// scheduled runs are disabled in the config.
    pub async fn start(&self) {
        if !self.inner.config.enable_scheduled_runs {
            info!("scheduled runs disabled, scheduler not started");
            return;
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let schedules: Vec<Schedule> =
            self.inner.schedules.read().await.values().cloned().collect();
        for schedule in schedules.iter().filter(|s| s.enabled) {
            self.arm(schedule).await;
        }
        info!(schedules = schedules.len(), "scheduler started");
    }

    /// Abort every timer. In-flight runs are not cancelled.
    pub async fn stop(&self) {
        self.inner.started.store(false, Ordering::Release);
        let mut timers = self.inner.timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        drop(timers);
        for schedule in self.inner.schedules.write().await.values_mut() {
            schedule.next_run = None;
        }
        info!("scheduler stopped");
    }

    pub async fn schedules(&self) -> Vec<Schedule> {
        self.inner.schedules.read().await.values().cloned().collect()
    }

    pub async fn schedule(&self, id: &str) -> Option<Schedule> {
        self.inner.schedules.read().await.get(id).cloned()
    }

    /// Insert or replace a schedule, re-arming its timer while the scheduler
    /// is started.
    pub async fn set_schedule(&self, schedule: Schedule) {
        self.disarm(&schedule.id).await;
        let id = schedule.id.clone();
        self.inner.schedules.write().await.insert(id.clone(), schedule.clone());
        if self.is_started() && schedule.enabled {
            self.arm(&schedule).await;
        }
        info!(schedule = %id, enabled = schedule.enabled, "schedule updated");
    }

    /// # Errors
    ///
    /// Returns [`PipelineError::ScheduleNotFound`] for an unknown id.
    pub async fn toggle_schedule(&self, id: &str, enabled: bool) -> Result<()> {
        let schedule = {
            let mut schedules = self.inner.schedules.write().await;
            let schedule = schedules
                .get_mut(id)
                .ok_or_else(|| PipelineError::ScheduleNotFound(id.to_string()))?;
            schedule.enabled = enabled;
            schedule.clone()
        };
        self.disarm(id).await;
        if enabled && self.is_started() {
            self.arm(&schedule).await;
        }
        info!(schedule = id, enabled, "schedule toggled");
        Ok(())
    }

    /// Run a schedule now, with its retry policy. Returns `Ok(None)` when the
    /// run was skipped because the pipeline was busy.
    pub async fn trigger_schedule(&self, id: &str) -> Result<Option<PipelineReport>> {
        self.inner.run_scheduled(id).await
    }

    /// On-demand run; fails fast with [`PipelineError::AlreadyRunning`].
    pub async fn run_pipeline(&self, options: RunOptions) -> Result<PipelineReport> {
        self.inner.pipeline.run(options).await
    }

    pub fn status(&self) -> RunStatus {
        self.inner.pipeline.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.inner.pipeline.tracker().subscribe()
    }

    /// Count loans with missing vehicle data, missing emissions or poor
    /// scores, with static remediation advice.
    pub async fn assess_data_quality(&self) -> Result<DataQualityReport> {
        let snapshot = self.inner.pipeline.portfolio_source().portfolio().await.inspect_err(|e| {
            error!(error = %e, "data quality assessment failed");
        })?;
        let loans = &snapshot.loans;

        let mut issues = Vec::new();
        let mut push = |issue_type: &str, severity, description: &str, affected_records: usize| {
            if affected_records > 0 {
                issues.push(DataQualityIssue {
                    issue_type: issue_type.to_string(),
                    severity,
                    description: description.to_string(),
                    affected_records,
                });
            }
        };
        push(
            "missing_vehicle_data",
            Severity::Medium,
            "Missing vehicle make/model data affects PCAF scoring",
            loans.iter().filter(|l| !l.has_vehicle_data()).count(),
        );
        push(
            "missing_emissions",
            Severity::High,
            "Missing emissions calculations prevent accurate reporting",
            loans.iter().filter(|l| l.financed_emissions() == 0.0).count(),
        );
        push(
            "poor_data_quality",
            Severity::High,
            "Poor PCAF data quality scores (≥4) indicate compliance issues",
            loans.iter().filter(|l| l.data_quality() >= 4.0).count(),
        );

        let scored: Vec<f64> =
            loans.iter().map(|l| l.data_quality()).filter(|q| *q > 0.0).collect();
        let overall_score =
            if scored.is_empty() { 5.0 } else { scored.iter().sum::<f64>() / scored.len() as f64 };

        Ok(DataQualityReport {
            overall_score,
            issues,
            recommendations: RECOMMENDATIONS.iter().map(|r| r.to_string()).collect(),
        })
    }

    /// Start the scheduler and, with `auto_start`, run an initial full
    /// refresh if the portfolio has loans. Initial-run failures are logged,
    /// not returned. Calling this again is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        if self.inner.initialized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let health = self.inner.pipeline.store().health_check().await;
        info!(status = ?health.status, documents = health.total_documents, "document store health");

        self.start().await;

        if self.inner.config.auto_start {
            match self.inner.pipeline.portfolio_source().portfolio().await {
                Ok(snapshot) if !snapshot.loans.is_empty() => {
                    if let Err(e) = self.inner.pipeline.run(RunOptions::full()).await {
                        error!(error = %e, "initial pipeline run failed");
                    }
                }
                Ok(_) => info!("portfolio is empty, skipping initial run"),
                Err(e) => error!(error = %e, "could not check portfolio for initial run"),
            }
        }
        info!("orchestrator initialized");
        Ok(())
    }

    /// Initialize, then run a full refresh with client documents and at most
    /// 25 loan documents.
    pub async fn quick_start(&self) -> QuickStartReport {
        let started = std::time::Instant::now();
        if let Err(e) = self.initialize().await {
            return QuickStartReport {
                success: false,
                documents_created: 0,
                collections_populated: Vec::new(),
                processing_time_ms: started.elapsed().as_millis() as u64,
                errors: vec![e.to_string()],
            };
        }

        let options = RunOptions::full().with_client_documents(true).with_max_loans(25);
        match self.inner.pipeline.run(options).await {
            Ok(report) => QuickStartReport {
                success: true,
                documents_created: report.total_records_processed,
                collections_populated: report.collections_updated,
                processing_time_ms: started.elapsed().as_millis() as u64,
                errors: report.errors,
            },
            Err(e) => QuickStartReport {
                success: false,
                documents_created: 0,
                collections_populated: Vec::new(),
                processing_time_ms: started.elapsed().as_millis() as u64,
                errors: vec![e.to_string()],
            },
        }
    }

    pub async fn system_status(&self) -> SystemStatus {
        let store_health = self.inner.pipeline.store().health_check().await;
        SystemStatus {
            is_initialized: self.is_initialized(),
            total_documents: store_health.total_documents,
            collections: store_health.collections.clone(),
            store_health,
            data_freshness_hours: self.data_freshness_hours(),
        }
    }

    /// Critical at a failure rate of 50% or more; warning on any failure or
    /// data older than a day.
    pub fn health_metrics(&self) -> PipelineHealth {
        let metrics = self.status().metrics;
        let failure_rate = if metrics.total_runs == 0 {
            0.0
        } else {
            metrics.failed_runs as f64 / metrics.total_runs as f64 * 100.0
        };
        let data_freshness_hours = self.data_freshness_hours();
        let status = if failure_rate >= 50.0 {
            PipelineHealthStatus::Critical
        } else if failure_rate > 0.0 || data_freshness_hours > 24.0 {
            PipelineHealthStatus::Warning
        } else {
            PipelineHealthStatus::Healthy
        };
        PipelineHealth {
            status,
            last_successful_run: metrics.last_success,
            failure_rate,
            average_run_time_ms: metrics.average_processing_time_ms,
            data_freshness_hours,
        }
    }

    fn data_freshness_hours(&self) -> f64 {
        self.status()
            .metrics
            .last_success
            .map_or(24.0, |last| (Utc::now() - last).num_milliseconds().max(0) as f64 / 3_600_000.0)
    }

    async fn arm(&self, schedule: &Schedule) {
        let Some(period) = schedule.frequency.period() else {
            return;
        };
        let id = schedule.id.clone();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = inner.run_scheduled(&task_id).await {
                    error!(schedule = %task_id, error = %e, "scheduled run failed");
                }
            }
        });

        if let Some(previous) = self.inner.timers.lock().await.insert(id.clone(), handle) {
            previous.abort();
        }
        if let Some(entry) = self.inner.schedules.write().await.get_mut(&id) {
            entry.next_run = entry.next_after(Utc::now());
        }
    }

    async fn disarm(&self, id: &str) {
        if let Some(handle) = self.inner.timers.lock().await.remove(id) {
            handle.abort();
        }
        if let Some(entry) = self.inner.schedules.write().await.get_mut(id) {
            entry.next_run = None;
        }
    }
}

impl Inner {
    async fn run_scheduled(&self, id: &str) -> Result<Option<PipelineReport>> {
        let schedule = self
            .schedules
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::ScheduleNotFound(id.to_string()))?;
        let span = info_span!("scheduled_run", schedule = %schedule.id);
        self.run_with_retry(&schedule).instrument(span).await
    }

    async fn run_with_retry(&self, schedule: &Schedule) -> Result<Option<PipelineReport>> {
        let options = schedule.config.run_options();
        let first = self.pipeline.run(options.clone()).await;
        self.mark_ran(&schedule.id).await;

        let error = match first {
            Ok(report) => return Ok(Some(self.completed(schedule, report))),
            Err(PipelineError::AlreadyRunning) => {
                warn!("pipeline already running, skipping scheduled run");
                return Ok(None);
            }
            Err(e) => e,
        };
        if !schedule.config.retry_on_failure {
            return Err(error);
        }

        warn!(
            error = %error,
            backoff_ms = self.config.retry_backoff.as_millis() as u64,
            "scheduled run failed, retrying after backoff"
        );
        tokio::time::sleep(self.config.retry_backoff).await;
        let retry = self.pipeline.run(options).await;
        self.mark_ran(&schedule.id).await;
        match retry {
            Ok(report) => Ok(Some(self.completed(schedule, report))),
            Err(PipelineError::AlreadyRunning) => {
                warn!("pipeline already running, skipping scheduled retry");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn completed(&self, schedule: &Schedule, report: PipelineReport) -> PipelineReport {
        if schedule.config.notify_on_completion {
            info!(
                documents = report.total_records_processed,
                elapsed_ms = report.processing_time_ms,
                "scheduled run completed"
            );
        }
        report
    }

    async fn mark_ran(&self, id: &str) {
        let now = Utc::now();
        let armed = self.started.load(Ordering::Acquire);
        if let Some(entry) = self.schedules.write().await.get_mut(id) {
            entry.last_run = Some(now);
            entry.next_run = if armed && entry.enabled { entry.next_after(now) } else { None };
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (_, handle) in self.timers.get_mut().drain() {
            handle.abort();
        }
    }
}
