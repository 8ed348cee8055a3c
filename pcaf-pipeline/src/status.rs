//! Run state machine shared by the pipeline and the orchestrator.
//!
//! A run moves through `idle → extracting → transforming → embedding →
//! storing → completing → idle`. [`RunTracker::begin`] is the only way in and
//! fails fast while another run holds the [`RunGuard`]; dropping the guard
//! always returns the tracker to idle, whether the run finished, failed or
//! was cancelled mid-flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Idle,
    Extracting,
    Transforming,
    Embedding,
    Storing,
    Completing,
}

impl Stage {
    /// Progress reported on entering the stage.
    pub fn progress(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Extracting => 20,
            Self::Transforming => 40,
            Self::Embedding => 70,
            Self::Storing => 90,
            Self::Completing => 100,
        }
    }
}

/// Cumulative run statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    /// Documents rendered by the last completed run.
    pub records_processed: usize,
    /// Share of the last completed run's documents that were embedded, in
    /// percent; zero when it rendered nothing.
    pub success_rate: f64,
    /// Mean wall-clock time of completed runs.
    pub average_processing_time_ms: f64,
    pub total_runs: u64,
    pub failed_runs: u64,
    pub last_success: Option<DateTime<Utc>>,
}

/// Observable state of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub is_running: bool,
    pub stage: Stage,
    pub progress: u8,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Id of the current run, or of the last one once idle.
    pub run_id: Option<Uuid>,
    pub metrics: RunMetrics,
}

/// Owner of the run-exclusivity flag and the published [`RunStatus`].
#[derive(Debug)]
pub struct RunTracker {
    running: AtomicBool,
    status: watch::Sender<RunStatus>,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker {
    pub fn new() -> Self {
        let (status, _) = watch::channel(RunStatus::default());
        Self { running: AtomicBool::new(false), status }
    }

    /// Claim the tracker for a new run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::AlreadyRunning`] immediately if a run is in
    /// flight.
    pub fn begin(self: &Arc<Self>) -> Result<RunGuard> {
        let claimed =
            self.running.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire);
        if claimed.is_err() {
            return Err(PipelineError::AlreadyRunning);
        }
        let run_id = Uuid::new_v4();
        self.status.send_modify(|status| {
            status.is_running = true;
            status.stage = Stage::Idle;
            status.progress = 0;
            status.last_error = None;
            status.run_id = Some(run_id);
        });
        Ok(RunGuard { tracker: Arc::clone(self), run_id })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> RunStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every stage transition.
    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status.subscribe()
    }
}

/// Exclusive handle on a run; see the module docs.
#[derive(Debug)]
pub struct RunGuard {
    tracker: Arc<RunTracker>,
    run_id: Uuid,
}

impl RunGuard {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn advance(&self, stage: Stage) {
        self.tracker.status.send_modify(|status| {
            status.stage = stage;
            status.progress = stage.progress();
        });
    }

    /// Record a completed run; the guard is released on return.
    pub fn complete(
        self,
        records_processed: usize,
        successful_embeddings: usize,
        processing_time_ms: u64,
    ) {
        let now = Utc::now();
        self.tracker.status.send_modify(|status| {
            let metrics = &mut status.metrics;
            metrics.total_runs += 1;
            let succeeded = metrics.total_runs - metrics.failed_runs;
            metrics.records_processed = records_processed;
            metrics.average_processing_time_ms += (processing_time_ms as f64
                - metrics.average_processing_time_ms)
                / succeeded as f64;
            metrics.success_rate = if records_processed == 0 {
                0.0
            } else {
                successful_embeddings as f64 / records_processed as f64 * 100.0
            };
            metrics.last_success = Some(now);
            status.last_run = Some(now);
        });
    }

    /// Record a failed run; the guard is released on return.
    pub fn fail(self, error: &PipelineError) {
        let message = error.to_string();
        self.tracker.status.send_modify(|status| {
            let metrics = &mut status.metrics;
            metrics.total_runs += 1;
            metrics.failed_runs += 1;
            status.last_error = Some(message);
            status.last_run = Some(Utc::now());
        });
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.tracker.status.send_modify(|status| {
            status.is_running = false;
            status.stage = Stage::Idle;
            status.progress = 0;
        });
        self.tracker.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_begin_fails_fast() {
        let tracker = Arc::new(RunTracker::new());
        let guard = tracker.begin().unwrap();
        assert!(matches!(tracker.begin(), Err(PipelineError::AlreadyRunning)));
        drop(guard);
        assert!(tracker.begin().is_ok());
    }

    #[test]
    fn stages_publish_progress() {
        let tracker = Arc::new(RunTracker::new());
        let rx = tracker.subscribe();
        let guard = tracker.begin().unwrap();
        guard.advance(Stage::Embedding);
        assert_eq!(rx.borrow().stage, Stage::Embedding);
        assert_eq!(rx.borrow().progress, 70);
        assert!(rx.borrow().is_running);

        guard.complete(12, 9, 400);
        let status = tracker.status();
        assert!(!status.is_running);
        assert_eq!(status.stage, Stage::Idle);
        assert_eq!(status.progress, 0);
        assert_eq!(status.metrics.records_processed, 12);
        assert_eq!(status.metrics.success_rate, 75.0);
        assert!(status.metrics.last_success.is_some());
    }

    #[test]
    fn failure_is_recorded_and_releases_the_guard() {
        let tracker = Arc::new(RunTracker::new());
        tracker.begin().unwrap().complete(4, 4, 100);
        tracker.begin().unwrap().fail(&PipelineError::upstream("portfolio_api", "down"));

        let status = tracker.status();
        assert!(!tracker.is_running());
        assert_eq!(status.metrics.total_runs, 2);
        assert_eq!(status.metrics.failed_runs, 1);
        // a failed run leaves the last completed run's figures in place
        assert_eq!(status.metrics.records_processed, 4);
        assert_eq!(status.metrics.success_rate, 100.0);
        assert_eq!(status.metrics.average_processing_time_ms, 100.0);
        assert!(status.last_error.as_deref().unwrap().contains("down"));
    }

    #[test]
    fn empty_run_has_zero_success_rate() {
        let tracker = Arc::new(RunTracker::new());
        tracker.begin().unwrap().complete(0, 0, 5);
        assert_eq!(tracker.status().metrics.success_rate, 0.0);
    }

    #[test]
    fn new_run_clears_last_error() {
        let tracker = Arc::new(RunTracker::new());
        tracker.begin().unwrap().fail(&PipelineError::AlreadyRunning);
        let guard = tracker.begin().unwrap();
        assert_eq!(tracker.status().last_error, None);
        assert_eq!(tracker.status().run_id, Some(guard.run_id()));
    }
}
