//! Logging setup for the financed-emissions workspace.
//!
//! [`init_telemetry`] and [`init_json_telemetry`] install the process-wide
//! subscriber; [`EventRecorder`] captures events in memory so tests can assert
//! on what was logged.

pub mod init;
pub mod recorder;

pub use init::{TelemetryError, init_json_telemetry, init_telemetry};
pub use recorder::{EventRecorder, RecordedEvent, RecorderLayer};

#[cfg(test)]
mod test_recorder;
