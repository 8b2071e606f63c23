//! Run results and per-iteration run records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::SimulationError;

/// Return value of one successful simulator invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    /// Id under which the simulator stored its output files.
    pub request_id: String,

    /// Output file names, relative to `request_id`.
    pub files: Vec<String>,

    /// Completion timestamp reported by the simulator.
    pub finished: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RunResult {
    pub fn new(request_id: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            request_id: request_id.into(),
            files,
            finished: Utc::now(),
            message: None,
        }
    }
}

/// What one orchestrated iteration leaves behind: a result or a wrapped error,
/// always tagged with the matrix column it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub sample_index: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(default)]
    pub files: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    pub fn succeeded(sample_index: usize, result: RunResult) -> Self {
        Self {
            sample_index,
            request_id: Some(result.request_id),
            files: result.files,
            finished: Some(result.finished),
            message: result.message,
            error: None,
        }
    }

    pub fn failed(sample_index: usize, error: &SimulationError) -> Self {
        Self {
            sample_index,
            request_id: None,
            files: Vec::new(),
            finished: None,
            message: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Keep only the first file whose name contains `file_name`.
    pub fn retain_file(mut self, file_name: &str) -> Self {
        let kept = self.files.iter().find(|f| f.contains(file_name)).cloned();
        self.files = kept.into_iter().collect();
        self
    }
}

/// Reduce every run's file list to the statistic file the analyses consume.
pub fn filter_run_results(records: Vec<RunRecord>, file_name: &str) -> Vec<RunRecord> {
    records
        .into_iter()
        .map(|record| record.retain_file(file_name))
        .collect()
}
