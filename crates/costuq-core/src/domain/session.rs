//! Analysis session metadata and the payloads of per-phase chunks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use super::driver::{AbstractCostDriver, CostDriver};
use super::run::RunRecord;

/// The four supported analyses. Serialized with the dashboard's tool labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolName {
    #[serde(rename = "monte carlo")]
    MonteCarlo,
    #[serde(rename = "local SA")]
    LocalSa,
    #[serde(rename = "sobol GSA")]
    SobolGsa,
    #[serde(rename = "deterministic")]
    Deterministic,
}

impl ToolName {
    pub fn label(&self) -> &'static str {
        match self {
            ToolName::MonteCarlo => "monte carlo",
            ToolName::LocalSa => "local SA",
            ToolName::SobolGsa => "sobol GSA",
            ToolName::Deterministic => "deterministic",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ToolName {
    type Err = String;

    /// Accepts the labels plus short aliases (`mc`, `lsa`, `sobol`, `det`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "monte carlo" | "monte-carlo" | "mc" => Ok(ToolName::MonteCarlo),
            "local sa" | "local-sa" | "lsa" => Ok(ToolName::LocalSa),
            "sobol gsa" | "sobol-gsa" | "sobol" => Ok(ToolName::SobolGsa),
            "deterministic" | "det" => Ok(ToolName::Deterministic),
            other => Err(format!("unknown analysis tool: {other}")),
        }
    }
}

/// How an analysis split its results into chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkInfo {
    pub is_chunked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
}

impl ChunkInfo {
    pub fn chunked(chunk_count: usize) -> Self {
        Self {
            is_chunked: true,
            chunk_count: Some(chunk_count),
        }
    }

    /// Chunked per driver; the count is implied by the recorded drivers.
    pub fn per_driver() -> Self {
        Self {
            is_chunked: true,
            chunk_count: None,
        }
    }
}

/// Top-level metadata of one analysis, persisted as `analysisResults`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSession {
    pub tool_name: ToolName,
    #[serde(default)]
    pub chunk_info: ChunkInfo,
    /// Completion time in unix milliseconds.
    #[serde(default)]
    pub finished: Option<i64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    pub iterations: usize,
    /// Number of abstract drivers in the scenario.
    pub driver_count: usize,
    /// Driver structure the analysis ran with.
    #[serde(default)]
    pub drivers_structure: Vec<AbstractCostDriver>,
}

impl AnalysisSession {
    pub fn new(tool_name: ToolName, iterations: usize, drivers: Vec<AbstractCostDriver>) -> Self {
        Self {
            tool_name,
            chunk_info: ChunkInfo::default(),
            finished: None,
            duration_ms: None,
            iterations,
            driver_count: drivers.len(),
            drivers_structure: drivers,
        }
    }
}

/// Label of the LSA baseline chunk's `driverName`.
pub const BASELINE_DRIVER_NAME: &str = "baseline";

/// LSA baseline run, persisted as `baseline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LsaBaselineChunk {
    pub driver_name: String,
    pub baseline_results: Option<RunRecord>,
    pub drivers: Vec<CostDriver>,
}

/// Runs with one driver varied, persisted as `driver_<name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LsaDriverChunk {
    pub d: usize,
    pub driver_name: String,
    pub results: Vec<RunRecord>,
    /// Mapped values of the varied driver, one per iteration.
    #[serde(deserialize_with = "lossy_floats")]
    pub input_samples: Vec<f64>,
    pub base_mean: f64,
}

/// Runs of one Sobol C matrix, persisted as `driver_<name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SobolDriverChunk {
    pub driver_index: usize,
    pub driver_name: String,
    pub results: Vec<RunRecord>,
}

/// JSON has no NaN; serde_json writes it as `null`. Read it back as NaN.
fn lossy_floats<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
    let values: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
    Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}
