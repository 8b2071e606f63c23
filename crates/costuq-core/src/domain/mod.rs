//! Core domain types for costuq.
//!
//! Cost drivers and their distributions, run records, analysis sessions and
//! the per-phase chunk payloads. Everything here is plain data with serde
//! support; the external JSON shapes are camelCase.

pub mod driver;
pub mod error;
pub mod run;
pub mod scenario;
pub mod session;

pub use driver::{
    flatten, rebuild, AbstractCostDriver, CostDriver, Distribution, SampledAbstractDriver,
    SampledCostDriver,
};
pub use error::{Result, SimulationError, UqError, ValidationError};
pub use run::{filter_run_results, RunRecord, RunResult};
pub use scenario::{EnvironmentImpactParameters, Scenario, Variant};
pub use session::{
    AnalysisSession, ChunkInfo, LsaBaselineChunk, LsaDriverChunk, SobolDriverChunk, ToolName,
    BASELINE_DRIVER_NAME,
};

/// Result of a step that can be cancelled cooperatively.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Completed(T),
    Aborted,
}

impl<T> Outcome<T> {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Outcome::Aborted)
    }
}
