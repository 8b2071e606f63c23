//! costuq Core Library
//!
//! Uncertainty quantification for business-process cost simulations: seeded
//! sampling of cost driver distributions, matrix-driven orchestration of an
//! external simulator, chunked persistence of run batches, and the statistics
//! engine that turns persisted runs into cost statistics, local
//! sensitivities and Sobol indices.

pub mod analysis;
pub mod config;
pub mod domain;
pub mod export;
pub mod obs;
pub mod orchestration;
pub mod persistence;
pub mod results;
pub mod sampling;
pub mod telemetry;

pub use analysis::{validate, AnalysisRequest, AnalysisRunner};
pub use config::{AnalysisConfig, StoreConfig};
pub use domain::{
    AbstractCostDriver, AnalysisSession, CostDriver, Distribution, Outcome, Result, RunRecord,
    RunResult, SampledAbstractDriver, Scenario, SimulationError, ToolName, UqError,
    ValidationError,
};
pub use export::{archive_file_name, build_archive};
pub use orchestration::{
    monte_carlo_matrix, Phase, ProgressSnapshot, SimulationResult, Simulator, StateReports,
};
pub use persistence::{ChunkPersistence, LoadedAnalysis, LoadedRuns};
pub use results::{process_analysis, AnalysisReport};
pub use telemetry::init_tracing;
