//! Analysis drivers and the `run_multiple_simulations` entry point.
//!
//! Every analysis flattens the scenario's drivers, seeds its PRNG from the
//! config, drives the orchestrator one matrix at a time and persists each
//! batch as its own chunk. Cancellation surfaces as [`Outcome::Aborted`].

pub mod deterministic;
pub mod lsa;
pub mod mc;
pub mod sobol;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, Instrument};

use costuq_store::ChunkKey;

use crate::config::AnalysisConfig;
use crate::domain::{
    flatten, AnalysisSession, ChunkInfo, CostDriver, Outcome, Result, RunRecord, Scenario,
    ToolName, ValidationError,
};
use crate::obs;
use crate::orchestration::{Simulator, StateReports};
use crate::persistence::ChunkPersistence;

pub use deterministic::run_deterministic;
pub use lsa::run_local_sa;
pub use mc::run_monte_carlo;
pub use sobol::run_sobol_gsa;

/// Collaborators shared by the analysis drivers of one run.
#[derive(Clone, Copy)]
pub struct AnalysisContext<'a> {
    pub project: &'a str,
    pub persistence: &'a ChunkPersistence,
    pub simulator: &'a dyn Simulator,
    pub reports: &'a StateReports,
    pub config: &'a AnalysisConfig,
}

/// What to run.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub project_name: String,
    pub scenario: Scenario,
    pub iterations: usize,
    pub tool: ToolName,
}

/// Runs analyses against one simulator and chunk store.
pub struct AnalysisRunner {
    persistence: ChunkPersistence,
    simulator: Arc<dyn Simulator>,
    reports: Arc<StateReports>,
    config: AnalysisConfig,
}

impl AnalysisRunner {
    pub fn new(
        persistence: ChunkPersistence,
        simulator: Arc<dyn Simulator>,
        reports: Arc<StateReports>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            persistence,
            simulator,
            reports,
            config,
        }
    }

    pub fn reports(&self) -> &Arc<StateReports> {
        &self.reports
    }

    pub fn persistence(&self) -> &ChunkPersistence {
        &self.persistence
    }

    /// Validate, wipe the project's chunks, run the requested analysis and
    /// save its session as `analysisResults`.
    ///
    /// Validation errors are returned before any state changes. An aborted
    /// analysis returns `Outcome::Aborted` and writes no session. Any other
    /// failure is logged, moves the reports into `Errored` and is returned.
    pub async fn run_multiple_simulations(
        &self,
        request: &AnalysisRequest,
    ) -> Result<Outcome<AnalysisSession>> {
        let drivers = validate(request)?;
        let span = obs::analysis_span(&request.project_name, request.tool);

        async {
            self.reports.start();
            obs::emit_analysis_started(
                &request.project_name,
                request.tool,
                request.iterations,
                drivers.len(),
            );

            match self.execute(request, &drivers).await {
                Ok(Outcome::Completed(session)) => {
                    self.reports.finish();
                    obs::emit_analysis_finished(
                        &request.project_name,
                        request.tool,
                        session.duration_ms.unwrap_or(0),
                    );
                    Ok(Outcome::Completed(session))
                }
                Ok(Outcome::Aborted) => {
                    self.reports.cancel();
                    obs::emit_analysis_aborted(&request.project_name, request.tool);
                    Ok(Outcome::Aborted)
                }
                Err(e) => {
                    error!(error = %e, "analysis failed");
                    self.reports.fail();
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        request: &AnalysisRequest,
        drivers: &[CostDriver],
    ) -> Result<Outcome<AnalysisSession>> {
        let project = request.project_name.as_str();
        self.persistence.delete_all_chunks(project).await;

        let ctx = AnalysisContext {
            project,
            persistence: &self.persistence,
            simulator: self.simulator.as_ref(),
            reports: &self.reports,
            config: &self.config,
        };

        let started = Instant::now();
        let outcome: Outcome<ChunkInfo> = match request.tool {
            ToolName::MonteCarlo => run_monte_carlo(&ctx, drivers, request.iterations).await,
            ToolName::LocalSa => run_local_sa(&ctx, drivers, request.iterations).await,
            ToolName::SobolGsa => run_sobol_gsa(&ctx, drivers, request.iterations).await,
            ToolName::Deterministic => run_deterministic(&ctx, drivers).await?,
        };
        let Outcome::Completed(chunk_info) = outcome else {
            return Ok(Outcome::Aborted);
        };

        let mut session = AnalysisSession::new(
            request.tool,
            request.iterations,
            request
                .scenario
                .environment_impact_parameters
                .cost_drivers
                .clone(),
        );
        session.chunk_info = chunk_info;
        session.finished = Some(Utc::now().timestamp_millis());
        session.duration_ms = Some(started.elapsed().as_millis() as u64);

        self.persistence
            .try_save_chunk(project, ChunkKey::AnalysisResults, &session)
            .await?;
        Ok(Outcome::Completed(session))
    }
}

/// Check preconditions and return the flattened drivers.
pub fn validate(request: &AnalysisRequest) -> std::result::Result<Vec<CostDriver>, ValidationError> {
    request.scenario.validate_frequencies()?;
    if request.iterations == 0 {
        return Err(ValidationError::NoIterations);
    }

    let drivers = flatten(&request.scenario.environment_impact_parameters.cost_drivers);
    for driver in &drivers {
        driver
            .distribution
            .validate()
            .map_err(|reason| ValidationError::InvalidDistribution {
                driver: driver.name.clone(),
                reason,
            })?;
    }

    if drivers.is_empty() && matches!(request.tool, ToolName::LocalSa | ToolName::SobolGsa) {
        return Err(ValidationError::NoDrivers {
            tool: request.tool.to_string(),
        });
    }
    Ok(drivers)
}

/// Log a settled batch.
pub(crate) fn record_batch(phase: &str, records: &[RunRecord]) {
    let errors = records.iter().filter(|r| r.is_error()).count();
    obs::emit_batch_finished(phase, records.len(), errors);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AbstractCostDriver, Distribution, EnvironmentImpactParameters, Variant};

    fn request(tool: ToolName, drivers: Vec<CostDriver>, freqs: &[f64]) -> AnalysisRequest {
        AnalysisRequest {
            project_name: "p".into(),
            scenario: Scenario {
                name: "s".into(),
                environment_impact_parameters: EnvironmentImpactParameters {
                    cost_drivers: vec![AbstractCostDriver {
                        id: "cat".into(),
                        name: None,
                        concrete_cost_drivers: drivers,
                    }],
                    variants: freqs
                        .iter()
                        .map(|f| Variant {
                            id: None,
                            name: None,
                            frequency: *f,
                        })
                        .collect(),
                },
            },
            iterations: 10,
            tool,
        }
    }

    fn good_driver() -> CostDriver {
        CostDriver::new("d", "D", "", Distribution::Uniform { min: 1.0, max: 2.0 })
    }

    #[test]
    fn validate_flattens_with_category() {
        let drivers = validate(&request(ToolName::MonteCarlo, vec![good_driver()], &[100.0])).unwrap();
        assert_eq!(drivers[0].category, "cat");
    }

    #[test]
    fn validate_rejects_bad_frequencies_first() {
        let err = validate(&request(ToolName::MonteCarlo, vec![good_driver()], &[30.0, 30.0])).unwrap_err();
        assert!(matches!(err, ValidationError::FrequencySum { .. }));
    }

    #[test]
    fn validate_rejects_missing_variants() {
        let err = validate(&request(ToolName::Deterministic, vec![good_driver()], &[])).unwrap_err();
        assert_eq!(err, ValidationError::FrequencySum { sum: 0.0 });
    }

    #[test]
    fn validate_rejects_zero_iterations() {
        let mut req = request(ToolName::MonteCarlo, vec![good_driver()], &[100.0]);
        req.iterations = 0;
        assert_eq!(validate(&req).unwrap_err(), ValidationError::NoIterations);
    }

    #[test]
    fn validate_rejects_invalid_parameters() {
        let bad = CostDriver::new("x", "X", "", Distribution::Uniform { min: 5.0, max: 1.0 });
        let err = validate(&request(ToolName::MonteCarlo, vec![bad], &[100.0])).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidDistribution { ref driver, .. } if driver == "X"));
    }

    #[test]
    fn validate_requires_drivers_for_sensitivity_tools() {
        assert!(matches!(
            validate(&request(ToolName::SobolGsa, vec![], &[100.0])),
            Err(ValidationError::NoDrivers { .. })
        ));
        assert!(validate(&request(ToolName::MonteCarlo, vec![], &[100.0])).is_ok());
    }
}
