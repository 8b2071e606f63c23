//! Single run with every driver at its nominal mean.

use tracing::instrument;

use costuq_store::ChunkKey;

use super::{record_batch, AnalysisContext};
use crate::domain::{filter_run_results, ChunkInfo, CostDriver, Outcome, Result, SimulationError};
use crate::orchestration::monte_carlo_matrix;
use crate::persistence::save_runs;
use crate::sampling::baseline_matrix;

/// Simulate the nominal configuration once and persist it as `det_chunk_0`.
///
/// A failed or empty run is a simulation error: there is nothing to analyse.
#[instrument(skip_all, fields(project = %ctx.project))]
pub async fn run_deterministic(
    ctx: &AnalysisContext<'_>,
    drivers: &[CostDriver],
) -> Result<Outcome<ChunkInfo>> {
    let matrix = baseline_matrix(drivers);
    let Outcome::Completed(records) =
        monte_carlo_matrix(&matrix, drivers, ctx.simulator, ctx.reports, 1.0).await
    else {
        return Ok(Outcome::Aborted);
    };
    record_batch("deterministic", &records);
    if ctx.reports.is_cancelled() {
        return Ok(Outcome::Aborted);
    }

    match records.first() {
        Some(run) if !run.is_error() => {}
        Some(run) => {
            let reason = run.error.clone().unwrap_or_default();
            return Err(SimulationError::Failed(reason).into());
        }
        None => {
            return Err(SimulationError::Failed("simulator returned no result".into()).into());
        }
    }

    let filtered = filter_run_results(records, &ctx.config.statistic_file);
    save_runs(ctx.persistence, ctx.project, ChunkKey::DetChunk(0), &filtered, filtered.len()).await;
    Ok(Outcome::Completed(ChunkInfo::chunked(1)))
}
