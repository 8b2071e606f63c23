//! Local sensitivity analysis: vary one driver at a time around the baseline.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, instrument};

use costuq_store::ChunkKey;

use super::{record_batch, AnalysisContext};
use crate::domain::{
    filter_run_results, ChunkInfo, CostDriver, LsaBaselineChunk, LsaDriverChunk, Outcome,
    BASELINE_DRIVER_NAME,
};
use crate::orchestration::monte_carlo_matrix;
use crate::persistence::save_runs;
use crate::sampling::{baseline_matrix, create_sample_matrix, create_sensitivity_sample_matrix};

/// Simulate the baseline (`baseline`) and then one matrix per driver with
/// only that driver varied (`driver_<name>`).
///
/// Progress is spread over `drivers + 1` batches.
#[instrument(skip_all, fields(project = %ctx.project, iterations = iterations))]
pub async fn run_local_sa(
    ctx: &AnalysisContext<'_>,
    drivers: &[CostDriver],
    iterations: usize,
) -> Outcome<ChunkInfo> {
    let mut rng = StdRng::seed_from_u64(ctx.config.seed);
    let raw = create_sample_matrix(iterations, drivers.len(), &mut rng);
    let repeats = (drivers.len() + 1) as f64;

    let baseline = baseline_matrix(drivers);
    let Outcome::Completed(baseline_runs) =
        monte_carlo_matrix(&baseline, drivers, ctx.simulator, ctx.reports, repeats).await
    else {
        return Outcome::Aborted;
    };
    record_batch("baseline", &baseline_runs);

    let baseline_runs = filter_run_results(baseline_runs, &ctx.config.statistic_file);
    let chunk = LsaBaselineChunk {
        driver_name: BASELINE_DRIVER_NAME.to_string(),
        baseline_results: baseline_runs.into_iter().next(),
        drivers: drivers.to_vec(),
    };
    save_runs(ctx.persistence, ctx.project, ChunkKey::Baseline, &chunk, 1).await;

    for (d, driver) in drivers.iter().enumerate() {
        if ctx.reports.is_cancelled() {
            return Outcome::Aborted;
        }
        debug!(driver = %driver.name, index = d, "varying driver");

        let matrix = create_sensitivity_sample_matrix(&raw, d, drivers);
        let Outcome::Completed(records) =
            monte_carlo_matrix(&matrix, drivers, ctx.simulator, ctx.reports, repeats).await
        else {
            return Outcome::Aborted;
        };
        if ctx.reports.is_cancelled() {
            return Outcome::Aborted;
        }
        record_batch(&driver.name, &records);

        let results = filter_run_results(records, &ctx.config.statistic_file);
        let runs = results.len();
        let chunk = LsaDriverChunk {
            d,
            driver_name: driver.name.clone(),
            results,
            input_samples: matrix.row(d).to_vec(),
            base_mean: driver.mean,
        };
        save_runs(ctx.persistence, ctx.project, ChunkKey::driver(driver.name.as_str()), &chunk, runs).await;
    }

    Outcome::Completed(ChunkInfo::per_driver())
}
