//! Sobol global sensitivity analysis: A, B and one recombined C matrix per driver.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, instrument};

use costuq_store::ChunkKey;

use super::{record_batch, AnalysisContext};
use crate::domain::{filter_run_results, ChunkInfo, CostDriver, Outcome, SobolDriverChunk};
use crate::orchestration::monte_carlo_matrix;
use crate::persistence::save_runs;
use crate::sampling::{create_sample_matrix, create_sobol_c, map_sample_matrix_to_distributions};

/// Simulate A and B (`aMatrix`, `bMatrix`), then every `C_i` (`driver_<name>`).
///
/// A and B are drawn one after the other from the same seeded stream, so
/// they are disjoint sample sets. `drivers + 2` batches in total.
#[instrument(skip_all, fields(project = %ctx.project, iterations = iterations))]
pub async fn run_sobol_gsa(
    ctx: &AnalysisContext<'_>,
    drivers: &[CostDriver],
    iterations: usize,
) -> Outcome<ChunkInfo> {
    let mut rng = StdRng::seed_from_u64(ctx.config.seed);
    let raw_a = create_sample_matrix(iterations, drivers.len(), &mut rng);
    let raw_b = create_sample_matrix(iterations, drivers.len(), &mut rng);
    let a = map_sample_matrix_to_distributions(&raw_a, drivers);
    let b = map_sample_matrix_to_distributions(&raw_b, drivers);
    let repeats = (drivers.len() + 2) as f64;
    let stat = ctx.config.statistic_file.as_str();

    let Outcome::Completed(results_a) =
        monte_carlo_matrix(&a, drivers, ctx.simulator, ctx.reports, repeats).await
    else {
        return Outcome::Aborted;
    };
    record_batch("aMatrix", &results_a);

    let Outcome::Completed(results_b) =
        monte_carlo_matrix(&b, drivers, ctx.simulator, ctx.reports, repeats).await
    else {
        return Outcome::Aborted;
    };
    record_batch("bMatrix", &results_b);

    if ctx.reports.is_cancelled() {
        return Outcome::Aborted;
    }

    let results_a = filter_run_results(results_a, stat);
    let results_b = filter_run_results(results_b, stat);
    save_runs(ctx.persistence, ctx.project, ChunkKey::AMatrix, &results_a, results_a.len()).await;
    save_runs(ctx.persistence, ctx.project, ChunkKey::BMatrix, &results_b, results_b.len()).await;

    for (j, driver) in drivers.iter().enumerate() {
        debug!(driver = %driver.name, index = j, "simulating recombined matrix");
        let c = create_sobol_c(&a, &b, j);

        let Outcome::Completed(records) =
            monte_carlo_matrix(&c, drivers, ctx.simulator, ctx.reports, repeats).await
        else {
            return Outcome::Aborted;
        };
        if ctx.reports.is_cancelled() {
            return Outcome::Aborted;
        }
        record_batch(&driver.name, &records);

        let results = filter_run_results(records, stat);
        let runs = results.len();
        let chunk = SobolDriverChunk {
            driver_index: j,
            driver_name: driver.name.clone(),
            results,
        };
        save_runs(ctx.persistence, ctx.project, ChunkKey::driver(driver.name.as_str()), &chunk, runs).await;
    }

    Outcome::Completed(ChunkInfo::per_driver())
}
