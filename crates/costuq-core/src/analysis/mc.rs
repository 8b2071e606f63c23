//! Monte Carlo: chunked random sampling of every driver.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, instrument};

use costuq_store::ChunkKey;

use super::{record_batch, AnalysisContext};
use crate::domain::{filter_run_results, ChunkInfo, CostDriver, Outcome};
use crate::orchestration::monte_carlo_matrix;
use crate::persistence::save_runs;
use crate::sampling::{create_sample_matrix, map_sample_matrix_to_distributions};

/// Run `iterations` Monte Carlo samples in chunks of `mc_chunk_size`,
/// persisting each chunk as `mc_chunk_<i>`.
#[instrument(skip_all, fields(project = %ctx.project, iterations = iterations))]
pub async fn run_monte_carlo(
    ctx: &AnalysisContext<'_>,
    drivers: &[CostDriver],
    iterations: usize,
) -> Outcome<ChunkInfo> {
    let chunk_size = ctx.config.mc_chunk_size.max(1);
    let chunk_count = iterations.div_ceil(chunk_size);
    let mut rng = StdRng::seed_from_u64(ctx.config.seed);

    for i in 0..chunk_count {
        let in_chunk = chunk_size.min(iterations - i * chunk_size);
        debug!(chunk = i, chunk_count, in_chunk, "sampling chunk");

        let raw = create_sample_matrix(in_chunk, drivers.len(), &mut rng);
        let matrix = map_sample_matrix_to_distributions(&raw, drivers);

        let Outcome::Completed(records) =
            monte_carlo_matrix(&matrix, drivers, ctx.simulator, ctx.reports, chunk_count as f64).await
        else {
            return Outcome::Aborted;
        };
        record_batch("mc_chunk", &records);

        let filtered = filter_run_results(records, &ctx.config.statistic_file);
        save_runs(ctx.persistence, ctx.project, ChunkKey::McChunk(i), &filtered, filtered.len()).await;
    }

    Outcome::Completed(ChunkInfo::chunked(chunk_count))
}
