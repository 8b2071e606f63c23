//! Monte Carlo and deterministic post-processing.

use serde::Serialize;
use tracing::debug;

use costuq_store::FileStore;

use super::extract::{aggregate_costs, calculate_total_costs, collect_run_costs};
use super::stats::{check_mc_convergence, mean_of_sem, stats, ConvergenceReport, Stats, DEFAULT_CONVERGENCE_STEP};
use crate::domain::RunRecord;

/// An activity whose cost was identical in every run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeterministicActivity {
    pub name: String,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributedActivity {
    pub name: String,
    pub stats: Stats,
    pub costs: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McReport {
    /// Sorted by name.
    pub deterministic: Vec<DeterministicActivity>,
    /// Sorted by name.
    pub per_activity: Vec<DistributedActivity>,
    pub total_costs: Vec<f64>,
    pub total_costs_stats: Stats,
    /// Mean standard error over the distributed activities.
    pub mean_sem: Option<f64>,
    /// Present when there are enough runs for two convergence windows.
    pub convergence: Option<ConvergenceReport>,
}

/// Summarise successful runs: per-activity statistics, split by whether the
/// activity varied, plus the total-cost distribution.
pub async fn process_mc_runs(runs: &[RunRecord], project: &str, files: &dyn FileStore) -> McReport {
    let costs = collect_run_costs(runs, project, files).await;
    let total_costs = calculate_total_costs(&costs);

    let mut deterministic = Vec::new();
    let mut per_activity = Vec::new();
    // BTreeMap iteration keeps both lists sorted by name.
    for (name, values) in aggregate_costs(&costs) {
        let s = stats(&values);
        if s.deterministic {
            deterministic.push(DeterministicActivity { name, cost: s.mean });
        } else {
            per_activity.push(DistributedActivity {
                name,
                stats: s,
                costs: values,
            });
        }
    }

    let mean_sem = (!per_activity.is_empty()).then(|| mean_of_sem(per_activity.iter().map(|a| &a.stats)));
    let convergence = match check_mc_convergence(&total_costs, DEFAULT_CONVERGENCE_STEP) {
        Ok(report) => Some(report),
        Err(e) => {
            debug!(error = %e, "skipping convergence check");
            None
        }
    };

    McReport {
        deterministic,
        per_activity,
        total_costs_stats: stats(&total_costs),
        total_costs,
        mean_sem,
        convergence,
    }
}
