//! Local sensitivity post-processing.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use costuq_store::FileStore;

use super::extract::{aggregate_costs, collect_run_costs, extract_activity_costs, ActivitySeries};
use super::stats::{stats, Stats};
use crate::domain::{LsaBaselineChunk, LsaDriverChunk};

/// Relative changes below this are treated as floating-point noise.
pub const SENSITIVITY_EPSILON: f64 = 1e-14;

/// Per-driver value, keyed by driver name.
pub type DriverValues = BTreeMap<String, f64>;

/// `{activity → {driver → value}}`
pub type PerActivity = BTreeMap<String, BTreeMap<String, f64>>;

/// Results of varying one driver.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LsaDriverResult {
    pub costs: ActivitySeries,
    pub stats: BTreeMap<String, Stats>,
    /// Percentage change per activity against the baseline run.
    pub sensitivities: BTreeMap<String, f64>,
    pub input_mean: f64,
    pub base_mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LsaReport {
    pub baseline_costs: ActivitySeries,
    pub baseline_total: f64,
    pub results_per_driver: BTreeMap<String, LsaDriverResult>,
    pub sensitivities_per_activity: PerActivity,
    pub overall_sensitivities: DriverValues,
    pub normalized_overall_sensitivities: DriverValues,
}

/// Percentage change of each activity's perturbed mean against its baseline
/// value. Activities absent from `stats_per_activity` are skipped.
pub fn compute_activity_sensitivities(
    baseline: &ActivitySeries,
    stats_per_activity: &BTreeMap<String, Stats>,
) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for (activity, base_values) in baseline {
        let Some(base) = base_values.first().copied() else {
            continue;
        };
        let Some(perturbed) = stats_per_activity.get(activity) else {
            debug!(activity = %activity, "activity missing from perturbed runs");
            continue;
        };
        let mut diff = (perturbed.mean - base) / base * 100.0;
        if diff.abs() < SENSITIVITY_EPSILON {
            diff = 0.0;
        }
        out.insert(activity.clone(), diff);
    }
    out
}

/// Mean total cost per driver, summing all activities run by run.
///
/// The run count is taken from the first activity; drivers without any
/// activity are left out.
pub fn aggregate_overall_driver_costs(results: &BTreeMap<String, LsaDriverResult>) -> DriverValues {
    let mut out = DriverValues::new();
    for (driver, result) in results {
        let Some(runs) = result.costs.values().next().map(Vec::len) else {
            continue;
        };
        let mut totals = vec![0.0; runs];
        for series in result.costs.values() {
            for (total, cost) in totals.iter_mut().zip(series) {
                *total += cost;
            }
        }
        out.insert(driver.clone(), totals.iter().sum::<f64>() / runs as f64);
    }
    out
}

/// Sum of every baseline cost.
pub fn baseline_total(baseline: &ActivitySeries) -> f64 {
    baseline.values().flatten().sum()
}

/// `(overall / baseline - 1) · 100` per driver; 0 when the baseline is 0.
pub fn overall_sensitivities(overall: &DriverValues, baseline_total: f64) -> DriverValues {
    overall
        .iter()
        .map(|(driver, value)| {
            let s = if baseline_total != 0.0 {
                (value / baseline_total - 1.0) * 100.0
            } else {
                0.0
            };
            (driver.clone(), s)
        })
        .collect()
}

/// Elasticity `(ΔY/Y₀) / (ΔX/X₀)` per driver.
///
/// `ΔY` is the driver's mean overall cost minus the baseline total, `ΔX` the
/// mean of its input samples minus its nominal mean. Any zero divisor yields 0.
pub fn normalized_sensitivities(
    results: &BTreeMap<String, LsaDriverResult>,
    overall: &DriverValues,
    baseline_total: f64,
) -> DriverValues {
    results
        .iter()
        .map(|(driver, result)| {
            let delta_y = overall.get(driver).copied().unwrap_or(f64::NAN) - baseline_total;
            let delta_x = result.input_mean - result.base_mean;
            let value = if baseline_total == 0.0 || delta_x == 0.0 || result.base_mean == 0.0 {
                0.0
            } else {
                (delta_y / baseline_total) / (delta_x / result.base_mean)
            };
            (driver.clone(), value)
        })
        .collect()
}

/// Turn `{driver → {activity → sensitivity}}` into `{activity → {driver → sensitivity}}`.
pub fn reverse_mapping(results: &BTreeMap<String, LsaDriverResult>) -> PerActivity {
    let mut out = PerActivity::new();
    for (driver, result) in results {
        for (activity, value) in &result.sensitivities {
            out.entry(activity.clone())
                .or_default()
                .insert(driver.clone(), *value);
        }
    }
    out
}

/// Summarise one varied driver against the baseline costs.
pub async fn process_lsa_driver(
    chunk: &LsaDriverChunk,
    baseline: &ActivitySeries,
    project: &str,
    files: &dyn FileStore,
) -> LsaDriverResult {
    let runs = collect_run_costs(&chunk.results, project, files).await;
    let costs = aggregate_costs(&runs);
    let activity_stats: BTreeMap<String, Stats> = costs
        .iter()
        .map(|(activity, values)| (activity.clone(), stats(values)))
        .collect();

    LsaDriverResult {
        sensitivities: compute_activity_sensitivities(baseline, &activity_stats),
        input_mean: stats(&chunk.input_samples).mean,
        base_mean: chunk.base_mean,
        costs,
        stats: activity_stats,
    }
}

/// Post-process a persisted LSA: baseline costs, per-driver sensitivities,
/// overall and normalized sensitivities.
pub async fn process_lsa_runs(
    baseline: Option<&LsaBaselineChunk>,
    drivers: &[LsaDriverChunk],
    project: &str,
    files: &dyn FileStore,
) -> LsaReport {
    let baseline_costs: ActivitySeries = match baseline.and_then(|b| b.baseline_results.as_ref()) {
        Some(run) => extract_activity_costs(run, project, files)
            .await
            .into_iter()
            .map(|(activity, cost)| (activity, vec![cost]))
            .collect(),
        None => {
            warn!(project, "no baseline run; sensitivities are empty");
            ActivitySeries::new()
        }
    };

    let mut results_per_driver = BTreeMap::new();
    for chunk in drivers {
        let result = process_lsa_driver(chunk, &baseline_costs, project, files).await;
        results_per_driver.insert(chunk.driver_name.clone(), result);
    }

    let total = baseline_total(&baseline_costs);
    let overall = aggregate_overall_driver_costs(&results_per_driver);

    LsaReport {
        overall_sensitivities: overall_sensitivities(&overall, total),
        normalized_overall_sensitivities: normalized_sensitivities(&results_per_driver, &overall, total),
        sensitivities_per_activity: reverse_mapping(&results_per_driver),
        baseline_total: total,
        baseline_costs,
        results_per_driver,
    }
}
