//! Sobol index estimation and its sanity checks.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use costuq_store::FileStore;

use super::extract::{extract_activity_costs, ActivitySeries};
use super::lsa::{DriverValues, PerActivity};
use super::stats::stats;
use crate::domain::{Result, RunRecord, SobolDriverChunk, UqError};

/// Bounds outside which an index is reported as suspicious.
const RANGE_LOW: f64 = -0.05;
const RANGE_HIGH: f64 = 1.05;
/// Tolerated amount by which a total-order index may undercut its first-order one.
const ORDER_TOLERANCE: f64 = 0.02;

/// Interaction share (percent) below which a model counts as additive.
pub const ADDITIVE_THRESHOLD: f64 = 5.0;

/// First-order, total-order and interaction indices, each
/// `{activity → {driver → value}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSet {
    pub first_order: PerActivity,
    pub total_order: PerActivity,
    pub interaction: PerActivity,
}

/// Estimate Sobol indices per activity and driver.
///
/// `c` maps driver names to the costs of their recombined matrix. Series are
/// positional by sample index and a `NaN` marks a missing run. Only positions
/// where A, B and C are all present contribute, and each estimate is the mean
/// over those positions. Activities must appear in both `a` and `b`;
/// activities whose pooled variance is zero are skipped with a warning.
pub fn compute_sobol_indices(
    a: &ActivitySeries,
    b: &ActivitySeries,
    c: &BTreeMap<String, ActivitySeries>,
    driver_names: &[String],
) -> IndexSet {
    let mut set = IndexSet::default();
    let activities: std::collections::BTreeSet<&String> = a.keys().chain(b.keys()).collect();

    for activity in activities {
        let (Some(ya), Some(yb)) = (a.get(activity), b.get(activity)) else {
            warn!(activity = %activity, "activity missing from A or B; skipping");
            continue;
        };
        let pooled: Vec<f64> = ya.iter().chain(yb).copied().filter(|v| v.is_finite()).collect();
        if pooled.is_empty() {
            continue;
        }
        let variance = stats(&pooled).variance;
        if variance == 0.0 {
            warn!(activity = %activity, "total variance is zero; skipping");
            continue;
        }

        let mut first = BTreeMap::new();
        let mut total = BTreeMap::new();
        let mut interaction = BTreeMap::new();
        for driver in driver_names {
            let Some(yc) = c.get(driver).and_then(|costs| costs.get(activity)) else {
                warn!(activity = %activity, driver = %driver, "no recombined data; skipping driver");
                continue;
            };

            let mut first_num = 0.0;
            let mut total_num = 0.0;
            let mut pairs = 0usize;
            for ((a_i, b_i), c_i) in ya.iter().zip(yb).zip(yc) {
                if !(a_i.is_finite() && b_i.is_finite() && c_i.is_finite()) {
                    continue;
                }
                first_num += b_i * (c_i - a_i);
                total_num += (a_i - c_i).powi(2);
                pairs += 1;
            }
            if pairs == 0 {
                warn!(activity = %activity, driver = %driver, "no complete sample triples; skipping driver");
                continue;
            }
            let n = pairs as f64;
            let s1 = (first_num / n / variance).max(0.0);
            let st = (total_num / (2.0 * n) / variance).max(0.0);

            first.insert(driver.clone(), s1);
            total.insert(driver.clone(), st);
            interaction.insert(driver.clone(), (st - s1).max(0.0));
        }

        set.first_order.insert(activity.clone(), first);
        set.total_order.insert(activity.clone(), total);
        set.interaction.insert(activity.clone(), interaction);
    }
    set
}

/// Flag indices that are non-finite, outside `[-0.05, 1.05]`, or where the
/// total order undercuts the first order by more than 0.02.
pub fn check_sobol_ranges(first_order: &PerActivity, total_order: &PerActivity) -> Vec<String> {
    let mut warnings = Vec::new();

    for (activity, drivers) in first_order {
        for (driver, &s1) in drivers {
            if !s1.is_finite() {
                warnings.push(format!("{activity}/{driver}: first-order index is not finite"));
            } else if !(RANGE_LOW..=RANGE_HIGH).contains(&s1) {
                warnings.push(format!("{activity}/{driver}: first-order index out of range ({s1:.3})"));
            }

            let Some(&st) = total_order.get(activity).and_then(|t| t.get(driver)) else {
                continue;
            };
            if !st.is_finite() {
                warnings.push(format!("{activity}/{driver}: total-order index is not finite"));
            } else if !(RANGE_LOW..=RANGE_HIGH).contains(&st) {
                warnings.push(format!("{activity}/{driver}: total-order index out of range ({st:.3})"));
            } else if st < s1 - ORDER_TOLERANCE {
                warnings.push(format!("{activity}/{driver}: total-order below first-order"));
            }
        }
    }

    if warnings.is_empty() {
        info!("sobol indices within expected bounds");
    } else {
        for w in &warnings {
            warn!(check = "sobol_range", "{w}");
        }
    }
    warnings
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClosureNote {
    /// `ΣS₁ < 0.8`: variance left unexplained.
    Low,
    /// `ΣS₁ > 1.2`: variance over-counted.
    High,
    Ok,
}

impl ClosureNote {
    pub fn classify(sum: f64) -> Self {
        if sum < 0.8 {
            ClosureNote::Low
        } else if sum > 1.2 {
            ClosureNote::High
        } else {
            ClosureNote::Ok
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityClosure {
    pub activity: String,
    pub sum_first_order: f64,
    pub note: ClosureNote,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VarianceClosure {
    pub activities: Vec<ActivityClosure>,
    /// Mean `ΣS₁` across activities; NaN when there are none.
    pub mean: f64,
}

/// Sum the finite first-order indices of each activity.
pub fn check_variance_closure(first_order: &PerActivity) -> VarianceClosure {
    let activities: Vec<ActivityClosure> = first_order
        .iter()
        .map(|(activity, drivers)| {
            let sum: f64 = drivers.values().filter(|v| v.is_finite()).sum();
            ActivityClosure {
                activity: activity.clone(),
                sum_first_order: sum,
                note: ClosureNote::classify(sum),
            }
        })
        .collect();

    let mean = activities.iter().map(|a| a.sum_first_order).sum::<f64>() / activities.len() as f64;
    info!(activities = activities.len(), mean_sum_first_order = mean, "variance closure");

    VarianceClosure { activities, mean }
}

/// Sum each driver's index across activities.
pub fn aggregate_sobol_indices(indices: &PerActivity) -> DriverValues {
    let mut out = DriverValues::new();
    for drivers in indices.values() {
        for (driver, value) in drivers {
            *out.entry(driver.clone()).or_insert(0.0) += value;
        }
    }
    out
}

/// Turn `{activity → {driver → v}}` into `{driver → {activity → v}}`.
pub fn reverse_mapping_a_to_d(indices: &PerActivity) -> PerActivity {
    let mut out = PerActivity::new();
    for (activity, drivers) in indices {
        for (driver, value) in drivers {
            out.entry(driver.clone())
                .or_default()
                .insert(activity.clone(), *value);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionSignificance {
    /// `Σ max(S_T − S₁, 0) / ΣS_T`, in percent.
    pub interaction_share: f64,
    pub additive: bool,
}

/// Share of total-order variance attributable to interactions.
pub fn check_interaction_significance(first: &[f64], total: &[f64]) -> Result<InteractionSignificance> {
    if first.len() != total.len() {
        return Err(UqError::LengthMismatch {
            first: first.len(),
            total: total.len(),
        });
    }
    let interactions: f64 = total
        .iter()
        .zip(first)
        .map(|(st, s1)| (st - s1).max(0.0))
        .sum();
    let interaction_share = interactions / total.iter().sum::<f64>() * 100.0;

    Ok(InteractionSignificance {
        interaction_share,
        additive: interaction_share < ADDITIVE_THRESHOLD,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SobolReport {
    #[serde(flatten)]
    pub indices: IndexSet,
    pub first_order_per_driver: PerActivity,
    pub total_order_per_driver: PerActivity,
    pub first_order_aggregated: DriverValues,
    pub total_order_aggregated: DriverValues,
    pub range_warnings: Vec<String>,
    pub variance_closure: VarianceClosure,
}

/// Costs per activity placed at each run's `sample_index`. Failed, dropped
/// or incomplete runs leave `NaN` in their slot.
async fn matrix_costs(runs: &[RunRecord], project: &str, files: &dyn FileStore) -> ActivitySeries {
    let len = runs.iter().map(|r| r.sample_index + 1).max().unwrap_or(0);
    let mut series = ActivitySeries::new();
    for run in runs.iter().filter(|r| !r.is_error()) {
        for (activity, cost) in extract_activity_costs(run, project, files).await {
            series.entry(activity).or_insert_with(|| vec![f64::NAN; len])[run.sample_index] = cost;
        }
    }
    series
}

/// Extract A, B and recombined costs, then estimate and check the indices.
pub async fn process_sobol_runs(
    a_matrix: &[RunRecord],
    b_matrix: &[RunRecord],
    drivers: &[SobolDriverChunk],
    driver_names: &[String],
    project: &str,
    files: &dyn FileStore,
) -> SobolReport {
    let a = matrix_costs(a_matrix, project, files).await;
    let b = matrix_costs(b_matrix, project, files).await;
    let mut c = BTreeMap::new();
    for chunk in drivers {
        c.insert(
            chunk.driver_name.clone(),
            matrix_costs(&chunk.results, project, files).await,
        );
    }

    let indices = compute_sobol_indices(&a, &b, &c, driver_names);
    let range_warnings = check_sobol_ranges(&indices.first_order, &indices.total_order);
    let variance_closure = check_variance_closure(&indices.first_order);

    SobolReport {
        first_order_per_driver: reverse_mapping_a_to_d(&indices.first_order),
        total_order_per_driver: reverse_mapping_a_to_d(&indices.total_order),
        first_order_aggregated: aggregate_sobol_indices(&indices.first_order),
        total_order_aggregated: aggregate_sobol_indices(&indices.total_order),
        range_warnings,
        variance_closure,
        indices,
    }
}
