//! Activity cost extraction from simulator statistic files.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use costuq_store::{run_file_path, FileStore};

use crate::domain::{Result, RunRecord, UqError};

/// Average cost per activity id.
pub type ActivityCosts = BTreeMap<String, f64>;

/// Cost series per activity, in run order.
pub type ActivitySeries = BTreeMap<String, Vec<f64>>;

/// Suffix of the statistic file the costs are read from.
pub const STATISTIC_SUFFIX: &str = "_statistic.xml";

/// Extracted costs of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunCosts {
    pub request_id: Option<String>,
    pub costs: ActivityCosts,
}

/// Parse a statistic file into `{activity → average cost}`.
///
/// Reads every `Activity` with an `id` below any `Activity_Cost` element and
/// takes its first `Activity_Average_Cost`. Entries that do not parse are
/// skipped.
pub fn try_extract_costs_from_xml(xml: &str) -> Result<ActivityCosts> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| UqError::Xml(e.to_string()))?;

    let mut costs = ActivityCosts::new();
    for container in doc.descendants().filter(|n| n.has_tag_name("Activity_Cost")) {
        for activity in container.descendants().filter(|n| n.has_tag_name("Activity")) {
            let Some(id) = activity.attribute("id").filter(|id| !id.is_empty()) else {
                continue;
            };
            let Some(average) = activity
                .descendants()
                .find(|n| n.has_tag_name("Activity_Average_Cost"))
            else {
                continue;
            };
            match average.text().map(str::trim).unwrap_or_default().parse::<f64>() {
                Ok(value) if !value.is_nan() => {
                    costs.insert(id.to_string(), value);
                }
                _ => debug!(activity = id, "skipping unparsable average cost"),
            }
        }
    }
    Ok(costs)
}

/// Like [`try_extract_costs_from_xml`], but a malformed document is logged
/// and yields an empty map.
pub fn extract_costs_from_xml(xml: &str) -> ActivityCosts {
    try_extract_costs_from_xml(xml).unwrap_or_else(|e| {
        warn!(error = %e, "failed to parse statistic xml");
        ActivityCosts::new()
    })
}

/// Fetch and parse the statistic file of one run.
///
/// Missing files and fetch errors are logged and yield an empty map.
pub async fn extract_activity_costs(run: &RunRecord, project: &str, files: &dyn FileStore) -> ActivityCosts {
    let Some(file) = run.files.iter().find(|f| f.ends_with(STATISTIC_SUFFIX)) else {
        return ActivityCosts::new();
    };
    let path = run_file_path(run.request_id.as_deref(), file);

    match files.get_file(project, &path).await {
        Ok(content) => extract_costs_from_xml(&content.data),
        Err(e) => {
            warn!(project, path = %path, error = %e, "failed to fetch statistic file");
            ActivityCosts::new()
        }
    }
}

/// Extract costs of every successful run, preserving order.
pub async fn collect_run_costs(runs: &[RunRecord], project: &str, files: &dyn FileStore) -> Vec<RunCosts> {
    let mut out = Vec::with_capacity(runs.len());
    for run in runs.iter().filter(|r| !r.is_error()) {
        out.push(RunCosts {
            request_id: run.request_id.clone(),
            costs: extract_activity_costs(run, project, files).await,
        });
    }
    out
}

/// Group per-activity costs across runs into series.
pub fn aggregate_costs(runs: &[RunCosts]) -> ActivitySeries {
    let mut series = ActivitySeries::new();
    for run in runs {
        for (activity, cost) in &run.costs {
            series.entry(activity.clone()).or_default().push(*cost);
        }
    }
    series
}

/// Total cost of each run, summed over its activities.
pub fn calculate_total_costs(runs: &[RunCosts]) -> Vec<f64> {
    runs.iter().map(|r| r.costs.values().sum()).collect()
}
