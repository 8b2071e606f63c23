//! Post-processing of persisted analyses into cost statistics, local
//! sensitivities and Sobol indices.
//!
//! Everything here reads from a [`LoadedAnalysis`] and a [`FileStore`] and
//! writes nothing, so processing the same analysis twice gives the same report.

pub mod extract;
pub mod lsa;
pub mod mc;
pub mod sobol;
pub mod stats;

use serde::Serialize;
use tracing::info;

use costuq_store::FileStore;

use crate::domain::{flatten, ToolName};
use crate::persistence::{LoadedAnalysis, LoadedRuns};

pub use extract::{
    aggregate_costs, calculate_total_costs, extract_activity_costs, extract_costs_from_xml, RunCosts,
};
pub use lsa::{LsaDriverResult, LsaReport};
pub use mc::McReport;
pub use sobol::{
    check_interaction_significance, check_sobol_ranges, check_variance_closure, ClosureNote, IndexSet,
    SobolReport,
};
pub use stats::{check_mc_convergence, stats, ConvergenceReport, Stats};

/// Processed results, shaped by tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "tool", rename_all = "camelCase")]
pub enum AnalysisReport {
    MonteCarlo(McReport),
    Deterministic(McReport),
    LocalSa(LsaReport),
    Sobol(SobolReport),
}

/// Build the report for a loaded analysis.
pub async fn process_analysis(loaded: &LoadedAnalysis, project: &str, files: &dyn FileStore) -> AnalysisReport {
    let tool = loaded.session.tool_name;
    info!(project, %tool, "processing analysis results");

    match &loaded.runs {
        LoadedRuns::Runs(runs) => {
            let report = mc::process_mc_runs(runs, project, files).await;
            if tool == ToolName::Deterministic {
                AnalysisReport::Deterministic(report)
            } else {
                AnalysisReport::MonteCarlo(report)
            }
        }
        LoadedRuns::LocalSa { baseline, drivers } => {
            AnalysisReport::LocalSa(lsa::process_lsa_runs(baseline.as_ref(), drivers, project, files).await)
        }
        LoadedRuns::Sobol {
            a_matrix,
            b_matrix,
            drivers,
        } => {
            let mut names: Vec<String> = flatten(&loaded.session.drivers_structure)
                .into_iter()
                .map(|d| d.name)
                .collect();
            if names.is_empty() {
                names = drivers.iter().map(|d| d.driver_name.clone()).collect();
            }
            AnalysisReport::Sobol(
                sobol::process_sobol_runs(a_matrix, b_matrix, drivers, &names, project, files).await,
            )
        }
    }
}
