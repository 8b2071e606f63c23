//! Tar export of a persisted analysis: a metadata JSON plus the statistic
//! file of every run, laid out by phase.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use costuq_store::{run_file_path, FileStore};

use crate::domain::{AbstractCostDriver, Result, RunRecord, ToolName};
use crate::persistence::{LoadedAnalysis, LoadedRuns};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct LsaInput<'a> {
    base_mean: f64,
    input_samples: &'a [f64],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Metadata<'a> {
    tool_name: ToolName,
    duration_ms: Option<u64>,
    drivers_structure: &'a [AbstractCostDriver],
    request_id: Option<&'a str>,
    iterations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_data: Option<BTreeMap<&'a str, LsaInput<'a>>>,
}

/// A file to place in the archive.
struct Entry {
    path: String,
    content: Vec<u8>,
}

/// `<project>__<tool>_<iterations>_runs.tar`, with the first space of the
/// tool label replaced by `_`.
pub fn archive_file_name(project: &str, tool: ToolName, iterations: usize) -> String {
    format!("{project}__{}_{iterations}_runs.tar", tool.label().replacen(' ', "_", 1))
}

fn metadata_file_name(tool: ToolName) -> String {
    match tool {
        ToolName::LocalSa => "lsa_analysis_metadata.json".to_string(),
        other => format!("{}_metadata.json", other.label().replacen(' ', "_", 1).to_lowercase()),
    }
}

/// JSON with four-space indentation.
fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut ser)?;
    Ok(out)
}

async fn fetch(files: &dyn FileStore, project: &str, source: &str, target: String) -> Option<Entry> {
    match files.fetch_file_blob(project, source).await {
        Ok(content) => Some(Entry { path: target, content }),
        Err(e) => {
            warn!(project, path = source, error = %e, "skipping file that could not be fetched");
            None
        }
    }
}

/// Collect the statistic file of each run as `[<prefix>/]run<i>_<file>`.
async fn run_files(
    runs: &[RunRecord],
    statistic_file: &str,
    prefix: Option<&str>,
    project: &str,
    files: &dyn FileStore,
    out: &mut Vec<Entry>,
) {
    for (idx, run) in runs.iter().enumerate() {
        for file in run.files.iter().filter(|f| f.as_str() == statistic_file) {
            let name = format!("run{}_{file}", idx + 1);
            let target = match prefix {
                Some(p) => format!("{p}/{name}"),
                None => name,
            };
            let source = run_file_path(run.request_id.as_deref(), file);
            out.extend(fetch(files, project, &source, target).await);
        }
    }
}

/// Pack a loaded analysis into an uncompressed tar archive.
///
/// Only `statistic_file` is archived per run; the LSA baseline keeps all of
/// its files. Files that cannot be fetched are logged and left out.
pub async fn build_archive(
    loaded: &LoadedAnalysis,
    project: &str,
    statistic_file: &str,
    files: &dyn FileStore,
) -> Result<Vec<u8>> {
    let session = &loaded.session;
    let mut entries = Vec::new();
    let mut request_id = None;
    let mut input_data = None;

    match &loaded.runs {
        LoadedRuns::Runs(runs) => {
            run_files(runs, statistic_file, None, project, files, &mut entries).await;
        }
        LoadedRuns::LocalSa { baseline, drivers } => {
            if let Some(run) = baseline.as_ref().and_then(|b| b.baseline_results.as_ref()) {
                request_id = run.request_id.as_deref();
                let dir = format!("Baseline_{}", run.request_id.as_deref().unwrap_or_default());
                for file in &run.files {
                    let source = run_file_path(run.request_id.as_deref(), file);
                    entries.extend(fetch(files, project, &source, format!("{dir}/{file}")).await);
                }
            }
            for chunk in drivers {
                let dir = format!("Driver_{}", chunk.driver_name);
                run_files(&chunk.results, statistic_file, Some(&dir), project, files, &mut entries).await;
            }
            input_data = Some(
                drivers
                    .iter()
                    .map(|d| {
                        let input = LsaInput {
                            base_mean: d.base_mean,
                            input_samples: &d.input_samples,
                        };
                        (d.driver_name.as_str(), input)
                    })
                    .collect(),
            );
        }
        LoadedRuns::Sobol {
            a_matrix,
            b_matrix,
            drivers,
        } => {
            run_files(a_matrix, statistic_file, Some("A_Matrix"), project, files, &mut entries).await;
            run_files(b_matrix, statistic_file, Some("B_Matrix"), project, files, &mut entries).await;
            for chunk in drivers {
                let dir = format!("Driver_{}", chunk.driver_name);
                run_files(&chunk.results, statistic_file, Some(&dir), project, files, &mut entries).await;
            }
        }
    }

    let metadata = Metadata {
        tool_name: session.tool_name,
        duration_ms: session.duration_ms,
        drivers_structure: &session.drivers_structure,
        request_id,
        iterations: session.iterations,
        input_data,
    };
    entries.insert(
        0,
        Entry {
            path: metadata_file_name(session.tool_name),
            content: to_pretty_json(&metadata)?,
        },
    );

    let archive = write_tar(&entries)?;
    info!(project, entries = entries.len(), bytes = archive.len(), "archive built");
    Ok(archive)
}

fn write_tar(entries: &[Entry]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut dirs = BTreeSet::new();

    for entry in entries {
        // Parent directories get their own entries, outermost first.
        if let Some((parent, _)) = entry.path.rsplit_once('/') {
            let mut current = String::new();
            for part in parent.split('/') {
                if !current.is_empty() {
                    current.push('/');
                }
                current.push_str(part);
                if dirs.insert(current.clone()) {
                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_mode(0o755);
                    header.set_size(0);
                    builder.append_data(&mut header, format!("{current}/"), std::io::empty())?;
                }
            }
        }

        let mut header = tar::Header::new_gnu();
        header.set_mode(0o644);
        header.set_size(entry.content.len() as u64);
        builder.append_data(&mut header, &entry.path, entry.content.as_slice())?;
    }

    Ok(builder.into_inner()?)
}
