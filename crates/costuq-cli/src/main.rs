//! costuq - uncertainty quantification for business-process cost simulations
//!
//! The `costuq` command drives an external process simulator through Monte
//! Carlo, local sensitivity, Sobol and deterministic analyses and works with
//! the persisted results.
//!
//! ## Commands
//!
//! - `run`: run an analysis for a scenario against a simulator command
//! - `load`: summarise the last persisted analysis of a project
//! - `analyze`: compute statistics and sensitivities from persisted runs
//! - `export`: pack the persisted runs into a tar archive

mod simulator;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn, Level};

use costuq_core::domain::{Scenario, ToolName};
use costuq_core::persistence::LoadedRuns;
use costuq_core::{
    archive_file_name, build_archive, process_analysis, AnalysisConfig, AnalysisRequest,
    AnalysisRunner, ChunkPersistence, LoadedAnalysis, Outcome, Phase, StateReports, StoreConfig,
};
use costuq_store::{FsChunkStore, FsFileStore};

use simulator::ProcessSimulator;

#[derive(Parser)]
#[command(name = "costuq")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Uncertainty quantification for business-process cost simulations", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Root directory of the chunk and file stores
    #[arg(long, global = true, env = "COSTUQ_STORE_DIR")]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an analysis, replacing the project's previous results
    Run {
        /// Project name the results are stored under
        #[arg(short, long)]
        project: String,

        /// Scenario JSON with `environmentImpactParameters`
        #[arg(short, long)]
        scenario: PathBuf,

        /// Analysis: monte carlo | local SA | sobol GSA | deterministic (or mc, lsa, sobol, det)
        #[arg(short, long, default_value = "mc")]
        tool: ToolName,

        /// Number of iterations (samples per matrix)
        #[arg(short = 'n', long, default_value = "100")]
        iterations: usize,

        /// PRNG seed
        #[arg(long, env = "COSTUQ_SEED")]
        seed: Option<u64>,

        /// Monte Carlo iterations per persisted chunk
        #[arg(long, env = "COSTUQ_MC_CHUNK_SIZE")]
        chunk_size: Option<usize>,

        /// Simulator command and its arguments
        #[arg(required = true, last = true)]
        simulator: Vec<String>,
    },

    /// Summarise the last persisted analysis
    Load {
        #[arg(short, long)]
        project: String,
    },

    /// Compute the statistics report of the last persisted analysis
    Analyze {
        #[arg(short, long)]
        project: String,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export the last persisted analysis as a tar archive
    Export {
        #[arg(short, long)]
        project: String,

        /// Directory the archive is written to
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
}

/// Opened filesystem stores
struct Stores {
    persistence: ChunkPersistence,
    files: Arc<FsFileStore>,
}

impl Stores {
    fn config(store_dir: Option<PathBuf>) -> StoreConfig {
        match store_dir {
            Some(root) => StoreConfig::with_root(root),
            None => StoreConfig::from_env(),
        }
    }

    /// Open the stores for writing, creating their directories.
    fn create(store_dir: Option<PathBuf>) -> Result<Self> {
        let config = Self::config(store_dir);
        let chunks = FsChunkStore::new(&config.root)
            .with_context(|| format!("Failed to open chunk store at {:?}", config.root))?;
        let files = FsFileStore::new(&config.root)
            .with_context(|| format!("Failed to open file store at {:?}", config.root))?;
        Ok(Self::from_parts(chunks, files))
    }

    /// Open the stores for reading only. Nothing is created on disk.
    fn open(store_dir: Option<PathBuf>) -> Self {
        let config = Self::config(store_dir);
        Self::from_parts(FsChunkStore::open(&config.root), FsFileStore::open(&config.root))
    }

    fn from_parts(chunks: FsChunkStore, files: FsFileStore) -> Self {
        Self {
            persistence: ChunkPersistence::new(Arc::new(chunks)),
            files: Arc::new(files),
        }
    }

    async fn load(&self, project: &str) -> Result<LoadedAnalysis> {
        self.persistence
            .load_large_analysis(project)
            .await
            .with_context(|| format!("Failed to load analysis for {project}"))?
            .with_context(|| format!("No finished analysis stored for {project}"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    costuq_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            project,
            scenario,
            tool,
            iterations,
            seed,
            chunk_size,
            simulator,
        } => {
            let mut config = AnalysisConfig::from_env();
            if let Some(seed) = seed {
                config = config.with_seed(seed);
            }
            if let Some(size) = chunk_size {
                config = config.with_mc_chunk_size(size);
            }
            let stores = Stores::create(cli.store_dir)?;
            cmd_run(&stores, &project, &scenario, tool, iterations, config, &simulator).await
        }
        Commands::Load { project } => cmd_load(&Stores::open(cli.store_dir), &project).await,
        Commands::Analyze { project, output } => {
            cmd_analyze(&Stores::open(cli.store_dir), &project, output.as_deref()).await
        }
        Commands::Export {
            project,
            output_dir,
        } => cmd_export(&Stores::open(cli.store_dir), &project, &output_dir).await,
    }
}

fn read_scenario(path: &Path) -> Result<Scenario> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file: {:?}", path))?;
    serde_json::from_str(&content).context("Failed to parse scenario JSON")
}

/// Run one analysis. Ctrl-C requests cancellation.
async fn cmd_run(
    stores: &Stores,
    project: &str,
    scenario_path: &Path,
    tool: ToolName,
    iterations: usize,
    config: AnalysisConfig,
    command: &[String],
) -> Result<()> {
    let scenario = read_scenario(scenario_path)?;
    let Some((program, args)) = command.split_first() else {
        bail!("No simulator command given");
    };

    let reports = Arc::new(StateReports::new());
    let simulator = ProcessSimulator::new(
        program.clone(),
        args.to_vec(),
        project,
        stores.files.clone(),
        reports.clone(),
    );
    let runner = AnalysisRunner::new(
        stores.persistence.clone(),
        Arc::new(simulator),
        reports.clone(),
        config,
    );

    let interrupt = tokio::spawn({
        let reports = reports.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling analysis");
                reports.cancel();
            }
        }
    });
    let progress = tokio::spawn(log_progress(reports.clone()));

    let request = AnalysisRequest {
        project_name: project.to_string(),
        scenario,
        iterations,
        tool,
    };
    let outcome = runner.run_multiple_simulations(&request).await;
    interrupt.abort();
    progress.abort();

    match outcome? {
        Outcome::Completed(session) => {
            println!("Finished {} for {}", session.tool_name, project);
            println!("Iterations: {}", session.iterations);
            println!("Drivers:    {}", session.driver_count);
            if let Some(ms) = session.duration_ms {
                println!("Duration:   {} ms", ms);
            }
            if reports.snapshot().errored {
                println!("Some simulator runs failed; see the log for details.");
            }
            Ok(())
        }
        Outcome::Aborted => {
            println!("Analysis aborted; previous results for {} were cleared.", project);
            Ok(())
        }
    }
}

/// Log progress in steps of 10%.
async fn log_progress(reports: Arc<StateReports>) {
    let mut rx = reports.subscribe();
    let mut last_logged = 0u32;
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();
        if snapshot.phase != Phase::Running {
            continue;
        }
        let decile = (snapshot.progress / 10.0) as u32;
        if decile > last_logged {
            last_logged = decile;
            info!(progress = snapshot.progress.round(), "analysis progress");
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadSummary<'a> {
    tool_name: ToolName,
    iterations: usize,
    driver_count: usize,
    duration_ms: Option<u64>,
    finished: Option<i64>,
    chunk_count: Option<usize>,
    runs: usize,
    failed_runs: usize,
    drivers: Vec<&'a str>,
}

fn summarise(loaded: &LoadedAnalysis) -> LoadSummary<'_> {
    let session = &loaded.session;
    let (runs, failed_runs, drivers) = match &loaded.runs {
        LoadedRuns::Runs(runs) => (runs.len(), runs.iter().filter(|r| r.is_error()).count(), vec![]),
        LoadedRuns::LocalSa { baseline, drivers } => {
            let all = drivers.iter().flat_map(|d| &d.results);
            let base = usize::from(baseline.as_ref().is_some_and(|b| b.baseline_results.is_some()));
            (
                base + all.clone().count(),
                all.filter(|r| r.is_error()).count(),
                drivers.iter().map(|d| d.driver_name.as_str()).collect(),
            )
        }
        LoadedRuns::Sobol {
            a_matrix,
            b_matrix,
            drivers,
        } => {
            let all = a_matrix
                .iter()
                .chain(b_matrix)
                .chain(drivers.iter().flat_map(|d| &d.results));
            (
                all.clone().count(),
                all.filter(|r| r.is_error()).count(),
                drivers.iter().map(|d| d.driver_name.as_str()).collect(),
            )
        }
    };

    LoadSummary {
        tool_name: session.tool_name,
        iterations: session.iterations,
        driver_count: session.driver_count,
        duration_ms: session.duration_ms,
        finished: session.finished,
        chunk_count: session.chunk_info.chunk_count,
        runs,
        failed_runs,
        drivers,
    }
}

async fn cmd_load(stores: &Stores, project: &str) -> Result<()> {
    let loaded = stores.load(project).await?;
    println!("{}", serde_json::to_string_pretty(&summarise(&loaded))?);
    Ok(())
}

async fn cmd_analyze(stores: &Stores, project: &str, output: Option<&Path>) -> Result<()> {
    let loaded = stores.load(project).await?;
    let report = process_analysis(&loaded, project, stores.files.as_ref()).await;
    let json = serde_json::to_string_pretty(&report)?;

    if let Some(path) = output {
        std::fs::write(path, &json).with_context(|| format!("Failed to write to {:?}", path))?;
        println!("Wrote report to {:?}", path);
    } else {
        println!("{}", json);
    }
    Ok(())
}

async fn cmd_export(stores: &Stores, project: &str, output_dir: &Path) -> Result<()> {
    let loaded = stores.load(project).await?;
    let statistic_file = AnalysisConfig::from_env().statistic_file;
    let archive = build_archive(&loaded, project, &statistic_file, stores.files.as_ref())
        .await
        .context("Failed to build archive")?;

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {:?}", output_dir))?;
    let path = output_dir.join(archive_file_name(
        project,
        loaded.session.tool_name,
        loaded.session.iterations,
    ));
    std::fs::write(&path, &archive).with_context(|| format!("Failed to write to {:?}", path))?;

    println!("Exported {} bytes to {:?}", archive.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use costuq_core::domain::{AnalysisSession, LsaDriverChunk, RunRecord, RunResult, SimulationError};

    fn ok(i: usize) -> RunRecord {
        RunRecord::succeeded(i, RunResult::new(format!("req{i}"), vec![]))
    }

    #[test]
    fn cli_parses_run_with_trailing_simulator_command() {
        let cli = Cli::try_parse_from([
            "costuq", "run", "-p", "shop", "-s", "scenario.json", "-t", "sobol", "-n", "50", "--",
            "python", "sim.py", "--fast",
        ])
        .unwrap();
        let Commands::Run {
            tool,
            iterations,
            simulator,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(tool, ToolName::SobolGsa);
        assert_eq!(iterations, 50);
        assert_eq!(simulator, vec!["python", "sim.py", "--fast"]);
    }

    #[test]
    fn cli_rejects_unknown_tool() {
        let parsed = Cli::try_parse_from([
            "costuq", "run", "-p", "shop", "-s", "s.json", "-t", "annealing", "--", "sim",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn summary_counts_failed_runs() {
        let loaded = LoadedAnalysis {
            session: AnalysisSession::new(ToolName::MonteCarlo, 3, vec![]),
            runs: LoadedRuns::Runs(vec![
                ok(0),
                RunRecord::failed(1, &SimulationError::Failed("x".into())),
                ok(2),
            ]),
        };
        let summary = summarise(&loaded);
        assert_eq!(summary.runs, 3);
        assert_eq!(summary.failed_runs, 1);
    }

    #[test]
    fn summary_lists_lsa_drivers() {
        let loaded = LoadedAnalysis {
            session: AnalysisSession::new(ToolName::LocalSa, 1, vec![]),
            runs: LoadedRuns::LocalSa {
                baseline: None,
                drivers: vec![LsaDriverChunk {
                    d: 0,
                    driver_name: "Energy".into(),
                    results: vec![ok(0)],
                    input_samples: vec![1.0],
                    base_mean: 1.0,
                }],
            },
        };
        let summary = summarise(&loaded);
        assert_eq!(summary.drivers, vec!["Energy"]);
        assert_eq!(summary.runs, 1);
    }

    #[tokio::test]
    async fn read_only_commands_leave_a_missing_store_alone() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let stores = Stores::open(Some(root.clone()));

        let err = stores.load("shop").await.unwrap_err();
        assert!(err.to_string().contains("No finished analysis"));
        assert!(!root.exists());

        Stores::create(Some(root.clone())).unwrap();
        assert!(root.join("chunks").is_dir());
        assert!(root.join("files").is_dir());
    }

    #[test]
    fn scenario_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        std::fs::write(
            &path,
            r#"{"name":"s","environmentImpactParameters":{"costDrivers":[],"variants":[{"frequency":"100"}]}}"#,
        )
        .unwrap();
        let scenario = read_scenario(&path).unwrap();
        assert_eq!(scenario.name, "s");
        assert!(read_scenario(&dir.path().join("missing.json")).is_err());
    }
}
