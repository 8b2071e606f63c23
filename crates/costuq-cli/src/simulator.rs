//! Simulator backed by an external command, run once per iteration.
//!
//! Protocol: the sampled abstract drivers are written to the child's stdin as
//! JSON; `COSTUQ_ITERATION` and `COSTUQ_REQUEST_ID` are set in its
//! environment. On success the child prints
//! `{"files": [{"name": ..., "data": ...}], "message": ...}` to stdout.
//! Every file is stored as `<requestId>/<name>` in the project's file store.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use costuq_core::domain::{RunResult, SampledAbstractDriver, SimulationError};
use costuq_core::orchestration::{SimulationResult, Simulator, StateReports};
use costuq_store::{run_file_path, FileStore};

#[derive(Debug, Deserialize)]
struct OutputFile {
    name: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct SimulatorOutput {
    #[serde(default)]
    files: Vec<OutputFile>,
    #[serde(default)]
    message: Option<String>,
}

pub struct ProcessSimulator {
    program: String,
    args: Vec<String>,
    project: String,
    files: Arc<dyn FileStore>,
    reports: Arc<StateReports>,
}

impl ProcessSimulator {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        project: impl Into<String>,
        files: Arc<dyn FileStore>,
        reports: Arc<StateReports>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            project: project.into(),
            files,
            reports,
        }
    }

    async fn store_outputs(&self, request_id: &str, output: SimulatorOutput) -> SimulationResult {
        if output.files.is_empty() {
            debug!(request_id, "simulator produced no files");
            return Ok(None);
        }

        let mut names = Vec::with_capacity(output.files.len());
        for file in output.files {
            let path = run_file_path(Some(request_id), &file.name);
            self.files
                .set_file(&self.project, &path, file.data.as_bytes())
                .await
                .map_err(|e| SimulationError::Failed(format!("storing {path}: {e}")))?;
            names.push(file.name);
        }

        let mut result = RunResult::new(request_id, names);
        result.message = output.message;
        Ok(Some(result))
    }
}

#[async_trait]
impl Simulator for ProcessSimulator {
    async fn simulate(&self, drivers: Vec<SampledAbstractDriver>, iteration: usize) -> SimulationResult {
        if self.reports.is_cancelled() {
            return Err(SimulationError::Cancelled);
        }

        let request_id = Uuid::new_v4().to_string();
        let input = serde_json::to_vec(&drivers).map_err(|e| SimulationError::Failed(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("COSTUQ_ITERATION", iteration.to_string())
            .env("COSTUQ_REQUEST_ID", &request_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SimulationError::Failed(format!("spawning {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&input)
                .await
                .map_err(|e| SimulationError::Failed(format!("writing simulator input: {e}")))?;
        }

        // Dropping the pending wait kills the child.
        let output = tokio::select! {
            out = child.wait_with_output() => {
                out.map_err(|e| SimulationError::Failed(format!("waiting for simulator: {e}")))?
            }
            _ = self.reports.cancelled() => return Err(SimulationError::Cancelled),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SimulationError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let parsed: SimulatorOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| SimulationError::MalformedOutput(e.to_string()))?;
        self.store_outputs(&request_id, parsed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use costuq_store::fakes::MemoryFileStore;

    fn simulator(files: Arc<MemoryFileStore>) -> ProcessSimulator {
        ProcessSimulator::new("true", vec![], "shop", files, Arc::new(StateReports::new()))
    }

    #[tokio::test]
    async fn outputs_are_stored_under_request_id() {
        let files = Arc::new(MemoryFileStore::new());
        let sim = simulator(files.clone());
        let output: SimulatorOutput = serde_json::from_str(
            r#"{"files":[{"name":"a_statistic.xml","data":"<x/>"}],"message":"ok"}"#,
        )
        .unwrap();

        let result = sim.store_outputs("req-1", output).await.unwrap().unwrap();
        assert_eq!(result.request_id, "req-1");
        assert_eq!(result.files, vec!["a_statistic.xml".to_string()]);
        assert_eq!(result.message.as_deref(), Some("ok"));
        let stored = files.get_file("shop", "req-1/a_statistic.xml").await.unwrap();
        assert_eq!(stored.data, "<x/>");
    }

    #[tokio::test]
    async fn empty_output_records_nothing() {
        let sim = simulator(Arc::new(MemoryFileStore::new()));
        let output: SimulatorOutput = serde_json::from_str("{}").unwrap();
        assert!(sim.store_outputs("req-1", output).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancelled_reports_skip_the_process() {
        let reports = Arc::new(StateReports::new());
        reports.cancel();
        let sim = ProcessSimulator::new(
            "definitely-not-a-real-simulator",
            vec![],
            "shop",
            Arc::new(MemoryFileStore::new()),
            reports,
        );
        assert!(matches!(
            sim.simulate(vec![], 1).await,
            Err(SimulationError::Cancelled)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_json_stdout_is_malformed() {
        let sim = ProcessSimulator::new(
            "sh",
            vec!["-c".into(), "cat >/dev/null; echo not-json".into()],
            "shop",
            Arc::new(MemoryFileStore::new()),
            Arc::new(StateReports::new()),
        );
        assert!(matches!(
            sim.simulate(vec![], 1).await,
            Err(SimulationError::MalformedOutput(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_reported() {
        let sim = ProcessSimulator::new(
            "sh",
            vec!["-c".into(), "cat >/dev/null; echo boom >&2; exit 3".into()],
            "shop",
            Arc::new(MemoryFileStore::new()),
            Arc::new(StateReports::new()),
        );
        let err = sim.simulate(vec![], 1).await.unwrap_err();
        assert!(matches!(err, SimulationError::Failed(ref msg) if msg.contains("boom")));
    }
}
