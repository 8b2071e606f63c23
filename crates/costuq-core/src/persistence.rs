//! Chunked persistence of analysis results and load-time reconstruction.
//!
//! Writers go through [`ChunkPersistence::save_chunk`], which logs and
//! swallows failures so one bad chunk never stops an analysis. Readers use
//! [`ChunkPersistence::load_large_analysis`], which treats missing chunks as
//! "not yet available".

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use costuq_store::{Chunk, ChunkKey, ChunkStore};

use crate::domain::{
    flatten, AnalysisSession, LsaBaselineChunk, LsaDriverChunk, Result, RunRecord,
    SobolDriverChunk, ToolName,
};
use crate::obs;

/// Runs recovered for one analysis, shaped by tool.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedRuns {
    /// Monte Carlo or deterministic runs, concatenated in chunk order.
    Runs(Vec<RunRecord>),
    LocalSa {
        baseline: Option<LsaBaselineChunk>,
        /// Sorted by driver name.
        drivers: Vec<LsaDriverChunk>,
    },
    Sobol {
        a_matrix: Vec<RunRecord>,
        b_matrix: Vec<RunRecord>,
        /// In recorded driver order.
        drivers: Vec<SobolDriverChunk>,
    },
}

/// A persisted analysis: session metadata plus its runs.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedAnalysis {
    pub session: AnalysisSession,
    pub runs: LoadedRuns,
}

/// Project-scoped chunk persistence over any [`ChunkStore`].
#[derive(Clone)]
pub struct ChunkPersistence {
    store: Arc<dyn ChunkStore>,
}

impl ChunkPersistence {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }

    /// Serialize and upsert one chunk.
    pub async fn try_save_chunk<T: Serialize + ?Sized>(
        &self,
        project: &str,
        key: ChunkKey,
        data: &T,
    ) -> Result<()> {
        let value = serde_json::to_value(data)?;
        self.store.put(Chunk::new(project, key, value)).await?;
        Ok(())
    }

    /// Like [`try_save_chunk`](Self::try_save_chunk), but a failure is logged
    /// and reported as `false`.
    pub async fn save_chunk<T: Serialize + ?Sized>(
        &self,
        project: &str,
        key: ChunkKey,
        data: &T,
    ) -> bool {
        let label = key.to_string();
        match self.try_save_chunk(project, key, data).await {
            Ok(()) => {
                debug!(project, key = %label, "chunk saved");
                true
            }
            Err(e) => {
                error!(project, key = %label, error = %e, "failed to save chunk");
                false
            }
        }
    }

    /// Remove every chunk of `project`. Failures are logged; returns the
    /// number of removed chunks.
    pub async fn delete_all_chunks(&self, project: &str) -> usize {
        match self.store.delete_where(project).await {
            Ok(removed) => {
                info!(project, removed, "deleted project chunks");
                removed
            }
            Err(e) => {
                error!(project, error = %e, "failed to delete project chunks");
                0
            }
        }
    }

    pub async fn load_all(&self, project: &str) -> Result<Vec<Chunk>> {
        Ok(self.store.query(project).await?)
    }

    /// Rebuild the last finished analysis of `project`.
    ///
    /// Returns `None` when no `analysisResults` chunk exists. Chunks are
    /// fetched once; driver chunks are looked up by the drivers recorded in
    /// the session.
    pub async fn load_large_analysis(&self, project: &str) -> Result<Option<LoadedAnalysis>> {
        let chunks: HashMap<ChunkKey, serde_json::Value> = self
            .load_all(project)
            .await?
            .into_iter()
            .map(|c| (c.key, c.data))
            .collect();

        let Some(session) = decode::<AnalysisSession>(&chunks, &ChunkKey::AnalysisResults) else {
            debug!(project, "no analysis results stored");
            return Ok(None);
        };

        let runs = match session.tool_name {
            ToolName::MonteCarlo => LoadedRuns::Runs(concat_chunks(&chunks, &session, ChunkKey::McChunk)),
            ToolName::Deterministic => LoadedRuns::Runs(concat_chunks(&chunks, &session, ChunkKey::DetChunk)),
            ToolName::LocalSa => {
                let baseline = decode::<LsaBaselineChunk>(&chunks, &ChunkKey::Baseline);
                let mut drivers: Vec<LsaDriverChunk> = driver_names(&chunks, &session)
                    .iter()
                    .filter_map(|name| decode(&chunks, &ChunkKey::driver(name.as_str())))
                    .collect();
                drivers.sort_by(|a, b| a.driver_name.cmp(&b.driver_name));
                LoadedRuns::LocalSa { baseline, drivers }
            }
            ToolName::SobolGsa => LoadedRuns::Sobol {
                a_matrix: decode(&chunks, &ChunkKey::AMatrix).unwrap_or_default(),
                b_matrix: decode(&chunks, &ChunkKey::BMatrix).unwrap_or_default(),
                drivers: driver_names(&chunks, &session)
                    .iter()
                    .filter_map(|name| decode(&chunks, &ChunkKey::driver(name.as_str())))
                    .collect(),
            },
        };

        info!(project, tool = %session.tool_name, "analysis loaded");
        Ok(Some(LoadedAnalysis { session, runs }))
    }
}

/// Save a run batch and emit the chunk event.
pub(crate) async fn save_runs<T: Serialize + ?Sized>(
    persistence: &ChunkPersistence,
    project: &str,
    key: ChunkKey,
    data: &T,
    runs: usize,
) -> bool {
    let label = key.to_string();
    let saved = persistence.save_chunk(project, key, data).await;
    if saved {
        obs::emit_chunk_saved(project, &label, runs);
    }
    saved
}

fn decode<T: DeserializeOwned>(chunks: &HashMap<ChunkKey, serde_json::Value>, key: &ChunkKey) -> Option<T> {
    let Some(value) = chunks.get(key) else {
        debug!(key = %key, "chunk not yet available");
        return None;
    };
    match serde_json::from_value(value.clone()) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(key = %key, error = %e, "skipping undecodable chunk");
            None
        }
    }
}

fn concat_chunks(
    chunks: &HashMap<ChunkKey, serde_json::Value>,
    session: &AnalysisSession,
    key: fn(usize) -> ChunkKey,
) -> Vec<RunRecord> {
    let count = session.chunk_info.chunk_count.unwrap_or(0);
    (0..count)
        .filter_map(|i| decode::<Vec<RunRecord>>(chunks, &key(i)))
        .flatten()
        .collect()
}

/// Driver names recorded in the session, deduplicated in order. Sessions
/// written without a driver structure fall back to the stored driver keys.
fn driver_names(chunks: &HashMap<ChunkKey, serde_json::Value>, session: &AnalysisSession) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for driver in flatten(&session.drivers_structure) {
        if !names.contains(&driver.name) {
            names.push(driver.name);
        }
    }
    if names.is_empty() {
        names = chunks
            .keys()
            .filter_map(|k| match k {
                ChunkKey::Driver(name) => Some(name.clone()),
                _ => None,
            })
            .collect();
        names.sort();
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AbstractCostDriver, ChunkInfo, CostDriver, Distribution, RunResult};
    use costuq_store::fakes::MemoryChunkStore;
    use serde_json::json;

    fn record(i: usize) -> RunRecord {
        RunRecord::succeeded(i, RunResult::new(format!("req{i}"), vec![]))
    }

    fn structure(names: &[&str]) -> Vec<AbstractCostDriver> {
        vec![AbstractCostDriver {
            id: "cat".into(),
            name: None,
            concrete_cost_drivers: names
                .iter()
                .map(|n| CostDriver::new(*n, *n, "cat", Distribution::Deterministic { mean: 1.0 }))
                .collect(),
        }]
    }

    #[tokio::test]
    async fn missing_session_loads_nothing() {
        let p = ChunkPersistence::new(Arc::new(MemoryChunkStore::new()));
        p.save_chunk("shop", ChunkKey::McChunk(0), &vec![record(0)]).await;
        assert!(p.load_large_analysis("shop").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mc_chunks_concatenate_in_order() {
        let p = ChunkPersistence::new(Arc::new(MemoryChunkStore::new()));
        p.save_chunk("shop", ChunkKey::McChunk(1), &vec![record(2), record(3)]).await;
        p.save_chunk("shop", ChunkKey::McChunk(0), &vec![record(0), record(1)]).await;
        let mut session = AnalysisSession::new(ToolName::MonteCarlo, 4, vec![]);
        session.chunk_info = ChunkInfo::chunked(2);
        p.save_chunk("shop", ChunkKey::AnalysisResults, &session).await;

        let loaded = p.load_large_analysis("shop").await.unwrap().unwrap();
        let LoadedRuns::Runs(runs) = loaded.runs else {
            panic!("expected plain runs");
        };
        let ids: Vec<_> = runs.iter().map(|r| r.request_id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["req0", "req1", "req2", "req3"]);
    }

    #[tokio::test]
    async fn missing_chunks_are_skipped() {
        let p = ChunkPersistence::new(Arc::new(MemoryChunkStore::new()));
        p.save_chunk("shop", ChunkKey::McChunk(0), &vec![record(0)]).await;
        let mut session = AnalysisSession::new(ToolName::MonteCarlo, 2000, vec![]);
        session.chunk_info = ChunkInfo::chunked(2);
        p.save_chunk("shop", ChunkKey::AnalysisResults, &session).await;

        let loaded = p.load_large_analysis("shop").await.unwrap().unwrap();
        assert_eq!(loaded.runs, LoadedRuns::Runs(vec![record(0)]));
    }

    #[tokio::test]
    async fn lsa_drivers_are_looked_up_by_session_and_sorted() {
        let store = Arc::new(MemoryChunkStore::new());
        let p = ChunkPersistence::new(store.clone());
        for (d, name) in ["Water", "Energy"].iter().enumerate() {
            let chunk = LsaDriverChunk {
                d,
                driver_name: name.to_string(),
                results: vec![record(0)],
                input_samples: vec![1.0],
                base_mean: 1.0,
            };
            p.save_chunk("shop", ChunkKey::driver(*name), &chunk).await;
        }
        // Not part of the recorded drivers: must be ignored.
        p.save_chunk("shop", ChunkKey::driver("Stale"), &json!({"d": 9})).await;
        let session = AnalysisSession::new(ToolName::LocalSa, 1, structure(&["Water", "Energy"]));
        p.save_chunk("shop", ChunkKey::AnalysisResults, &session).await;

        let loaded = p.load_large_analysis("shop").await.unwrap().unwrap();
        let LoadedRuns::LocalSa { baseline, drivers } = loaded.runs else {
            panic!("expected LSA runs");
        };
        assert!(baseline.is_none());
        let names: Vec<_> = drivers.iter().map(|d| d.driver_name.as_str()).collect();
        assert_eq!(names, vec!["Energy", "Water"]);
    }

    #[tokio::test]
    async fn delete_all_chunks_counts_removed() {
        let p = ChunkPersistence::new(Arc::new(MemoryChunkStore::new()));
        p.save_chunk("shop", ChunkKey::AMatrix, &vec![record(0)]).await;
        p.save_chunk("shop", ChunkKey::BMatrix, &vec![record(0)]).await;
        assert_eq!(p.delete_all_chunks("shop").await, 2);
        assert!(p.load_all("shop").await.unwrap().is_empty());
    }
}
