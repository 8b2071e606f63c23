//! Storage trait definitions for costuq
//!
//! These traits define the two persistence collaborators of an analysis:
//! - `ChunkStore`: project-scoped key/value store for result chunks
//! - `FileStore`: raw simulator output files addressed by `requestId/fileName`
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module, filesystem backends via `fs`.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ChunkKey: typed chunk key constructor
// ---------------------------------------------------------------------------

/// Key of a chunk within a project.
///
/// The string form (`Display` / `FromStr`) is the persisted format and must
/// stay stable: `analysisResults`, `baseline`, `aMatrix`, `bMatrix`,
/// `driver_<name>`, `mc_chunk_<i>`, `det_chunk_<i>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChunkKey {
    /// Session metadata of the last finished analysis
    AnalysisResults,
    /// LSA baseline run
    Baseline,
    /// Sobol A matrix runs
    AMatrix,
    /// Sobol B matrix runs
    BMatrix,
    /// Per-driver runs (LSA variation or Sobol C matrix)
    Driver(String),
    /// Monte Carlo run chunk
    McChunk(usize),
    /// Deterministic run chunk
    DetChunk(usize),
}

impl ChunkKey {
    pub fn driver(name: impl Into<String>) -> Self {
        ChunkKey::Driver(name.into())
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkKey::AnalysisResults => f.write_str("analysisResults"),
            ChunkKey::Baseline => f.write_str("baseline"),
            ChunkKey::AMatrix => f.write_str("aMatrix"),
            ChunkKey::BMatrix => f.write_str("bMatrix"),
            ChunkKey::Driver(name) => write!(f, "driver_{name}"),
            ChunkKey::McChunk(i) => write!(f, "mc_chunk_{i}"),
            ChunkKey::DetChunk(i) => write!(f, "det_chunk_{i}"),
        }
    }
}

impl FromStr for ChunkKey {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || StorageError::InvalidKey { key: s.to_string() };
        match s {
            "analysisResults" => return Ok(ChunkKey::AnalysisResults),
            "baseline" => return Ok(ChunkKey::Baseline),
            "aMatrix" => return Ok(ChunkKey::AMatrix),
            "bMatrix" => return Ok(ChunkKey::BMatrix),
            _ => {}
        }
        if let Some(index) = s.strip_prefix("mc_chunk_") {
            return index.parse().map(ChunkKey::McChunk).map_err(|_| invalid());
        }
        if let Some(index) = s.strip_prefix("det_chunk_") {
            return index.parse().map(ChunkKey::DetChunk).map_err(|_| invalid());
        }
        match s.strip_prefix("driver_") {
            Some(name) if !name.is_empty() => Ok(ChunkKey::Driver(name.to_string())),
            _ => Err(invalid()),
        }
    }
}

impl Serialize for ChunkKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChunkKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// ChunkStore: project-scoped chunk persistence
// ---------------------------------------------------------------------------

/// One independently persisted unit of an analysis result set.
///
/// A chunk never references another chunk except by its key string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub project_name: String,
    pub key: ChunkKey,
    pub data: serde_json::Value,
}

impl Chunk {
    pub fn new(project_name: impl Into<String>, key: ChunkKey, data: serde_json::Value) -> Self {
        Self {
            project_name: project_name.into(),
            key,
            data,
        }
    }
}

/// Project-scoped chunk store.
///
/// Guarantees:
/// - `put` is an idempotent upsert keyed by `(project_name, key)`.
/// - `query` returns every chunk of a project (order unspecified).
/// - `delete_where` removes every chunk of a project and nothing else.
/// - No transactional guarantee spans several keys.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Insert or replace a chunk.
    async fn put(&self, chunk: Chunk) -> StorageResult<()>;

    /// Fetch one chunk, `None` if absent.
    async fn get(&self, project_name: &str, key: &ChunkKey) -> StorageResult<Option<Chunk>>;

    /// Fetch all chunks of a project.
    async fn query(&self, project_name: &str) -> StorageResult<Vec<Chunk>>;

    /// Delete all chunks of a project, returning how many were removed.
    async fn delete_where(&self, project_name: &str) -> StorageResult<usize>;
}

// ---------------------------------------------------------------------------
// FileStore: simulator output files
// ---------------------------------------------------------------------------

/// Text content of a stored result file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    pub data: String,
}

/// Store for raw simulator output files.
///
/// Paths are `<requestId>/<fileName>` as recorded in run results.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Read a file as text. Returns `StorageError::FileNotFound` if absent.
    async fn get_file(&self, project_name: &str, path: &str) -> StorageResult<FileData>;

    /// Read a file as raw bytes.
    async fn fetch_file_blob(&self, project_name: &str, path: &str) -> StorageResult<Vec<u8>>;

    /// Write a file, replacing any previous content.
    async fn set_file(&self, project_name: &str, path: &str, data: &[u8]) -> StorageResult<()>;
}

/// Join an optional request id and a file name into a store path.
pub fn run_file_path(request_id: Option<&str>, file_name: &str) -> String {
    match request_id {
        Some(id) if !id.is_empty() => format!("{id}/{file_name}"),
        _ => file_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_key_display_matches_persisted_format() {
        assert_eq!(ChunkKey::AnalysisResults.to_string(), "analysisResults");
        assert_eq!(ChunkKey::AMatrix.to_string(), "aMatrix");
        assert_eq!(ChunkKey::driver("Energy").to_string(), "driver_Energy");
        assert_eq!(ChunkKey::McChunk(3).to_string(), "mc_chunk_3");
        assert_eq!(ChunkKey::DetChunk(0).to_string(), "det_chunk_0");
    }

    #[test]
    fn chunk_key_parses_every_format() {
        for key in [
            ChunkKey::AnalysisResults,
            ChunkKey::Baseline,
            ChunkKey::AMatrix,
            ChunkKey::BMatrix,
            ChunkKey::driver("Packaging_material"),
            ChunkKey::McChunk(12),
            ChunkKey::DetChunk(0),
        ] {
            let parsed: ChunkKey = key.to_string().parse().unwrap();
            assert_eq!(parsed, key);
        }
    }

    #[test]
    fn driver_names_with_underscores_keep_their_suffix() {
        let parsed: ChunkKey = "driver_mc_chunk_1".parse().unwrap();
        assert_eq!(parsed, ChunkKey::driver("mc_chunk_1"));
    }

    #[test]
    fn chunk_key_rejects_garbage() {
        assert!("mc_chunk_x".parse::<ChunkKey>().is_err());
        assert!("driver_".parse::<ChunkKey>().is_err());
        assert!("results".parse::<ChunkKey>().is_err());
    }

    #[test]
    fn chunk_serializes_key_as_string() {
        let chunk = Chunk::new("shop", ChunkKey::McChunk(0), serde_json::json!([]));
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["key"], "mc_chunk_0");
        assert_eq!(json["projectName"], "shop");
    }

    #[test]
    fn run_file_path_joins_request_id() {
        assert_eq!(run_file_path(Some("req1"), "a.xml"), "req1/a.xml");
        assert_eq!(run_file_path(None, "a.xml"), "a.xml");
        assert_eq!(run_file_path(Some(""), "a.xml"), "a.xml");
    }
}
