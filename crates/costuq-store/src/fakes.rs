//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryChunkStore` and `MemoryFileStore` that satisfy the trait
//! contracts without touching the filesystem.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryChunkStore
// ---------------------------------------------------------------------------

/// In-memory chunk store backed by `project -> (key -> data)`.
#[derive(Debug, Default)]
pub struct MemoryChunkStore {
    projects: Mutex<HashMap<String, BTreeMap<ChunkKey, serde_json::Value>>>,
    puts: Mutex<usize>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored for a project, sorted.
    pub fn keys(&self, project_name: &str) -> Vec<ChunkKey> {
        let projects = self.projects.lock().unwrap();
        projects
            .get(project_name)
            .map(|chunks| chunks.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of `put` calls served, including overwrites.
    pub fn put_count(&self) -> usize {
        *self.puts.lock().unwrap()
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn put(&self, chunk: Chunk) -> StorageResult<()> {
        let mut projects = self.projects.lock().unwrap();
        projects
            .entry(chunk.project_name)
            .or_default()
            .insert(chunk.key, chunk.data);
        *self.puts.lock().unwrap() += 1;
        Ok(())
    }

    async fn get(&self, project_name: &str, key: &ChunkKey) -> StorageResult<Option<Chunk>> {
        let projects = self.projects.lock().unwrap();
        Ok(projects
            .get(project_name)
            .and_then(|chunks| chunks.get(key))
            .map(|data| Chunk::new(project_name, key.clone(), data.clone())))
    }

    async fn query(&self, project_name: &str) -> StorageResult<Vec<Chunk>> {
        let projects = self.projects.lock().unwrap();
        Ok(projects
            .get(project_name)
            .map(|chunks| {
                chunks
                    .iter()
                    .map(|(key, data)| Chunk::new(project_name, key.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_where(&self, project_name: &str) -> StorageResult<usize> {
        let mut projects = self.projects.lock().unwrap();
        Ok(projects
            .remove(project_name)
            .map(|chunks| chunks.len())
            .unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// MemoryFileStore
// ---------------------------------------------------------------------------

/// In-memory result file store backed by `(project, path) -> bytes`.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous insert for test setup.
    pub fn insert(&self, project_name: &str, path: &str, data: impl Into<Vec<u8>>) {
        let mut files = self.files.lock().unwrap();
        files.insert((project_name.to_string(), path.to_string()), data.into());
    }

    /// Number of stored files across all projects.
    pub fn len(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn get_file(&self, project_name: &str, path: &str) -> StorageResult<FileData> {
        let bytes = self.fetch_file_blob(project_name, path).await?;
        Ok(FileData {
            data: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    async fn fetch_file_blob(&self, project_name: &str, path: &str) -> StorageResult<Vec<u8>> {
        let files = self.files.lock().unwrap();
        files
            .get(&(project_name.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::FileNotFound {
                project: project_name.to_string(),
                path: path.to_string(),
            })
    }

    async fn set_file(&self, project_name: &str, path: &str, data: &[u8]) -> StorageResult<()> {
        self.insert(project_name, path, data);
        Ok(())
    }
}
