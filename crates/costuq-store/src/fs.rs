//! Filesystem-backed chunk and file stores.
//!
//! Chunk layout: `<root>/chunks/<hex(project)>/<hex(key)>.json`, one JSON
//! document per chunk holding the full [`Chunk`] so `query` can recover the
//! project name and key without decoding file names.
//!
//! File layout: `<root>/files/<project>/<requestId>/<fileName>`.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::storage_traits::*;

/// Write `data` to `path` atomically: temp file in the same directory, then rename.
fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let dir = path.parent().ok_or_else(|| StorageError::InvalidPath {
        path: path.display().to_string(),
    })?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

async fn write_atomic_blocking(path: PathBuf, data: Vec<u8>) -> StorageResult<()> {
    tokio::task::spawn_blocking(move || write_atomic(&path, &data))
        .await
        .map_err(|e| StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

fn not_found_is_none<T>(res: std::io::Result<T>) -> StorageResult<Option<T>> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::Io(e)),
    }
}

// ---------------------------------------------------------------------------
// FsChunkStore
// ---------------------------------------------------------------------------

/// Chunk store keeping one JSON file per chunk.
#[derive(Debug, Clone)]
pub struct FsChunkStore {
    chunks_dir: PathBuf,
}

impl FsChunkStore {
    /// Create a store rooted at `root`. Creates `root/chunks/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let store = Self::open(root);
        std::fs::create_dir_all(&store.chunks_dir)?;
        Ok(store)
    }

    /// Open a store rooted at `root` without touching the filesystem.
    /// Directories are created by the first write.
    pub fn open(root: impl AsRef<Path>) -> Self {
        Self {
            chunks_dir: root.as_ref().join("chunks"),
        }
    }

    fn project_dir(&self, project_name: &str) -> PathBuf {
        self.chunks_dir.join(hex::encode(project_name))
    }

    fn chunk_path(&self, project_name: &str, key: &ChunkKey) -> PathBuf {
        self.project_dir(project_name)
            .join(format!("{}.json", hex::encode(key.to_string())))
    }
}

#[async_trait]
impl ChunkStore for FsChunkStore {
    async fn put(&self, chunk: Chunk) -> StorageResult<()> {
        let path = self.chunk_path(&chunk.project_name, &chunk.key);
        let bytes = serde_json::to_vec(&chunk)?;
        write_atomic_blocking(path, bytes).await
    }

    async fn get(&self, project_name: &str, key: &ChunkKey) -> StorageResult<Option<Chunk>> {
        let path = self.chunk_path(project_name, key);
        match not_found_is_none(tokio::fs::read(&path).await)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn query(&self, project_name: &str) -> StorageResult<Vec<Chunk>> {
        let dir = self.project_dir(project_name);
        let Some(mut entries) = not_found_is_none(tokio::fs::read_dir(&dir).await)? else {
            return Ok(Vec::new());
        };

        let mut chunks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // A file can vanish between listing and reading while a project is rewritten.
            let Some(bytes) = not_found_is_none(tokio::fs::read(&path).await)? else {
                continue;
            };
            match serde_json::from_slice::<Chunk>(&bytes) {
                Ok(chunk) => chunks.push(chunk),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable chunk"),
            }
        }
        Ok(chunks)
    }

    async fn delete_where(&self, project_name: &str) -> StorageResult<usize> {
        let dir = self.project_dir(project_name);
        let Some(mut entries) = not_found_is_none(tokio::fs::read_dir(&dir).await)? else {
            return Ok(0);
        };
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if not_found_is_none(tokio::fs::remove_file(entry.path()).await)?.is_some() {
                removed += 1;
            }
        }
        debug!(project = %project_name, removed, "deleted project chunks");
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// FsFileStore
// ---------------------------------------------------------------------------

/// Result file store on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsFileStore {
    files_dir: PathBuf,
}

impl FsFileStore {
    /// Create a store rooted at `root`. Creates `root/files/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let store = Self::open(root);
        std::fs::create_dir_all(&store.files_dir)?;
        Ok(store)
    }

    /// Open a store rooted at `root` without touching the filesystem.
    pub fn open(root: impl AsRef<Path>) -> Self {
        Self {
            files_dir: root.as_ref().join("files"),
        }
    }

    fn file_path(&self, project_name: &str, path: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if path.is_empty() || escapes || project_name.contains(['/', '\\']) {
            return Err(StorageError::InvalidPath {
                path: format!("{project_name}/{path}"),
            });
        }
        Ok(self.files_dir.join(project_name).join(relative))
    }
}

#[async_trait]
impl FileStore for FsFileStore {
    async fn get_file(&self, project_name: &str, path: &str) -> StorageResult<FileData> {
        let bytes = self.fetch_file_blob(project_name, path).await?;
        Ok(FileData {
            data: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    async fn fetch_file_blob(&self, project_name: &str, path: &str) -> StorageResult<Vec<u8>> {
        let full = self.file_path(project_name, path)?;
        not_found_is_none(tokio::fs::read(&full).await)?.ok_or_else(|| {
            StorageError::FileNotFound {
                project: project_name.to_string(),
                path: path.to_string(),
            }
        })
    }

    async fn set_file(&self, project_name: &str, path: &str, data: &[u8]) -> StorageResult<()> {
        let full = self.file_path(project_name, path)?;
        write_atomic_blocking(full, data.to_vec()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, FsChunkStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsChunkStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn chunk_roundtrip() {
        let (_dir, store) = make_store();
        let chunk = Chunk::new("shop", ChunkKey::McChunk(0), serde_json::json!([{"a": 1}]));
        store.put(chunk.clone()).await.unwrap();
        let got = store.get("shop", &ChunkKey::McChunk(0)).await.unwrap();
        assert_eq!(got, Some(chunk));
    }

    #[tokio::test]
    async fn project_names_with_separators_stay_isolated() {
        let (_dir, store) = make_store();
        store
            .put(Chunk::new("a/b", ChunkKey::Baseline, serde_json::json!(1)))
            .await
            .unwrap();
        assert_eq!(store.query("a/b").await.unwrap().len(), 1);
        assert!(store.query("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_missing_project_is_empty() {
        let (_dir, store) = make_store();
        assert!(store.query("nothing").await.unwrap().is_empty());
        assert_eq!(store.delete_where("nothing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn opening_a_missing_root_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("absent");
        let chunks = FsChunkStore::open(&root);
        let files = FsFileStore::open(&root);

        assert!(chunks.query("shop").await.unwrap().is_empty());
        assert!(chunks.get("shop", &ChunkKey::AnalysisResults).await.unwrap().is_none());
        assert!(matches!(
            files.get_file("shop", "req1/out.xml").await.unwrap_err(),
            StorageError::FileNotFound { .. }
        ));
        assert!(!root.exists());

        chunks
            .put(Chunk::new("shop", ChunkKey::Baseline, serde_json::json!(1)))
            .await
            .unwrap();
        assert_eq!(chunks.query("shop").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let files = FsFileStore::new(dir.path()).unwrap();
        let err = files.set_file("shop", "../escape.xml", b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath { .. }));
    }

    #[tokio::test]
    async fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let files = FsFileStore::new(dir.path()).unwrap();
        files.set_file("shop", "req1/out.xml", b"<a/>").await.unwrap();
        let got = files.get_file("shop", "req1/out.xml").await.unwrap();
        assert_eq!(got.data, "<a/>");
        let missing = files.get_file("shop", "req2/out.xml").await.unwrap_err();
        assert!(matches!(missing, StorageError::FileNotFound { .. }));
    }
}
