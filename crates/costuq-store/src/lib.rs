//! costuq-store: persistence layer for costuq analyses
//!
//! Large analysis result sets are persisted as independently keyed chunks in
//! a project-scoped store so they can be rebuilt piecewise, and simulator
//! output files are kept next to them addressed by `requestId/fileName`.
//!
//! ## Key Components
//!
//! - `ChunkStore`: project-scoped key/value store for result chunks
//! - `ChunkKey`: typed chunk key with a stable string format
//! - `FileStore`: raw result files written by the simulator
//! - `fakes`: in-memory implementations for tests
//! - `fs`: filesystem implementations

mod error;
pub mod fakes;
pub mod fs;
pub mod storage_traits;

pub use error::StorageError;
pub use fs::{FsChunkStore, FsFileStore};
pub use storage_traits::{
    run_file_path, Chunk, ChunkKey, ChunkStore, FileData, FileStore, StorageResult,
};
