//! Spilled-chunk handles and the scratch directory that owns their files.
//!
//! A [`ChunkHandle`] is an exclusive handle to one sorted run on disk:
//! it is moved into the merge forest, moved out to a merge worker, and
//! never aliased. Abort paths hand every live handle back to
//! [`ScratchDir::remove_chunk`]; the scratch directory itself is removed
//! at the end of the run (success or failure).

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// An exclusively owned, spilled sorted run.
#[derive(Debug)]
pub struct ChunkHandle {
    path: PathBuf,
    /// Merge-tree height: leaf chunks are 1; merging chunks of maximum
    /// height `h` produces `h + 1`.
    height: u32,
    records: u64,
}

impl ChunkHandle {
    pub fn new(path: PathBuf, height: u32, records: u64) -> Self {
        Self {
            path,
            height,
            records,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn records(&self) -> u64 {
        self.records
    }
}

/// Per-run scratch directory that names and cleans up chunk files.
#[derive(Debug)]
pub struct ScratchDir {
    dir: PathBuf,
    next_id: AtomicU64,
}

impl ScratchDir {
    /// Create (or reuse) `dir` as the scratch area for one build run.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            next_id: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Allocate a fresh chunk file path with the given name tag.
    pub fn next_chunk_path(&self, tag: &str) -> PathBuf {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!("{tag}_{id:05}.gpc"))
    }

    /// Allocate a fresh non-chunk scratch file path.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Delete a chunk's file (and range sidecar, if any). Consumes the
    /// handle; deletion failures are logged, not fatal.
    pub fn remove_chunk(&self, chunk: ChunkHandle) {
        if let Err(e) = std::fs::remove_file(&chunk.path) {
            tracing::warn!(path = %chunk.path.display(), %e, "failed to remove chunk file");
        }
        let range = range_sidecar_path(&chunk.path);
        if range.exists() {
            let _ = std::fs::remove_file(&range);
        }
    }

    /// Remove the whole scratch directory. Best-effort.
    pub fn cleanup(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), %e, "failed to clean up scratch dir");
        }
    }
}

/// Path of the optional key-range sidecar for a chunk data file.
pub fn range_sidecar_path(data_path: &Path) -> PathBuf {
    let mut os = data_path.as_os_str().to_os_string();
    os.push(".range");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_paths_unique() {
        let dir = std::env::temp_dir().join("graphpress_scratch_test_paths");
        let _ = std::fs::remove_dir_all(&dir);
        let scratch = ScratchDir::create(&dir).unwrap();
        let a = scratch.next_chunk_path("subject");
        let b = scratch.next_chunk_path("subject");
        assert_ne!(a, b);
        scratch.cleanup();
        assert!(!dir.exists());
    }

    #[test]
    fn test_remove_chunk_deletes_sidecar() {
        let dir = std::env::temp_dir().join("graphpress_scratch_test_sidecar");
        let _ = std::fs::remove_dir_all(&dir);
        let scratch = ScratchDir::create(&dir).unwrap();
        let path = scratch.next_chunk_path("object");
        std::fs::write(&path, b"data").unwrap();
        std::fs::write(range_sidecar_path(&path), b"range").unwrap();

        scratch.remove_chunk(ChunkHandle::new(path.clone(), 1, 4));
        assert!(!path.exists());
        assert!(!range_sidecar_path(&path).exists());
        scratch.cleanup();
    }
}
