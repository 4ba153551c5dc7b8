//! Memory-mapped pull parsing with lock-free chunk claims.
//!
//! Chunk boundaries are found by probing one step ahead and scanning
//! forward for the next *unescaped* line terminator (a `\n` preceded by
//! an odd run of backslashes is part of an escape sequence and is
//! skipped). The claimant then publishes `[start, end)` with a single
//! compare-and-swap on the shared cursor; a lost race simply retries
//! from the new cursor, so concurrent callers never receive overlapping
//! ranges.

use super::{escaped, ChunkBytes, TripleChunk, TripleSource};
use crate::error::Result;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Tuning for [`MmapTripleSource`].
#[derive(Debug, Clone)]
pub struct MmapSourceConfig {
    /// Probe distance: the claimed range ends at the first unescaped
    /// newline at or after `start + step_bytes`.
    pub step_bytes: usize,
    /// Extract graph labels (N-Quads).
    pub quads: bool,
}

impl Default for MmapSourceConfig {
    fn default() -> Self {
        Self {
            step_bytes: 16 * 1024 * 1024,
            quads: false,
        }
    }
}

/// Chunked triple source over a memory-mapped file.
pub struct MmapTripleSource {
    map: Arc<memmap2::Mmap>,
    cursor: AtomicUsize,
    config: MmapSourceConfig,
    positions: Arc<AtomicU64>,
}

impl MmapTripleSource {
    pub fn open(path: &Path, config: MmapSourceConfig) -> Result<Self> {
        let file = File::open(path)?;
        let map = unsafe { memmap2::Mmap::map(&file)? };
        tracing::debug!(
            path = %path.display(),
            bytes = map.len(),
            step = config.step_bytes,
            "memory-mapped input"
        );
        Ok(Self {
            map: Arc::new(map),
            cursor: AtomicUsize::new(0),
            config,
            positions: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Index one past the next unescaped `\n` at or after `from`, or the
    /// end of the map when there is none.
    fn boundary_after(&self, from: usize) -> usize {
        let data = &self.map[..];
        let mut i = from;
        while i < data.len() {
            if data[i] == b'\n' && !escaped(data, i) {
                return i + 1;
            }
            i += 1;
        }
        data.len()
    }
}

impl TripleSource for MmapTripleSource {
    fn next_chunk(&self) -> Result<Option<TripleChunk>> {
        loop {
            let start = self.cursor.load(Ordering::Acquire);
            if start >= self.map.len() {
                return Ok(None);
            }
            let probe = start.saturating_add(self.config.step_bytes);
            let end = if probe >= self.map.len() {
                self.map.len()
            } else {
                self.boundary_after(probe)
            };
            if self
                .cursor
                .compare_exchange(start, end, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(Some(TripleChunk::new(
                    ChunkBytes::Mapped(Arc::clone(&self.map), start..end),
                    self.config.quads,
                    Arc::clone(&self.positions),
                )));
            }
            // Lost the race; another claimant advanced the cursor.
        }
    }

    fn quads(&self) -> bool {
        self.config.quads
    }

    fn record_count(&self) -> u64 {
        self.positions.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("graphpress_mmap_source_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[test]
    fn test_chunks_cover_file_without_overlap() {
        let line = "<http://a> <http://p> <http://b> .\n";
        let text = line.repeat(50);
        let path = write_temp("cover.nt", text.as_bytes());

        let src = MmapTripleSource::open(
            &path,
            MmapSourceConfig {
                step_bytes: line.len() * 7,
                quads: false,
            },
        )
        .unwrap();

        let mut total_bytes = 0;
        let mut records = 0;
        while let Some(mut chunk) = src.next_chunk().unwrap() {
            total_bytes += chunk.byte_len();
            while let Some(_rec) = chunk.next_record().unwrap() {
                records += 1;
            }
        }
        assert_eq!(total_bytes, text.len());
        assert_eq!(records, 50);
        assert_eq!(src.record_count(), 50);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_concurrent_claims_are_disjoint() {
        let line = "<http://s> <http://p> <http://o> .\n";
        let text = line.repeat(200);
        let path = write_temp("concurrent.nt", text.as_bytes());

        let src = MmapTripleSource::open(
            &path,
            MmapSourceConfig {
                step_bytes: line.len() * 5,
                quads: false,
            },
        )
        .unwrap();

        let positions = std::thread::scope(|s| {
            let mut handles = Vec::new();
            for _ in 0..4 {
                let src = &src;
                handles.push(s.spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(mut chunk) = src.next_chunk().unwrap() {
                        while let Some(rec) = chunk.next_record().unwrap() {
                            seen.push(rec.position);
                        }
                    }
                    seen
                }));
            }
            let mut all: Vec<u64> = handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect();
            all.sort_unstable();
            all
        });

        // Dense, unique 1..=200 across all claimants.
        assert_eq!(positions, (1..=200).collect::<Vec<u64>>());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_escaped_newline_not_a_boundary() {
        // A literal with an escaped backslash-n sequence: the probe lands
        // inside the literal and must skip the escaped terminator.
        let first = "<http://a> <http://p> \"line one\\\nstill line one\" .\n";
        let second = "<http://b> <http://p> <http://c> .\n";
        let text = format!("{first}{second}");
        let path = write_temp("escaped.nt", text.as_bytes());

        let src = MmapTripleSource::open(
            &path,
            MmapSourceConfig {
                step_bytes: 30, // probe lands before the escaped newline
                quads: false,
            },
        )
        .unwrap();

        let first_chunk = src.next_chunk().unwrap().unwrap();
        // The chunk boundary must be the unescaped newline ending the
        // first statement, not the escaped one inside the literal.
        assert_eq!(first_chunk.byte_len(), first.len());

        std::fs::remove_file(&path).ok();
    }
}
