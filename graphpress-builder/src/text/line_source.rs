//! Buffered-line chunking over an arbitrary byte stream.
//!
//! Complete lines are pulled under one mutex and accumulated into a
//! chunk until the byte budget is reached, with a hard per-batch line
//! cap so a stream of tiny lines cannot buffer without bound.

use super::{ChunkBytes, TripleChunk, TripleSource};
use crate::error::Result;
use std::io::BufRead;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Tuning for [`LineTripleSource`].
#[derive(Debug, Clone)]
pub struct LineSourceConfig {
    /// Soft chunk byte budget; a chunk closes at the first line boundary
    /// past it.
    pub chunk_bytes: usize,
    /// Hard cap on lines per chunk.
    pub max_chunk_lines: usize,
    /// Extract graph labels (N-Quads).
    pub quads: bool,
}

impl Default for LineSourceConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: 16 * 1024 * 1024,
            max_chunk_lines: 500_000,
            quads: false,
        }
    }
}

struct ReaderState<R> {
    reader: R,
    exhausted: bool,
}

/// Chunked triple source over any `BufRead` stream (file, pipe, socket).
pub struct LineTripleSource<R: BufRead + Send> {
    state: Mutex<ReaderState<R>>,
    config: LineSourceConfig,
    positions: Arc<AtomicU64>,
}

impl<R: BufRead + Send> LineTripleSource<R> {
    pub fn new(reader: R, config: LineSourceConfig) -> Self {
        Self {
            state: Mutex::new(ReaderState {
                reader,
                exhausted: false,
            }),
            config,
            positions: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<R: BufRead + Send> TripleSource for LineTripleSource<R> {
    fn next_chunk(&self) -> Result<Option<TripleChunk>> {
        let mut state = self.state.lock().unwrap();
        if state.exhausted {
            return Ok(None);
        }

        let mut buf: Vec<u8> = Vec::with_capacity(self.config.chunk_bytes.min(1 << 20));
        let mut lines = 0usize;
        while buf.len() < self.config.chunk_bytes && lines < self.config.max_chunk_lines {
            let n = state.reader.read_until(b'\n', &mut buf)?;
            if n == 0 {
                state.exhausted = true;
                break;
            }
            lines += 1;
        }
        drop(state);

        if buf.is_empty() {
            return Ok(None);
        }
        tracing::debug!(lines, bytes = buf.len(), "line chunk pulled");
        Ok(Some(TripleChunk::new(
            ChunkBytes::Owned(buf),
            self.config.quads,
            Arc::clone(&self.positions),
        )))
    }

    fn quads(&self) -> bool {
        self.config.quads
    }

    fn record_count(&self) -> u64 {
        self.positions.load(Ordering::Acquire)
    }
}
