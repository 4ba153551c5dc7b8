//! Chunked text sources for line-oriented triple/quad input.
//!
//! Both modes split the input into independently parseable line-oriented
//! chunks under a byte budget and yield lazily parsed records:
//!
//! - [`line_source::LineTripleSource`] pulls complete lines from an
//!   arbitrary byte stream under a mutex (file- or socket-backed);
//! - [`mmap_source::MmapTripleSource`] claims byte ranges of a
//!   memory-mapped file with a compare-and-swap cursor, so concurrent
//!   callers never overlap and never lock.
//!
//! Triple positions are 1-based and assigned from a counter shared by
//! every chunk of one source; they are dense and unique across the run.

pub mod line_source;
pub mod mmap_source;
pub mod ntriples;

use crate::error::Result;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One parsed triple/quad record with its assigned input position.
///
/// The byte buffers are reusable: [`TripleChunk::read_into`] clears and
/// refills them in place, so a caller-held record avoids per-record
/// allocation.
#[derive(Debug, Clone, Default)]
pub struct TripleRecord {
    pub position: u64,
    pub subject: Vec<u8>,
    pub predicate: Vec<u8>,
    pub object: Vec<u8>,
    /// Empty in triples mode or when the line carries no graph label.
    pub graph: Vec<u8>,
}

impl TripleRecord {
    pub fn has_graph(&self) -> bool {
        !self.graph.is_empty()
    }
}

/// True when `data[i]` is preceded by an odd run of backslashes, i.e.
/// the byte at `i` is part of an escape sequence.
#[inline]
pub(crate) fn escaped(data: &[u8], i: usize) -> bool {
    let mut backslashes = 0usize;
    let mut j = i;
    while j > 0 && data[j - 1] == b'\\' {
        backslashes += 1;
        j -= 1;
    }
    backslashes % 2 == 1
}

/// Backing bytes of one chunk: copied out of a stream, or a window of a
/// shared memory map.
enum ChunkBytes {
    Owned(Vec<u8>),
    Mapped(Arc<memmap2::Mmap>, Range<usize>),
}

impl ChunkBytes {
    #[inline]
    fn as_slice(&self) -> &[u8] {
        match self {
            ChunkBytes::Owned(buf) => buf,
            ChunkBytes::Mapped(map, range) => &map[range.clone()],
        }
    }
}

/// A batch of complete input lines, parsed lazily as records are pulled.
///
/// Comment lines and blank lines are skipped; malformed lines are logged
/// at `warn` and skipped without aborting the chunk.
pub struct TripleChunk {
    bytes: ChunkBytes,
    scan: usize,
    quads: bool,
    positions: Arc<AtomicU64>,
}

impl TripleChunk {
    fn new(bytes: ChunkBytes, quads: bool, positions: Arc<AtomicU64>) -> Self {
        Self {
            bytes,
            scan: 0,
            quads,
            positions,
        }
    }

    /// Byte length of this chunk (for downstream budget decisions only;
    /// not exact record accounting).
    pub fn byte_len(&self) -> usize {
        self.bytes.as_slice().len()
    }

    /// Range of the next line, advancing the scan cursor. `None` once the
    /// chunk is exhausted. Escaped terminators (odd run of preceding
    /// backslashes) do not end a line, matching the chunk-boundary rule.
    fn next_line_range(&mut self) -> Option<Range<usize>> {
        let data = self.bytes.as_slice();
        if self.scan >= data.len() {
            return None;
        }
        let start = self.scan;
        let mut end = data.len();
        let mut i = start;
        while i < data.len() {
            if data[i] == b'\n' && !escaped(data, i) {
                end = i;
                break;
            }
            i += 1;
        }
        self.scan = end + 1;
        Some(start..end)
    }

    /// Parse the next record into `rec`, reusing its buffers. Returns
    /// `false` when the chunk is exhausted.
    pub fn read_into(&mut self, rec: &mut TripleRecord) -> Result<bool> {
        while let Some(range) = self.next_line_range() {
            let quads = self.quads;
            let data = self.bytes.as_slice();
            match ntriples::parse_line(&data[range], quads) {
                Ok(Some(t)) => {
                    rec.position = self.positions.fetch_add(1, Ordering::Relaxed) + 1;
                    rec.subject.clear();
                    rec.subject.extend_from_slice(t.subject);
                    rec.predicate.clear();
                    rec.predicate.extend_from_slice(t.predicate);
                    rec.object.clear();
                    rec.object.extend_from_slice(t.object);
                    rec.graph.clear();
                    if let Some(g) = t.graph {
                        rec.graph.extend_from_slice(g);
                    }
                    return Ok(true);
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed input line");
                    continue;
                }
            }
        }
        Ok(false)
    }

    /// Allocate-and-return convenience over [`read_into`](Self::read_into).
    pub fn next_record(&mut self) -> Result<Option<TripleRecord>> {
        let mut rec = TripleRecord::default();
        if self.read_into(&mut rec)? {
            Ok(Some(rec))
        } else {
            Ok(None)
        }
    }
}

/// A source of lazily parsed triple/quad chunks. Implementations are
/// safe to pull from multiple worker threads.
pub trait TripleSource: Send + Sync {
    /// Claim the next chunk, or `None` when the input is exhausted.
    fn next_chunk(&self) -> Result<Option<TripleChunk>>;

    /// Whether graph labels are extracted.
    fn quads(&self) -> bool;

    /// Number of records handed out so far (the highest assigned
    /// position once the source is drained).
    fn record_count(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_of(text: &str, quads: bool) -> TripleChunk {
        TripleChunk::new(
            ChunkBytes::Owned(text.as_bytes().to_vec()),
            quads,
            Arc::new(AtomicU64::new(0)),
        )
    }

    #[test]
    fn test_chunk_yields_records_with_positions() {
        let mut chunk = chunk_of(
            "<http://a> <http://p> <http://b> .\n\
             # comment\n\
             \n\
             <http://c> <http://p> \"lit\" .\n",
            false,
        );
        let r1 = chunk.next_record().unwrap().unwrap();
        assert_eq!(r1.position, 1);
        assert_eq!(r1.subject, b"http://a");
        let r2 = chunk.next_record().unwrap().unwrap();
        assert_eq!(r2.position, 2);
        assert_eq!(r2.object, b"\"lit\"");
        assert!(chunk.next_record().unwrap().is_none());
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let mut chunk = chunk_of(
            "not a triple\n<http://a> <http://p> <http://b> .\n",
            false,
        );
        let r = chunk.next_record().unwrap().unwrap();
        assert_eq!(r.subject, b"http://a");
        assert_eq!(r.position, 1, "malformed line must not consume a position");
        assert!(chunk.next_record().unwrap().is_none());
    }

    #[test]
    fn test_read_into_reuses_buffers() {
        let mut chunk = chunk_of(
            "<http://a> <http://p> <http://b> .\n<http://c> <http://q> <http://d> .\n",
            false,
        );
        let mut rec = TripleRecord::default();
        assert!(chunk.read_into(&mut rec).unwrap());
        assert_eq!(rec.subject, b"http://a");
        assert!(chunk.read_into(&mut rec).unwrap());
        assert_eq!(rec.subject, b"http://c");
        assert_eq!(rec.predicate, b"http://q");
        assert!(!chunk.read_into(&mut rec).unwrap());
    }
}
