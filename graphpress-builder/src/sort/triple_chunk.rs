//! Varint triple-ID chunk files.
//!
//! ```text
//! flags:   1 byte (bit 0 = tuples carry a graph component)
//! segment: (s, p, o[, g]) varint tuples in ascending sort-key order,
//!          all-zero terminator tuple, CRC32 trailer
//! ```
//!
//! A sidecar `<file>.range` stores the first and last tuple with the
//! same varint encoding, for key-range skipping.

use super::chunk::range_sidecar_path;
use super::format::{ChunkFormat, ChunkWriter, MergeSource};
use crate::error::{BuildError, Result};
use graphpress_core::{varint, CrcReader, CrcWriter, TripleId, TripleOrder};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Flag bit: tuples include a graph component.
pub const FLAG_HAS_GRAPH: u8 = 1 << 0;

// ============================================================================
// Writer
// ============================================================================

/// Streaming triple chunk writer. Tuples must be pushed in ascending
/// sort-key order and must not be all-zero (that is the terminator).
pub struct TripleChunkWriter {
    out: CrcWriter<File>,
    path: std::path::PathBuf,
    has_graph: bool,
    count: u64,
    first: Option<TripleId>,
    last: TripleId,
}

impl TripleChunkWriter {
    pub fn create(path: &Path, has_graph: bool) -> Result<Self> {
        let mut file = File::create(path)?;
        let flags = if has_graph { FLAG_HAS_GRAPH } else { 0 };
        file.write_all(&[flags])?;
        Ok(Self {
            out: CrcWriter::new(file),
            path: path.to_path_buf(),
            has_graph,
            count: 0,
            first: None,
            last: TripleId::default(),
        })
    }

    fn write_tuple(&mut self, t: &TripleId) -> Result<()> {
        varint::write_u64(&mut self.out, t.s)?;
        varint::write_u64(&mut self.out, t.p)?;
        varint::write_u64(&mut self.out, t.o)?;
        if self.has_graph {
            varint::write_u64(&mut self.out, t.g)?;
        }
        Ok(())
    }
}

impl ChunkWriter for TripleChunkWriter {
    type Item = TripleId;

    fn push(&mut self, item: &TripleId) -> Result<()> {
        if item.is_zero() {
            return Err(BuildError::malformed(
                "all-zero tuple is reserved as the stream terminator",
            ));
        }
        self.write_tuple(item)?;
        if self.first.is_none() {
            self.first = Some(*item);
        }
        self.last = *item;
        self.count += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<u64> {
        let terminator = TripleId::default();
        self.write_tuple(&terminator)?;
        self.out.write_crc()?;
        let file = self.out.finish()?;
        drop(file);
        if let Some(first) = self.first {
            write_range_sidecar(&self.path, &first, &self.last, self.has_graph)?;
        }
        Ok(self.count)
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Streaming triple chunk reader.
pub struct TripleChunkReader {
    crc: CrcReader<File>,
    has_graph: bool,
    current: Option<TripleId>,
    finished: bool,
    context: String,
}

impl TripleChunkReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut flags = [0u8; 1];
        file.read_exact(&mut flags)?;
        if flags[0] & !FLAG_HAS_GRAPH != 0 {
            return Err(BuildError::malformed(format!(
                "triple chunk {}: unknown flag bits {:#04x}",
                path.display(),
                flags[0]
            )));
        }
        let mut reader = Self {
            crc: CrcReader::new(file),
            has_graph: flags[0] & FLAG_HAS_GRAPH != 0,
            current: None,
            finished: false,
            context: path.display().to_string(),
        };
        reader.advance()?;
        Ok(reader)
    }

    pub fn has_graph(&self) -> bool {
        self.has_graph
    }

    /// Read the next tuple by value.
    pub fn next_tuple(&mut self) -> Result<Option<TripleId>> {
        let tuple = self.current;
        if tuple.is_some() {
            self.advance()?;
        }
        Ok(tuple)
    }

    fn read_varint(&mut self) -> Result<u64> {
        varint::read_u64(&mut self.crc).map_err(|e| BuildError::from_codec(&self.context, e))
    }
}

impl MergeSource for TripleChunkReader {
    type Item = TripleId;

    fn peek(&self) -> Option<&TripleId> {
        self.current.as_ref()
    }

    fn advance(&mut self) -> Result<()> {
        if self.finished {
            self.current = None;
            return Ok(());
        }
        let s = self.read_varint()?;
        let p = self.read_varint()?;
        let o = self.read_varint()?;
        let g = if self.has_graph { self.read_varint()? } else { 0 };
        let tuple = TripleId::new_quad(s, p, o, g);

        if tuple.is_zero() {
            if !self.crc.check_crc()? {
                return Err(BuildError::corrupt(self.context.clone()));
            }
            self.finished = true;
            self.current = None;
        } else {
            self.current = Some(tuple);
        }
        Ok(())
    }
}

// ============================================================================
// Format binding
// ============================================================================

/// [`ChunkFormat`] for triple-ID runs under one sort permutation.
pub struct TripleChunkFormat {
    pub order: TripleOrder,
    pub has_graph: bool,
}

impl ChunkFormat for TripleChunkFormat {
    type Item = TripleId;
    type Reader = TripleChunkReader;
    type Writer = TripleChunkWriter;

    fn create(&self, path: &Path) -> Result<TripleChunkWriter> {
        TripleChunkWriter::create(path, self.has_graph)
    }

    fn open(&self, path: &Path) -> Result<TripleChunkReader> {
        TripleChunkReader::open(path)
    }

    fn cmp(&self, a: &TripleId, b: &TripleId) -> Ordering {
        self.order.cmp_fn()(a, b)
    }
}

// ============================================================================
// Key-range sidecar
// ============================================================================

/// Inclusive tuple bounds of one chunk file under its sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripleKeyRange {
    pub min: TripleId,
    pub max: TripleId,
}

impl TripleKeyRange {
    pub fn disjoint(&self, other: &TripleKeyRange, order: TripleOrder) -> bool {
        let cmp = order.cmp_fn();
        cmp(&self.max, &other.min) == Ordering::Less
            || cmp(&other.max, &self.min) == Ordering::Less
    }
}

/// Write the `.range` sidecar for a finished chunk.
pub fn write_range_sidecar(
    data_path: &Path,
    min: &TripleId,
    max: &TripleId,
    has_graph: bool,
) -> Result<()> {
    let mut out = CrcWriter::new(File::create(range_sidecar_path(data_path))?);
    for t in [min, max] {
        varint::write_u64(&mut out, t.s)?;
        varint::write_u64(&mut out, t.p)?;
        varint::write_u64(&mut out, t.o)?;
        if has_graph {
            varint::write_u64(&mut out, t.g)?;
        }
    }
    out.write_crc()?;
    out.finish()?;
    Ok(())
}

/// Read a chunk's `.range` sidecar, if present.
pub fn read_range_sidecar(data_path: &Path, has_graph: bool) -> Result<Option<TripleKeyRange>> {
    let path = range_sidecar_path(data_path);
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let context = path.display().to_string();
    let mut crc = CrcReader::new(file);
    let mut tuples = [TripleId::default(); 2];
    for t in tuples.iter_mut() {
        t.s = varint::read_u64(&mut crc).map_err(|e| BuildError::from_codec(&context, e))?;
        t.p = varint::read_u64(&mut crc).map_err(|e| BuildError::from_codec(&context, e))?;
        t.o = varint::read_u64(&mut crc).map_err(|e| BuildError::from_codec(&context, e))?;
        if has_graph {
            t.g = varint::read_u64(&mut crc).map_err(|e| BuildError::from_codec(&context, e))?;
        }
    }
    if !crc.check_crc()? {
        return Err(BuildError::corrupt(context));
    }
    Ok(Some(TripleKeyRange {
        min: tuples[0],
        max: tuples[1],
    }))
}

impl TripleChunkWriter {
    /// First/last tuples pushed so far, for range sidecars.
    pub fn bounds(&self) -> Option<(TripleId, TripleId)> {
        self.first.map(|first| (first, self.last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("graphpress_triple_chunk_tests");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn test_round_trip_triples() {
        let path = temp_path("rt.gpc");
        let tuples = [
            TripleId::new(1, 2, 3),
            TripleId::new(1, 2, 9),
            TripleId::new(4, 1, 1),
        ];
        let mut w = TripleChunkWriter::create(&path, false).unwrap();
        for t in &tuples {
            w.push(t).unwrap();
        }
        assert_eq!(w.finish().unwrap(), 3);

        let mut r = TripleChunkReader::open(&path).unwrap();
        assert!(!r.has_graph());
        let mut out = Vec::new();
        while let Some(t) = r.next_tuple().unwrap() {
            out.push(t);
        }
        assert_eq!(out, tuples);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_round_trip_quads() {
        let path = temp_path("rt_quads.gpc");
        let tuples = [
            TripleId::new_quad(1, 2, 3, 1),
            TripleId::new_quad(1, 2, 3, 2),
        ];
        let mut w = TripleChunkWriter::create(&path, true).unwrap();
        for t in &tuples {
            w.push(t).unwrap();
        }
        w.finish().unwrap();

        let mut r = TripleChunkReader::open(&path).unwrap();
        assert!(r.has_graph());
        assert_eq!(r.next_tuple().unwrap().unwrap(), tuples[0]);
        assert_eq!(r.next_tuple().unwrap().unwrap(), tuples[1]);
        assert!(r.next_tuple().unwrap().is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_zero_tuple_rejected() {
        let path = temp_path("zero.gpc");
        let mut w = TripleChunkWriter::create(&path, false).unwrap();
        assert!(matches!(
            w.push(&TripleId::default()),
            Err(BuildError::Malformed(_))
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_corruption_detected_at_trailer() {
        let path = temp_path("corrupt.gpc");
        let mut w = TripleChunkWriter::create(&path, false).unwrap();
        w.push(&TripleId::new(10, 20, 30)).unwrap();
        w.finish().unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        // Flip a payload bit in the first tuple.
        bytes[1] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        let result = (|| -> Result<Vec<TripleId>> {
            let mut r = TripleChunkReader::open(&path)?;
            let mut out = Vec::new();
            while let Some(t) = r.next_tuple()? {
                out.push(t);
            }
            Ok(out)
        })();
        assert!(
            matches!(
                result,
                Err(BuildError::Corrupt { .. }) | Err(BuildError::Malformed(_))
            ),
            "corruption not detected: {result:?}"
        );
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_range_sidecar_round_trip() {
        let path = temp_path("range.gpc");
        let mut w = TripleChunkWriter::create(&path, false).unwrap();
        w.push(&TripleId::new(1, 1, 1)).unwrap();
        w.push(&TripleId::new(5, 5, 5)).unwrap();
        assert_eq!(
            w.bounds().unwrap(),
            (TripleId::new(1, 1, 1), TripleId::new(5, 5, 5))
        );
        w.finish().unwrap();

        // finish() writes the sidecar.
        let range = read_range_sidecar(&path, false).unwrap().unwrap();
        assert_eq!(range.min, TripleId::new(1, 1, 1));
        assert_eq!(range.max, TripleId::new(5, 5, 5));

        let far = TripleKeyRange {
            min: TripleId::new(7, 0, 0),
            max: TripleId::new(9, 0, 0),
        };
        assert!(range.disjoint(&far, TripleOrder::Spo));
        assert!(!range.disjoint(&range, TripleOrder::Spo));
        std::fs::remove_file(&path).ok();
        std::fs::remove_file(range_sidecar_path(&path)).ok();
    }
}
