//! Front-coded term chunk files.
//!
//! A term chunk holds one sorted run of `(term, position)` records:
//!
//! ```text
//! magic:   "GPTC" [u8; 4]
//! segment: count (varint), CRC32 trailer
//! segment: count records, terminator record, CRC32 trailer
//!
//! record:  prefix_len (varint)   bytes shared with the previous term
//!          suffix_len (varint)
//!          suffix     [u8; suffix_len]
//!          position   (varint, >= 1)
//! terminator: (0, 0, 0) — a record with position 0
//! ```
//!
//! The record count precedes the records, but a merge writer only knows
//! its final count (duplicates dropped) at the end, so records stream to
//! a `.tmp` sibling first and `finish()` assembles the final file.
//!
//! A sidecar `<file>.range` stores the first and last term with the same
//! record encoding, letting a consumer skip the whole chunk by key-range
//! comparison without opening it.

use super::chunk::range_sidecar_path;
use super::format::{ChunkFormat, ChunkWriter, MergeSource};
use crate::error::{BuildError, Result};
use graphpress_core::{varint, CrcReader, CrcWriter, IndexedTerm};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

pub const TERM_CHUNK_MAGIC: [u8; 4] = *b"GPTC";

/// Length of the longest common prefix of `a` and `b`.
#[inline]
fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

// ============================================================================
// Writer
// ============================================================================

/// Streaming term chunk writer. Records must be pushed in `(term,
/// position)` order.
pub struct TermChunkWriter {
    records: CrcWriter<File>,
    tmp_path: PathBuf,
    path: PathBuf,
    magic: [u8; 4],
    prev: Vec<u8>,
    first: Option<Vec<u8>>,
    count: u64,
}

impl TermChunkWriter {
    pub fn create(path: &Path) -> Result<Self> {
        Self::create_with_magic(path, TERM_CHUNK_MAGIC)
    }

    /// Create a writer with a caller-chosen file magic (dictionary
    /// sections reuse this record encoding under their own magic).
    pub fn create_with_magic(path: &Path, magic: [u8; 4]) -> Result<Self> {
        let tmp_path = tmp_sibling(path);
        let records = CrcWriter::new(File::create(&tmp_path)?);
        Ok(Self {
            records,
            tmp_path,
            path: path.to_path_buf(),
            magic,
            prev: Vec::new(),
            first: None,
            count: 0,
        })
    }

    pub fn push_term(&mut self, term: &[u8], position: u64) -> Result<()> {
        if position == 0 {
            return Err(BuildError::malformed(
                "term positions are 1-based; 0 is the terminator",
            ));
        }
        debug_assert!(
            self.prev.as_slice() <= term || self.count == 0,
            "terms pushed out of order"
        );

        let prefix = common_prefix_len(&self.prev, term);
        let suffix = &term[prefix..];
        varint::write_u64(&mut self.records, prefix as u64)?;
        varint::write_u64(&mut self.records, suffix.len() as u64)?;
        io::Write::write_all(&mut self.records, suffix)?;
        varint::write_u64(&mut self.records, position)?;

        if self.first.is_none() {
            self.first = Some(term.to_vec());
        }
        self.prev.clear();
        self.prev.extend_from_slice(term);
        self.count += 1;
        Ok(())
    }
}

impl ChunkWriter for TermChunkWriter {
    type Item = IndexedTerm;

    fn push(&mut self, item: &IndexedTerm) -> Result<()> {
        self.push_term(&item.term, item.position)
    }

    fn finish(mut self) -> Result<u64> {
        // Terminator record, then the records-segment trailer.
        varint::write_u64(&mut self.records, 0)?;
        varint::write_u64(&mut self.records, 0)?;
        varint::write_u64(&mut self.records, 0)?;
        self.records.write_crc()?;
        self.records.finish()?;

        // Assemble: magic + count segment + records segment. The magic
        // is not part of any checksummed segment.
        let mut file = File::create(&self.path)?;
        io::Write::write_all(&mut file, &self.magic)?;
        let mut out = CrcWriter::new(file);
        varint::write_u64(&mut out, self.count)?;
        out.write_crc()?;
        let mut file = out.finish()?;
        let mut records = File::open(&self.tmp_path)?;
        io::copy(&mut records, &mut file)?;
        io::Write::flush(&mut file)?;
        drop(file);
        std::fs::remove_file(&self.tmp_path)?;

        if let Some(first) = self.first.take() {
            write_range_sidecar(&self.path, &first, &self.prev)?;
        }
        Ok(self.count)
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

// ============================================================================
// Reader
// ============================================================================

/// Streaming term chunk reader.
///
/// [`peek`](MergeSource::peek) returns a reference that is invalidated
/// by the next [`advance`](MergeSource::advance); [`next_entry`] is the
/// allocate-and-return convenience.
///
/// [`next_entry`]: TermChunkReader::next_entry
pub struct TermChunkReader {
    crc: CrcReader<File>,
    remaining: u64,
    count: u64,
    current: Option<IndexedTerm>,
    finished: bool,
    context: String,
}

impl TermChunkReader {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_magic(path, TERM_CHUNK_MAGIC)
    }

    pub fn open_with_magic(path: &Path, expected_magic: [u8; 4]) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if magic != expected_magic {
            return Err(BuildError::malformed(format!(
                "term chunk {}: bad magic {magic:?}",
                path.display()
            )));
        }
        let context = path.display().to_string();
        let mut crc = CrcReader::new(file);
        let count = varint::read_u64(&mut crc)
            .map_err(|e| BuildError::from_codec(&context, e))?;
        if !crc.check_crc()? {
            return Err(BuildError::corrupt(format!("{context} (count segment)")));
        }

        let mut reader = Self {
            crc,
            remaining: count,
            count,
            current: None,
            finished: false,
            context,
        };
        reader.advance()?;
        Ok(reader)
    }

    /// Total record count from the chunk header.
    pub fn record_count(&self) -> u64 {
        self.count
    }

    /// Read the next record into a fresh allocation.
    pub fn next_entry(&mut self) -> Result<Option<IndexedTerm>> {
        let entry = self.current.clone();
        if entry.is_some() {
            self.advance()?;
        }
        Ok(entry)
    }

    fn read_varint(&mut self) -> Result<u64> {
        varint::read_u64(&mut self.crc).map_err(|e| BuildError::from_codec(&self.context, e))
    }

    fn consume_terminator(&mut self) -> Result<()> {
        let prefix = self.read_varint()?;
        let suffix_len = self.read_varint()?;
        let position = self.read_varint()?;
        if prefix != 0 || suffix_len != 0 || position != 0 {
            return Err(BuildError::malformed(format!(
                "{}: missing terminator record",
                self.context
            )));
        }
        if !self.crc.check_crc()? {
            return Err(BuildError::corrupt(format!(
                "{} (records segment)",
                self.context
            )));
        }
        self.finished = true;
        Ok(())
    }
}

impl MergeSource for TermChunkReader {
    type Item = IndexedTerm;

    fn peek(&self) -> Option<&IndexedTerm> {
        self.current.as_ref()
    }

    fn advance(&mut self) -> Result<()> {
        if self.remaining == 0 {
            if !self.finished {
                self.consume_terminator()?;
            }
            self.current = None;
            return Ok(());
        }
        self.remaining -= 1;

        let prefix = self.read_varint()? as usize;
        let suffix_len = self.read_varint()? as usize;

        let cur = self
            .current
            .get_or_insert_with(|| IndexedTerm::new(Vec::new(), 0));
        if prefix > cur.term.len() {
            return Err(BuildError::malformed(format!(
                "{}: shared prefix {prefix} exceeds previous term length {}",
                self.context,
                cur.term.len()
            )));
        }
        cur.term.truncate(prefix);
        cur.term.resize(prefix + suffix_len, 0);
        self.crc
            .read_exact(&mut cur.term[prefix..])
            .map_err(|e| BuildError::from_codec(&self.context, e))?;

        let position = varint::read_u64(&mut self.crc)
            .map_err(|e| BuildError::from_codec(&self.context, e))?;
        if position == 0 {
            return Err(BuildError::malformed(format!(
                "{}: unexpected terminator inside record stream",
                self.context
            )));
        }
        cur.position = position;
        Ok(())
    }
}

// ============================================================================
// Format binding
// ============================================================================

/// [`ChunkFormat`] for `(term, position)` runs, ordered by term bytes
/// then position.
pub struct TermChunkFormat;

impl ChunkFormat for TermChunkFormat {
    type Item = IndexedTerm;
    type Reader = TermChunkReader;
    type Writer = TermChunkWriter;

    fn create(&self, path: &Path) -> Result<TermChunkWriter> {
        TermChunkWriter::create(path)
    }

    fn open(&self, path: &Path) -> Result<TermChunkReader> {
        TermChunkReader::open(path)
    }

    fn cmp(&self, a: &IndexedTerm, b: &IndexedTerm) -> Ordering {
        a.cmp(b)
    }
}

// ============================================================================
// Key-range sidecar
// ============================================================================

/// Inclusive term bounds of one chunk file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermKeyRange {
    pub min: Vec<u8>,
    pub max: Vec<u8>,
}

impl TermKeyRange {
    /// True when no term in `self` can equal any term in `other`.
    pub fn disjoint(&self, other: &TermKeyRange) -> bool {
        self.max < other.min || other.max < self.min
    }
}

fn write_range_sidecar(data_path: &Path, min: &[u8], max: &[u8]) -> Result<()> {
    let mut out = CrcWriter::new(File::create(range_sidecar_path(data_path))?);
    // Same encoding as the data file's first two records.
    varint::write_u64(&mut out, 0)?;
    varint::write_u64(&mut out, min.len() as u64)?;
    io::Write::write_all(&mut out, min)?;
    varint::write_u64(&mut out, 1)?;
    let prefix = common_prefix_len(min, max);
    varint::write_u64(&mut out, prefix as u64)?;
    varint::write_u64(&mut out, (max.len() - prefix) as u64)?;
    io::Write::write_all(&mut out, &max[prefix..])?;
    varint::write_u64(&mut out, 2)?;
    out.write_crc()?;
    out.finish()?;
    Ok(())
}

/// Read a chunk's `.range` sidecar, if present.
pub fn read_range_sidecar(data_path: &Path) -> Result<Option<TermKeyRange>> {
    let path = range_sidecar_path(data_path);
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let context = path.display().to_string();
    let mut crc = CrcReader::new(file);

    let mut read_record = |prev: &[u8]| -> Result<Vec<u8>> {
        let prefix = varint::read_u64(&mut crc)
            .map_err(|e| BuildError::from_codec(&context, e))? as usize;
        let suffix_len = varint::read_u64(&mut crc)
            .map_err(|e| BuildError::from_codec(&context, e))? as usize;
        if prefix > prev.len() {
            return Err(BuildError::malformed(format!("{context}: bad range prefix")));
        }
        let mut term = prev[..prefix].to_vec();
        term.resize(prefix + suffix_len, 0);
        crc.read_exact(&mut term[prefix..])?;
        varint::read_u64(&mut crc).map_err(|e| BuildError::from_codec(&context, e))?;
        Ok(term)
    };

    let min = read_record(&[])?;
    let max = read_record(&min)?;
    if !crc.check_crc()? {
        return Err(BuildError::corrupt(context));
    }
    Ok(Some(TermKeyRange { min, max }))
}
