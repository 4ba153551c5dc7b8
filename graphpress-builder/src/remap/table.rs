//! Materialized per-role remap tables.
//!
//! A table file is a flat array of u64 little-endian entries, written
//! strictly sequentially during bucket replay and reopened memory-mapped
//! for lookup: entry `position - 1` holds the final dictionary ID of
//! that triple position's role term.

use crate::error::{BuildError, Result};
use graphpress_core::TermRole;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

// ============================================================================
// Writer
// ============================================================================

/// Sequential-write-only builder for one role's table.
pub struct RemapTableWriter {
    out: BufWriter<File>,
    next_position: u64,
    path: PathBuf,
}

impl RemapTableWriter {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            out: BufWriter::with_capacity(256 * 1024, File::create(path)?),
            next_position: 1,
            path: path.to_path_buf(),
        })
    }

    /// Append the mapping for the next position. Positions must arrive
    /// densely in ascending order.
    pub fn push(&mut self, position: u64, id: u64) -> Result<()> {
        if position != self.next_position {
            return Err(BuildError::malformed(format!(
                "remap table {}: non-sequential position {position} (expected {})",
                self.path.display(),
                self.next_position
            )));
        }
        self.out.write_all(&id.to_le_bytes())?;
        self.next_position += 1;
        Ok(())
    }

    /// Entries written so far.
    pub fn len(&self) -> u64 {
        self.next_position - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn finish(mut self) -> Result<u64> {
        self.out.flush()?;
        Ok(self.next_position - 1)
    }
}

// ============================================================================
// Mmap lookup
// ============================================================================

/// Memory-mapped read side of one role's table.
#[derive(Debug)]
pub struct RemapTable {
    mmap: memmap2::Mmap,
}

impl RemapTable {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        if mmap.len() % 8 != 0 {
            return Err(BuildError::malformed(format!(
                "remap table {}: length {} not a multiple of 8",
                path.display(),
                mmap.len()
            )));
        }
        Ok(Self { mmap })
    }

    pub fn len(&self) -> u64 {
        (self.mmap.len() / 8) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Final dictionary ID for a 1-based triple position.
    pub fn get(&self, position: u64) -> Result<u64> {
        if position == 0 || position > self.len() {
            return Err(BuildError::malformed(format!(
                "remap table lookup out of bounds: position={position}, len={}",
                self.len()
            )));
        }
        let start = (position as usize - 1) * 8;
        let bytes: [u8; 8] = self.mmap[start..start + 8].try_into().expect("8-byte slice");
        Ok(u64::from_le_bytes(bytes))
    }
}

// ============================================================================
// All-roles view
// ============================================================================

/// The remap-table surface consumed by the downstream index builder.
#[derive(Debug)]
pub struct RemapTables {
    subjects: RemapTable,
    predicates: RemapTable,
    objects: RemapTable,
    graphs: Option<RemapTable>,
    triple_count: u64,
    graph_count: u64,
}

impl RemapTables {
    pub fn new(
        subjects: RemapTable,
        predicates: RemapTable,
        objects: RemapTable,
        graphs: Option<RemapTable>,
        graph_count: u64,
    ) -> Result<Self> {
        let triple_count = subjects.len();
        if predicates.len() != triple_count
            || objects.len() != triple_count
            || graphs.as_ref().is_some_and(|g| g.len() != triple_count)
        {
            return Err(BuildError::malformed(format!(
                "remap tables disagree on triple count: s={}, p={}, o={}, g={:?}",
                subjects.len(),
                predicates.len(),
                objects.len(),
                graphs.as_ref().map(RemapTable::len)
            )));
        }
        Ok(Self {
            subjects,
            predicates,
            objects,
            graphs,
            triple_count,
            graph_count,
        })
    }

    /// Final dictionary ID of the `role` term of the triple at
    /// `position`.
    pub fn extract_id(&self, role: TermRole, position: u64) -> Result<u64> {
        match role {
            TermRole::Subject => self.subjects.get(position),
            TermRole::Predicate => self.predicates.get(position),
            TermRole::Object => self.objects.get(position),
            TermRole::Graph => match &self.graphs {
                Some(table) => table.get(position),
                None => Err(BuildError::malformed(
                    "graph remap requested on a triples-mode build",
                )),
            },
        }
    }

    pub fn triple_count(&self) -> u64 {
        self.triple_count
    }

    /// Number of distinct graph terms (0 for triples-mode builds).
    pub fn graph_count(&self) -> u64 {
        self.graph_count
    }

    pub fn has_graphs(&self) -> bool {
        self.graphs.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("graphpress_remap_table_tests");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn test_write_then_lookup() {
        let path = temp_path("basic.rmp");
        let mut w = RemapTableWriter::create(&path).unwrap();
        for (pos, id) in [(1u64, 10u64), (2, 20), (3, 7)] {
            w.push(pos, id).unwrap();
        }
        assert_eq!(w.finish().unwrap(), 3);

        let table = RemapTable::open(&path).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(1).unwrap(), 10);
        assert_eq!(table.get(2).unwrap(), 20);
        assert_eq!(table.get(3).unwrap(), 7);
        assert!(table.get(0).is_err());
        assert!(table.get(4).is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_non_sequential_position_rejected() {
        let path = temp_path("gap.rmp");
        let mut w = RemapTableWriter::create(&path).unwrap();
        w.push(1, 1).unwrap();
        assert!(matches!(w.push(3, 3), Err(BuildError::Malformed(_))));
    }

    #[test]
    fn test_tables_length_mismatch_rejected() {
        let p1 = temp_path("s.rmp");
        let p2 = temp_path("p.rmp");
        let mut w = RemapTableWriter::create(&p1).unwrap();
        w.push(1, 1).unwrap();
        w.finish().unwrap();
        let mut w = RemapTableWriter::create(&p2).unwrap();
        w.push(1, 1).unwrap();
        w.push(2, 2).unwrap();
        w.finish().unwrap();

        let s = RemapTable::open(&p1).unwrap();
        let p = RemapTable::open(&p2).unwrap();
        let o = RemapTable::open(&p1).unwrap();
        assert!(RemapTables::new(s, p, o, None, 0).is_err());
        std::fs::remove_file(&p1).ok();
        std::fs::remove_file(&p2).ok();
    }
}
