//! Generic external merge-sort over spillable chunk sequences.
//!
//! [`merger::ExternalSorter`] drives worker threads over a chunk forest;
//! [`kway::KWayMerge`] is the in-memory k-way merge core; the two
//! [`format::ChunkFormat`] implementations ([`term_chunk`] and
//! [`triple_chunk`]) define the on-disk run layouts.

pub mod chunk;
pub mod format;
pub mod kway;
pub mod merger;
pub mod term_chunk;
pub mod triple_chunk;

pub use chunk::{ChunkHandle, ScratchDir};
pub use format::{ChunkFormat, ChunkWriter, MergeSource};
pub use kway::KWayMerge;
pub use merger::{ChunkSupplier, ElementSupplier, ExternalSorter, MergeConfig, NoSupplier};
pub use term_chunk::{TermChunkFormat, TermChunkReader, TermChunkWriter};
pub use triple_chunk::{TripleChunkFormat, TripleChunkReader, TripleChunkWriter};
