//! Chunk format abstraction: how one element type is spilled to and
//! read back from a sorted chunk file.
//!
//! The merger is generic over this trait, so the same machinery sorts
//! front-coded term chunks and varint triple-ID chunks.

use crate::error::Result;
use std::cmp::Ordering;
use std::path::Path;

/// Forward-only reader over one sorted chunk, mergeable by
/// [`KWayMerge`](super::kway::KWayMerge).
pub trait MergeSource {
    type Item;

    /// Current record without advancing. `None` once exhausted.
    fn peek(&self) -> Option<&Self::Item>;

    /// Move to the next record, refilling from disk as needed.
    fn advance(&mut self) -> Result<()>;

    fn is_exhausted(&self) -> bool {
        self.peek().is_none()
    }
}

/// Writer for one sorted chunk; `push` is called in ascending order.
pub trait ChunkWriter {
    type Item;

    fn push(&mut self, item: &Self::Item) -> Result<()>;

    /// Finalize the file and return the record count.
    fn finish(self) -> Result<u64>;
}

/// Binds an element type to its on-disk chunk representation and its
/// sort order.
pub trait ChunkFormat: Sync {
    type Item: Clone + Send;
    type Reader: MergeSource<Item = Self::Item>;
    type Writer: ChunkWriter<Item = Self::Item>;

    fn create(&self, path: &Path) -> Result<Self::Writer>;

    fn open(&self, path: &Path) -> Result<Self::Reader>;

    /// Sort-key comparison for this format's elements. `Equal` means the
    /// two elements are exact duplicates (the merge drops one).
    fn cmp(&self, a: &Self::Item, b: &Self::Item) -> Ordering;
}
