//! Bounded-concurrency external k-way merge-sort.
//!
//! Worker threads share one chunk forest (a height-indexed multiset of
//! spilled sorted runs) behind a mutex + condvar. Each worker either
//! pulls one leaf batch from the supplier, sorts it, and spills it at
//! height 1, or — when enough chunks are pending and the concurrent-
//! merge budget allows — pops up to `arity` chunks (preferring the
//! largest available group) and k-way merges them into one chunk at
//! `max(heights) + 1`. Merging drops exact duplicates and keeps ties
//! stable by source order.
//!
//! The run ends with exactly one chunk (none for empty input). The
//! first worker error aborts all siblings and wins; later errors are
//! logged as suppressed. On failure every live chunk file is deleted.

use super::chunk::{ChunkHandle, ScratchDir};
use super::format::{ChunkFormat, ChunkWriter};
use super::kway::KWayMerge;
use crate::error::{BuildError, Result};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::{Condvar, Mutex};

// ============================================================================
// Supplier
// ============================================================================

/// Supplies unsorted leaf batches to merge workers. Implementations are
/// called concurrently from several threads.
pub trait ChunkSupplier: Sync {
    type Item;

    /// Pull the next batch, or `None` once the source is exhausted.
    fn next_batch(&self) -> Result<Option<Vec<Self::Item>>>;
}

/// Element-by-element supplier over one shared iterator: workers pull
/// up to `batch_len` elements per call from behind a mutex.
pub struct ElementSupplier<I: Iterator> {
    iter: Mutex<I>,
    batch_len: usize,
}

impl<I: Iterator> ElementSupplier<I> {
    pub fn new(iter: I, batch_len: usize) -> Self {
        Self {
            iter: Mutex::new(iter),
            batch_len: batch_len.max(1),
        }
    }
}

impl<E, I> ChunkSupplier for ElementSupplier<I>
where
    I: Iterator<Item = Result<E>> + Send,
{
    type Item = E;

    fn next_batch(&self) -> Result<Option<Vec<E>>> {
        let mut iter = self.iter.lock().unwrap();
        let mut batch = Vec::with_capacity(self.batch_len);
        while batch.len() < self.batch_len {
            match iter.next() {
                Some(Ok(item)) => batch.push(item),
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }
}

/// Supplier type for seeds-only runs (never called).
pub struct NoSupplier<E>(PhantomData<fn() -> E>);

impl<E> ChunkSupplier for NoSupplier<E> {
    type Item = E;

    fn next_batch(&self) -> Result<Option<Vec<E>>> {
        Ok(None)
    }
}

// ============================================================================
// Config
// ============================================================================

/// Tuning for one [`ExternalSorter`] run.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Merge arity `k` (>= 2).
    pub arity: usize,
    /// Worker thread count.
    pub workers: usize,
    /// Maximum merges running at once.
    pub max_concurrent_merges: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            arity: 8,
            workers,
            max_concurrent_merges: 2,
        }
    }
}

// ============================================================================
// Forest
// ============================================================================

struct Forest {
    by_height: BTreeMap<u32, Vec<ChunkHandle>>,
    total: usize,
    active_merges: usize,
    /// Leaf creations + merges currently running.
    in_flight: usize,
    source_done: bool,
    failed: bool,
    error: Option<BuildError>,
    suppressed: usize,
}

impl Forest {
    fn new() -> Self {
        Self {
            by_height: BTreeMap::new(),
            total: 0,
            active_merges: 0,
            in_flight: 0,
            source_done: false,
            failed: false,
            error: None,
            suppressed: 0,
        }
    }

    fn push(&mut self, chunk: ChunkHandle) {
        self.by_height.entry(chunk.height()).or_default().push(chunk);
        self.total += 1;
    }

    /// Pop up to `k` chunks, preferring the largest height group and
    /// topping up from other groups.
    fn pop_group(&mut self, k: usize) -> Vec<ChunkHandle> {
        let mut group = Vec::new();
        while group.len() < k && self.total > 0 {
            let best = self
                .by_height
                .iter()
                .max_by_key(|(_, v)| v.len())
                .map(|(&h, _)| h)
                .expect("non-empty forest");
            let bucket = self.by_height.get_mut(&best).expect("bucket exists");
            while group.len() < k {
                match bucket.pop() {
                    Some(c) => {
                        group.push(c);
                        self.total -= 1;
                    }
                    None => break,
                }
            }
            if bucket.is_empty() {
                self.by_height.remove(&best);
            }
        }
        group
    }

    fn drain_all(&mut self) -> Vec<ChunkHandle> {
        self.total = 0;
        std::mem::take(&mut self.by_height)
            .into_values()
            .flatten()
            .collect()
    }
}

enum Task {
    CreateLeaf,
    Merge(Vec<ChunkHandle>),
    Exit,
}

// ============================================================================
// ExternalSorter
// ============================================================================

/// One external-sort run over a chunk format.
pub struct ExternalSorter<'a, F: ChunkFormat> {
    format: &'a F,
    scratch: &'a ScratchDir,
    tag: String,
    config: MergeConfig,
    state: Mutex<Forest>,
    work_ready: Condvar,
}

impl<'a, F: ChunkFormat> ExternalSorter<'a, F> {
    pub fn new(format: &'a F, scratch: &'a ScratchDir, tag: &str, config: MergeConfig) -> Self {
        let config = MergeConfig {
            arity: config.arity.max(2),
            workers: config.workers.max(1),
            max_concurrent_merges: config.max_concurrent_merges.max(1),
        };
        Self {
            format,
            scratch,
            tag: tag.to_string(),
            config,
            state: Mutex::new(Forest::new()),
            work_ready: Condvar::new(),
        }
    }

    /// Sort everything the supplier yields (plus pre-spilled `seeds`)
    /// into at most one chunk.
    pub fn run<S>(mut self, supplier: Option<&S>, seeds: Vec<ChunkHandle>) -> Result<Option<ChunkHandle>>
    where
        S: ChunkSupplier<Item = F::Item>,
    {
        {
            let forest = self.state.get_mut().unwrap();
            for chunk in seeds {
                forest.push(chunk);
            }
            if supplier.is_none() {
                forest.source_done = true;
            }
        }

        std::thread::scope(|scope| {
            let mut workers = Vec::with_capacity(self.config.workers);
            for i in 0..self.config.workers {
                let this = &self;
                let handle = std::thread::Builder::new()
                    .name(format!("sort-{}-{i}", self.tag))
                    .spawn_scoped(scope, move || this.worker(supplier));
                match handle {
                    Ok(h) => workers.push(h),
                    Err(e) => {
                        this.fail(BuildError::Worker(format!(
                            "failed to spawn sort worker: {e}"
                        )));
                        break;
                    }
                }
            }
            for handle in workers {
                if handle.join().is_err() {
                    self.fail(BuildError::Worker("sort worker panicked".into()));
                }
            }
        });

        let forest = self.state.get_mut().unwrap();
        if let Some(err) = forest.error.take() {
            if forest.suppressed > 0 {
                tracing::warn!(
                    suppressed = forest.suppressed,
                    "additional sort worker errors were suppressed"
                );
            }
            for chunk in forest.drain_all() {
                self.scratch.remove_chunk(chunk);
            }
            return Err(err);
        }

        let mut remaining = forest.drain_all();
        debug_assert!(remaining.len() <= 1, "sort ended with multiple chunks");
        Ok(remaining.pop())
    }

    /// Seeds-only convenience: merge pre-spilled chunks down to one.
    pub fn run_seeded(self, seeds: Vec<ChunkHandle>) -> Result<Option<ChunkHandle>> {
        self.run::<NoSupplier<F::Item>>(None, seeds)
    }

    // ---- Worker loop ----

    fn worker<S>(&self, supplier: Option<&S>)
    where
        S: ChunkSupplier<Item = F::Item>,
    {
        loop {
            let task = {
                let mut guard = self.state.lock().unwrap();
                loop {
                    if guard.failed {
                        return;
                    }
                    if let Some(task) = self.decide(&mut guard, supplier.is_some()) {
                        break task;
                    }
                    guard = self.work_ready.wait(guard).unwrap();
                }
            };

            match task {
                Task::Exit => {
                    self.work_ready.notify_all();
                    return;
                }
                Task::CreateLeaf => {
                    let supplier = supplier.expect("leaf task without supplier");
                    match supplier.next_batch() {
                        Ok(Some(batch)) if !batch.is_empty() => match self.spill_leaf(batch) {
                            Ok(chunk) => {
                                let mut guard = self.state.lock().unwrap();
                                guard.in_flight -= 1;
                                guard.push(chunk);
                                drop(guard);
                                self.work_ready.notify_all();
                            }
                            Err(e) => self.fail_in_flight(e),
                        },
                        Ok(Some(_)) => {
                            // Empty batch: nothing to spill.
                            let mut guard = self.state.lock().unwrap();
                            guard.in_flight -= 1;
                            drop(guard);
                            self.work_ready.notify_all();
                        }
                        Ok(None) => {
                            let mut guard = self.state.lock().unwrap();
                            guard.source_done = true;
                            guard.in_flight -= 1;
                            drop(guard);
                            self.work_ready.notify_all();
                        }
                        Err(e) => self.fail_in_flight(e),
                    }
                }
                Task::Merge(chunks) => match self.merge_chunks(&chunks) {
                    Ok(merged) => {
                        for chunk in chunks {
                            self.scratch.remove_chunk(chunk);
                        }
                        let mut guard = self.state.lock().unwrap();
                        guard.active_merges -= 1;
                        guard.in_flight -= 1;
                        guard.push(merged);
                        drop(guard);
                        self.work_ready.notify_all();
                    }
                    Err(e) => {
                        for chunk in chunks {
                            self.scratch.remove_chunk(chunk);
                        }
                        {
                            let mut guard = self.state.lock().unwrap();
                            guard.active_merges -= 1;
                        }
                        self.fail_in_flight(e);
                    }
                },
            }
        }
    }

    /// Pick the next dispatchable task, or `None` to block.
    fn decide(&self, forest: &mut Forest, have_supplier: bool) -> Option<Task> {
        if forest.source_done && forest.in_flight == 0 && forest.total <= 1 {
            return Some(Task::Exit);
        }

        if !forest.source_done && have_supplier && forest.total < self.config.arity {
            forest.in_flight += 1;
            return Some(Task::CreateLeaf);
        }

        if forest.active_merges < self.config.max_concurrent_merges {
            let enough = forest.total >= self.config.arity
                || (forest.source_done && forest.total >= 2);
            if enough {
                let group = forest.pop_group(self.config.arity);
                debug_assert!(group.len() >= 2);
                forest.active_merges += 1;
                forest.in_flight += 1;
                return Some(Task::Merge(group));
            }
        }

        None
    }

    fn spill_leaf(&self, mut batch: Vec<F::Item>) -> Result<ChunkHandle> {
        batch.sort_by(|a, b| self.format.cmp(a, b));
        let path = self.scratch.next_chunk_path(&self.tag);
        let mut writer = self.format.create(&path)?;
        for item in &batch {
            writer.push(item)?;
        }
        let records = writer.finish()?;
        tracing::trace!(tag = %self.tag, records, "leaf chunk spilled");
        Ok(ChunkHandle::new(path, 1, records))
    }

    fn merge_chunks(&self, chunks: &[ChunkHandle]) -> Result<ChunkHandle> {
        let mut readers = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            readers.push(self.format.open(chunk.path())?);
        }
        let mut merge = KWayMerge::new(readers, |a, b| self.format.cmp(a, b))?;

        let path = self.scratch.next_chunk_path(&self.tag);
        let mut writer = self.format.create(&path)?;
        while let Some(item) = merge.next_deduped()? {
            writer.push(&item)?;
        }
        let records = writer.finish()?;

        let height = chunks.iter().map(ChunkHandle::height).max().unwrap_or(0) + 1;
        tracing::trace!(
            tag = %self.tag,
            inputs = chunks.len(),
            records,
            height,
            "chunks merged"
        );
        Ok(ChunkHandle::new(path, height, records))
    }

    // ---- Failure handling ----

    fn fail(&self, e: BuildError) {
        let mut guard = self.state.lock().unwrap();
        if guard.failed {
            guard.suppressed += 1;
            tracing::warn!(error = %e, "suppressed sort worker error");
        } else {
            guard.failed = true;
            guard.error = Some(e);
        }
        drop(guard);
        self.work_ready.notify_all();
    }

    /// Record a failure from a task that held an in-flight slot.
    fn fail_in_flight(&self, e: BuildError) {
        {
            let mut guard = self.state.lock().unwrap();
            guard.in_flight -= 1;
        }
        self.fail(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::format::MergeSource;
    use crate::sort::term_chunk::{TermChunkFormat, TermChunkReader};
    use graphpress_core::IndexedTerm;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scratch(name: &str) -> (PathBuf, ScratchDir) {
        let dir = std::env::temp_dir()
            .join("graphpress_merger_tests")
            .join(name);
        let _ = std::fs::remove_dir_all(&dir);
        (dir.clone(), ScratchDir::create(&dir).unwrap())
    }

    fn terms_supplier(
        terms: Vec<IndexedTerm>,
        batch_len: usize,
    ) -> ElementSupplier<impl Iterator<Item = Result<IndexedTerm>> + Send> {
        ElementSupplier::new(terms.into_iter().map(Ok), batch_len)
    }

    fn drain_chunk(chunk: &ChunkHandle) -> Vec<IndexedTerm> {
        let mut reader = TermChunkReader::open(chunk.path()).unwrap();
        let mut out = Vec::new();
        while let Some(entry) = reader.next_entry().unwrap() {
            out.push(entry);
        }
        out
    }

    #[test]
    fn test_sorts_everything_into_one_chunk() {
        let (dir, scratch) = scratch("sorts_all");
        let mut terms = Vec::new();
        for i in (1..=500u64).rev() {
            terms.push(IndexedTerm::new(format!("term{:04}", i % 37), i));
        }
        let mut expected = terms.clone();
        expected.sort();

        let supplier = terms_supplier(terms, 64);
        let sorter = ExternalSorter::new(
            &TermChunkFormat,
            &scratch,
            "test",
            MergeConfig {
                arity: 4,
                workers: 3,
                max_concurrent_merges: 2,
            },
        );
        let chunk = sorter.run(Some(&supplier), Vec::new()).unwrap().unwrap();
        assert_eq!(chunk.records(), 500);
        assert_eq!(drain_chunk(&chunk), expected);
        assert!(chunk.height() >= 2);

        scratch.remove_chunk(chunk);
        scratch.cleanup();
        assert!(!dir.exists());
    }

    #[test]
    fn test_exact_duplicates_dropped() {
        let (_dir, scratch) = scratch("dedup");
        // The same (term, position) pair in several batches.
        let mut terms = Vec::new();
        for _ in 0..3 {
            terms.push(IndexedTerm::new(&b"dup"[..], 7));
            terms.push(IndexedTerm::new(&b"other"[..], 8));
        }
        let supplier = terms_supplier(terms, 2);
        let sorter = ExternalSorter::new(
            &TermChunkFormat,
            &scratch,
            "test",
            MergeConfig {
                arity: 2,
                workers: 2,
                max_concurrent_merges: 1,
            },
        );
        let chunk = sorter.run(Some(&supplier), Vec::new()).unwrap().unwrap();
        let out = drain_chunk(&chunk);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].term, b"dup");
        assert_eq!(out[1].term, b"other");
        scratch.remove_chunk(chunk);
        scratch.cleanup();
    }

    #[test]
    fn test_empty_input_yields_no_chunk() {
        let (_dir, scratch) = scratch("empty");
        let supplier = terms_supplier(Vec::new(), 8);
        let sorter = ExternalSorter::new(
            &TermChunkFormat,
            &scratch,
            "test",
            MergeConfig::default(),
        );
        assert!(sorter.run(Some(&supplier), Vec::new()).unwrap().is_none());
        scratch.cleanup();
    }

    #[test]
    fn test_seeded_run_merges_existing_chunks() {
        let (_dir, scratch) = scratch("seeded");
        let mut seeds = Vec::new();
        for terms in [
            vec![("apple", 1u64), ("cherry", 3)],
            vec![("banana", 2)],
            vec![("apple", 9), ("date", 4)],
        ] {
            let path = scratch.next_chunk_path("seed");
            let mut w = crate::sort::term_chunk::TermChunkWriter::create(&path).unwrap();
            for (t, p) in &terms {
                w.push_term(t.as_bytes(), *p).unwrap();
            }
            let records = w.finish().unwrap();
            seeds.push(ChunkHandle::new(path, 1, records));
        }

        let sorter = ExternalSorter::new(
            &TermChunkFormat,
            &scratch,
            "test",
            MergeConfig {
                arity: 2,
                workers: 2,
                max_concurrent_merges: 2,
            },
        );
        let chunk = sorter.run_seeded(seeds).unwrap().unwrap();
        let out = drain_chunk(&chunk);
        let terms: Vec<&[u8]> = out.iter().map(|t| t.term.as_slice()).collect();
        assert_eq!(
            terms,
            vec![
                &b"apple"[..],
                b"apple",
                b"banana",
                b"cherry",
                b"date"
            ]
        );
        scratch.remove_chunk(chunk);
        scratch.cleanup();
    }

    #[test]
    fn test_single_seed_returned_unchanged() {
        let (_dir, scratch) = scratch("single_seed");
        let path = scratch.next_chunk_path("seed");
        let mut w = crate::sort::term_chunk::TermChunkWriter::create(&path).unwrap();
        w.push_term(b"only", 1).unwrap();
        let records = w.finish().unwrap();
        let seed = ChunkHandle::new(path.clone(), 1, records);

        let sorter = ExternalSorter::new(
            &TermChunkFormat,
            &scratch,
            "test",
            MergeConfig::default(),
        );
        let chunk = sorter.run_seeded(vec![seed]).unwrap().unwrap();
        assert_eq!(chunk.path(), path);
        assert_eq!(chunk.height(), 1);
        scratch.cleanup();
    }

    /// Supplier that fails after a fixed number of batches.
    struct FailingSupplier {
        calls: AtomicUsize,
        fail_at: usize,
    }

    impl ChunkSupplier for FailingSupplier {
        type Item = IndexedTerm;

        fn next_batch(&self) -> Result<Option<Vec<IndexedTerm>>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n >= self.fail_at {
                return Err(BuildError::malformed("synthetic supplier failure"));
            }
            Ok(Some(vec![IndexedTerm::new(
                format!("t{n:03}"),
                n as u64 + 1,
            )]))
        }
    }

    #[test]
    fn test_worker_error_aborts_run_and_cleans_up() {
        let (dir, scratch) = scratch("error_abort");
        let supplier = FailingSupplier {
            calls: AtomicUsize::new(0),
            fail_at: 5,
        };
        let sorter = ExternalSorter::new(
            &TermChunkFormat,
            &scratch,
            "test",
            MergeConfig {
                arity: 2,
                workers: 3,
                max_concurrent_merges: 2,
            },
        );
        let err = sorter.run(Some(&supplier), Vec::new()).unwrap_err();
        assert!(matches!(err, BuildError::Malformed(_)));

        // Every chunk file in the forest was deleted.
        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "gpc"))
            .collect();
        assert!(leftovers.is_empty(), "chunk files left behind: {leftovers:?}");
        scratch.cleanup();
    }

    #[test]
    fn test_merge_source_trait_is_object_usable() {
        // Compile-time shape check: readers expose peek/advance.
        fn takes_source<S: MergeSource<Item = IndexedTerm>>(_s: &S) {}
        let (_dir, scratch) = scratch("shape");
        let path = scratch.next_chunk_path("seed");
        let mut w = crate::sort::term_chunk::TermChunkWriter::create(&path).unwrap();
        w.push_term(b"a", 1).unwrap();
        w.finish().unwrap();
        let reader = TermChunkReader::open(&path).unwrap();
        takes_source(&reader);
        scratch.cleanup();
    }
}
