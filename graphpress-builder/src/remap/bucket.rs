//! Bucketed, write-batched triple-ID remapping.
//!
//! Interning assigns dictionary IDs in term-sorted order, but the remap
//! table is indexed by triple position — filling it directly would be
//! O(n) random-access writes. The mapper instead stages `(position,
//! id)` records in memory, radix-buckets each full stage by
//! `bucket = (position - 1) / bucket_size`, and appends one compressed
//! frame per touched bucket to that bucket's spool file:
//!
//! ```text
//! frame: uncompressed_len (u32 LE), compressed_len (u32 LE), payload
//! payload (after decompression): (offset: u32 LE, id: u64 LE) records
//! ```
//!
//! Frames are handed to a dedicated writer thread through a bounded
//! channel with a recycled buffer pool, so a flush issues every bucket's
//! write before waiting on any of them. [`materialize`] then replays
//! buckets in ascending order into a dense per-bucket array and streams
//! the result — strictly sequentially — into the final remap table; a
//! position with no recorded mapping is a fatal consistency error.
//!
//! [`materialize`]: BucketedTripleMapper::materialize

use super::table::RemapTableWriter;
use crate::error::{BuildError, Result};
use graphpress_core::{DictId, TermRole};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

/// Bytes per staged `(offset, id)` record inside a frame payload.
const FRAME_RECORD_LEN: usize = 12;

/// Tuning for one [`BucketedTripleMapper`].
#[derive(Debug, Clone)]
pub struct BucketConfig {
    /// Triple positions per bucket.
    pub bucket_size: u64,
    /// Staged records per flush.
    pub stage_capacity: usize,
    /// Compress frame payloads (`GRAPHPRESS_SPOOL_ZSTD=0` disables).
    pub compress: bool,
    pub zstd_level: i32,
}

impl Default for BucketConfig {
    fn default() -> Self {
        let compress = std::env::var("GRAPHPRESS_SPOOL_ZSTD")
            .ok()
            .map(|v| !(v == "0" || v.eq_ignore_ascii_case("false")))
            .unwrap_or(true);
        let zstd_level = std::env::var("GRAPHPRESS_SPOOL_ZSTD_LEVEL")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(1);
        Self {
            bucket_size: 1 << 20,
            stage_capacity: 64 * 1024,
            compress,
            zstd_level,
        }
    }
}

// ============================================================================
// Writer thread
// ============================================================================

enum Job {
    Frame { bucket: u64, frame: Vec<u8> },
    Sync(mpsc::Sender<std::io::Result<()>>),
}

fn writer_thread(
    dir: PathBuf,
    jobs: mpsc::Receiver<Job>,
    pool: mpsc::Sender<Vec<u8>>,
) {
    let mut files: FxHashMap<u64, BufWriter<File>> = FxHashMap::default();
    let mut error: Option<std::io::Error> = None;

    for job in jobs {
        match job {
            Job::Frame { bucket, frame } => {
                if error.is_none() {
                    let result = write_frame(&dir, &mut files, bucket, &frame);
                    if let Err(e) = result {
                        error = Some(e);
                    }
                }
                // Recycle the buffer; the mapper may be gone already.
                let _ = pool.send(frame);
            }
            Job::Sync(ack) => {
                let status = match error.take() {
                    Some(e) => Err(e),
                    None => flush_all(&mut files),
                };
                let _ = ack.send(status);
            }
        }
    }
}

fn write_frame(
    dir: &Path,
    files: &mut FxHashMap<u64, BufWriter<File>>,
    bucket: u64,
    frame: &[u8],
) -> std::io::Result<()> {
    use std::collections::hash_map::Entry;
    let out = match files.entry(bucket) {
        Entry::Occupied(e) => e.into_mut(),
        Entry::Vacant(e) => {
            let file = File::create(dir.join(spool_file_name(bucket)))?;
            e.insert(BufWriter::with_capacity(256 * 1024, file))
        }
    };
    out.write_all(frame)
}

fn flush_all(files: &mut FxHashMap<u64, BufWriter<File>>) -> std::io::Result<()> {
    for out in files.values_mut() {
        out.flush()?;
    }
    Ok(())
}

fn spool_file_name(bucket: u64) -> String {
    format!("bucket_{bucket:05}.spl")
}

// ============================================================================
// Mapper
// ============================================================================

/// Per-role bucketed remap spooler.
pub struct BucketedTripleMapper {
    role: TermRole,
    dir: PathBuf,
    config: BucketConfig,
    staged: Vec<(u64, u64)>,
    jobs: Option<mpsc::SyncSender<Job>>,
    pool: mpsc::Receiver<Vec<u8>>,
    writer: Option<std::thread::JoinHandle<()>>,
    count: u64,
}

impl BucketedTripleMapper {
    /// Create a mapper spooling under `dir` (one directory per role).
    pub fn create(role: TermRole, dir: &Path, config: BucketConfig) -> Result<Self> {
        if config.bucket_size == 0 || config.bucket_size > u32::MAX as u64 {
            return Err(BuildError::malformed(format!(
                "bucket size {} out of range (1..=u32::MAX)",
                config.bucket_size
            )));
        }
        std::fs::create_dir_all(dir)?;

        let (jobs_tx, jobs_rx) = mpsc::sync_channel::<Job>(16);
        let (pool_tx, pool_rx) = mpsc::channel::<Vec<u8>>();
        let thread_dir = dir.to_path_buf();
        let writer = std::thread::Builder::new()
            .name(format!("spool-{role}"))
            .spawn(move || writer_thread(thread_dir, jobs_rx, pool_tx))
            .map_err(|e| BuildError::Worker(format!("failed to spawn spool writer: {e}")))?;

        Ok(Self {
            role,
            dir: dir.to_path_buf(),
            config,
            staged: Vec::new(),
            jobs: Some(jobs_tx),
            pool: pool_rx,
            writer: Some(writer),
            count: 0,
        })
    }

    pub fn role(&self) -> TermRole {
        self.role
    }

    /// Mappings accepted so far.
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Record one `(position, tagged id)` mapping.
    pub fn add(&mut self, position: u64, id: DictId) -> Result<()> {
        if position == 0 {
            return Err(BuildError::malformed("triple positions are 1-based"));
        }
        self.staged.push((position, id.raw()));
        self.count += 1;
        if self.staged.len() >= self.config.stage_capacity {
            self.flush()?;
        }
        Ok(())
    }

    /// Record a batch of mappings.
    pub fn add_batch(&mut self, events: &[crate::dict::RemapEvent]) -> Result<()> {
        for event in events {
            self.add(event.position, event.id)?;
        }
        Ok(())
    }

    /// Radix-bucket the stage and append one frame per touched bucket.
    /// Returns after the writer thread has acknowledged every frame of
    /// this flush.
    pub fn flush(&mut self) -> Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }

        // Group staged records by bucket index.
        let bucket_size = self.config.bucket_size;
        let mut buckets: FxHashMap<u64, Vec<(u32, u64)>> = FxHashMap::default();
        for &(position, id) in &self.staged {
            let bucket = (position - 1) / bucket_size;
            let offset = ((position - 1) % bucket_size) as u32;
            buckets.entry(bucket).or_default().push((offset, id));
        }
        self.staged.clear();

        let jobs = self.jobs.as_ref().expect("writer thread alive");
        for (bucket, records) in buckets {
            let mut payload = self.pooled_buffer();
            payload.clear();
            payload.reserve(records.len() * FRAME_RECORD_LEN);
            for (offset, id) in &records {
                payload.extend_from_slice(&offset.to_le_bytes());
                payload.extend_from_slice(&id.to_le_bytes());
            }

            let mut frame = self.pooled_buffer();
            frame.clear();
            encode_frame(&payload, &mut frame, self.config.compress, self.config.zstd_level)?;
            drop(payload);

            jobs.send(Job::Frame { bucket, frame })
                .map_err(|_| BuildError::Worker("spool writer thread exited early".into()))?;
        }

        // Await every write issued above.
        let (ack_tx, ack_rx) = mpsc::channel();
        jobs.send(Job::Sync(ack_tx))
            .map_err(|_| BuildError::Worker("spool writer thread exited early".into()))?;
        ack_rx
            .recv()
            .map_err(|_| BuildError::Worker("spool writer thread exited early".into()))?
            .map_err(BuildError::Io)
    }

    fn pooled_buffer(&self) -> Vec<u8> {
        self.pool.try_recv().unwrap_or_default()
    }

    /// Close the spool and replay every bucket in ascending order into
    /// `table`, resolving tagged IDs against `shared_offset`.
    ///
    /// `expected_positions` is the total triple count; every position in
    /// `1..=expected_positions` must have exactly one recorded mapping.
    pub fn materialize(
        mut self,
        shared_offset: u64,
        expected_positions: u64,
        table: &mut RemapTableWriter,
    ) -> Result<u64> {
        self.flush()?;
        // Closing the channel stops the writer thread; join flushes.
        drop(self.jobs.take());
        if let Some(handle) = self.writer.take() {
            if handle.join().is_err() {
                return Err(BuildError::Worker("spool writer thread panicked".into()));
            }
        }

        let bucket_size = self.config.bucket_size;
        let bucket_count = expected_positions.div_ceil(bucket_size);
        let mut dense: Vec<u64> = Vec::new();

        for bucket in 0..bucket_count {
            let start_position = bucket * bucket_size + 1;
            let len = bucket_size.min(expected_positions - (start_position - 1)) as usize;
            dense.clear();
            dense.resize(len, 0);

            let path = self.dir.join(spool_file_name(bucket));
            match File::open(&path) {
                Ok(file) => replay_bucket_file(file, &path, &mut dense)?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(BuildError::MissingMapping {
                        role: self.role,
                        position: start_position,
                    });
                }
                Err(e) => return Err(e.into()),
            }

            for (i, &raw) in dense.iter().enumerate() {
                let position = start_position + i as u64;
                if raw == 0 {
                    return Err(BuildError::MissingMapping {
                        role: self.role,
                        position,
                    });
                }
                let final_id = DictId::from_raw(raw).resolve(shared_offset);
                table.push(position, final_id)?;
            }

            let _ = std::fs::remove_file(&path);
        }

        tracing::debug!(
            role = %self.role,
            positions = expected_positions,
            buckets = bucket_count,
            "remap buckets materialized"
        );
        Ok(expected_positions)
    }
}

impl Drop for BucketedTripleMapper {
    fn drop(&mut self) {
        drop(self.jobs.take());
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// Frame codec
// ============================================================================

/// A frame whose compressed length equals its uncompressed length holds
/// the raw payload; compression output that fails to shrink is stored
/// raw so the equality stays unambiguous.
fn encode_frame(payload: &[u8], frame: &mut Vec<u8>, compress: bool, level: i32) -> Result<()> {
    let compressed;
    let body: &[u8] = if compress {
        compressed = zstd::bulk::compress(payload, level)
            .map_err(|e| BuildError::Io(std::io::Error::other(e)))?;
        if compressed.len() < payload.len() {
            &compressed
        } else {
            payload
        }
    } else {
        payload
    };
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(body);
    Ok(())
}

/// Replay every frame of one bucket's spool file into the dense
/// `offset -> id` array.
fn replay_bucket_file(mut file: File, path: &Path, dense: &mut [u64]) -> Result<()> {
    loop {
        let mut header = [0u8; 8];
        match file.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let uncompressed_len = u32::from_le_bytes(header[0..4].try_into().expect("4 bytes")) as usize;
        let compressed_len = u32::from_le_bytes(header[4..8].try_into().expect("4 bytes")) as usize;

        let mut body = vec![0u8; compressed_len];
        file.read_exact(&mut body).map_err(|e| {
            BuildError::malformed(format!(
                "{}: truncated frame body ({e})",
                path.display()
            ))
        })?;

        let payload = if compressed_len == uncompressed_len {
            body
        } else {
            zstd::bulk::decompress(&body, uncompressed_len).map_err(|e| {
                BuildError::malformed(format!("{}: frame decompression failed: {e}", path.display()))
            })?
        };
        if payload.len() != uncompressed_len || payload.len() % FRAME_RECORD_LEN != 0 {
            return Err(BuildError::malformed(format!(
                "{}: bad frame payload length {}",
                path.display(),
                payload.len()
            )));
        }

        for record in payload.chunks_exact(FRAME_RECORD_LEN) {
            let offset = u32::from_le_bytes(record[0..4].try_into().expect("4 bytes")) as usize;
            let id = u64::from_le_bytes(record[4..12].try_into().expect("8 bytes"));
            if offset >= dense.len() {
                return Err(BuildError::malformed(format!(
                    "{}: offset {offset} out of bucket range {}",
                    path.display(),
                    dense.len()
                )));
            }
            dense[offset] = id;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remap::table::RemapTable;
    use std::path::PathBuf;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("graphpress_bucket_tests")
            .join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn small_config(bucket_size: u64, stage: usize) -> BucketConfig {
        BucketConfig {
            bucket_size,
            stage_capacity: stage,
            compress: true,
            zstd_level: 1,
        }
    }

    fn run_round_trip(n: u64, bucket_size: u64, stage: usize) {
        let dir = temp_dir(&format!("rt_{n}_{bucket_size}_{stage}"));
        let mut mapper = BucketedTripleMapper::create(
            TermRole::Subject,
            &dir.join("subject"),
            small_config(bucket_size, stage),
        )
        .unwrap();

        // Positions added out of order; id = position * 3, tagged as
        // section ids.
        let mut positions: Vec<u64> = (1..=n).collect();
        positions.reverse();
        for pos in positions {
            mapper.add(pos, DictId::section(pos * 3)).unwrap();
        }
        assert_eq!(mapper.len(), n);

        let table_path = dir.join("subject.rmp");
        let mut writer = RemapTableWriter::create(&table_path).unwrap();
        let written = mapper.materialize(0, n, &mut writer).unwrap();
        assert_eq!(written, n);
        writer.finish().unwrap();

        let table = RemapTable::open(&table_path).unwrap();
        assert_eq!(table.len(), n);
        for pos in 1..=n {
            assert_eq!(table.get(pos).unwrap(), pos * 3, "position {pos}");
        }

        // Spool files were consumed.
        let leftover = std::fs::read_dir(dir.join("subject"))
            .unwrap()
            .filter_map(|e| e.ok())
            .count();
        assert_eq!(leftover, 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_round_trip_exact_multiple_of_bucket() {
        run_round_trip(64, 16, 10);
    }

    #[test]
    fn test_round_trip_ragged_last_bucket() {
        run_round_trip(61, 16, 7);
    }

    #[test]
    fn test_round_trip_single_bucket() {
        run_round_trip(5, 1024, 2);
    }

    #[test]
    fn test_missing_position_is_consistency_error() {
        let dir = temp_dir("missing");
        let mut mapper = BucketedTripleMapper::create(
            TermRole::Object,
            &dir.join("object"),
            small_config(8, 4),
        )
        .unwrap();
        for pos in [1u64, 2, 4, 5] {
            mapper.add(pos, DictId::section(pos)).unwrap();
        }
        let mut writer = RemapTableWriter::create(&dir.join("object.rmp")).unwrap();
        let err = mapper.materialize(0, 5, &mut writer).unwrap_err();
        match err {
            BuildError::MissingMapping { role, position } => {
                assert_eq!(role, TermRole::Object);
                assert_eq!(position, 3);
            }
            other => panic!("expected MissingMapping, got {other:?}"),
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_shared_ids_resolved_with_offset() {
        let dir = temp_dir("shared");
        let mut mapper = BucketedTripleMapper::create(
            TermRole::Subject,
            &dir.join("subject"),
            small_config(16, 4),
        )
        .unwrap();
        // Position 1: shared rank 2 -> final id 2.
        // Position 2: subject-only rank 1 -> final id shared_count + 1.
        mapper.add(1, DictId::shared(2)).unwrap();
        mapper.add(2, DictId::section(1)).unwrap();

        let table_path = dir.join("subject.rmp");
        let mut writer = RemapTableWriter::create(&table_path).unwrap();
        mapper.materialize(5, 2, &mut writer).unwrap();
        writer.finish().unwrap();

        let table = RemapTable::open(&table_path).unwrap();
        assert_eq!(table.get(1).unwrap(), 2);
        assert_eq!(table.get(2).unwrap(), 6);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_uncompressed_frames_round_trip() {
        let dir = temp_dir("raw");
        let mut mapper = BucketedTripleMapper::create(
            TermRole::Predicate,
            &dir.join("predicate"),
            BucketConfig {
                bucket_size: 8,
                stage_capacity: 3,
                compress: false,
                zstd_level: 0,
            },
        )
        .unwrap();
        for pos in 1..=10u64 {
            mapper.add(pos, DictId::section(100 + pos)).unwrap();
        }
        let table_path = dir.join("predicate.rmp");
        let mut writer = RemapTableWriter::create(&table_path).unwrap();
        mapper.materialize(0, 10, &mut writer).unwrap();
        writer.finish().unwrap();

        let table = RemapTable::open(&table_path).unwrap();
        for pos in 1..=10u64 {
            assert_eq!(table.get(pos).unwrap(), 100 + pos);
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_mapper_with_zero_expected() {
        let dir = temp_dir("empty");
        let mapper = BucketedTripleMapper::create(
            TermRole::Graph,
            &dir.join("graph"),
            small_config(16, 4),
        )
        .unwrap();
        let mut writer = RemapTableWriter::create(&dir.join("graph.rmp")).unwrap();
        assert_eq!(mapper.materialize(0, 0, &mut writer).unwrap(), 0);
        assert_eq!(writer.finish().unwrap(), 0);
        std::fs::remove_dir_all(&dir).ok();
    }
}
