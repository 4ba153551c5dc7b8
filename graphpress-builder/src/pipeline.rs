//! End-to-end build pipeline.
//!
//! text source → per-role external sorts → four-section dictionary
//! (remap events into per-role bucket spools) → remap-table
//! materialization → position-order triple rewrite → external sort of
//! the id triples → final sorted triple chunk + dictionary sections.
//!
//! All scratch state (term chunks, spool files, merge intermediates)
//! lives in a per-run scratch directory removed at the end of the run,
//! success or failure. On failure the partially written outputs are
//! removed best-effort as well.

use crate::dict::{build_four_section, DictCounts, DictStreams};
use crate::error::{BuildError, Result};
use crate::remap::{BucketConfig, RemapTable, RemapTableWriter, RemapTables, RoleMappers};
use crate::sort::{
    ChunkHandle, ChunkWriter, ElementSupplier, ExternalSorter, MergeConfig, ScratchDir,
    TermChunkFormat, TermChunkReader, TermChunkWriter, TripleChunkFormat, TripleChunkWriter,
};
use crate::text::{TripleRecord, TripleSource};
use graphpress_core::{IndexedTerm, TermRole, TripleId, TripleOrder};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Permutation the final triple chunk is sorted under.
    pub order: TripleOrder,
    /// Whether the input carries graph labels.
    pub quads: bool,
    /// Scratch directory for this run (created, then removed).
    pub scratch_dir: PathBuf,
    /// Output directory for dictionary/remap/triples artifacts.
    pub out_dir: PathBuf,
    /// Parse-phase worker threads.
    pub parse_workers: usize,
    pub merge: MergeConfig,
    pub bucket: BucketConfig,
}

impl BuildConfig {
    pub fn new(scratch_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            order: TripleOrder::Spo,
            quads: false,
            scratch_dir: scratch_dir.into(),
            out_dir: out_dir.into(),
            parse_workers: std::thread::available_parallelism()
                .map(|n| n.get().min(8))
                .unwrap_or(4),
            merge: MergeConfig::default(),
            bucket: BucketConfig::default(),
        }
    }
}

/// Artifacts of a finished build.
#[derive(Debug)]
pub struct BuildResult {
    pub triple_count: u64,
    pub counts: DictCounts,
    pub dict_dir: PathBuf,
    pub remap_dir: PathBuf,
    pub triples_path: PathBuf,
}

/// Run the whole pipeline over `source`.
pub fn build<S: TripleSource>(source: &S, config: &BuildConfig) -> Result<BuildResult> {
    let scratch = ScratchDir::create(&config.scratch_dir)?;
    let result = build_inner(source, config, &scratch);
    scratch.cleanup();
    if result.is_err() {
        for path in [
            config.out_dir.join("dictionary"),
            config.out_dir.join("remap"),
            config.out_dir.join(format!("triples.{}", config.order.name())),
        ] {
            if path.is_dir() {
                let _ = std::fs::remove_dir_all(&path);
            } else {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
    result
}

fn build_inner<S: TripleSource>(
    source: &S,
    config: &BuildConfig,
    scratch: &ScratchDir,
) -> Result<BuildResult> {
    std::fs::create_dir_all(&config.out_dir)?;
    let quads = config.quads;

    // ---- Phase 1: parse input chunks, spill per-role leaf term chunks.
    let started = Instant::now();
    let leaves = parse_and_spill(source, quads, config.parse_workers, scratch)?;
    let triple_count = source.record_count();
    tracing::info!(
        triples = triple_count,
        subject_leaves = leaves.subjects.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "parse phase done"
    );

    // ---- Phase 2: per-role external merges down to one chunk each.
    let started = Instant::now();
    let subjects = merge_role(scratch, "subject", leaves.subjects, &config.merge)?;
    let predicates = merge_role(scratch, "predicate", leaves.predicates, &config.merge)?;
    let objects = merge_role(scratch, "object", leaves.objects, &config.merge)?;
    let graphs = merge_role(scratch, "graph", leaves.graphs, &config.merge)?;
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "term merge phase done"
    );

    // ---- Phase 3: dictionary split + remap spooling.
    let started = Instant::now();
    let dict_dir = config.out_dir.join("dictionary");
    let mut mappers = RoleMappers::create(scratch.path(), quads, &config.bucket)?;
    let counts = build_four_section(
        DictStreams {
            subjects: open_merged(&subjects)?,
            predicates: open_merged(&predicates)?,
            objects: open_merged(&objects)?,
            graphs: open_merged(&graphs)?,
        },
        &dict_dir,
        &mut mappers,
    )?;
    for chunk in [subjects, predicates, objects, graphs].into_iter().flatten() {
        scratch.remove_chunk(chunk);
    }
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "dictionary phase done"
    );

    // ---- Phase 4: materialize remap tables (sequential writes only).
    let started = Instant::now();
    let remap_dir = config.out_dir.join("remap");
    std::fs::create_dir_all(&remap_dir)?;
    let RoleMappers {
        subjects: subj_mapper,
        predicates: pred_mapper,
        objects: obj_mapper,
        graphs: graph_mapper,
    } = mappers;

    materialize_role(
        subj_mapper,
        counts.shared_offset(TermRole::Subject),
        triple_count,
        &remap_dir.join("subjects.rmp"),
    )?;
    materialize_role(
        pred_mapper,
        0,
        triple_count,
        &remap_dir.join("predicates.rmp"),
    )?;
    materialize_role(
        obj_mapper,
        counts.shared_offset(TermRole::Object),
        triple_count,
        &remap_dir.join("objects.rmp"),
    )?;
    if let Some(mapper) = graph_mapper {
        materialize_role(mapper, 0, triple_count, &remap_dir.join("graphs.rmp"))?;
    }
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "remap materialization done"
    );

    // ---- Phase 5: rewrite triples into final id space and sort.
    let started = Instant::now();
    let tables = RemapTables::new(
        RemapTable::open(&remap_dir.join("subjects.rmp"))?,
        RemapTable::open(&remap_dir.join("predicates.rmp"))?,
        RemapTable::open(&remap_dir.join("objects.rmp"))?,
        if quads {
            Some(RemapTable::open(&remap_dir.join("graphs.rmp"))?)
        } else {
            None
        },
        counts.graphs,
    )?;

    let triples_path = config
        .out_dir
        .join(format!("triples.{}", config.order.name()));
    sort_mapped_triples(&tables, config, scratch, &triples_path)?;
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "triple sort phase done"
    );

    Ok(BuildResult {
        triple_count,
        counts,
        dict_dir,
        remap_dir,
        triples_path,
    })
}

// ============================================================================
// Phase 1: parse + spill
// ============================================================================

#[derive(Default)]
struct RoleLeaves {
    subjects: Vec<ChunkHandle>,
    predicates: Vec<ChunkHandle>,
    objects: Vec<ChunkHandle>,
    graphs: Vec<ChunkHandle>,
}

fn parse_and_spill<S: TripleSource>(
    source: &S,
    quads: bool,
    workers: usize,
    scratch: &ScratchDir,
) -> Result<RoleLeaves> {
    let leaves = Mutex::new(RoleLeaves::default());
    let failed = AtomicBool::new(false);
    let first_error: Mutex<Option<BuildError>> = Mutex::new(None);

    std::thread::scope(|scope| {
        for i in 0..workers.max(1) {
            let leaves = &leaves;
            let failed = &failed;
            let first_error = &first_error;
            let builder = std::thread::Builder::new().name(format!("parse-{i}"));
            let spawned = builder.spawn_scoped(scope, move || {
                while !failed.load(Ordering::Acquire) {
                    match parse_one_chunk(source, quads, scratch) {
                        Ok(Some(batch)) => {
                            let mut guard = leaves.lock().unwrap();
                            guard.subjects.extend(batch.subjects);
                            guard.predicates.extend(batch.predicates);
                            guard.objects.extend(batch.objects);
                            guard.graphs.extend(batch.graphs);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let mut slot = first_error.lock().unwrap();
                            if slot.is_none() {
                                *slot = Some(e);
                            } else {
                                tracing::warn!(error = %e, "suppressed parse worker error");
                            }
                            failed.store(true, Ordering::Release);
                            break;
                        }
                    }
                }
            });
            if let Err(e) = spawned {
                let mut slot = first_error.lock().unwrap();
                if slot.is_none() {
                    *slot = Some(BuildError::Worker(format!(
                        "failed to spawn parse worker: {e}"
                    )));
                }
                failed.store(true, Ordering::Release);
            }
        }
    });

    if let Some(e) = first_error.into_inner().unwrap() {
        // Abort: drop already-spilled leaves.
        let leaves = leaves.into_inner().unwrap();
        for chunk in leaves
            .subjects
            .into_iter()
            .chain(leaves.predicates)
            .chain(leaves.objects)
            .chain(leaves.graphs)
        {
            scratch.remove_chunk(chunk);
        }
        return Err(e);
    }
    Ok(leaves.into_inner().unwrap())
}

#[derive(Default)]
struct LeafBatch {
    subjects: Option<ChunkHandle>,
    predicates: Option<ChunkHandle>,
    objects: Option<ChunkHandle>,
    graphs: Option<ChunkHandle>,
}

/// Parse one text chunk into per-role sorted leaf chunks.
fn parse_one_chunk<S: TripleSource>(
    source: &S,
    quads: bool,
    scratch: &ScratchDir,
) -> Result<Option<LeafBatch>> {
    let Some(mut chunk) = source.next_chunk()? else {
        return Ok(None);
    };

    let mut subjects: Vec<IndexedTerm> = Vec::new();
    let mut predicates: Vec<IndexedTerm> = Vec::new();
    let mut objects: Vec<IndexedTerm> = Vec::new();
    let mut graphs: Vec<IndexedTerm> = Vec::new();

    let mut rec = TripleRecord::default();
    while chunk.read_into(&mut rec)? {
        subjects.push(IndexedTerm::new(rec.subject.as_slice(), rec.position));
        predicates.push(IndexedTerm::new(rec.predicate.as_slice(), rec.position));
        objects.push(IndexedTerm::new(rec.object.as_slice(), rec.position));
        if quads {
            // Lines without a label belong to the default graph, interned
            // as the empty term.
            graphs.push(IndexedTerm::new(rec.graph.as_slice(), rec.position));
        }
    }

    Ok(Some(LeafBatch {
        subjects: spill_terms(scratch, "subject", subjects)?,
        predicates: spill_terms(scratch, "predicate", predicates)?,
        objects: spill_terms(scratch, "object", objects)?,
        graphs: spill_terms(scratch, "graph", graphs)?,
    }))
}

fn spill_terms(
    scratch: &ScratchDir,
    tag: &str,
    mut terms: Vec<IndexedTerm>,
) -> Result<Option<ChunkHandle>> {
    if terms.is_empty() {
        return Ok(None);
    }
    terms.sort_unstable();
    let path = scratch.next_chunk_path(tag);
    let mut writer = TermChunkWriter::create(&path)?;
    for term in &terms {
        writer.push(term)?;
    }
    let records = writer.finish()?;
    Ok(Some(ChunkHandle::new(path, 1, records)))
}

// ============================================================================
// Phase 2 helpers
// ============================================================================

fn merge_role(
    scratch: &ScratchDir,
    tag: &str,
    seeds: Vec<ChunkHandle>,
    merge: &MergeConfig,
) -> Result<Option<ChunkHandle>> {
    if seeds.is_empty() {
        return Ok(None);
    }
    ExternalSorter::new(&TermChunkFormat, scratch, tag, merge.clone()).run_seeded(seeds)
}

fn open_merged(chunk: &Option<ChunkHandle>) -> Result<Option<TermChunkReader>> {
    match chunk {
        Some(c) => Ok(Some(TermChunkReader::open(c.path())?)),
        None => Ok(None),
    }
}

// ============================================================================
// Phase 4 helper
// ============================================================================

fn materialize_role(
    mapper: crate::remap::BucketedTripleMapper,
    shared_offset: u64,
    triple_count: u64,
    table_path: &Path,
) -> Result<u64> {
    let mut writer = RemapTableWriter::create(table_path)?;
    mapper.materialize(shared_offset, triple_count, &mut writer)?;
    writer.finish()
}

// ============================================================================
// Phase 5: triple rewrite + sort
// ============================================================================

fn sort_mapped_triples(
    tables: &RemapTables,
    config: &BuildConfig,
    scratch: &ScratchDir,
    triples_path: &Path,
) -> Result<()> {
    let quads = config.quads;
    let n = tables.triple_count();
    let supplier = ElementSupplier::new(
        (1..=n).map(move |position| -> Result<TripleId> {
            Ok(TripleId::new_quad(
                tables.extract_id(TermRole::Subject, position)?,
                tables.extract_id(TermRole::Predicate, position)?,
                tables.extract_id(TermRole::Object, position)?,
                if quads {
                    tables.extract_id(TermRole::Graph, position)?
                } else {
                    0
                },
            ))
        }),
        64 * 1024,
    );

    let format = TripleChunkFormat {
        order: config.order,
        has_graph: quads,
    };
    let sorter = ExternalSorter::new(&format, scratch, "triples", config.merge.clone());
    match sorter.run(Some(&supplier), Vec::new())? {
        Some(chunk) => {
            move_file(chunk.path(), triples_path)?;
            let sidecar = crate::sort::chunk::range_sidecar_path(chunk.path());
            if sidecar.exists() {
                move_file(&sidecar, &crate::sort::chunk::range_sidecar_path(triples_path))?;
            }
        }
        None => {
            // Empty input still produces a structurally valid chunk.
            TripleChunkWriter::create(triples_path, quads)?.finish()?;
        }
    }
    Ok(())
}

/// Rename, falling back to copy + delete across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_err() {
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}
