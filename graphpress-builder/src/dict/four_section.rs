//! Streaming four-partition dictionary builder.
//!
//! Consumes the merged, per-role sorted `(term, position)` streams
//! produced by the external sorter. Subject and Object are merge-joined:
//! the lexicographically smaller head takes the next dense rank in its
//! dedicated partition, equal heads take the next Shared rank on both
//! sides. Every occurrence of an assigned term (the streams carry one
//! entry per occurrence) emits a remap event mapping its input position
//! to the section-tagged ID. Predicate and Graph are plain 1-based dense
//! renumberings.

use super::section::SectionWriter;
use super::{RemapEvent, RemapSink, REMAP_BATCH_LEN};
use crate::error::Result;
use crate::sort::MergeSource;
use graphpress_core::{DictId, IndexedTerm, TermRole};
use std::path::Path;

/// Per-section term counts of a finished dictionary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DictCounts {
    pub shared: u64,
    pub subjects: u64,
    pub predicates: u64,
    pub objects: u64,
    pub graphs: u64,
}

impl DictCounts {
    /// Size of the Shared block that precedes `role`'s dedicated
    /// partition in the final ID space.
    pub fn shared_offset(&self, role: TermRole) -> u64 {
        match role {
            TermRole::Subject | TermRole::Object => self.shared,
            TermRole::Predicate | TermRole::Graph => 0,
        }
    }

    /// Highest final ID assigned for `role`.
    pub fn max_id(&self, role: TermRole) -> u64 {
        match role {
            TermRole::Subject => self.shared + self.subjects,
            TermRole::Object => self.shared + self.objects,
            TermRole::Predicate => self.predicates,
            TermRole::Graph => self.graphs,
        }
    }
}

/// The merged input streams, one per role. `None` means the role had no
/// terms (empty input, or triples mode for `graphs`).
pub struct DictStreams<R: MergeSource<Item = IndexedTerm>> {
    pub subjects: Option<R>,
    pub predicates: Option<R>,
    pub objects: Option<R>,
    pub graphs: Option<R>,
}

// ============================================================================
// Batched emission
// ============================================================================

struct Emitter {
    role: TermRole,
    buf: Vec<RemapEvent>,
}

impl Emitter {
    fn new(role: TermRole) -> Self {
        Self {
            role,
            buf: Vec::with_capacity(REMAP_BATCH_LEN),
        }
    }

    fn emit<K: RemapSink + ?Sized>(
        &mut self,
        sink: &mut K,
        position: u64,
        id: DictId,
    ) -> Result<()> {
        self.buf.push(RemapEvent { position, id });
        if self.buf.len() >= REMAP_BATCH_LEN {
            self.flush(sink)?;
        }
        Ok(())
    }

    fn flush<K: RemapSink + ?Sized>(&mut self, sink: &mut K) -> Result<()> {
        if !self.buf.is_empty() {
            sink.on_batch(self.role, &self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }
}

/// Consume every consecutive occurrence of the stream's head term,
/// emitting one remap event per occurrence. Returns the term.
fn drain_term<R, K>(
    reader: &mut R,
    id: DictId,
    emitter: &mut Emitter,
    sink: &mut K,
) -> Result<Vec<u8>>
where
    R: MergeSource<Item = IndexedTerm>,
    K: RemapSink + ?Sized,
{
    let term = reader
        .peek()
        .expect("drain_term called on exhausted stream")
        .term
        .clone();
    loop {
        match reader.peek() {
            Some(entry) if entry.term == term => {
                let position = entry.position;
                emitter.emit(sink, position, id)?;
                reader.advance()?;
            }
            _ => break,
        }
    }
    Ok(term)
}

fn head_term<R: MergeSource<Item = IndexedTerm>>(reader: &Option<R>) -> Option<&[u8]> {
    reader
        .as_ref()
        .and_then(|r| r.peek())
        .map(|t| t.term.as_slice())
}

enum Side {
    Subject,
    Object,
    Both,
}

// ============================================================================
// Builder
// ============================================================================

/// Build the dictionary sections under `dict_dir` and stream remap
/// events into `sink`. Any upstream I/O error aborts the whole build
/// and propagates; partially written sections are not valid (their
/// trailers are missing and readers reject them).
pub fn build_four_section<R, K>(
    streams: DictStreams<R>,
    dict_dir: &Path,
    sink: &mut K,
) -> Result<DictCounts>
where
    R: MergeSource<Item = IndexedTerm>,
    K: RemapSink + ?Sized,
{
    std::fs::create_dir_all(dict_dir)?;
    let DictStreams {
        mut subjects,
        predicates,
        mut objects,
        graphs,
    } = streams;

    let mut shared_writer = SectionWriter::create(&dict_dir.join("shared.sec"))?;
    let mut subject_writer = SectionWriter::create(&dict_dir.join("subjects.sec"))?;
    let mut object_writer = SectionWriter::create(&dict_dir.join("objects.sec"))?;

    let mut subj_emit = Emitter::new(TermRole::Subject);
    let mut obj_emit = Emitter::new(TermRole::Object);

    let mut counts = DictCounts::default();
    let mut subj_rank = 0u64;
    let mut obj_rank = 0u64;

    loop {
        let side = match (head_term(&subjects), head_term(&objects)) {
            (None, None) => break,
            (Some(_), None) => Side::Subject,
            (None, Some(_)) => Side::Object,
            (Some(s), Some(o)) => match s.cmp(o) {
                std::cmp::Ordering::Less => Side::Subject,
                std::cmp::Ordering::Greater => Side::Object,
                std::cmp::Ordering::Equal => Side::Both,
            },
        };

        match side {
            Side::Subject => {
                subj_rank += 1;
                let id = DictId::section(subj_rank);
                let reader = subjects.as_mut().expect("subject head present");
                let term = drain_term(reader, id, &mut subj_emit, sink)?;
                subject_writer.push_term(&term)?;
            }
            Side::Object => {
                obj_rank += 1;
                let id = DictId::section(obj_rank);
                let reader = objects.as_mut().expect("object head present");
                let term = drain_term(reader, id, &mut obj_emit, sink)?;
                object_writer.push_term(&term)?;
            }
            Side::Both => {
                counts.shared += 1;
                let id = DictId::shared(counts.shared);
                let s_reader = subjects.as_mut().expect("subject head present");
                let term = drain_term(s_reader, id, &mut subj_emit, sink)?;
                let o_reader = objects.as_mut().expect("object head present");
                let o_term = drain_term(o_reader, id, &mut obj_emit, sink)?;
                debug_assert_eq!(term, o_term);
                shared_writer.push_term(&term)?;
            }
        }
    }

    subj_emit.flush(sink)?;
    obj_emit.flush(sink)?;
    counts.subjects = subj_rank;
    counts.objects = obj_rank;
    shared_writer.finish()?;
    subject_writer.finish()?;
    object_writer.finish()?;

    counts.predicates = build_plain_partition(
        predicates,
        TermRole::Predicate,
        &dict_dir.join("predicates.sec"),
        sink,
    )?;

    if graphs.is_some() {
        counts.graphs = build_plain_partition(
            graphs,
            TermRole::Graph,
            &dict_dir.join("graphs.sec"),
            sink,
        )?;
    }

    tracing::info!(
        shared = counts.shared,
        subjects = counts.subjects,
        predicates = counts.predicates,
        objects = counts.objects,
        graphs = counts.graphs,
        "dictionary sections built"
    );
    Ok(counts)
}

/// Dense 1-based renumbering for the single-partition roles.
fn build_plain_partition<R, K>(
    reader: Option<R>,
    role: TermRole,
    path: &Path,
    sink: &mut K,
) -> Result<u64>
where
    R: MergeSource<Item = IndexedTerm>,
    K: RemapSink + ?Sized,
{
    let mut writer = SectionWriter::create(path)?;
    let mut emitter = Emitter::new(role);
    let mut rank = 0u64;
    if let Some(mut reader) = reader {
        while reader.peek().is_some() {
            rank += 1;
            let id = DictId::section(rank);
            let term = drain_term(&mut reader, id, &mut emitter, sink)?;
            writer.push_term(&term)?;
        }
    }
    emitter.flush(sink)?;
    writer.finish()?;
    Ok(rank)
}
