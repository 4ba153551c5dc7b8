//! Bucketed remap spooling and materialized remap tables.

pub mod bucket;
pub mod table;

pub use bucket::{BucketConfig, BucketedTripleMapper};
pub use table::{RemapTable, RemapTableWriter, RemapTables};

use crate::dict::{RemapEvent, RemapSink};
use crate::error::{BuildError, Result};
use graphpress_core::TermRole;

/// One bucketed mapper per role, dispatching remap batches from the
/// dictionary builder to the right spool.
pub struct RoleMappers {
    pub subjects: BucketedTripleMapper,
    pub predicates: BucketedTripleMapper,
    pub objects: BucketedTripleMapper,
    pub graphs: Option<BucketedTripleMapper>,
}

impl RoleMappers {
    pub fn create(dir: &std::path::Path, quads: bool, config: &BucketConfig) -> Result<Self> {
        Ok(Self {
            subjects: BucketedTripleMapper::create(
                TermRole::Subject,
                &dir.join("subject"),
                config.clone(),
            )?,
            predicates: BucketedTripleMapper::create(
                TermRole::Predicate,
                &dir.join("predicate"),
                config.clone(),
            )?,
            objects: BucketedTripleMapper::create(
                TermRole::Object,
                &dir.join("object"),
                config.clone(),
            )?,
            graphs: if quads {
                Some(BucketedTripleMapper::create(
                    TermRole::Graph,
                    &dir.join("graph"),
                    config.clone(),
                )?)
            } else {
                None
            },
        })
    }
}

impl RemapSink for RoleMappers {
    fn on_batch(&mut self, role: TermRole, events: &[RemapEvent]) -> Result<()> {
        match role {
            TermRole::Subject => self.subjects.add_batch(events),
            TermRole::Predicate => self.predicates.add_batch(events),
            TermRole::Object => self.objects.add_batch(events),
            TermRole::Graph => match &mut self.graphs {
                Some(mapper) => mapper.add_batch(events),
                None => Err(BuildError::malformed(
                    "graph remap events on a triples-mode build",
                )),
            },
        }
    }
}
