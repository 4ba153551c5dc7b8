//! Four-partition dictionary construction.
//!
//! [`four_section::build_four_section`] consumes the merged per-role
//! term streams, splits Subject/Object into Shared / Subject-only /
//! Object-only partitions, assigns dense IDs, writes the section files
//! ([`section`]), and emits one [`RemapEvent`] per term occurrence
//! through a batched [`RemapSink`].

pub mod four_section;
pub mod section;

use crate::error::Result;
use graphpress_core::{DictId, TermRole};

pub use four_section::{build_four_section, DictCounts, DictStreams};
pub use section::{SectionReader, SectionWriter};

/// One ID assignment: the 1-based input position of a term occurrence
/// and the section-tagged dictionary ID it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapEvent {
    pub position: u64,
    pub id: DictId,
}

/// Batched consumer of remap events. Within one role, batches arrive in
/// assignment order; ordering across roles is independent.
pub trait RemapSink {
    fn on_batch(&mut self, role: TermRole, events: &[RemapEvent]) -> Result<()>;

    /// Single-event convenience, defined in terms of the batched form.
    fn on_event(&mut self, role: TermRole, event: RemapEvent) -> Result<()> {
        self.on_batch(role, std::slice::from_ref(&event))
    }
}

/// Remap events are delivered in groups of this size to amortize the
/// callback overhead.
pub const REMAP_BATCH_LEN: usize = 1024;
