//! External-memory construction pipeline for compact binary RDF
//! encodings.
//!
//! The pipeline turns an unbounded stream of line-oriented triple/quad
//! text into a four-section term dictionary, per-role position→id remap
//! tables, and one sorted triple-ID chunk, using bounded memory
//! regardless of input size:
//!
//! 1. [`text`] — chunked, lazily parsed input (buffered-line or
//!    memory-mapped mode);
//! 2. [`sort`] — a generic bounded-concurrency external k-way
//!    merge-sort over spillable chunk formats;
//! 3. [`dict`] — the streaming Shared/Subject/Predicate/Object/Graph
//!    dictionary split with batched remap-event emission;
//! 4. [`remap`] — the bucketed, write-batched remapper that turns
//!    term-sorted ID assignments into position-indexed tables with
//!    strictly sequential I/O;
//! 5. [`pipeline`] — the end-to-end driver.
//!
//! The downstream adjacency-list index builder consumes
//! [`remap::RemapTables`] and the sorted triple chunk; it is not part of
//! this crate.

pub mod dict;
pub mod error;
pub mod pipeline;
pub mod remap;
pub mod sort;
pub mod text;

pub use error::{BuildError, Result};
pub use pipeline::{build, BuildConfig, BuildResult};
