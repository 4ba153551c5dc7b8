//! Core primitives shared by the graphpress build pipeline.
//!
//! This crate holds the leaf-level pieces every on-disk structure is
//! serialized through: the stop-bit variable-length integer codec
//! ([`varint`]), the CRC-framed buffered stream wrappers ([`crc`]), and
//! the triple/term value types with their configurable sort-key
//! permutations ([`triple`]).

pub mod crc;
pub mod triple;
pub mod varint;

pub use crc::{CrcReader, CrcWriter};
pub use triple::{DictId, IndexedTerm, TermRole, TripleId, TripleOrder};
