//! Error types for the build pipeline.

use graphpress_core::TermRole;
use std::io;
use thiserror::Error;

/// Build pipeline errors.
///
/// The variants separate "bad data" from "bad logic": [`Malformed`] is
/// structurally invalid input (oversized varint, truncated frame, record
/// out of range), [`Corrupt`] is a checksum mismatch on an otherwise
/// well-formed stream, and [`MissingMapping`] signals an upstream bug
/// (an incomplete dictionary pass), not a data problem. None of these
/// are retried.
///
/// [`Malformed`]: BuildError::Malformed
/// [`Corrupt`]: BuildError::Corrupt
/// [`MissingMapping`]: BuildError::MissingMapping
#[derive(Error, Debug)]
pub enum BuildError {
    /// Structurally invalid input data.
    #[error("malformed data: {0}")]
    Malformed(String),

    /// Checksum mismatch on a framed stream segment.
    #[error("checksum mismatch in {context}")]
    Corrupt { context: String },

    /// A triple position had no recorded remap at materialization time.
    #[error("missing {role} mapping for triple position {position}")]
    MissingMapping { role: TermRole, position: u64 },

    /// I/O failure opening, reading, or writing a chunk/spool file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A merge worker failed; the message carries the primary error.
    #[error("worker failed: {0}")]
    Worker(String),
}

impl BuildError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn corrupt(context: impl Into<String>) -> Self {
        Self::Corrupt {
            context: context.into(),
        }
    }

    /// Classify an error coming out of the codec layer: `InvalidData`
    /// means structurally malformed bytes, everything else is a real
    /// I/O failure.
    pub fn from_codec(context: &str, e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                Self::Malformed(format!("{context}: {e}"))
            }
            _ => Self::Io(e),
        }
    }
}

/// Result type for build operations.
pub type Result<T> = std::result::Result<T, BuildError>;
