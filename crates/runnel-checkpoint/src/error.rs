//! Error types for checkpoint recording, playback, and restart.

use std::fmt;
use std::io;

use runnel_core::{CodecError, ElementId, RegionId};
use runnel_element::OutputError;

/// Errors that can occur while writing, reading, or restarting from a
/// checkpoint.
#[derive(Debug)]
pub enum CheckpointError {
    /// An I/O error occurred during read or write.
    Io(io::Error),
    /// A snapshot could not be encoded or decoded.
    Codec(CodecError),
    /// The file does not start with the expected `b"RNNL"` magic bytes.
    InvalidMagic,
    /// The format version is not supported by this build.
    UnsupportedVersion {
        /// The version found in the file.
        found: u8,
    },
    /// A frame could not be decoded (truncated or corrupt data).
    MalformedFrame {
        /// Human-readable description of what went wrong.
        detail: String,
    },
    /// A stored hash does not match the snapshot stored next to it.
    HashMismatch {
        /// Region of the corrupt frame.
        region: RegionId,
        /// Sync time of the corrupt frame.
        time: f64,
        /// Hash from the file.
        recorded: u64,
        /// Hash of the decoded snapshot.
        computed: u64,
    },
    /// The checkpoint was written for a different run configuration.
    ConfigMismatch {
        /// Hash from the checkpoint header.
        recorded: u64,
        /// Hash of the current configuration.
        current: u64,
    },
    /// Two regions of one checkpoint claim the same element.
    DuplicateElement {
        /// The repeated element.
        element: ElementId,
    },
    /// The shared writer is still held by a region.
    WriterInUse,
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::InvalidMagic => write!(f, "invalid magic bytes (expected b\"RNNL\")"),
            Self::UnsupportedVersion { found } => {
                write!(f, "unsupported format version {found}")
            }
            Self::MalformedFrame { detail } => write!(f, "malformed frame: {detail}"),
            Self::HashMismatch {
                region,
                time,
                recorded,
                computed,
            } => {
                write!(
                    f,
                    "snapshot hash mismatch for region {region} at t={time}: \
                     recorded={recorded:#018x}, computed={computed:#018x}"
                )
            }
            Self::ConfigMismatch { recorded, current } => {
                write!(
                    f,
                    "config hash mismatch: recorded={recorded:#018x}, current={current:#018x}"
                )
            }
            Self::DuplicateElement { element } => {
                write!(f, "element {element} appears in two regions")
            }
            Self::WriterInUse => write!(f, "checkpoint writer is still shared"),
        }
    }
}

impl std::error::Error for CheckpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CheckpointError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<CodecError> for CheckpointError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(io) => Self::Io(io),
            other => Self::Codec(other),
        }
    }
}

impl From<CheckpointError> for OutputError {
    fn from(e: CheckpointError) -> Self {
        match e {
            CheckpointError::Io(io) => OutputError::Io(io),
            CheckpointError::Codec(codec) => OutputError::Codec(codec),
            other => OutputError::Rejected {
                reason: other.to_string(),
            },
        }
    }
}
