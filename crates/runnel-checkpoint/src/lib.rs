//! Binary checkpoint files for Runnel simulations.
//!
//! Every sync point each region hands its [`RegionSnapshot`] to an
//! [`OutputSink`]. This crate provides the file-backed sink, the matching
//! reader, and the tools built on top of it: a per-snapshot FNV-1a hash
//! for determinism checks, a field-level comparison for diagnosing a
//! divergence, and [`restart_states`] for starting a new run from the last
//! checkpoint.
//!
//! # Architecture
//!
//! - [`CheckpointWriter`] records frames to any `Write` sink
//! - [`SharedCheckpointWriter`] lets every region of a run write to one file
//! - [`CheckpointReader`] plays frames back from any `Read` source
//! - [`compare_snapshot`] explains why two snapshots hash differently
//! - All I/O uses the hand-written codec from `runnel-core` (no serde)
//!
//! # Format
//!
//! ```text
//! [MAGIC "RNNL"] [VERSION u8] [CheckpointHeader]
//! [Frame 1] [Frame 2] ... [Frame N]
//! ```
//!
//! Each frame holds one region's snapshot at one sync point and the
//! FNV-1a hash of that snapshot.
//!
//! [`RegionSnapshot`]: runnel_element::RegionSnapshot
//! [`OutputSink`]: runnel_element::OutputSink

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod compare;
pub mod error;
pub mod hash;
pub mod reader;
pub mod restart;
pub mod types;
pub mod writer;

pub use compare::{compare_snapshot, DivergenceKind, DivergenceReport, ElementDivergence};
pub use error::CheckpointError;
pub use hash::{config_hash, snapshot_hash};
pub use reader::{CheckpointReader, FrameIter};
pub use restart::{latest_snapshots, restart_states};
pub use types::{CheckpointHeader, Frame};
pub use writer::{CheckpointWriter, SharedCheckpointWriter};

/// Magic bytes at the start of every checkpoint file.
pub const MAGIC: [u8; 4] = *b"RNNL";

/// Current binary format version.
pub const FORMAT_VERSION: u8 = 1;
