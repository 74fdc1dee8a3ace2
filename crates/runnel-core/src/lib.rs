//! Core types and traits for the Runnel water-routing engine.
//!
//! This is the leaf crate with zero internal dependencies. It defines the
//! value types every other crate agrees on: element and region ids, the
//! [`NeighborConnection`] edge key, the immutable [`NeighborAttributes`]
//! snapshot exchanged at initialization, [`WaterTransfer`], the error
//! taxonomy, and the explicit binary [`codec`] used for checkpoints and
//! element migration.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod attributes;
pub mod codec;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod id;
pub mod time;
pub mod transfer;

pub use attributes::{ChannelShape, EdgeGeometry, NeighborAttributes};
pub use codec::{Decode, Encode};
pub use connection::NeighborConnection;
pub use endpoint::NeighborEndpoint;
pub use error::{CodecError, InvariantError, TopologyError};
pub use id::{ElementId, RegionId};
pub use transfer::WaterTransfer;
