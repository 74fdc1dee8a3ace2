//! Error types for the Runnel engine.
//!
//! Organized by the failure taxonomy: topology/consistency errors from
//! malformed input, invariant violations that signal a protocol defect,
//! and codec errors at the I/O boundary. All three are fatal to a run;
//! none is ever retried. Resource shortfalls (a sender without enough
//! water) are not errors at all and never appear here.

use std::error::Error;
use std::fmt;
use std::io;

use crate::connection::NeighborConnection;
use crate::endpoint::NeighborEndpoint;
use crate::id::{ElementId, RegionId};

/// Malformed or inconsistent topology.
#[derive(Clone, Debug, PartialEq)]
pub enum TopologyError {
    /// The endpoint kinds cannot be joined by an edge.
    IllegalEndpointPair {
        /// Local endpoint kind.
        local: NeighborEndpoint,
        /// Remote endpoint kind.
        remote: NeighborEndpoint,
    },
    /// An edge joins an element to itself.
    SelfLoop {
        /// The offending element.
        element: ElementId,
    },
    /// The local endpoint is not one this element variant can own.
    WrongElementKind {
        /// The offending connection.
        connection: NeighborConnection,
    },
    /// Two records describe the same element.
    DuplicateElement {
        /// The repeated element.
        element: ElementId,
    },
    /// Two records describe the same edge.
    DuplicateConnection {
        /// The repeated connection.
        connection: NeighborConnection,
    },
    /// An element present in one data source is missing from another.
    MissingElement {
        /// The missing element.
        element: ElementId,
        /// Which source lacks it.
        source: &'static str,
    },
    /// An edge present in one data source is missing from another.
    MissingConnection {
        /// The missing connection.
        connection: NeighborConnection,
        /// Which source lacks it.
        source: &'static str,
    },
    /// A message or record addressed an element this region does not own.
    UnknownElement {
        /// The unknown element.
        element: ElementId,
        /// The region that received the address.
        region: RegionId,
    },
    /// A message addressed an edge the element does not have.
    UnknownConnection {
        /// The connection in the receiver's frame.
        connection: NeighborConnection,
    },
    /// An element is claimed by more than one region.
    ElementInTwoRegions {
        /// The element.
        element: ElementId,
        /// First owner.
        first: RegionId,
        /// Second owner.
        second: RegionId,
    },
    /// A parameter value is unusable.
    InvalidParameter {
        /// The element the parameter belongs to.
        element: ElementId,
        /// Description of the problem.
        reason: String,
    },
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalEndpointPair { local, remote } => {
                write!(f, "illegal endpoint pair {local} -> {remote}")
            }
            Self::SelfLoop { element } => write!(f, "element {element} is its own neighbor"),
            Self::WrongElementKind { connection } => {
                write!(f, "endpoint kind not valid for element variant: {connection}")
            }
            Self::DuplicateElement { element } => write!(f, "duplicate element {element}"),
            Self::DuplicateConnection { connection } => {
                write!(f, "duplicate connection {connection}")
            }
            Self::MissingElement { element, source } => {
                write!(f, "element {element} missing from {source} data")
            }
            Self::MissingConnection { connection, source } => {
                write!(f, "connection {connection} missing from {source} data")
            }
            Self::UnknownElement { element, region } => {
                write!(f, "region {region} does not own element {element}")
            }
            Self::UnknownConnection { connection } => {
                write!(f, "no neighbor proxy for {connection}")
            }
            Self::ElementInTwoRegions {
                element,
                first,
                second,
            } => write!(
                f,
                "element {element} is owned by both region {first} and region {second}"
            ),
            Self::InvalidParameter { element, reason } => {
                write!(f, "element {element}: {reason}")
            }
        }
    }
}

impl Error for TopologyError {}

/// A protocol or state invariant was violated.
///
/// These indicate a logic defect or corrupted state, never a data
/// condition that could be retried.
#[derive(Clone, Debug, PartialEq)]
pub enum InvariantError {
    /// The remote side's view of an edge disagrees with ours.
    NeighborMismatch {
        /// The edge in the receiver's frame.
        connection: NeighborConnection,
        /// Which field disagreed.
        field: &'static str,
    },
    /// A recharge scratch accumulator was not fully resolved.
    UnresolvedRecharge {
        /// The element.
        element: ElementId,
        /// `"soil"` or `"aquifer"`.
        layer: &'static str,
        /// The residual value.
        value: f64,
    },
    /// The groundwater mode is not legal for the layers that exist.
    IllegalGroundwaterMode {
        /// The element.
        element: ElementId,
        /// Description of the problem.
        reason: String,
    },
    /// The region clock ordering was violated.
    ClockOrder {
        /// The region.
        region: RegionId,
        /// Description of the problem.
        reason: String,
    },
    /// A message arrived that the proxy's state machine cannot accept.
    UnexpectedMessage {
        /// The edge in the receiver's frame.
        connection: NeighborConnection,
        /// Description of the problem.
        reason: String,
    },
    /// Element state went out of physical bounds.
    StateOutOfBounds {
        /// The element.
        element: ElementId,
        /// Description of the problem.
        reason: String,
    },
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NeighborMismatch { connection, field } => {
                write!(f, "neighbor invariant mismatch on {connection}: {field}")
            }
            Self::UnresolvedRecharge {
                element,
                layer,
                value,
            } => write!(
                f,
                "element {element}: {layer} recharge not resolved ({value:e})"
            ),
            Self::IllegalGroundwaterMode { element, reason } => {
                write!(f, "element {element}: illegal groundwater mode: {reason}")
            }
            Self::ClockOrder { region, reason } => {
                write!(f, "region {region}: clock invariant violated: {reason}")
            }
            Self::UnexpectedMessage { connection, reason } => {
                write!(f, "unexpected message on {connection}: {reason}")
            }
            Self::StateOutOfBounds { element, reason } => {
                write!(f, "element {element}: state out of bounds: {reason}")
            }
        }
    }
}

impl Error for InvariantError {}

/// Errors from the explicit binary codec.
#[derive(Debug)]
pub enum CodecError {
    /// An I/O error occurred during read or write.
    Io(io::Error),
    /// Data could not be decoded (truncated or corrupt).
    Malformed {
        /// Human-readable description of what went wrong.
        detail: String,
    },
    /// An enum tag is not recognized.
    UnknownTag {
        /// What was being decoded.
        what: &'static str,
        /// The unrecognized tag.
        tag: u8,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Malformed { detail } => write!(f, "malformed data: {detail}"),
            Self::UnknownTag { what, tag } => write!(f, "unknown {what} tag {tag}"),
        }
    }
}

impl Error for CodecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
