//! Messages exchanged across edges, and the batches that carry them
//! between regions.

use std::io::{Read, Write};

use runnel_core::codec::{read_f64_le, read_u8, write_f64_le, write_u8, Decode, Encode};
use runnel_core::{
    CodecError, EdgeGeometry, NeighborAttributes, NeighborConnection, RegionId, WaterTransfer,
};

use crate::lease::FlowLease;

/// What one side of an edge believes about it at a sync point.
///
/// The receiver compares the report against its own view of the same edge
/// once it reaches the same simulation time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InvariantReport {
    /// Simulation time the report describes (s).
    pub time: f64,
    /// The sender's own attributes.
    pub attributes: NeighborAttributes,
    /// The sender's cached copy of the receiver's attributes.
    pub remote_attributes: NeighborAttributes,
    /// Edge geometry in the sender's frame.
    pub geometry: EdgeGeometry,
    /// The sender's lease.
    pub lease: FlowLease,
    /// Total water the sender has sent across the edge (m³).
    pub cumulative_outflow: f64,
    /// Total water the sender has received across the edge (m³).
    pub cumulative_inflow: f64,
}

/// A message addressed to one neighbor proxy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Message {
    /// The sender's attributes, sent once at initialization.
    Neighbor(NeighborAttributes),
    /// The sender's level at `time`, sent when the edge's lease expires.
    State {
        /// Simulation time of the level (s).
        time: f64,
        /// Depth or head (m).
        level: f64,
    },
    /// Water for one interval.
    Water(WaterTransfer),
    /// Full invariant cross-check.
    Invariant(InvariantReport),
}

impl Message {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Neighbor(_) => "neighbor",
            Self::State { .. } => "state",
            Self::Water(_) => "water",
            Self::Invariant(_) => "invariant",
        }
    }
}

/// A message together with the edge it travels along.
///
/// `connection` is in the sender's frame. The receiver looks the proxy up
/// by [`receiver_connection`](Self::receiver_connection).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    /// Edge in the sender's frame.
    pub connection: NeighborConnection,
    /// Payload.
    pub message: Message,
}

impl Envelope {
    /// Wrap `message` for delivery along `connection`.
    pub fn new(connection: NeighborConnection, message: Message) -> Self {
        Self {
            connection,
            message,
        }
    }

    /// The edge in the receiver's frame.
    pub fn receiver_connection(&self) -> NeighborConnection {
        self.connection.reverse()
    }
}

/// All messages from one region to another produced in one turn.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageBatch {
    /// Sending region.
    pub from: RegionId,
    /// Destination region.
    pub to: RegionId,
    /// Envelopes in emission order.
    pub envelopes: Vec<Envelope>,
}

impl MessageBatch {
    /// An empty batch.
    pub fn new(from: RegionId, to: RegionId) -> Self {
        Self {
            from,
            to,
            envelopes: Vec::new(),
        }
    }

    /// Number of envelopes.
    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    /// Whether the batch carries nothing.
    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }
}

// ── Codec ───────────────────────────────────────────────────────

impl Encode for InvariantReport {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_f64_le(w, self.time)?;
        self.attributes.encode(w)?;
        self.remote_attributes.encode(w)?;
        self.geometry.encode(w)?;
        self.lease.encode(w)?;
        write_f64_le(w, self.cumulative_outflow)?;
        write_f64_le(w, self.cumulative_inflow)
    }
}

impl Decode for InvariantReport {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(Self {
            time: read_f64_le(r)?,
            attributes: NeighborAttributes::decode(r)?,
            remote_attributes: NeighborAttributes::decode(r)?,
            geometry: EdgeGeometry::decode(r)?,
            lease: FlowLease::decode(r)?,
            cumulative_outflow: read_f64_le(r)?,
            cumulative_inflow: read_f64_le(r)?,
        })
    }
}

impl Encode for Message {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        match self {
            Self::Neighbor(attrs) => {
                write_u8(w, 0)?;
                attrs.encode(w)
            }
            Self::State { time, level } => {
                write_u8(w, 1)?;
                write_f64_le(w, *time)?;
                write_f64_le(w, *level)
            }
            Self::Water(transfer) => {
                write_u8(w, 2)?;
                transfer.encode(w)
            }
            Self::Invariant(report) => {
                write_u8(w, 3)?;
                report.encode(w)
            }
        }
    }
}

impl Decode for Message {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        match read_u8(r)? {
            0 => Ok(Self::Neighbor(NeighborAttributes::decode(r)?)),
            1 => Ok(Self::State {
                time: read_f64_le(r)?,
                level: read_f64_le(r)?,
            }),
            2 => Ok(Self::Water(WaterTransfer::decode(r)?)),
            3 => Ok(Self::Invariant(InvariantReport::decode(r)?)),
            tag => Err(CodecError::UnknownTag {
                what: "message",
                tag,
            }),
        }
    }
}

impl Encode for Envelope {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        self.connection.encode(w)?;
        self.message.encode(w)
    }
}

impl Decode for Envelope {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(Self {
            connection: NeighborConnection::decode(r)?,
            message: Message::decode(r)?,
        })
    }
}

impl Encode for MessageBatch {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        self.from.encode(w)?;
        self.to.encode(w)?;
        self.envelopes.encode(w)
    }
}

impl Decode for MessageBatch {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(Self {
            from: RegionId::decode(r)?,
            to: RegionId::decode(r)?,
            envelopes: Vec::<Envelope>::decode(r)?,
        })
    }
}
