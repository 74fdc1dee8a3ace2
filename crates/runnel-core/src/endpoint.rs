//! Endpoint kinds for the two ends of a neighbor edge.

use std::fmt;

/// The kind of container at one end of an edge.
///
/// Declaration order is significant: it defines the [`Ord`] used to key
/// proxy maps and to pick the canonical side of an edge when computing a
/// flow rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NeighborEndpoint {
    /// Water enters the domain across the outer boundary.
    BoundaryInflow,
    /// Water leaves the domain across the outer boundary.
    BoundaryOutflow,
    /// Water is piped in from another basin.
    TransbasinInflow,
    /// Water is piped out to another basin.
    TransbasinOutflow,
    /// Overland water on a mesh element.
    MeshSurface,
    /// Saturated water in the soil layer of a mesh element.
    MeshSoil,
    /// Saturated water in the aquifer layer of a mesh element.
    MeshAquifer,
    /// Water in a channel link.
    ChannelSurface,
    /// The releasing side of a reservoir outlet.
    ReservoirRelease,
    /// A channel receiving reservoir releases. Never negotiates a rate.
    ReservoirRecipient,
}

impl NeighborEndpoint {
    /// All endpoint kinds in declaration order.
    pub const ALL: [NeighborEndpoint; 10] = [
        Self::BoundaryInflow,
        Self::BoundaryOutflow,
        Self::TransbasinInflow,
        Self::TransbasinOutflow,
        Self::MeshSurface,
        Self::MeshSoil,
        Self::MeshAquifer,
        Self::ChannelSurface,
        Self::ReservoirRelease,
        Self::ReservoirRecipient,
    ];

    /// Whether this kind has no real element behind it.
    ///
    /// One-way kinds are legal only as a remote endpoint. Edges to them
    /// never exchange messages; the local element computes the flow alone.
    pub fn is_one_way(self) -> bool {
        matches!(
            self,
            Self::BoundaryInflow
                | Self::BoundaryOutflow
                | Self::TransbasinInflow
                | Self::TransbasinOutflow
        )
    }

    /// Whether water arrives from outside the domain across this kind.
    pub fn is_boundary_inflow(self) -> bool {
        matches!(self, Self::BoundaryInflow | Self::TransbasinInflow)
    }

    /// Whether this kind may appear as the local endpoint of a mesh element.
    pub fn is_mesh_local(self) -> bool {
        matches!(self, Self::MeshSurface | Self::MeshSoil | Self::MeshAquifer)
    }

    /// Whether this kind may appear as the local endpoint of a channel element.
    pub fn is_channel_local(self) -> bool {
        matches!(
            self,
            Self::ChannelSurface | Self::ReservoirRelease | Self::ReservoirRecipient
        )
    }

    /// Whether edges of this kind are reservoir outlets.
    ///
    /// The release side computes its rate alone and the recipient is
    /// pinned, so these edges never exchange state messages.
    pub fn is_reservoir(self) -> bool {
        matches!(self, Self::ReservoirRelease | Self::ReservoirRecipient)
    }

    /// Whether `(self, remote)` is a legal `(local, remote)` pairing.
    pub fn can_pair_with(self, remote: NeighborEndpoint) -> bool {
        use NeighborEndpoint::*;
        match self {
            MeshSurface => matches!(
                remote,
                MeshSurface
                    | ChannelSurface
                    | BoundaryInflow
                    | BoundaryOutflow
                    | TransbasinInflow
                    | TransbasinOutflow
            ),
            MeshSoil => matches!(
                remote,
                MeshSoil | ChannelSurface | BoundaryInflow | BoundaryOutflow
            ),
            MeshAquifer => matches!(
                remote,
                MeshAquifer | ChannelSurface | BoundaryInflow | BoundaryOutflow
            ),
            ChannelSurface => matches!(
                remote,
                ChannelSurface
                    | MeshSurface
                    | MeshSoil
                    | MeshAquifer
                    | BoundaryInflow
                    | BoundaryOutflow
                    | TransbasinInflow
                    | TransbasinOutflow
            ),
            ReservoirRecipient => remote == ReservoirRelease,
            ReservoirRelease => remote == ReservoirRecipient,
            BoundaryInflow | BoundaryOutflow | TransbasinInflow | TransbasinOutflow => false,
        }
    }

    /// Stable one-byte tag used by the binary codec.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Inverse of [`tag`](Self::tag).
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(usize::from(tag)).copied()
    }
}

impl fmt::Display for NeighborEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BoundaryInflow => "BOUNDARY_INFLOW",
            Self::BoundaryOutflow => "BOUNDARY_OUTFLOW",
            Self::TransbasinInflow => "TRANSBASIN_INFLOW",
            Self::TransbasinOutflow => "TRANSBASIN_OUTFLOW",
            Self::MeshSurface => "MESH_SURFACE",
            Self::MeshSoil => "MESH_SOIL",
            Self::MeshAquifer => "MESH_AQUIFER",
            Self::ChannelSurface => "CHANNEL_SURFACE",
            Self::ReservoirRelease => "RESERVOIR_RELEASE",
            Self::ReservoirRecipient => "RESERVOIR_RECIPIENT",
        };
        f.write_str(name)
    }
}
