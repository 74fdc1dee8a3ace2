//! The [`NeighborConnection`] edge key.

use std::fmt;

use crate::endpoint::NeighborEndpoint;
use crate::error::TopologyError;
use crate::id::ElementId;

/// One edge of the simulation graph, seen from one endpoint.
///
/// The derived [`Ord`] compares `local_endpoint`, `local_element`,
/// `remote_endpoint`, `remote_element` in that order, giving a strict
/// total order suitable for keying an ordered map. The same physical edge
/// seen from the other side is [`reverse()`](Self::reverse).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NeighborConnection {
    /// Container kind on this side.
    pub local_endpoint: NeighborEndpoint,
    /// Element on this side.
    pub local_element: ElementId,
    /// Container kind on the far side.
    pub remote_endpoint: NeighborEndpoint,
    /// Element on the far side. For one-way remotes this is
    /// conventionally equal to `local_element`.
    pub remote_element: ElementId,
}

impl NeighborConnection {
    /// Build a connection, rejecting illegal endpoint pairs.
    pub fn new(
        local_endpoint: NeighborEndpoint,
        local_element: ElementId,
        remote_endpoint: NeighborEndpoint,
        remote_element: ElementId,
    ) -> Result<Self, TopologyError> {
        if !local_endpoint.can_pair_with(remote_endpoint) {
            return Err(TopologyError::IllegalEndpointPair {
                local: local_endpoint,
                remote: remote_endpoint,
            });
        }
        if !remote_endpoint.is_one_way() && local_element == remote_element {
            return Err(TopologyError::SelfLoop {
                element: local_element,
            });
        }
        Ok(Self {
            local_endpoint,
            local_element,
            remote_endpoint,
            remote_element,
        })
    }

    /// An edge to a boundary-like remote with no element behind it.
    pub fn one_way(
        local_endpoint: NeighborEndpoint,
        local_element: ElementId,
        remote_endpoint: NeighborEndpoint,
    ) -> Result<Self, TopologyError> {
        if !remote_endpoint.is_one_way() {
            return Err(TopologyError::IllegalEndpointPair {
                local: local_endpoint,
                remote: remote_endpoint,
            });
        }
        Self::new(local_endpoint, local_element, remote_endpoint, local_element)
    }

    /// The same edge as seen from the remote side.
    ///
    /// Used exactly once per message, when it crosses from the sender's
    /// frame to the receiver's frame.
    pub fn reverse(&self) -> Self {
        Self {
            local_endpoint: self.remote_endpoint,
            local_element: self.remote_element,
            remote_endpoint: self.local_endpoint,
            remote_element: self.local_element,
        }
    }

    /// Whether `other` names the same physical edge from the opposite side.
    pub fn is_reverse_of(&self, other: &Self) -> bool {
        self.reverse() == *other
    }

    /// Whether this edge has no real remote.
    pub fn is_one_way(&self) -> bool {
        self.remote_endpoint.is_one_way()
    }

    /// Whether this side is a pinned, never-negotiating recipient.
    pub fn is_recipient(&self) -> bool {
        self.local_endpoint == NeighborEndpoint::ReservoirRecipient
    }

    /// Whether the remote side is a pinned recipient. Such a remote never
    /// renegotiates, so it waits for a water message every step.
    pub fn feeds_recipient(&self) -> bool {
        self.remote_endpoint == NeighborEndpoint::ReservoirRecipient
    }

    /// Whether the two sides exchange attributes and negotiate a rate by
    /// message. False for one-way and reservoir edges.
    pub fn negotiates(&self) -> bool {
        !self.is_one_way() && !self.local_endpoint.is_reservoir()
    }

    /// Whether `(local_endpoint, local_element)` sorts before the remote
    /// pair. Flow rates are evaluated once from the canonical side and
    /// negated on the other, so both sides agree bit for bit.
    pub fn is_canonical_side(&self) -> bool {
        (self.local_endpoint, self.local_element) <= (self.remote_endpoint, self.remote_element)
    }
}

impl fmt::Display for NeighborConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} -> {}#{}",
            self.local_endpoint, self.local_element, self.remote_endpoint, self.remote_element
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mesh_pair(a: u32, b: u32) -> NeighborConnection {
        NeighborConnection::new(
            NeighborEndpoint::MeshSurface,
            ElementId(a),
            NeighborEndpoint::MeshSurface,
            ElementId(b),
        )
        .unwrap()
    }

    #[test]
    fn reverse_swaps_sides() {
        let c = NeighborConnection::new(
            NeighborEndpoint::MeshSurface,
            ElementId(1),
            NeighborEndpoint::ChannelSurface,
            ElementId(9),
        )
        .unwrap();
        let r = c.reverse();
        assert_eq!(r.local_endpoint, NeighborEndpoint::ChannelSurface);
        assert_eq!(r.local_element, ElementId(9));
        assert_eq!(r.remote_endpoint, NeighborEndpoint::MeshSurface);
        assert_eq!(r.remote_element, ElementId(1));
        assert!(c.is_reverse_of(&r));
        assert_eq!(r.reverse(), c);
    }

    #[test]
    fn illegal_pair_rejected() {
        let err = NeighborConnection::new(
            NeighborEndpoint::BoundaryInflow,
            ElementId(1),
            NeighborEndpoint::MeshSurface,
            ElementId(2),
        )
        .unwrap_err();
        assert!(matches!(err, TopologyError::IllegalEndpointPair { .. }));
    }

    #[test]
    fn self_loop_rejected() {
        let err = NeighborConnection::new(
            NeighborEndpoint::MeshSurface,
            ElementId(3),
            NeighborEndpoint::MeshSurface,
            ElementId(3),
        )
        .unwrap_err();
        assert_eq!(err, TopologyError::SelfLoop { element: ElementId(3) });
    }

    #[test]
    fn one_way_requires_boundary_remote() {
        assert!(NeighborConnection::one_way(
            NeighborEndpoint::MeshSurface,
            ElementId(1),
            NeighborEndpoint::BoundaryOutflow
        )
        .is_ok());
        assert!(NeighborConnection::one_way(
            NeighborEndpoint::MeshSurface,
            ElementId(1),
            NeighborEndpoint::MeshSurface
        )
        .is_err());
    }

    #[test]
    fn exactly_one_side_is_canonical() {
        let c = mesh_pair(4, 7);
        assert!(c.is_canonical_side());
        assert!(!c.reverse().is_canonical_side());
    }

    #[test]
    fn reservoir_and_boundary_edges_do_not_negotiate() {
        assert!(mesh_pair(1, 2).negotiates());
        let reservoir = NeighborConnection::new(
            NeighborEndpoint::ReservoirRecipient,
            ElementId(1),
            NeighborEndpoint::ReservoirRelease,
            ElementId(2),
        )
        .unwrap();
        assert!(!reservoir.negotiates());
        assert!(!reservoir.reverse().negotiates());
        assert!(reservoir.reverse().feeds_recipient());
        assert!(!reservoir.feeds_recipient());
        let outlet = NeighborConnection::one_way(
            NeighborEndpoint::ChannelSurface,
            ElementId(1),
            NeighborEndpoint::BoundaryOutflow,
        )
        .unwrap();
        assert!(!outlet.negotiates());
    }

    proptest! {
        #[test]
        fn reverse_is_involution(a in 0u32..1000, b in 0u32..1000) {
            prop_assume!(a != b);
            let c = mesh_pair(a, b);
            prop_assert_eq!(c.reverse().reverse(), c);
            prop_assert!(c.is_canonical_side() != c.reverse().is_canonical_side());
        }
    }
}
