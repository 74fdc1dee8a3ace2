//! Atmospheric forcing and water entering across the domain boundary.

use std::io::{Read, Write};

use runnel_core::codec::{read_f64_le, write_f64_le, Decode, Encode};
use indexmap::IndexMap;

use runnel_core::{CodecError, ElementId, NeighborConnection};

/// Atmospheric conditions over one element, held constant between sync
/// points.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Forcing {
    /// Precipitation rate (m/s of water).
    pub precipitation: f64,
    /// Air temperature (°C).
    pub temperature: f64,
    /// Potential evaporation rate (m/s of water).
    pub potential_evaporation: f64,
}

/// Supplies forcing for any element at any time.
///
/// Regions query it at every sync point. Implementations must be pure:
/// the same arguments always give the same answer.
pub trait ForcingSource: Send + Sync {
    /// Forcing for `element` from `time` until the next sync point.
    fn forcing(&self, element: ElementId, time: f64) -> Forcing;

    /// Rate (m³/s) at which water enters across the boundary or
    /// transbasin inflow edge `connection` from `time` until the next
    /// sync point. Nothing enters by default.
    fn boundary_inflow(&self, _connection: &NeighborConnection, _time: f64) -> f64 {
        0.0
    }
}

/// The same forcing everywhere, forever.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ConstantForcing(pub Forcing);

impl ForcingSource for ConstantForcing {
    fn forcing(&self, _element: ElementId, _time: f64) -> Forcing {
        self.0
    }
}

/// Uniform forcing plus fixed inflow rates on chosen boundary edges.
///
/// Edges are keyed in the frame of the element that owns them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FixedInflows {
    /// Forcing applied to every element.
    pub atmosphere: Forcing,
    /// Inflow rate per edge (m³/s).
    pub rates: IndexMap<NeighborConnection, f64>,
}

impl FixedInflows {
    /// No inflows under `atmosphere`.
    pub fn new(atmosphere: Forcing) -> Self {
        Self {
            atmosphere,
            rates: IndexMap::new(),
        }
    }

    /// Add an inflow of `rate` across `connection`.
    pub fn with_inflow(mut self, connection: NeighborConnection, rate: f64) -> Self {
        self.rates.insert(connection, rate);
        self
    }
}

impl ForcingSource for FixedInflows {
    fn forcing(&self, _element: ElementId, _time: f64) -> Forcing {
        self.atmosphere
    }

    fn boundary_inflow(&self, connection: &NeighborConnection, _time: f64) -> f64 {
        self.rates.get(connection).copied().unwrap_or(0.0)
    }
}

impl Encode for Forcing {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_f64_le(w, self.precipitation)?;
        write_f64_le(w, self.temperature)?;
        write_f64_le(w, self.potential_evaporation)
    }
}

impl Decode for Forcing {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(Self {
            precipitation: read_f64_le(r)?,
            temperature: read_f64_le(r)?,
            potential_evaporation: read_f64_le(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runnel_core::NeighborEndpoint;

    #[test]
    fn fixed_inflows_answer_only_for_listed_edges() {
        let gauged = NeighborConnection::one_way(
            NeighborEndpoint::ChannelSurface,
            ElementId(3),
            NeighborEndpoint::BoundaryInflow,
        )
        .unwrap();
        let other = NeighborConnection::one_way(
            NeighborEndpoint::ChannelSurface,
            ElementId(4),
            NeighborEndpoint::BoundaryInflow,
        )
        .unwrap();
        let source = FixedInflows::new(Forcing::default()).with_inflow(gauged, 1.5);
        assert_eq!(source.boundary_inflow(&gauged, 0.0), 1.5);
        assert_eq!(source.boundary_inflow(&other, 0.0), 0.0);
        assert_eq!(ConstantForcing::default().boundary_inflow(&gauged, 0.0), 0.0);
    }
}
