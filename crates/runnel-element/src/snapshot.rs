//! Output records written at sync points, and the sink they go to.

use std::error::Error;
use std::fmt;
use std::io::{self, Read, Write};

use runnel_core::codec::{read_f64_le, read_u8, write_f64_le, write_u8, Decode, Encode};
use runnel_core::{CodecError, ElementId, RegionId};
use runnel_neighbor::ProxySnapshot;

use crate::groundwater::GroundwaterMode;

/// Variant-specific state in an [`ElementSnapshot`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ElementState {
    /// A mesh element.
    Mesh {
        /// Ponded depth (m).
        surface_depth: f64,
        /// Groundwater mode.
        mode: GroundwaterMode,
        /// Soil water-table elevation (m).
        soil_head: f64,
        /// Aquifer water-table elevation (m).
        aquifer_head: f64,
        /// Unsaturated-zone water (m).
        vadose_water: f64,
        /// Canopy store (m).
        canopy: f64,
        /// Snow water equivalent (m).
        snow: f64,
    },
    /// A channel reach.
    Channel {
        /// Water depth (m).
        depth: f64,
    },
}

/// One element at a sync point.
#[derive(Clone, Debug, PartialEq)]
pub struct ElementSnapshot {
    /// The element.
    pub element: ElementId,
    /// Storage state.
    pub state: ElementState,
    /// Water stored (m³).
    pub total_water: f64,
    /// Water-created ledger (m³).
    pub water_created: f64,
    /// Cumulative precipitation (m³).
    pub precipitation: f64,
    /// Cumulative evaporation (m³).
    pub evaporation: f64,
    /// Every edge.
    pub proxies: Vec<ProxySnapshot>,
}

/// Every element of one region at one sync point.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionSnapshot {
    /// The region.
    pub region: RegionId,
    /// Simulation time (s).
    pub time: f64,
    /// Elements in region order.
    pub elements: Vec<ElementSnapshot>,
}

impl RegionSnapshot {
    /// Sum of stored water (m³).
    pub fn total_water(&self) -> f64 {
        self.elements.iter().map(|e| e.total_water).sum()
    }

    /// Sum of water-created ledgers (m³).
    pub fn water_created(&self) -> f64 {
        self.elements.iter().map(|e| e.water_created).sum()
    }
}

// ── Sink ────────────────────────────────────────────────────────

/// Failure to write a snapshot.
#[derive(Debug)]
pub enum OutputError {
    /// The underlying writer failed.
    Io(io::Error),
    /// The snapshot could not be encoded.
    Codec(CodecError),
    /// The sink refused the snapshot.
    Rejected {
        /// Why.
        reason: String,
    },
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "output I/O error: {e}"),
            Self::Codec(e) => write!(f, "output encoding error: {e}"),
            Self::Rejected { reason } => write!(f, "output rejected: {reason}"),
        }
    }
}

impl Error for OutputError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Rejected { .. } => None,
        }
    }
}

impl From<io::Error> for OutputError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<CodecError> for OutputError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

/// Receives a [`RegionSnapshot`] at every sync point.
///
/// Each region owns its sink, so implementations need `Send` but not
/// `Sync`.
pub trait OutputSink: Send {
    /// Record one snapshot.
    fn write(&mut self, snapshot: &RegionSnapshot) -> Result<(), OutputError>;
}

/// Keeps every snapshot in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    /// Snapshots in arrival order.
    pub snapshots: Vec<RegionSnapshot>,
}

impl OutputSink for MemorySink {
    fn write(&mut self, snapshot: &RegionSnapshot) -> Result<(), OutputError> {
        self.snapshots.push(snapshot.clone());
        Ok(())
    }
}

// ── Codec ───────────────────────────────────────────────────────

impl Encode for ElementState {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        match self {
            Self::Mesh {
                surface_depth,
                mode,
                soil_head,
                aquifer_head,
                vadose_water,
                canopy,
                snow,
            } => {
                write_u8(w, 0)?;
                write_f64_le(w, *surface_depth)?;
                mode.encode(w)?;
                for v in [soil_head, aquifer_head, vadose_water, canopy, snow] {
                    write_f64_le(w, *v)?;
                }
                Ok(())
            }
            Self::Channel { depth } => {
                write_u8(w, 1)?;
                write_f64_le(w, *depth)
            }
        }
    }
}

impl Decode for ElementState {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        match read_u8(r)? {
            0 => Ok(Self::Mesh {
                surface_depth: read_f64_le(r)?,
                mode: GroundwaterMode::decode(r)?,
                soil_head: read_f64_le(r)?,
                aquifer_head: read_f64_le(r)?,
                vadose_water: read_f64_le(r)?,
                canopy: read_f64_le(r)?,
                snow: read_f64_le(r)?,
            }),
            1 => Ok(Self::Channel {
                depth: read_f64_le(r)?,
            }),
            tag => Err(CodecError::UnknownTag {
                what: "element state",
                tag,
            }),
        }
    }
}

impl Encode for ElementSnapshot {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        self.element.encode(w)?;
        self.state.encode(w)?;
        write_f64_le(w, self.total_water)?;
        write_f64_le(w, self.water_created)?;
        write_f64_le(w, self.precipitation)?;
        write_f64_le(w, self.evaporation)?;
        self.proxies.encode(w)
    }
}

impl Decode for ElementSnapshot {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(Self {
            element: ElementId::decode(r)?,
            state: ElementState::decode(r)?,
            total_water: read_f64_le(r)?,
            water_created: read_f64_le(r)?,
            precipitation: read_f64_le(r)?,
            evaporation: read_f64_le(r)?,
            proxies: Vec::decode(r)?,
        })
    }
}

impl Encode for RegionSnapshot {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        self.region.encode(w)?;
        write_f64_le(w, self.time)?;
        self.elements.encode(w)
    }
}

impl Decode for RegionSnapshot {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(Self {
            region: RegionId::decode(r)?,
            time: read_f64_le(r)?,
            elements: Vec::decode(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runnel_core::NeighborEndpoint;
    use runnel_neighbor::FlowLease;

    fn snapshot() -> RegionSnapshot {
        RegionSnapshot {
            region: RegionId(3),
            time: 3600.0,
            elements: vec![
                ElementSnapshot {
                    element: ElementId(1),
                    state: ElementState::Mesh {
                        surface_depth: 0.01,
                        mode: GroundwaterMode::PerchedWaterTable,
                        soil_head: 8.5,
                        aquifer_head: 6.0,
                        vadose_water: 0.1,
                        canopy: 0.001,
                        snow: 0.0,
                    },
                    total_water: 1200.0,
                    water_created: 1e-12,
                    precipitation: 5.0,
                    evaporation: 2.0,
                    proxies: vec![ProxySnapshot {
                        local_endpoint: NeighborEndpoint::MeshSurface,
                        remote_endpoint: NeighborEndpoint::ChannelSurface,
                        remote_element: ElementId(2),
                        lease: FlowLease::Negotiated {
                            rate: 0.25,
                            expiration: 4096.0,
                        },
                        cumulative_inflow: 0.0,
                        cumulative_outflow: 900.0,
                    }],
                },
                ElementSnapshot {
                    element: ElementId(2),
                    state: ElementState::Channel { depth: 1.5 },
                    total_water: 300.0,
                    water_created: -4.0,
                    precipitation: 0.0,
                    evaporation: 0.0,
                    proxies: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn totals_sum_elements() {
        let s = snapshot();
        assert_eq!(s.total_water(), 1500.0);
        assert!((s.water_created() + 4.0).abs() < 1e-9);
    }

    #[test]
    fn codec_round_trip() {
        let s = snapshot();
        let bytes = runnel_core::codec::to_bytes(&s).unwrap();
        assert_eq!(runnel_core::codec::from_bytes::<RegionSnapshot>(&bytes).unwrap(), s);
    }

    #[test]
    fn memory_sink_keeps_order() {
        let mut sink = MemorySink::default();
        let mut s = snapshot();
        sink.write(&s).unwrap();
        s.time = 7200.0;
        sink.write(&s).unwrap();
        let times: Vec<f64> = sink.snapshots.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![3600.0, 7200.0]);
    }
}
