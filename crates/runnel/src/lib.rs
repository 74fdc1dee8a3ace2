//! Runnel: distributed surface and groundwater routing with negotiated,
//! mass-conserving edge flows.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all Runnel sub-crates. For most users, adding `runnel` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use runnel::prelude::*;
//!
//! fn hillslope(id: u32, x: f64, ground: f64, depth: f64) -> Element {
//!     let params = MeshParameters {
//!         x,
//!         y: 0.0,
//!         ground,
//!         area: 1.0e4,
//!         manning_n: 0.04,
//!         soil: None,
//!         aquifer: Some(LayerParameters {
//!             bottom: ground - 10.0,
//!             top: ground - 1.0,
//!             porosity: 0.2,
//!             conductivity: 1.0e-5,
//!         }),
//!         vadose_porosity: 0.3,
//!     };
//!     let initial = MeshInitialState {
//!         surface_depth: depth,
//!         aquifer_head: ground - 5.0,
//!         ..MeshInitialState::default()
//!     };
//!     MeshElement::new(ElementId(id), &params, &initial).unwrap().into()
//! }
//!
//! // Two meshes side by side, the upper one ponded.
//! let mut upper = hillslope(1, 0.0, 10.0, 0.5);
//! let mut lower = hillslope(2, 100.0, 9.5, 0.0);
//! let edge = NeighborConnection::new(
//!     NeighborEndpoint::MeshSurface,
//!     upper.id(),
//!     NeighborEndpoint::MeshSurface,
//!     lower.id(),
//! )
//! .unwrap();
//! let geometry = EdgeGeometry { length: 100.0, normal_x: 1.0, normal_y: 0.0, z_offset: 0.0 };
//! upper.add_proxy(NeighborProxy::new(edge, RegionId(0), geometry, 0.0)).unwrap();
//! lower
//!     .add_proxy(NeighborProxy::new(edge.reverse(), RegionId(0), geometry.reverse(), 0.0))
//!     .unwrap();
//!
//! let config = SimulationConfig {
//!     simulation_end: 3600.0,
//!     sync_interval: 3600.0,
//!     ..SimulationConfig::default()
//! };
//! let region = Region::new(RegionId(0), vec![upper, lower], &config, Physics::default()).unwrap();
//! let mut sim = LockstepSimulation::new(vec![region]).unwrap();
//! let before = sim.budget().initial_water();
//! let report = sim.run().unwrap();
//!
//! // Water moved downhill and none was lost.
//! let lower = sim.region(RegionId(0)).unwrap().element(ElementId(2)).unwrap();
//! assert!(lower.total_water() > 0.0);
//! assert!((report.budget.initial_water() - before).abs() < 1e-9 * before);
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `runnel-core` | IDs, endpoints, connections, codec, error types |
//! | [`neighbor`] | `runnel-neighbor` | Neighbor proxies, leases, messages |
//! | [`element`] | `runnel-element` | Mesh and channel elements, physics contracts, snapshots |
//! | [`engine`] | `runnel-engine` | Regions, topology assembly, runners |
//! | [`checkpoint`] | `runnel-checkpoint` | Checkpoint files, hashing, restart |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, IDs, and the binary codec (`runnel-core`).
///
/// Contains [`types::ElementId`], [`types::RegionId`], the
/// [`types::NeighborEndpoint`] kinds and the error taxonomy.
pub use runnel_core as types;

/// Edge-local negotiation state (`runnel-neighbor`).
///
/// [`neighbor::NeighborProxy`] holds one side of an edge: its lease,
/// pending transfers and cumulative totals.
pub use runnel_neighbor as neighbor;

/// Water containers and their physics (`runnel-element`).
///
/// [`element::MeshElement`] and [`element::ChannelElement`], the
/// [`element::LandSurface`] and [`element::VadoseSolver`] contracts, and
/// the [`element::OutputSink`] snapshots are written to.
pub use runnel_element as element;

/// Regions and runners (`runnel-engine`).
///
/// [`engine::LockstepSimulation`] steps every region on one thread,
/// [`engine::ThreadedSimulation`] gives each region its own thread.
pub use runnel_engine as engine;

/// Checkpoint recording and restart (`runnel-checkpoint`).
///
/// Record sync points with [`checkpoint::CheckpointWriter`], read them back
/// with [`checkpoint::CheckpointReader`], and rebuild a state source with
/// [`checkpoint::restart_states`].
pub use runnel_checkpoint as checkpoint;

/// Common imports for typical Runnel usage.
///
/// ```rust
/// use runnel::prelude::*;
///
/// let config = SimulationConfig::default();
/// assert!(config.validate().is_ok());
/// ```
pub mod prelude {
    // Core types
    pub use runnel_core::{
        EdgeGeometry, ElementId, NeighborConnection, NeighborEndpoint, RegionId, TopologyError,
    };

    // Neighbor
    pub use runnel_neighbor::{FlowLease, NeighborProxy};

    // Elements and physics
    pub use runnel_element::{
        ChannelElement, ChannelParameters, ConstantForcing, Element, FixedInflows, LayerParameters,
        MeshElement, MeshInitialState, MeshParameters, MemorySink, OutputSink, RegionSnapshot,
    };

    // Engine
    pub use runnel_engine::{
        assemble, Advance, LockstepSimulation, Physics, Region, RunReport, SimulationConfig,
        SimulationError, ThreadedSimulation, WaterBudget,
    };

    // Checkpoint
    pub use runnel_checkpoint::{CheckpointReader, CheckpointWriter};
}
