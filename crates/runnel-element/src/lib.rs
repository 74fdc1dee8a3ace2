//! Elements for the Runnel water-routing engine.
//!
//! An [`Element`] is either a [`MeshElement`] (land surface over soil over
//! aquifer) or a [`ChannelElement`] (one trapezoidal reach). Each owns its
//! edges as [`NeighborProxy`](runnel_neighbor::NeighborProxy)s and steps
//! through a fixed sequence every timestep:
//!
//! 1. [`point_process`](Element::point_process): run the land-surface
//!    physics, then ration each container's outflows and send them.
//! 2. [`receive_inflows`](Element::receive_inflows): once every inflow for
//!    the step has arrived, drain it, run the vadose solver, and settle
//!    the groundwater state machine.
//!
//! Shortfalls never fail a step. A container that cannot pay all its
//! outflows pays each one the same fraction, and roundoff that would
//! create or destroy water is booked in a water-created ledger.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod channel;
pub mod element;
pub mod forcing;
pub mod groundwater;
pub mod mesh;
pub mod physics;
pub mod rationing;
pub mod snapshot;

pub use channel::{ChannelElement, ChannelParameters};
pub use element::{Element, StartupFlags, StepContext};
pub use forcing::{ConstantForcing, FixedInflows, Forcing, ForcingSource};
pub use groundwater::{Groundwater, GroundwaterMode, LayerState};
pub use mesh::{LayerParameters, MeshElement, MeshInitialState, MeshParameters};
pub use physics::{
    BucketLandSurface, BucketVadoseSolver, LandState, LandSurface, LandSurfaceOutput,
    VadoseSolver, VadoseStore,
};
pub use rationing::{ration, Ration};
pub use snapshot::{ElementSnapshot, ElementState, MemorySink, OutputError, OutputSink, RegionSnapshot};
