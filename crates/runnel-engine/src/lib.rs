//! Region scheduler, topology assembly, and runners for Runnel.
//!
//! A run starts from three topology record sets that
//! [`topology::assemble`] turns into elements grouped by region. Each
//! group becomes a [`Region`], which steps its elements through the
//! negotiate / select timestep / point process / receive inflows cycle on
//! its own clock. Regions exchange [`MessageBatch`](runnel_neighbor::MessageBatch)es
//! and nothing else.
//!
//! Two runners drive a set of regions:
//!
//! - [`LockstepSimulation`]: every region on the calling thread, round
//!   robin, bit-for-bit reproducible.
//! - [`ThreadedSimulation`]: one OS thread per region with crossbeam
//!   inboxes.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod lockstep;
pub mod metrics;
pub mod region;
pub mod router;
pub mod scan;
pub mod threaded;
pub mod topology;

pub use config::{ConfigError, SimulationConfig, Verbosity};
pub use error::{RegionError, SimulationError};
pub use lockstep::{LockstepSimulation, RoundResult, RunReport};
pub use metrics::RegionMetrics;
pub use region::{Advance, Phase, Physics, Region, RegionClock, WaterBudget};
pub use threaded::ThreadedSimulation;
pub use topology::{
    assemble, EdgeRecord, EdgeState, ElementParameters, GeometryRecord, InitialState,
    ParameterRecord, StateRecord,
};
