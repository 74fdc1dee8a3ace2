//! Per-edge protocol for the Runnel water-routing engine.
//!
//! Every edge of the element graph is represented twice, once on each
//! side, by a [`NeighborProxy`]. The two proxies never share memory: they
//! agree on a flow-rate [`FlowLease`] by exchanging [`Message`]s, move
//! water as [`WaterTransfer`](runnel_core::WaterTransfer)s stamped with the
//! interval they cover, and keep long-running totals in two-cell
//! [`CumulativeFlow`] accumulators so mass balance survives millions of
//! small increments.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod accumulator;
pub mod flow;
pub mod lease;
pub mod message;
pub mod proxy;
pub mod transfer_set;

pub use accumulator::CumulativeFlow;
pub use flow::{nominal_flow_rate_calculation, FlowSide};
pub use lease::FlowLease;
pub use message::{Envelope, InvariantReport, Message, MessageBatch};
pub use proxy::{NeighborProxy, ProxySnapshot, ProxyState};
pub use transfer_set::TransferSet;
