//! Restarting a run from a checkpoint.
//!
//! The state source of a new run is rebuilt from the last frame written
//! by each region. Geometry and parameter sources are unchanged by a run,
//! so the caller keeps using the originals.

use std::collections::HashSet;

use indexmap::IndexMap;
use runnel_core::{NeighborConnection, RegionId};
use runnel_element::{ElementState, LandState, MeshInitialState, RegionSnapshot};
use runnel_engine::{EdgeState, InitialState, StateRecord};

use crate::error::CheckpointError;
use crate::types::Frame;

/// Keep the latest frame of every region, in region order.
///
/// Frames of one region arrive in time order, but a later frame replaces
/// an earlier one regardless, so shuffled input works too.
pub fn latest_snapshots(
    frames: impl IntoIterator<Item = Frame>,
) -> IndexMap<RegionId, RegionSnapshot> {
    let mut latest: IndexMap<RegionId, RegionSnapshot> = IndexMap::new();
    for frame in frames {
        let keep = latest
            .get(&frame.region())
            .is_none_or(|current| current.time <= frame.time());
        if keep {
            latest.insert(frame.region(), frame.snapshot);
        }
    }
    latest.sort_keys();
    latest
}

/// Build state records for every element in `snapshots`.
///
/// Leases are not carried over: a restarted run renegotiates every edge
/// at its first step. Cumulative totals are.
pub fn restart_states<'a>(
    snapshots: impl IntoIterator<Item = &'a RegionSnapshot>,
) -> Result<Vec<StateRecord>, CheckpointError> {
    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for snapshot in snapshots {
        for element in &snapshot.elements {
            if !seen.insert(element.element) {
                return Err(CheckpointError::DuplicateElement {
                    element: element.element,
                });
            }
            let initial = match element.state {
                ElementState::Mesh {
                    surface_depth,
                    soil_head,
                    aquifer_head,
                    vadose_water,
                    canopy,
                    snow,
                    ..
                } => InitialState::Mesh(MeshInitialState {
                    surface_depth,
                    soil_head,
                    aquifer_head,
                    vadose_water,
                    land: LandState { canopy, snow },
                }),
                ElementState::Channel { depth } => InitialState::Channel { depth },
            };
            let edges = element
                .proxies
                .iter()
                .map(|proxy| EdgeState {
                    connection: NeighborConnection {
                        local_endpoint: proxy.local_endpoint,
                        local_element: element.element,
                        remote_endpoint: proxy.remote_endpoint,
                        remote_element: proxy.remote_element,
                    },
                    cumulative_inflow: proxy.cumulative_inflow,
                    cumulative_outflow: proxy.cumulative_outflow,
                })
                .collect();
            records.push(StateRecord {
                element: element.element,
                initial,
                edges,
            });
        }
    }
    records.sort_by_key(|r| r.element);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use runnel_core::{ElementId, NeighborEndpoint};
    use runnel_element::ElementSnapshot;
    use runnel_neighbor::{FlowLease, ProxySnapshot};

    fn channel(id: u32, depth: f64) -> ElementSnapshot {
        ElementSnapshot {
            element: ElementId(id),
            state: ElementState::Channel { depth },
            total_water: 0.0,
            water_created: 0.0,
            precipitation: 0.0,
            evaporation: 0.0,
            proxies: vec![ProxySnapshot {
                local_endpoint: NeighborEndpoint::ChannelSurface,
                remote_endpoint: NeighborEndpoint::BoundaryOutflow,
                remote_element: ElementId(id),
                lease: FlowLease::Recipient,
                cumulative_inflow: 0.0,
                cumulative_outflow: 42.0,
            }],
        }
    }

    fn frame(region: u32, time: f64, depth: f64) -> Frame {
        let snapshot = RegionSnapshot {
            region: RegionId(region),
            time,
            elements: vec![channel(10 + region, depth)],
        };
        Frame {
            snapshot_hash: crate::snapshot_hash(&snapshot),
            snapshot,
        }
    }

    #[test]
    fn latest_frame_per_region_wins() {
        let latest = latest_snapshots(vec![
            frame(1, 0.0, 1.0),
            frame(0, 0.0, 1.0),
            frame(1, 3600.0, 0.5),
            frame(0, 3600.0, 0.7),
        ]);
        let keys: Vec<_> = latest.keys().copied().collect();
        assert_eq!(keys, vec![RegionId(0), RegionId(1)]);
        assert_eq!(latest[&RegionId(1)].time, 3600.0);
        assert_eq!(
            latest[&RegionId(0)].elements[0].state,
            ElementState::Channel { depth: 0.7 }
        );
    }

    #[test]
    fn states_carry_depth_and_totals() {
        let latest = latest_snapshots(vec![frame(0, 3600.0, 0.7)]);
        let records = restart_states(latest.values()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].initial, InitialState::Channel { depth: 0.7 });
        let edge = records[0].edges[0];
        assert!(edge.connection.is_one_way());
        assert_eq!(edge.cumulative_outflow, 42.0);
    }

    #[test]
    fn element_in_two_snapshots_is_rejected() {
        let a = frame(0, 0.0, 1.0).snapshot;
        let mut b = a.clone();
        b.region = RegionId(1);
        match restart_states([&a, &b]) {
            Err(CheckpointError::DuplicateElement { element }) => {
                assert_eq!(element, ElementId(10))
            }
            other => panic!("expected DuplicateElement, got {other:?}"),
        }
    }
}
