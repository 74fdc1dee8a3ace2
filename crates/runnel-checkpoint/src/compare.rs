//! Snapshot comparison for replay verification.
//!
//! Hash-first comparison (fast path) with a per-value bit-exact fallback
//! on mismatch that names every element, proxy and field that differs.

use runnel_core::{ElementId, NeighborEndpoint, RegionId};
use runnel_element::{ElementSnapshot, ElementState, GroundwaterMode, RegionSnapshot};
use runnel_neighbor::{FlowLease, ProxySnapshot};

use crate::hash::snapshot_hash;

/// What differs about one element.
#[derive(Clone, Debug, PartialEq)]
pub enum DivergenceKind {
    /// The element is in the recorded snapshot only.
    OnlyRecorded,
    /// The element is in the replayed snapshot only.
    OnlyReplayed,
    /// One side is a mesh element and the other a channel.
    ElementKind,
    /// Groundwater regimes differ.
    Mode {
        /// Recorded regime.
        recorded: GroundwaterMode,
        /// Replayed regime.
        replayed: GroundwaterMode,
    },
    /// A storage or accounting value differs.
    Value {
        /// Name of the value.
        field: &'static str,
        /// Recorded value.
        recorded: f64,
        /// Replayed value.
        replayed: f64,
    },
    /// A proxy exists on one side only.
    ProxyPresence {
        /// Local endpoint of the proxy.
        local_endpoint: NeighborEndpoint,
        /// Remote endpoint of the proxy.
        remote_endpoint: NeighborEndpoint,
        /// Remote element of the proxy.
        remote_element: ElementId,
        /// `true` if the replay has it and the recording does not.
        in_replay: bool,
    },
    /// Leases on the same proxy differ.
    Lease {
        /// Remote element of the proxy.
        remote_element: ElementId,
        /// Recorded lease.
        recorded: FlowLease,
        /// Replayed lease.
        replayed: FlowLease,
    },
    /// A cumulative flow on the same proxy differs.
    ProxyValue {
        /// Remote element of the proxy.
        remote_element: ElementId,
        /// Name of the value.
        field: &'static str,
        /// Recorded value.
        recorded: f64,
        /// Replayed value.
        replayed: f64,
    },
}

/// A single element-level divergence.
#[derive(Clone, Debug, PartialEq)]
pub struct ElementDivergence {
    /// The element.
    pub element: ElementId,
    /// What differs.
    pub kind: DivergenceKind,
}

/// Every divergence found between two snapshots of one region.
#[derive(Clone, Debug, PartialEq)]
pub struct DivergenceReport {
    /// Region of the recorded snapshot.
    pub region: RegionId,
    /// Sync time of the recorded snapshot.
    pub recorded_time: f64,
    /// Sync time of the replayed snapshot.
    pub replayed_time: f64,
    /// Element-level differences, in element order.
    pub divergences: Vec<ElementDivergence>,
}

/// Compare a replayed snapshot against a recorded one.
///
/// Returns `None` when the two hash equal. Otherwise every differing
/// value is listed; floats are compared by bit pattern. A report with no
/// divergences means only the region or sync time differs.
pub fn compare_snapshot(
    recorded: &RegionSnapshot,
    replayed: &RegionSnapshot,
) -> Option<DivergenceReport> {
    if snapshot_hash(recorded) == snapshot_hash(replayed) && recorded == replayed {
        return None;
    }

    let mut divergences = Vec::new();
    let mut rec = recorded.elements.iter().peekable();
    let mut rep = replayed.elements.iter().peekable();
    // Both sides are in element order; merge them.
    loop {
        match (rec.peek(), rep.peek()) {
            (Some(a), Some(b)) if a.element == b.element => {
                compare_element(a, b, &mut divergences);
                rec.next();
                rep.next();
            }
            (Some(a), Some(b)) if a.element < b.element => {
                divergences.push(ElementDivergence {
                    element: a.element,
                    kind: DivergenceKind::OnlyRecorded,
                });
                rec.next();
            }
            (Some(a), None) => {
                divergences.push(ElementDivergence {
                    element: a.element,
                    kind: DivergenceKind::OnlyRecorded,
                });
                rec.next();
            }
            (_, Some(b)) => {
                divergences.push(ElementDivergence {
                    element: b.element,
                    kind: DivergenceKind::OnlyReplayed,
                });
                rep.next();
            }
            (None, None) => break,
        }
    }

    Some(DivergenceReport {
        region: recorded.region,
        recorded_time: recorded.time,
        replayed_time: replayed.time,
        divergences,
    })
}

fn value(
    element: ElementId,
    field: &'static str,
    recorded: f64,
    replayed: f64,
    out: &mut Vec<ElementDivergence>,
) {
    if recorded.to_bits() != replayed.to_bits() {
        out.push(ElementDivergence {
            element,
            kind: DivergenceKind::Value {
                field,
                recorded,
                replayed,
            },
        });
    }
}

fn state_values(state: &ElementState) -> Vec<(&'static str, f64)> {
    match *state {
        ElementState::Mesh {
            surface_depth,
            soil_head,
            aquifer_head,
            vadose_water,
            canopy,
            snow,
            ..
        } => vec![
            ("surface_depth", surface_depth),
            ("soil_head", soil_head),
            ("aquifer_head", aquifer_head),
            ("vadose_water", vadose_water),
            ("canopy", canopy),
            ("snow", snow),
        ],
        ElementState::Channel { depth } => vec![("depth", depth)],
    }
}

fn compare_element(a: &ElementSnapshot, b: &ElementSnapshot, out: &mut Vec<ElementDivergence>) {
    let id = a.element;
    match (&a.state, &b.state) {
        (ElementState::Mesh { mode: ma, .. }, ElementState::Mesh { mode: mb, .. }) => {
            if ma != mb {
                out.push(ElementDivergence {
                    element: id,
                    kind: DivergenceKind::Mode {
                        recorded: *ma,
                        replayed: *mb,
                    },
                });
            }
        }
        (ElementState::Channel { .. }, ElementState::Channel { .. }) => {}
        _ => {
            out.push(ElementDivergence {
                element: id,
                kind: DivergenceKind::ElementKind,
            });
            return;
        }
    }
    for ((field, x), (_, y)) in state_values(&a.state).into_iter().zip(state_values(&b.state)) {
        value(id, field, x, y, out);
    }
    value(id, "total_water", a.total_water, b.total_water, out);
    value(id, "water_created", a.water_created, b.water_created, out);
    value(id, "precipitation", a.precipitation, b.precipitation, out);
    value(id, "evaporation", a.evaporation, b.evaporation, out);
    compare_proxies(id, &a.proxies, &b.proxies, out);
}

fn proxy_key(p: &ProxySnapshot) -> (NeighborEndpoint, NeighborEndpoint, ElementId) {
    (p.local_endpoint, p.remote_endpoint, p.remote_element)
}

fn compare_proxies(
    element: ElementId,
    recorded: &[ProxySnapshot],
    replayed: &[ProxySnapshot],
    out: &mut Vec<ElementDivergence>,
) {
    let presence = |p: &ProxySnapshot, in_replay| ElementDivergence {
        element,
        kind: DivergenceKind::ProxyPresence {
            local_endpoint: p.local_endpoint,
            remote_endpoint: p.remote_endpoint,
            remote_element: p.remote_element,
            in_replay,
        },
    };
    for a in recorded {
        let Some(b) = replayed.iter().find(|b| proxy_key(b) == proxy_key(a)) else {
            out.push(presence(a, false));
            continue;
        };
        if a.lease != b.lease {
            out.push(ElementDivergence {
                element,
                kind: DivergenceKind::Lease {
                    remote_element: a.remote_element,
                    recorded: a.lease,
                    replayed: b.lease,
                },
            });
        }
        for (field, x, y) in [
            ("cumulative_inflow", a.cumulative_inflow, b.cumulative_inflow),
            ("cumulative_outflow", a.cumulative_outflow, b.cumulative_outflow),
        ] {
            if x.to_bits() != y.to_bits() {
                out.push(ElementDivergence {
                    element,
                    kind: DivergenceKind::ProxyValue {
                        remote_element: a.remote_element,
                        field,
                        recorded: x,
                        replayed: y,
                    },
                });
            }
        }
    }
    for b in replayed {
        if !recorded.iter().any(|a| proxy_key(a) == proxy_key(b)) {
            out.push(presence(b, true));
        }
    }
}
