//! Building elements from the three topology data sources.
//!
//! Geometry, parameters, and initial state arrive as separate record sets.
//! [`assemble`] cross-checks them and returns the elements grouped by
//! region. Every element and every connection must appear in all three
//! sources with the same key, and every two-sided edge must be described
//! from both ends. Any inconsistency fails the whole startup.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;

use runnel_core::{EdgeGeometry, ElementId, NeighborConnection, RegionId, TopologyError};
use runnel_element::{
    ChannelElement, ChannelParameters, Element, MeshElement, MeshInitialState, MeshParameters,
};
use runnel_neighbor::NeighborProxy;

// ── Records ─────────────────────────────────────────────────────

/// One edge as the geometry source describes it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgeRecord {
    /// The edge in the owning element's frame.
    pub connection: NeighborConnection,
    /// Region owning the remote element.
    pub remote_region: RegionId,
    /// Static geometry in the owning element's frame.
    pub geometry: EdgeGeometry,
}

/// Geometry source record for one element.
#[derive(Clone, Debug, PartialEq)]
pub struct GeometryRecord {
    /// The element.
    pub element: ElementId,
    /// Region that owns it.
    pub region: RegionId,
    /// Its edges.
    pub edges: Vec<EdgeRecord>,
}

/// Static parameters of either element kind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ElementParameters {
    /// A mesh element.
    Mesh(MeshParameters),
    /// A channel reach.
    Channel(ChannelParameters),
}

/// Parameter source record for one element.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterRecord {
    /// The element.
    pub element: ElementId,
    /// Its parameters.
    pub parameters: ElementParameters,
    /// Edges the parameter source knows about.
    pub connections: Vec<NeighborConnection>,
}

/// Starting storage of either element kind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InitialState {
    /// A mesh element.
    Mesh(MeshInitialState),
    /// A channel reach.
    Channel {
        /// Water depth (m).
        depth: f64,
    },
}

/// Carried-over totals for one edge.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgeState {
    /// The edge in the owning element's frame.
    pub connection: NeighborConnection,
    /// Water received so far (m³).
    pub cumulative_inflow: f64,
    /// Water sent so far (m³).
    pub cumulative_outflow: f64,
}

impl EdgeState {
    /// An edge starting from zero.
    pub fn fresh(connection: NeighborConnection) -> Self {
        Self {
            connection,
            cumulative_inflow: 0.0,
            cumulative_outflow: 0.0,
        }
    }
}

/// State source record for one element.
#[derive(Clone, Debug, PartialEq)]
pub struct StateRecord {
    /// The element.
    pub element: ElementId,
    /// Starting storage.
    pub initial: InitialState,
    /// Per-edge totals.
    pub edges: Vec<EdgeState>,
}

// ── Assembly ────────────────────────────────────────────────────

fn index_by_element<'a, T>(
    records: &'a [T],
    element: impl Fn(&T) -> ElementId,
) -> Result<HashMap<ElementId, &'a T>, TopologyError> {
    let mut map = HashMap::with_capacity(records.len());
    for record in records {
        let id = element(record);
        if map.insert(id, record).is_some() {
            return Err(TopologyError::DuplicateElement { element: id });
        }
    }
    Ok(map)
}

fn connection_set(
    element: ElementId,
    connections: impl IntoIterator<Item = NeighborConnection>,
) -> Result<BTreeSet<NeighborConnection>, TopologyError> {
    let mut set = BTreeSet::new();
    for connection in connections {
        if connection.local_element != element {
            return Err(TopologyError::WrongElementKind { connection });
        }
        if !set.insert(connection) {
            return Err(TopologyError::DuplicateConnection { connection });
        }
    }
    Ok(set)
}

fn require_same(
    expected: &BTreeSet<NeighborConnection>,
    actual: &BTreeSet<NeighborConnection>,
    expected_source: &'static str,
    actual_source: &'static str,
) -> Result<(), TopologyError> {
    if let Some(connection) = expected.difference(actual).next() {
        return Err(TopologyError::MissingConnection {
            connection: *connection,
            source: actual_source,
        });
    }
    if let Some(connection) = actual.difference(expected).next() {
        return Err(TopologyError::MissingConnection {
            connection: *connection,
            source: expected_source,
        });
    }
    Ok(())
}

fn build_element(
    element: ElementId,
    parameters: &ElementParameters,
    initial: &InitialState,
) -> Result<Element, TopologyError> {
    match (parameters, initial) {
        (ElementParameters::Mesh(p), InitialState::Mesh(s)) => {
            Ok(MeshElement::new(element, p, s)?.into())
        }
        (ElementParameters::Channel(p), InitialState::Channel { depth }) => {
            Ok(ChannelElement::new(element, p, *depth)?.into())
        }
        _ => Err(TopologyError::InvalidParameter {
            element,
            reason: "parameter and state records describe different element kinds".to_string(),
        }),
    }
}

/// Cross-check the three sources and build every element, grouped by
/// owning region in region order.
///
/// Proxies start with leases stale at `start_time` and cumulative totals
/// restored from the state source.
pub fn assemble(
    geometry: &[GeometryRecord],
    parameters: &[ParameterRecord],
    states: &[StateRecord],
    start_time: f64,
) -> Result<IndexMap<RegionId, Vec<Element>>, TopologyError> {
    let by_geometry = index_by_element(geometry, |r| r.element)?;
    let by_parameters = index_by_element(parameters, |r| r.element)?;
    let by_state = index_by_element(states, |r| r.element)?;

    for id in by_parameters.keys().chain(by_state.keys()) {
        if !by_geometry.contains_key(id) {
            return Err(TopologyError::MissingElement {
                element: *id,
                source: "geometry",
            });
        }
    }

    let mut regions: IndexMap<RegionId, Vec<Element>> = IndexMap::new();
    for record in geometry {
        let id = record.element;
        let params = by_parameters
            .get(&id)
            .ok_or(TopologyError::MissingElement {
                element: id,
                source: "parameter",
            })?;
        let state = by_state.get(&id).ok_or(TopologyError::MissingElement {
            element: id,
            source: "state",
        })?;

        let from_geometry = connection_set(id, record.edges.iter().map(|e| e.connection))?;
        let from_parameters = connection_set(id, params.connections.iter().copied())?;
        let from_state = connection_set(id, state.edges.iter().map(|e| e.connection))?;
        require_same(&from_geometry, &from_parameters, "geometry", "parameter")?;
        require_same(&from_geometry, &from_state, "geometry", "state")?;

        let mut element = build_element(id, &params.parameters, &state.initial)?;
        for edge in &record.edges {
            let connection = edge.connection;
            if !connection.is_one_way() {
                check_reverse(edge, record.region, &by_geometry)?;
            }
            let mut proxy =
                NeighborProxy::new(connection, edge.remote_region, edge.geometry, start_time);
            if let Some(carried) = state.edges.iter().find(|e| e.connection == connection) {
                proxy.restore_cumulative_flow(carried.cumulative_inflow, carried.cumulative_outflow);
            }
            element.add_proxy(proxy)?;
        }
        element.sort_proxies();
        regions.entry(record.region).or_default().push(element);
    }
    regions.sort_keys();
    for elements in regions.values_mut() {
        elements.sort_by_key(Element::id);
    }
    Ok(regions)
}

fn check_reverse(
    edge: &EdgeRecord,
    local_region: RegionId,
    by_geometry: &HashMap<ElementId, &GeometryRecord>,
) -> Result<(), TopologyError> {
    let connection = edge.connection;
    let remote = by_geometry
        .get(&connection.remote_element)
        .ok_or(TopologyError::MissingElement {
            element: connection.remote_element,
            source: "geometry",
        })?;
    if remote.region != edge.remote_region {
        return Err(TopologyError::ElementInTwoRegions {
            element: connection.remote_element,
            first: remote.region,
            second: edge.remote_region,
        });
    }
    let reverse = connection.reverse();
    let back = remote
        .edges
        .iter()
        .find(|e| e.connection == reverse)
        .ok_or(TopologyError::MissingConnection {
            connection: reverse,
            source: "geometry",
        })?;
    if back.remote_region != local_region {
        return Err(TopologyError::ElementInTwoRegions {
            element: connection.local_element,
            first: local_region,
            second: back.remote_region,
        });
    }
    if back.geometry != edge.geometry.reverse() {
        return Err(TopologyError::InvalidParameter {
            element: connection.local_element,
            reason: format!("geometry of {connection} differs between its two sides"),
        });
    }
    Ok(())
}
