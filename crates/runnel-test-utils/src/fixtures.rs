//! Reusable element graphs and mock physics.
//!
//! - [`mesh`] / [`channel`]: single elements with simple, valid geometry.
//! - [`link_surface`] / [`link`]: join two elements with a proxy on each
//!   side.
//! - [`mesh_line`] / [`channel_reach`]: sloping chains split across
//!   regions, draining to a boundary outlet.
//! - [`inert_land_surface`] / [`sealed_vadose`]: physics that moves no
//!   water vertically, so edge flows are the only change.
//! - [`link_reservoir`] / [`add_inflow`]: reservoir outlets and boundary
//!   inflows.
//! - [`FailingSink`]: an output sink that fails after N snapshots.

use indexmap::IndexMap;

use runnel_core::{
    ChannelShape, EdgeGeometry, ElementId, NeighborConnection, NeighborEndpoint, RegionId,
};
use runnel_element::{
    BucketLandSurface, BucketVadoseSolver, ChannelElement, ChannelParameters, Element,
    LayerParameters, MeshElement, MeshInitialState, MeshParameters, OutputError, OutputSink,
    RegionSnapshot,
};
use runnel_neighbor::NeighborProxy;

/// Plan area of every fixture mesh (m²).
pub const MESH_AREA: f64 = 1.0e4;

/// Length of every fixture channel reach (m).
pub const REACH_LENGTH: f64 = 100.0;

// ── Physics ─────────────────────────────────────────────────────

/// No interception, no melt, no transpiration.
pub fn inert_land_surface() -> BucketLandSurface {
    BucketLandSurface {
        canopy_capacity: 0.0,
        melt_factor: 0.0,
        transpiration_fraction: 0.0,
    }
}

/// Nothing infiltrates and nothing drains.
pub fn sealed_vadose() -> BucketVadoseSolver {
    BucketVadoseSolver {
        infiltration_rate: 0.0,
        drainage_rate: 0.0,
    }
}

// ── Elements ────────────────────────────────────────────────────

/// Parameters of a mesh with one aquifer layer 1 m to 10 m below ground.
pub fn mesh_parameters(x: f64, ground: f64) -> MeshParameters {
    MeshParameters {
        x,
        y: 0.0,
        ground,
        area: MESH_AREA,
        manning_n: 0.04,
        soil: None,
        aquifer: Some(LayerParameters {
            bottom: ground - 10.0,
            top: ground - 1.0,
            porosity: 0.2,
            conductivity: 1.0e-5,
        }),
        vadose_porosity: 0.3,
    }
}

/// A mesh at `x` with `depth` m of ponded water and the aquifer half full.
pub fn mesh(id: u32, x: f64, ground: f64, depth: f64) -> Element {
    let initial = MeshInitialState {
        surface_depth: depth,
        aquifer_head: ground - 5.0,
        ..MeshInitialState::default()
    };
    MeshElement::new(ElementId(id), &mesh_parameters(x, ground), &initial)
        .unwrap_or_else(|e| panic!("fixture mesh {id}: {e}"))
        .into()
}

/// A mesh with a soil layer over the aquifer.
pub fn layered_mesh(id: u32, x: f64, ground: f64, depth: f64) -> Element {
    let params = MeshParameters {
        soil: Some(LayerParameters {
            bottom: ground - 2.0,
            top: ground,
            porosity: 0.35,
            conductivity: 1.0e-4,
        }),
        aquifer: Some(LayerParameters {
            bottom: ground - 12.0,
            top: ground - 2.0,
            porosity: 0.2,
            conductivity: 1.0e-5,
        }),
        ..mesh_parameters(x, ground)
    };
    let initial = MeshInitialState {
        surface_depth: depth,
        soil_head: ground - 2.0,
        aquifer_head: ground - 4.0,
        ..MeshInitialState::default()
    };
    MeshElement::new(ElementId(id), &params, &initial)
        .unwrap_or_else(|e| panic!("fixture mesh {id}: {e}"))
        .into()
}

/// Trapezoid 2 m wide at the base, 1:1 banks, 2 m bank-full.
pub fn channel_shape() -> ChannelShape {
    ChannelShape {
        base_width: 2.0,
        side_slope: 1.0,
        bank_full_depth: 2.0,
    }
}

/// Parameters of a reach whose bed sits at `bed`.
pub fn channel_parameters(x: f64, bed: f64) -> ChannelParameters {
    ChannelParameters {
        x,
        y: 0.0,
        bank: bed + 2.0,
        bed,
        length: REACH_LENGTH,
        manning_n: 0.03,
        shape: channel_shape(),
        bed_conductivity: 0.0,
        bed_thickness: 0.5,
    }
}

/// A reach at `x` holding `depth` m of water.
pub fn channel(id: u32, x: f64, bed: f64, depth: f64) -> Element {
    ChannelElement::new(ElementId(id), &channel_parameters(x, bed), depth)
        .unwrap_or_else(|e| panic!("fixture channel {id}: {e}"))
        .into()
}

// ── Edges ───────────────────────────────────────────────────────

/// A 100 m edge whose normal points from `a` to `b` along x.
pub fn edge_geometry() -> EdgeGeometry {
    EdgeGeometry {
        length: 100.0,
        normal_x: 1.0,
        normal_y: 0.0,
        z_offset: 0.0,
    }
}

/// Join `a` (owned by `region_a`) and `b` (owned by `region_b`) through
/// the given endpoints.
pub fn link(
    a: &mut Element,
    region_a: RegionId,
    local: NeighborEndpoint,
    b: &mut Element,
    region_b: RegionId,
    remote: NeighborEndpoint,
) {
    let connection = NeighborConnection::new(local, a.id(), remote, b.id())
        .unwrap_or_else(|e| panic!("fixture edge {} -> {}: {e}", a.id(), b.id()));
    let geometry = edge_geometry();
    a.add_proxy(NeighborProxy::new(connection, region_b, geometry, 0.0))
        .unwrap_or_else(|e| panic!("fixture proxy on {}: {e}", a.id()));
    b.add_proxy(NeighborProxy::new(
        connection.reverse(),
        region_a,
        geometry.reverse(),
        0.0,
    ))
    .unwrap_or_else(|e| panic!("fixture proxy on {}: {e}", b.id()));
}

/// Join two meshes surface to surface.
pub fn link_surface(a: &mut Element, region_a: RegionId, b: &mut Element, region_b: RegionId) {
    link(
        a,
        region_a,
        NeighborEndpoint::MeshSurface,
        b,
        region_b,
        NeighborEndpoint::MeshSurface,
    );
}

/// Give `element` a boundary outlet on `endpoint`.
pub fn add_outlet(element: &mut Element, region: RegionId, endpoint: NeighborEndpoint) {
    let connection =
        NeighborConnection::one_way(endpoint, element.id(), NeighborEndpoint::BoundaryOutflow)
            .unwrap_or_else(|e| panic!("fixture outlet on {}: {e}", element.id()));
    element
        .add_proxy(NeighborProxy::new(
            connection,
            region,
            EdgeGeometry::with_length(100.0),
            0.0,
        ))
        .unwrap_or_else(|e| panic!("fixture outlet on {}: {e}", element.id()));
}

/// Give `element` a boundary inflow on `endpoint` and return the edge, for
/// keying an inflow rate.
pub fn add_inflow(
    element: &mut Element,
    region: RegionId,
    endpoint: NeighborEndpoint,
) -> NeighborConnection {
    let connection =
        NeighborConnection::one_way(endpoint, element.id(), NeighborEndpoint::BoundaryInflow)
            .unwrap_or_else(|e| panic!("fixture inflow on {}: {e}", element.id()));
    element
        .add_proxy(NeighborProxy::new(
            connection,
            region,
            EdgeGeometry::with_length(100.0),
            0.0,
        ))
        .unwrap_or_else(|e| panic!("fixture inflow on {}: {e}", element.id()));
    connection
}

/// Join a reservoir `release` reach to the `recipient` reach below it.
pub fn link_reservoir(
    release: &mut Element,
    region_release: RegionId,
    recipient: &mut Element,
    region_recipient: RegionId,
) {
    link(
        release,
        region_release,
        NeighborEndpoint::ReservoirRelease,
        recipient,
        region_recipient,
        NeighborEndpoint::ReservoirRecipient,
    );
}

/// Region owning position `index` of `count` elements split into
/// `regions` contiguous blocks.
fn region_of(index: usize, count: usize, regions: u32) -> RegionId {
    let per_region = count.div_ceil(regions.max(1) as usize).max(1);
    RegionId((index / per_region) as u32)
}

fn group(elements: Vec<Element>, regions: u32) -> IndexMap<RegionId, Vec<Element>> {
    let count = elements.len();
    let mut grouped: IndexMap<RegionId, Vec<Element>> = IndexMap::new();
    for (index, element) in elements.into_iter().enumerate() {
        grouped
            .entry(region_of(index, count, regions))
            .or_default()
            .push(element);
    }
    grouped
}

/// `count` meshes 100 m apart on a 0.5 % slope, the first one wet, split
/// into `regions` blocks. The last mesh drains to a boundary.
pub fn mesh_line(count: usize, regions: u32) -> IndexMap<RegionId, Vec<Element>> {
    let mut elements: Vec<Element> = (0..count)
        .map(|i| {
            let depth = if i == 0 { 0.05 } else { 0.0 };
            mesh(i as u32 + 1, 100.0 * i as f64, 20.0 - 0.5 * i as f64, depth)
        })
        .collect();
    for i in 1..count {
        let (left, right) = elements.split_at_mut(i);
        link_surface(
            &mut left[i - 1],
            region_of(i - 1, count, regions),
            &mut right[0],
            region_of(i, count, regions),
        );
    }
    if let Some(last) = elements.last_mut() {
        add_outlet(
            last,
            region_of(count - 1, count, regions),
            NeighborEndpoint::MeshSurface,
        );
    }
    group(elements, regions)
}

/// `count` reaches end to end on a 0.2 % slope, all holding `depth`, split
/// into `regions` blocks. The last reach drains to a boundary.
pub fn channel_reach(count: usize, regions: u32, depth: f64) -> IndexMap<RegionId, Vec<Element>> {
    let mut elements: Vec<Element> = (0..count)
        .map(|i| {
            channel(
                i as u32 + 101,
                REACH_LENGTH * i as f64,
                5.0 - 0.2 * i as f64,
                depth,
            )
        })
        .collect();
    for i in 1..count {
        let (left, right) = elements.split_at_mut(i);
        link(
            &mut left[i - 1],
            region_of(i - 1, count, regions),
            NeighborEndpoint::ChannelSurface,
            &mut right[0],
            region_of(i, count, regions),
            NeighborEndpoint::ChannelSurface,
        );
    }
    if let Some(last) = elements.last_mut() {
        add_outlet(
            last,
            region_of(count - 1, count, regions),
            NeighborEndpoint::ChannelSurface,
        );
    }
    group(elements, regions)
}

// ── Output ──────────────────────────────────────────────────────

/// Accepts `succeed_count` snapshots, then rejects every later one.
#[derive(Debug, Default)]
pub struct FailingSink {
    pub succeed_count: usize,
    pub written: Vec<RegionSnapshot>,
}

impl FailingSink {
    pub fn new(succeed_count: usize) -> Self {
        Self {
            succeed_count,
            written: Vec::new(),
        }
    }
}

impl OutputSink for FailingSink {
    fn write(&mut self, snapshot: &RegionSnapshot) -> Result<(), OutputError> {
        if self.written.len() >= self.succeed_count {
            return Err(OutputError::Rejected {
                reason: format!(
                    "deliberate failure after {} snapshots",
                    self.succeed_count
                ),
            });
        }
        self.written.push(snapshot.clone());
        Ok(())
    }
}
