//! Benchmark profiles for the Runnel routing engine.
//!
//! Provides pre-built element graphs for benchmarking:
//!
//! - [`grid_profile`]: a square grid of sloping meshes split into row
//!   blocks, one block per region
//! - [`reference_config`]: a two-hour run with half-hour sync points

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use indexmap::IndexMap;
use runnel_core::{
    EdgeGeometry, ElementId, NeighborConnection, NeighborEndpoint, RegionId, TopologyError,
};
use runnel_element::{Element, LayerParameters, MeshElement, MeshInitialState, MeshParameters};
use runnel_engine::SimulationConfig;
use runnel_neighbor::NeighborProxy;

const SPACING: f64 = 100.0;

fn id_of(row: usize, col: usize, side: usize) -> ElementId {
    ElementId((row * side + col + 1) as u32)
}

fn region_of(row: usize, side: usize, regions: u32) -> RegionId {
    RegionId((row * regions.max(1) as usize / side.max(1)) as u32)
}

fn cell(row: usize, col: usize, side: usize) -> Result<Element, TopologyError> {
    let ground = 50.0 - 0.5 * (row + col) as f64;
    let params = MeshParameters {
        x: SPACING * col as f64,
        y: SPACING * row as f64,
        ground,
        area: SPACING * SPACING,
        manning_n: 0.05,
        soil: None,
        aquifer: Some(LayerParameters {
            bottom: ground - 20.0,
            top: ground - 1.0,
            porosity: 0.25,
            conductivity: 5.0e-5,
        }),
        vadose_porosity: 0.3,
    };
    let initial = MeshInitialState {
        surface_depth: 0.02,
        aquifer_head: ground - 8.0,
        ..MeshInitialState::default()
    };
    Ok(MeshElement::new(id_of(row, col, side), &params, &initial)?.into())
}

fn join(
    elements: &mut IndexMap<ElementId, (RegionId, Element)>,
    (a, region_a): (ElementId, RegionId),
    (b, region_b): (ElementId, RegionId),
    geometry: EdgeGeometry,
) -> Result<(), TopologyError> {
    let connection =
        NeighborConnection::new(NeighborEndpoint::MeshSurface, a, NeighborEndpoint::MeshSurface, b)?;
    if let Some((_, element)) = elements.get_mut(&a) {
        element.add_proxy(NeighborProxy::new(connection, region_b, geometry, 0.0))?;
    }
    if let Some((_, element)) = elements.get_mut(&b) {
        element.add_proxy(NeighborProxy::new(
            connection.reverse(),
            region_a,
            geometry.reverse(),
            0.0,
        ))?;
    }
    Ok(())
}

/// Build a `side` x `side` grid of meshes (`side²` elements) split into
/// `regions` row blocks.
///
/// Every mesh holds 2 cm of ponded water and slopes toward the far corner,
/// which drains to a boundary outlet.
pub fn grid_profile(
    side: usize,
    regions: u32,
) -> Result<IndexMap<RegionId, Vec<Element>>, TopologyError> {
    let mut elements = IndexMap::with_capacity(side * side);
    for row in 0..side {
        for col in 0..side {
            elements.insert(
                id_of(row, col, side),
                (region_of(row, side, regions), cell(row, col, side)?),
            );
        }
    }

    let east = EdgeGeometry {
        length: SPACING,
        normal_x: 1.0,
        normal_y: 0.0,
        z_offset: 0.0,
    };
    let south = EdgeGeometry {
        normal_x: 0.0,
        normal_y: 1.0,
        ..east
    };
    for row in 0..side {
        for col in 0..side {
            let here = (id_of(row, col, side), region_of(row, side, regions));
            if col + 1 < side {
                let next = (id_of(row, col + 1, side), here.1);
                join(&mut elements, here, next, east)?;
            }
            if row + 1 < side {
                let below = (id_of(row + 1, col, side), region_of(row + 1, side, regions));
                join(&mut elements, here, below, south)?;
            }
        }
    }

    if side > 0 {
        let corner = id_of(side - 1, side - 1, side);
        let outlet = NeighborConnection::one_way(
            NeighborEndpoint::MeshSurface,
            corner,
            NeighborEndpoint::BoundaryOutflow,
        )?;
        if let Some((region, element)) = elements.get_mut(&corner) {
            element.add_proxy(NeighborProxy::new(
                outlet,
                *region,
                EdgeGeometry::with_length(SPACING),
                0.0,
            ))?;
        }
    }

    let mut grouped: IndexMap<RegionId, Vec<Element>> = IndexMap::new();
    for (_, (region, element)) in elements {
        grouped.entry(region).or_default().push(element);
    }
    grouped.sort_keys();
    Ok(grouped)
}

/// Two simulated hours with sync points every 30 minutes.
pub fn reference_config() -> SimulationConfig {
    SimulationConfig {
        simulation_end: 7200.0,
        sync_interval: 1800.0,
        regional_dt_limit: 300.0,
        ..SimulationConfig::default()
    }
}
