//! Integration test: water is neither created nor lost by the protocol.
//!
//! Runs small graphs to the end on a single region and checks the
//! region-wide ledger, plus the two-mesh and drain-down scenarios.

use std::sync::Arc;

use runnel_core::{ElementId, NeighborEndpoint, RegionId};
use runnel_element::{ConstantForcing, Element, FixedInflows, Forcing, OutputError};
use runnel_engine::{Advance, Physics, Region, RegionError, SimulationConfig};
use runnel_test_utils::fixtures::{
    add_inflow, channel, channel_reach, inert_land_surface, layered_mesh, link, link_reservoir,
    link_surface, mesh, mesh_line, sealed_vadose, FailingSink, MESH_AREA,
};

fn physics() -> Physics {
    Physics {
        land_surface: Arc::new(inert_land_surface()),
        vadose: Arc::new(sealed_vadose()),
        forcing: Arc::new(ConstantForcing::default()),
    }
}

fn config(end: f64) -> SimulationConfig {
    SimulationConfig {
        simulation_end: end,
        sync_interval: 1800.0,
        regional_dt_limit: 300.0,
        check_invariants: true,
        ..SimulationConfig::default()
    }
}

/// Far more turns than any run here needs.
const MAX_TURNS: usize = 100_000;

fn run_to_end(region: &mut Region) {
    for _ in 0..MAX_TURNS {
        match region.advance().unwrap() {
            Advance::Finished => return,
            Advance::Progressed => {}
            Advance::Blocked => panic!("single region blocked at {:?}", region.phase()),
        }
    }
    panic!("region still running at {} after {MAX_TURNS} turns", region.clock().current_time);
}

fn relative_error(a: f64, b: f64) -> f64 {
    (a - b).abs() / a.abs().max(b.abs()).max(f64::MIN_POSITIVE)
}

#[test]
fn two_mesh_surface_flow_moves_water_downhill() {
    let mut a = mesh(1, 0.0, 10.0, 1.0);
    let mut b = mesh(2, 100.0, 10.0, 0.0);
    link_surface(&mut a, RegionId(0), &mut b, RegionId(0));
    let before_a = a.total_water();
    let before_b = b.total_water();

    let mut region = Region::new(RegionId(0), vec![a, b], &config(600.0), physics()).unwrap();
    run_to_end(&mut region);

    let after_a = region.element(ElementId(1)).unwrap().total_water();
    let after_b = region.element(ElementId(2)).unwrap().total_water();
    let lost = before_a - after_a;
    let gained = after_b - before_b;
    assert!(lost > 0.0, "A should drain toward B");
    assert!(relative_error(lost, gained) < 1e-12, "lost {lost}, gained {gained}");
}

#[test]
fn line_of_meshes_conserves_water() {
    let grouped = mesh_line(6, 1);
    let elements: Vec<Element> = grouped.into_values().flatten().collect();
    let mut region = Region::new(RegionId(0), elements, &config(7200.0), physics()).unwrap();
    let before = region.budget().initial_water();
    run_to_end(&mut region);

    let budget = region.budget();
    assert_eq!(budget.pending, 0.0);
    assert!(relative_error(budget.initial_water(), before) < 1e-9);
    assert!(budget.boundary_outflow >= 0.0);
    assert_eq!(region.metrics().sync_points, 5);
}

#[test]
fn rain_is_booked_as_precipitation() {
    let rain = Forcing {
        precipitation: 2.0e-6,
        temperature: 15.0,
        potential_evaporation: 0.0,
    };
    let physics = Physics {
        forcing: Arc::new(ConstantForcing(rain)),
        ..physics()
    };
    let elements: Vec<Element> = mesh_line(3, 1).into_values().flatten().collect();
    let mut region = Region::new(RegionId(0), elements, &config(3600.0), physics).unwrap();
    let before = region.budget().initial_water();
    run_to_end(&mut region);

    let budget = region.budget();
    // 3 meshes, 1 h of rain.
    let expected = 3.0 * MESH_AREA * 2.0e-6 * 3600.0;
    assert!(relative_error(budget.precipitation, expected) < 1e-9);
    assert!(relative_error(budget.initial_water(), before) < 1e-9);
}

#[test]
fn drain_down_books_clamped_water_as_negative_creation() {
    let elements: Vec<Element> = channel_reach(1, 1, 3.0).into_values().flatten().collect();
    let cfg = SimulationConfig {
        drain_down_mode: true,
        ..config(600.0)
    };
    let mut region = Region::new(RegionId(0), elements, &cfg, physics()).unwrap();
    let before = region.budget().initial_water();
    run_to_end(&mut region);

    let budget = region.budget();
    assert!(budget.created < 0.0, "clamped water must show up as negative creation");
    assert!(relative_error(budget.initial_water(), before) < 1e-9);
}

#[test]
fn without_drain_down_nothing_is_created() {
    let elements: Vec<Element> = channel_reach(3, 1, 0.5).into_values().flatten().collect();
    let mut region = Region::new(RegionId(0), elements, &config(1800.0), physics()).unwrap();
    run_to_end(&mut region);

    let budget = region.budget();
    assert!(budget.created.abs() < 1e-9);
    assert_eq!(budget.pending, 0.0);
}

#[test]
fn zero_cumulative_flow_resets_carried_totals() {
    let elements: Vec<Element> = mesh_line(2, 1).into_values().flatten().collect();
    let cfg = SimulationConfig {
        zero_cumulative_flow: true,
        zero_water_created: true,
        force_lease_expiration: true,
        ..config(600.0)
    };
    let mut region = Region::new(RegionId(0), elements, &cfg, physics()).unwrap();
    let before = region.budget().initial_water();
    run_to_end(&mut region);
    assert!(relative_error(region.budget().initial_water(), before) < 1e-9);
}

#[test]
fn layered_meshes_exchange_groundwater_without_loss() {
    let r = RegionId(0);
    let mut a = layered_mesh(1, 0.0, 10.0, 0.2);
    let mut b = layered_mesh(2, 100.0, 9.0, 0.0);
    link_surface(&mut a, r, &mut b, r);
    link(
        &mut a,
        r,
        NeighborEndpoint::MeshAquifer,
        &mut b,
        r,
        NeighborEndpoint::MeshAquifer,
    );
    let mut region = Region::new(r, vec![a, b], &config(3600.0), physics()).unwrap();
    let before = region.budget().initial_water();
    run_to_end(&mut region);

    let budget = region.budget();
    assert_eq!(budget.pending, 0.0);
    assert!(relative_error(budget.initial_water(), before) < 1e-9);
}

#[test]
fn failing_output_sink_stops_the_region() {
    let elements: Vec<Element> = mesh_line(2, 1).into_values().flatten().collect();
    let mut region = Region::new(RegionId(0), elements, &config(3600.0), physics()).unwrap();
    // The snapshot at the start is accepted, the one at 1800 s is not.
    region.set_output(Box::new(FailingSink::new(1)));
    loop {
        match region.advance() {
            Ok(Advance::Finished) => panic!("run should not finish with a failing sink"),
            Ok(_) => {}
            Err(RegionError::Output(OutputError::Rejected { .. })) => break,
            Err(other) => panic!("expected Output(Rejected), got {other:?}"),
        }
    }
    assert!(region.clock().current_time >= 1800.0);
}

// ── Reservoirs ──────────────────────────────────────────────────

/// A release reach holding `depth` above a recipient reach in one region.
fn reservoir_region(depth: f64, physics: Physics) -> Region {
    let r = RegionId(0);
    let mut release = channel(1, 0.0, 5.0, depth);
    let mut recipient = channel(2, 100.0, 4.0, 0.2);
    link_reservoir(&mut release, r, &mut recipient, r);
    Region::new(r, vec![release, recipient], &config(3600.0), physics).unwrap()
}

#[test]
fn wet_reservoir_release_feeds_its_recipient() {
    let mut region = reservoir_region(0.5, physics());
    let before = region.budget().initial_water();
    let recipient_before = region.element(ElementId(2)).unwrap().total_water();
    run_to_end(&mut region);

    assert_eq!(region.clock().current_time, 3600.0);
    let recipient_after = region.element(ElementId(2)).unwrap().total_water();
    assert!(recipient_after > recipient_before);
    let budget = region.budget();
    assert_eq!(budget.pending, 0.0);
    assert!(relative_error(budget.initial_water(), before) < 1e-9);
}

#[test]
fn dry_reservoir_release_does_not_stall_its_recipient() {
    let mut region = reservoir_region(0.0, physics());
    let before = region.budget().initial_water();
    let recipient_before = region.element(ElementId(2)).unwrap().total_water();
    run_to_end(&mut region);

    assert_eq!(region.clock().current_time, 3600.0);
    assert!(region.metrics().timesteps > 0);
    assert_eq!(region.element(ElementId(1)).unwrap().total_water(), 0.0);
    assert_eq!(
        region.element(ElementId(2)).unwrap().total_water(),
        recipient_before
    );
    assert!(relative_error(region.budget().initial_water(), before) < 1e-9);
}

#[test]
fn reservoir_release_drying_mid_run_keeps_going() {
    let dry_air = Forcing {
        precipitation: 0.0,
        temperature: 25.0,
        potential_evaporation: 1.0e-4,
    };
    let physics = Physics {
        forcing: Arc::new(ConstantForcing(dry_air)),
        ..physics()
    };
    let mut region = reservoir_region(0.05, physics);
    let before = region.budget().initial_water();
    run_to_end(&mut region);

    assert_eq!(region.clock().current_time, 3600.0);
    assert_eq!(region.element(ElementId(1)).unwrap().total_water(), 0.0);
    let budget = region.budget();
    assert!(budget.evaporation > 0.0);
    assert_eq!(budget.pending, 0.0);
    assert!(relative_error(budget.initial_water(), before) < 1e-9);
}

// ── Boundary inflow ─────────────────────────────────────────────

#[test]
fn boundary_inflow_enters_at_its_configured_rate() {
    let r = RegionId(0);
    let mut a = mesh(1, 0.0, 10.0, 0.0);
    let gauge = add_inflow(&mut a, r, NeighborEndpoint::MeshSurface);
    let rate = 0.01;
    let physics = Physics {
        forcing: Arc::new(FixedInflows::new(Forcing::default()).with_inflow(gauge, rate)),
        ..physics()
    };
    let mut region = Region::new(r, vec![a], &config(3600.0), physics).unwrap();
    let before = region.budget();
    run_to_end(&mut region);

    let after = region.budget();
    let expected = rate * 3600.0;
    assert!(relative_error(after.boundary_inflow, expected) < 1e-9);
    assert!(relative_error(after.storage - before.storage, expected) < 1e-9);
    assert!(relative_error(after.initial_water(), before.initial_water()) < 1e-9);
}
