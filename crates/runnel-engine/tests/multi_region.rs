//! Integration test: regions on independent clocks agree with each other.
//!
//! Splits line graphs across several regions and runs them with both
//! runners. Every partition must conserve water, finish with nothing in
//! flight, and produce the same final state whichever runner drove it.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use proptest::prelude::*;

use runnel_core::RegionId;
use runnel_element::{ConstantForcing, Element};
use runnel_engine::{LockstepSimulation, Physics, Region, SimulationConfig, ThreadedSimulation};
use runnel_test_utils::fixtures::{
    channel, channel_reach, inert_land_surface, link_reservoir, mesh_line, sealed_vadose,
};

fn physics() -> Physics {
    Physics {
        land_surface: Arc::new(inert_land_surface()),
        vadose: Arc::new(sealed_vadose()),
        forcing: Arc::new(ConstantForcing::default()),
    }
}

fn config(end: f64, dt_limit: f64) -> SimulationConfig {
    SimulationConfig {
        simulation_end: end,
        sync_interval: 1800.0,
        regional_dt_limit: dt_limit,
        check_invariants: true,
        stall_timeout: Duration::from_secs(10),
        ..SimulationConfig::default()
    }
}

fn final_water(regions: impl IntoIterator<Item = Region>) -> Vec<(u32, u64)> {
    let mut water: Vec<(u32, u64)> = regions
        .into_iter()
        .flat_map(Region::into_elements)
        .map(|e| (e.id().0, e.total_water().to_bits()))
        .collect();
    water.sort_unstable();
    water
}

fn initial_water(grouped: &IndexMap<RegionId, Vec<Element>>) -> f64 {
    grouped
        .values()
        .flatten()
        .map(|e| e.total_water() - e.water_created() - e.precipitation() + e.evaporation())
        .sum()
}

#[test]
fn lockstep_line_of_four_regions_conserves_water() {
    let grouped = mesh_line(8, 4);
    assert_eq!(grouped.len(), 4);
    let before = initial_water(&grouped);
    let mut sim = LockstepSimulation::from_elements(grouped, &config(3600.0, 600.0), &physics())
        .unwrap();
    let report = sim.run().unwrap();

    assert!(sim.is_finished());
    assert_eq!(report.budget.pending, 0.0);
    assert!((report.budget.initial_water() - before).abs() < 1e-9 * before);
    for region in sim.regions() {
        assert_eq!(region.clock().current_time, 3600.0);
        assert!(region.metrics().batches_received > 0);
    }
}

#[test]
fn reservoir_across_regions_finishes_wet_or_dry() {
    for depth in [0.0, 0.5] {
        let mut release = channel(1, 0.0, 5.0, depth);
        let mut recipient = channel(2, 100.0, 4.0, 0.2);
        link_reservoir(&mut release, RegionId(0), &mut recipient, RegionId(1));
        let grouped: IndexMap<RegionId, Vec<Element>> =
            [(RegionId(0), vec![release]), (RegionId(1), vec![recipient])]
                .into_iter()
                .collect();
        let before = initial_water(&grouped);
        let mut sim =
            LockstepSimulation::from_elements(grouped, &config(3600.0, 600.0), &physics()).unwrap();
        let report = sim.run().unwrap();

        assert!(sim.is_finished(), "release depth {depth}");
        assert_eq!(report.budget.pending, 0.0);
        assert!((report.budget.initial_water() - before).abs() < 1e-9 * before);
    }
}

#[test]
fn threaded_and_lockstep_agree_on_channel_reach() {
    let cfg = config(3600.0, 900.0);
    let threaded = ThreadedSimulation::from_elements(channel_reach(6, 3, 0.4), &cfg, &physics())
        .unwrap()
        .run()
        .unwrap();
    let mut lockstep =
        LockstepSimulation::from_elements(channel_reach(6, 3, 0.4), &cfg, &physics()).unwrap();
    lockstep.run().unwrap();

    assert!(threaded.iter().all(Region::is_finished));
    assert_eq!(final_water(threaded), final_water(lockstep.into_regions()));
}

#[test]
fn threaded_runs_are_repeatable() {
    let cfg = config(3600.0, 600.0);
    let run = || {
        ThreadedSimulation::from_elements(mesh_line(6, 3), &cfg, &physics())
            .unwrap()
            .run()
            .unwrap()
    };
    assert_eq!(final_water(run()), final_water(run()));
}

#[test]
fn regions_report_message_traffic() {
    let mut sim =
        LockstepSimulation::from_elements(mesh_line(4, 2), &config(1800.0, 300.0), &physics())
            .unwrap();
    sim.run().unwrap();
    for region in sim.regions() {
        let m = region.metrics();
        assert!(m.batches_sent > 0, "region {} sent nothing", region.id());
        assert!(m.messages_sent >= m.batches_sent);
        assert_eq!(m.sync_points, 2);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn any_partition_conserves_water(
        count in 2usize..7,
        regions in 1u32..4,
        dt_index in 0usize..3,
    ) {
        let dt_limit = [150.0, 600.0, 1800.0][dt_index];
        let grouped = mesh_line(count, regions);
        let before = initial_water(&grouped);
        let mut sim = LockstepSimulation::from_elements(
            grouped,
            &config(1800.0, dt_limit),
            &physics(),
        )
        .unwrap();
        let report = sim.run().unwrap();
        prop_assert!(sim.is_finished());
        prop_assert_eq!(report.budget.pending, 0.0);
        prop_assert!((report.budget.initial_water() - before).abs() < 1e-9 * before);
    }
}
