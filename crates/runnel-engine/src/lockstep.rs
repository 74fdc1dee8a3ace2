//! Deterministic single-thread runner.
//!
//! [`LockstepSimulation`] advances every region once per round, in region
//! id order, and routes the batches each region produced before the next
//! region runs. Two runs over the same input produce bit-identical
//! results. A round in which no region progresses and no batch moves is a
//! deadlock and ends the run with [`SimulationError::Stalled`].

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::info;

use runnel_core::{ElementId, RegionId, TopologyError};
use runnel_element::Element;

use crate::config::SimulationConfig;
use crate::error::SimulationError;
use crate::region::{Advance, Physics, Region, WaterBudget};

// Fails to compile if any field is !Send.
const _: () = {
    #[allow(dead_code)]
    fn assert_send<T: Send>() {}
    #[allow(dead_code)]
    fn check() {
        assert_send::<LockstepSimulation>();
    }
};

/// Reject element ids claimed by more than one region.
pub(crate) fn check_disjoint<'a>(
    regions: impl IntoIterator<Item = &'a Region>,
) -> Result<(), SimulationError> {
    let mut owner: HashMap<ElementId, RegionId> = HashMap::new();
    for region in regions {
        for id in region.elements().keys() {
            if let Some(first) = owner.insert(*id, region.id()) {
                return Err(TopologyError::ElementInTwoRegions {
                    element: *id,
                    first,
                    second: region.id(),
                }
                .into());
            }
        }
    }
    Ok(())
}

/// Build one region per group of elements.
pub(crate) fn build_regions(
    grouped: IndexMap<RegionId, Vec<Element>>,
    config: &SimulationConfig,
    physics: &Physics,
) -> Result<Vec<Region>, SimulationError> {
    config.validate()?;
    grouped
        .into_iter()
        .map(|(id, elements)| {
            Region::new(id, elements, config, physics.clone())
                .map_err(|error| SimulationError::Region { region: id, error })
        })
        .collect()
}

/// What one round did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoundResult {
    /// Regions that completed at least one phase.
    pub progressed: usize,
    /// Regions that ended the round waiting.
    pub blocked: usize,
    /// Regions at the simulation end.
    pub finished: usize,
    /// Batches routed between regions.
    pub batches: usize,
}

/// Summary of a completed run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunReport {
    /// Rounds (lockstep) or region turns (threaded) taken.
    pub rounds: u64,
    /// Timesteps summed over every region.
    pub timesteps: u64,
    /// Mass balance over every region at the end.
    pub budget: WaterBudget,
}

/// Runs every region on the calling thread.
pub struct LockstepSimulation {
    regions: IndexMap<RegionId, Region>,
    rounds: u64,
}

impl LockstepSimulation {
    /// Take ownership of `regions`.
    ///
    /// Fails if two regions share an id or an element.
    pub fn new(regions: Vec<Region>) -> Result<Self, SimulationError> {
        check_disjoint(&regions)?;
        let mut map = IndexMap::with_capacity(regions.len());
        for region in regions {
            let id = region.id();
            if map.insert(id, region).is_some() {
                return Err(SimulationError::DuplicateRegion { region: id });
            }
        }
        map.sort_keys();
        Ok(Self {
            regions: map,
            rounds: 0,
        })
    }

    /// Build regions from assembled elements and take ownership of them.
    pub fn from_elements(
        grouped: IndexMap<RegionId, Vec<Element>>,
        config: &SimulationConfig,
        physics: &Physics,
    ) -> Result<Self, SimulationError> {
        Self::new(build_regions(grouped, config, physics)?)
    }

    /// Regions in id order.
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// One region.
    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(&id)
    }

    /// One region, mutably (to attach an output sink before running).
    pub fn region_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.regions.get_mut(&id)
    }

    /// Give the regions back.
    pub fn into_regions(self) -> Vec<Region> {
        self.regions.into_values().collect()
    }

    /// Rounds run so far.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Whether every region reached the simulation end.
    pub fn is_finished(&self) -> bool {
        self.regions.values().all(Region::is_finished)
    }

    /// Mass balance summed over every region.
    pub fn budget(&self) -> WaterBudget {
        self.regions
            .values()
            .map(Region::budget)
            .fold(WaterBudget::default(), |a, b| a + b)
    }

    /// Advance each region once and route what it sent.
    pub fn step_round(&mut self) -> Result<RoundResult, SimulationError> {
        let mut result = RoundResult::default();
        for index in 0..self.regions.len() {
            let Some((&id, region)) = self.regions.get_index_mut(index) else {
                continue;
            };
            let advance = region
                .advance()
                .map_err(|error| SimulationError::Region { region: id, error })?;
            match advance {
                Advance::Progressed => result.progressed += 1,
                Advance::Blocked => result.blocked += 1,
                Advance::Finished => result.finished += 1,
            }
            let batches = region.take_outgoing();
            for batch in batches {
                let to = batch.to;
                let target = self
                    .regions
                    .get_mut(&to)
                    .ok_or(SimulationError::Disconnected { region: to })?;
                target
                    .deliver(batch)
                    .map_err(|error| SimulationError::Region { region: to, error })?;
                result.batches += 1;
            }
        }
        self.rounds += 1;
        Ok(result)
    }

    /// Run rounds until every region finishes.
    pub fn run(&mut self) -> Result<RunReport, SimulationError> {
        info!(regions = self.regions.len(), "lockstep run started");
        while !self.is_finished() {
            let round = self.step_round()?;
            if round.progressed == 0 && round.batches == 0 && !self.is_finished() {
                let regions = self
                    .regions
                    .values()
                    .filter(|r| !r.is_finished())
                    .map(Region::id)
                    .collect();
                return Err(SimulationError::Stalled { regions });
            }
        }
        let report = RunReport {
            rounds: self.rounds,
            timesteps: self.regions.values().map(|r| r.metrics().timesteps).sum(),
            budget: self.budget(),
        };
        info!(
            rounds = report.rounds,
            timesteps = report.timesteps,
            storage = report.budget.storage,
            "lockstep run finished"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for LockstepSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockstepSimulation")
            .field("regions", &self.regions.len())
            .field("rounds", &self.rounds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use runnel_element::ConstantForcing;
    use runnel_test_utils::fixtures::{inert_land_surface, link_surface, mesh, sealed_vadose};

    fn physics() -> Physics {
        Physics {
            land_surface: Arc::new(inert_land_surface()),
            vadose: Arc::new(sealed_vadose()),
            forcing: Arc::new(ConstantForcing::default()),
        }
    }

    fn config() -> SimulationConfig {
        SimulationConfig {
            simulation_end: 7200.0,
            regional_dt_limit: 900.0,
            check_invariants: true,
            ..SimulationConfig::default()
        }
    }

    fn two_regions() -> IndexMap<RegionId, Vec<Element>> {
        let mut a = mesh(1, 0.0, 10.0, 0.05);
        let mut b = mesh(2, 100.0, 9.5, 0.0);
        link_surface(&mut a, RegionId(0), &mut b, RegionId(1));
        let mut grouped = IndexMap::new();
        grouped.insert(RegionId(0), vec![a]);
        grouped.insert(RegionId(1), vec![b]);
        grouped
    }

    #[test]
    fn two_regions_run_to_end() {
        let mut sim = LockstepSimulation::from_elements(two_regions(), &config(), &physics()).unwrap();
        let before = sim.budget().initial_water();
        let report = sim.run().unwrap();
        assert!(sim.is_finished());
        assert_eq!(report.budget.pending, 0.0);
        assert!((report.budget.initial_water() - before).abs() < 1e-9 * before);
        assert!(report.timesteps >= 16);
    }

    #[test]
    fn runs_are_deterministic() {
        let run = || {
            let mut sim =
                LockstepSimulation::from_elements(two_regions(), &config(), &physics()).unwrap();
            sim.run().unwrap();
            sim.into_regions()
                .into_iter()
                .flat_map(Region::into_elements)
                .map(|e| e.total_water().to_bits())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn element_in_two_regions_is_rejected() {
        let cfg = config();
        let r0 = Region::new(RegionId(0), vec![mesh(1, 0.0, 10.0, 0.0)], &cfg, physics()).unwrap();
        let r1 = Region::new(RegionId(1), vec![mesh(1, 0.0, 10.0, 0.0)], &cfg, physics()).unwrap();
        match LockstepSimulation::new(vec![r0, r1]) {
            Err(SimulationError::Topology(TopologyError::ElementInTwoRegions { .. })) => {}
            other => panic!("expected ElementInTwoRegions, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_region_is_rejected() {
        let cfg = config();
        let r0 = Region::new(RegionId(0), Vec::new(), &cfg, physics()).unwrap();
        let r1 = Region::new(RegionId(0), Vec::new(), &cfg, physics()).unwrap();
        match LockstepSimulation::new(vec![r0, r1]) {
            Err(SimulationError::DuplicateRegion { .. }) => {}
            other => panic!("expected DuplicateRegion, got {other:?}"),
        }
    }

    #[test]
    fn batch_for_unknown_region_disconnects() {
        // Region 1 is never built, so region 0's first batch has nowhere to go.
        let mut grouped = two_regions();
        grouped.shift_remove(&RegionId(1));
        let mut sim = LockstepSimulation::from_elements(grouped, &config(), &physics()).unwrap();
        match sim.run() {
            Err(SimulationError::Disconnected { region }) => assert_eq!(region, RegionId(1)),
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }

    #[test]
    fn message_for_missing_element_fails_receiver() {
        let mut grouped = two_regions();
        grouped.insert(RegionId(1), Vec::new());
        let mut sim = LockstepSimulation::from_elements(grouped, &config(), &physics()).unwrap();
        match sim.run() {
            Err(SimulationError::Region {
                region,
                error: crate::error::RegionError::Topology(TopologyError::UnknownElement { .. }),
            }) => assert_eq!(region, RegionId(1)),
            other => panic!("expected UnknownElement in region 1, got {other:?}"),
        }
    }
}
