//! One OS thread per region.
//!
//! Each region thread owns its [`Region`] exclusively (moved in via
//! `thread::Builder::spawn`) and an unbounded crossbeam inbox. Batches for
//! another region go straight into that region's inbox. A blocked region
//! waits on its inbox in short slices so it notices an abort promptly, and
//! gives up with [`SimulationError::Stalled`] once `stall_timeout` passes
//! without a message. The first failing region sets a shared abort flag
//! and every other thread stops at its next turn.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use indexmap::IndexMap;
use tracing::{debug, info};

use runnel_core::RegionId;
use runnel_element::Element;
use runnel_neighbor::MessageBatch;

use crate::config::{ConfigError, SimulationConfig};
use crate::error::SimulationError;
use crate::lockstep::{build_regions, check_disjoint};
use crate::region::{Advance, Physics, Region};

/// Longest single wait on an inbox before rechecking the abort flag.
const WAIT_SLICE: Duration = Duration::from_millis(20);

/// How a region thread ended.
enum Exit {
    Finished(Box<Region>),
    Aborted,
    Failed(SimulationError),
}

/// Runs every region on its own thread.
pub struct ThreadedSimulation {
    regions: Vec<Region>,
    stall_timeout: Duration,
}

impl ThreadedSimulation {
    /// Take ownership of `regions`.
    ///
    /// Fails if two regions share an id or an element.
    pub fn new(regions: Vec<Region>, config: &SimulationConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        check_disjoint(&regions)?;
        let mut seen = HashMap::with_capacity(regions.len());
        for region in &regions {
            if seen.insert(region.id(), ()).is_some() {
                return Err(SimulationError::DuplicateRegion { region: region.id() });
            }
        }
        Ok(Self {
            regions,
            stall_timeout: config.stall_timeout,
        })
    }

    /// Build regions from assembled elements and take ownership of them.
    pub fn from_elements(
        grouped: IndexMap<RegionId, Vec<Element>>,
        config: &SimulationConfig,
        physics: &Physics,
    ) -> Result<Self, SimulationError> {
        Self::new(build_regions(grouped, config, physics)?, config)
    }

    /// Run every region to the end and hand them back in id order.
    pub fn run(self) -> Result<Vec<Region>, SimulationError> {
        let abort = Arc::new(AtomicBool::new(false));
        let mut inboxes = Vec::with_capacity(self.regions.len());
        let mut senders = HashMap::with_capacity(self.regions.len());
        for region in &self.regions {
            let (tx, rx) = crossbeam_channel::unbounded();
            senders.insert(region.id(), tx);
            inboxes.push(rx);
        }
        let senders = Arc::new(senders);
        info!(regions = self.regions.len(), "threaded run started");

        let mut handles: Vec<(RegionId, JoinHandle<Exit>)> = Vec::with_capacity(inboxes.len());
        for (region, inbox) in self.regions.into_iter().zip(inboxes) {
            let id = region.id();
            let worker = RegionWorker {
                region,
                inbox,
                senders: Arc::clone(&senders),
                abort: Arc::clone(&abort),
                stall_timeout: self.stall_timeout,
            };
            let spawned = thread::Builder::new()
                .name(format!("runnel-region-{id}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => handles.push((id, handle)),
                Err(e) => {
                    abort.store(true, Ordering::Release);
                    for (_, handle) in handles {
                        let _ = handle.join();
                    }
                    return Err(ConfigError::ThreadSpawnFailed {
                        reason: format!("region {id}: {e}"),
                    }
                    .into());
                }
            }
        }
        drop(senders);

        let mut regions = Vec::with_capacity(handles.len());
        let mut failure = None;
        for (id, handle) in handles {
            match handle.join() {
                Ok(Exit::Finished(region)) => regions.push(*region),
                Ok(Exit::Aborted) => {}
                Ok(Exit::Failed(error)) => {
                    failure.get_or_insert(error);
                }
                Err(_) => {
                    failure.get_or_insert(SimulationError::ThreadPanicked { region: id });
                }
            }
        }
        if let Some(error) = failure {
            return Err(error);
        }
        regions.sort_by_key(Region::id);
        info!(regions = regions.len(), "threaded run finished");
        Ok(regions)
    }
}

impl std::fmt::Debug for ThreadedSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadedSimulation")
            .field("regions", &self.regions.len())
            .field("stall_timeout", &self.stall_timeout)
            .finish()
    }
}

// ── Region thread ───────────────────────────────────────────────

struct RegionWorker {
    region: Region,
    inbox: Receiver<MessageBatch>,
    senders: Arc<HashMap<RegionId, Sender<MessageBatch>>>,
    abort: Arc<AtomicBool>,
    stall_timeout: Duration,
}

impl RegionWorker {
    fn run(mut self) -> Exit {
        match self.turns() {
            Ok(true) => Exit::Finished(Box::new(self.region)),
            Ok(false) => Exit::Aborted,
            Err(error) => {
                self.abort.store(true, Ordering::Release);
                Exit::Failed(error)
            }
        }
    }

    /// Returns `Ok(true)` on finish and `Ok(false)` when aborted.
    fn turns(&mut self) -> Result<bool, SimulationError> {
        let id = self.region.id();
        loop {
            if self.abort.load(Ordering::Acquire) {
                return Ok(false);
            }
            while let Ok(batch) = self.inbox.try_recv() {
                self.deliver(batch)?;
            }
            let advance = self
                .region
                .advance()
                .map_err(|error| SimulationError::Region { region: id, error })?;
            self.send_outgoing()?;
            match advance {
                Advance::Finished => return Ok(true),
                Advance::Progressed => {}
                Advance::Blocked => {
                    if !self.wait()? {
                        return Ok(false);
                    }
                }
            }
        }
    }

    fn deliver(&mut self, batch: MessageBatch) -> Result<(), SimulationError> {
        let id = self.region.id();
        self.region
            .deliver(batch)
            .map_err(|error| SimulationError::Region { region: id, error })
    }

    fn send_outgoing(&mut self) -> Result<(), SimulationError> {
        for batch in self.region.take_outgoing() {
            let to = batch.to;
            let sender = self
                .senders
                .get(&to)
                .ok_or(SimulationError::Disconnected { region: to })?;
            if sender.send(batch).is_err() {
                // The receiving thread has already exited.
                debug!(from = %self.region.id(), to = %to, "batch dropped");
            }
        }
        Ok(())
    }

    /// Block until one batch arrives. Returns `Ok(false)` when aborted.
    fn wait(&mut self) -> Result<bool, SimulationError> {
        let id = self.region.id();
        let deadline = Instant::now() + self.stall_timeout;
        loop {
            if self.abort.load(Ordering::Acquire) {
                return Ok(false);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SimulationError::Stalled { regions: vec![id] });
            }
            match self.inbox.recv_timeout(WAIT_SLICE.min(deadline - now)) {
                Ok(batch) => {
                    self.deliver(batch)?;
                    return Ok(true);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SimulationError::Disconnected { region: id });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runnel_element::ConstantForcing;
    use runnel_test_utils::fixtures::{inert_land_surface, link_surface, mesh, sealed_vadose};

    use crate::lockstep::LockstepSimulation;

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
            stall_timeout: Duration::from_secs(5),
            ..SimulationConfig::default()
        }
    }

    fn grouped() -> IndexMap<RegionId, Vec<Element>> {
        let mut a = mesh(1, 0.0, 10.0, 0.05);
        let mut b = mesh(2, 100.0, 9.5, 0.0);
        let mut c = mesh(3, 200.0, 9.0, 0.0);
        link_surface(&mut a, RegionId(0), &mut b, RegionId(1));
        link_surface(&mut b, RegionId(1), &mut c, RegionId(2));
        let mut grouped = IndexMap::new();
        grouped.insert(RegionId(0), vec![a]);
        grouped.insert(RegionId(1), vec![b]);
        grouped.insert(RegionId(2), vec![c]);
        grouped
    }

    #[test]
    fn threaded_matches_lockstep() {
        let threaded = ThreadedSimulation::from_elements(grouped(), &config(), &physics())
            .unwrap()
            .run()
            .unwrap();
        let mut lockstep =
            LockstepSimulation::from_elements(grouped(), &config(), &physics()).unwrap();
        lockstep.run().unwrap();

        assert_eq!(threaded.len(), 3);
        for region in &threaded {
            assert!(region.is_finished());
            let twin = lockstep.region(region.id()).unwrap();
            for (id, element) in region.elements() {
                let other = twin.element(*id).unwrap();
                assert_eq!(element.total_water().to_bits(), other.total_water().to_bits());
            }
        }
    }

    #[test]
    fn region_failure_aborts_the_run() {
        let mut groups = grouped();
        groups.insert(RegionId(2), Vec::new());
        let sim = ThreadedSimulation::from_elements(groups, &config(), &physics()).unwrap();
        match sim.run() {
            Err(SimulationError::Region { region, .. }) => assert_eq!(region, RegionId(2)),
            other => panic!("expected a region failure, got {other:?}"),
        }
    }

    #[test]
    fn unknown_destination_is_disconnected() {
        let mut groups = grouped();
        groups.shift_remove(&RegionId(2));
        let sim = ThreadedSimulation::from_elements(groups, &config(), &physics()).unwrap();
        match sim.run() {
            Err(SimulationError::Disconnected { region }) => assert_eq!(region, RegionId(2)),
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }
}
