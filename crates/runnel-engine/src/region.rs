//! The region scheduler.
//!
//! A [`Region`] owns a disjoint set of elements and one simulation clock.
//! Each call to [`advance()`](Region::advance) runs phases until the
//! region finishes or a barrier needs a message from another region:
//!
//! ```text
//! Initialize ─► Sync(start) ─► Negotiate ─► SelectTimestep ─► PointProcess
//!                   ▲                ▲                              │
//!                   │                └────────── ReceiveInflows ◄───┘
//!                   └──────── (at next_sync) ───────┘
//! ```
//!
//! Every barrier (attributes, negotiation, water arrival, invariants)
//! first emits this region's half for every edge and then scans with a
//! resumable [`ScanCursor`]. Regions never touch each other's state:
//! cross-region envelopes leave through [`take_outgoing()`](Region::take_outgoing)
//! and arrive through [`deliver()`](Region::deliver).

use std::fmt;
use std::ops::Add;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use runnel_core::{ElementId, InvariantError, RegionId, TopologyError};
use runnel_element::{
    BucketLandSurface, BucketVadoseSolver, ConstantForcing, Element, ForcingSource, LandSurface,
    OutputSink, RegionSnapshot, StepContext, VadoseSolver,
};
use runnel_neighbor::{Envelope, MessageBatch};

use crate::config::{SimulationConfig, Verbosity};
use crate::error::RegionError;
use crate::metrics::RegionMetrics;
use crate::router::Router;
use crate::scan::{visit_all, ScanCursor};

// Fails to compile if any field is !Send.
const _: () = {
    #[allow(dead_code)]
    fn assert_send<T: Send>() {}
    #[allow(dead_code)]
    fn check() {
        assert_send::<Region>();
    }
};

// ── Phase and clock ─────────────────────────────────────────────

/// Where a region is in its step cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Exchanging attributes with every neighbor.
    Initialize,
    /// Renegotiating expired leases.
    Negotiate,
    /// Choosing the end of the next timestep.
    SelectTimestep,
    /// Running physics and sending outflows.
    PointProcess,
    /// Waiting for and draining inflows.
    ReceiveInflows,
    /// At a sync point: output written, invariants being checked.
    Sync,
    /// Reached the simulation end.
    Finished,
}

/// A region's view of simulation time.
///
/// Always `current_time ≤ timestep_end_time ≤ next_sync_time ≤
/// simulation_end_time`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionClock {
    /// Start of the step in progress (s).
    pub current_time: f64,
    /// End of the step in progress (s).
    pub timestep_end_time: f64,
    /// Next sync point (s).
    pub next_sync_time: f64,
    /// End of the run (s).
    pub simulation_end_time: f64,
}

impl RegionClock {
    /// A clock parked at `start`, with the first sync point at `start`.
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            current_time: start,
            timestep_end_time: start,
            next_sync_time: start,
            simulation_end_time: end,
        }
    }

    /// Verify the ordering invariant.
    pub fn check(&self, region: RegionId) -> Result<(), InvariantError> {
        let ordered = self.current_time <= self.timestep_end_time
            && self.timestep_end_time <= self.next_sync_time
            && self.next_sync_time <= self.simulation_end_time;
        if ordered {
            Ok(())
        } else {
            Err(InvariantError::ClockOrder {
                region,
                reason: format!(
                    "current {} timestep_end {} next_sync {} end {}",
                    self.current_time,
                    self.timestep_end_time,
                    self.next_sync_time,
                    self.simulation_end_time
                ),
            })
        }
    }
}

// ── Physics ─────────────────────────────────────────────────────

/// The black boxes shared by every region of a run.
#[derive(Clone)]
pub struct Physics {
    /// Land-surface module.
    pub land_surface: Arc<dyn LandSurface>,
    /// Vadose-zone solver.
    pub vadose: Arc<dyn VadoseSolver>,
    /// Atmospheric forcing.
    pub forcing: Arc<dyn ForcingSource>,
}

impl Default for Physics {
    fn default() -> Self {
        Self {
            land_surface: Arc::new(BucketLandSurface::default()),
            vadose: Arc::new(BucketVadoseSolver::default()),
            forcing: Arc::new(ConstantForcing::default()),
        }
    }
}

impl fmt::Debug for Physics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Physics").finish_non_exhaustive()
    }
}

// ── Water budget ────────────────────────────────────────────────

/// Every term of the mass balance for a set of elements (m³).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WaterBudget {
    /// Water stored in containers.
    pub storage: f64,
    /// Water received on edges but not yet drained.
    pub pending: f64,
    /// Water created from nothing.
    pub created: f64,
    /// Precipitation received.
    pub precipitation: f64,
    /// Water returned to the atmosphere.
    pub evaporation: f64,
    /// Water received from outside the domain.
    pub boundary_inflow: f64,
    /// Water sent outside the domain.
    pub boundary_outflow: f64,
}

impl WaterBudget {
    /// Budget of one element.
    pub fn of(element: &Element) -> Self {
        Self {
            storage: element.total_water(),
            pending: element.pending_inflow(),
            created: element.water_created(),
            precipitation: element.precipitation(),
            evaporation: element.evaporation(),
            boundary_inflow: element.boundary_inflow(),
            boundary_outflow: element.boundary_outflow(),
        }
    }

    /// Water the run started with, reconstructed from the other terms.
    /// Constant over a run once nothing is in flight between elements.
    pub fn initial_water(&self) -> f64 {
        self.storage + self.pending - self.created - self.precipitation + self.evaporation
            + self.boundary_outflow
            - self.boundary_inflow
    }
}

impl Add for WaterBudget {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            storage: self.storage + rhs.storage,
            pending: self.pending + rhs.pending,
            created: self.created + rhs.created,
            precipitation: self.precipitation + rhs.precipitation,
            evaporation: self.evaporation + rhs.evaporation,
            boundary_inflow: self.boundary_inflow + rhs.boundary_inflow,
            boundary_outflow: self.boundary_outflow + rhs.boundary_outflow,
        }
    }
}

// ── Region ──────────────────────────────────────────────────────

/// Outcome of one [`Region::advance()`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    /// At least one phase completed.
    Progressed,
    /// Waiting on a message from another region.
    Blocked,
    /// The region reached the simulation end.
    Finished,
}

/// One partition of the element graph with its own clock.
pub struct Region {
    id: RegionId,
    elements: IndexMap<ElementId, Element>,
    config: SimulationConfig,
    physics: Physics,
    output: Option<Box<dyn OutputSink>>,
    clock: RegionClock,
    phase: Phase,
    cursor: ScanCursor,
    router: Router,
    scratch: Vec<Envelope>,
    metrics: RegionMetrics,
    traced: bool,
}

impl Region {
    /// Build a region owning `elements`.
    ///
    /// Validates the configuration, rejects duplicate elements, and checks
    /// that every edge whose far side is claimed by this region really has
    /// a matching proxy here.
    pub fn new(
        id: RegionId,
        elements: impl IntoIterator<Item = Element>,
        config: &SimulationConfig,
        physics: Physics,
    ) -> Result<Self, RegionError> {
        config.validate()?;
        let mut store = IndexMap::new();
        for mut element in elements {
            element.sort_proxies();
            let element_id = element.id();
            if store.insert(element_id, element).is_some() {
                return Err(TopologyError::DuplicateElement {
                    element: element_id,
                }
                .into());
            }
        }
        store.sort_keys();
        for element in store.values() {
            for (connection, proxy) in element.proxies() {
                if connection.is_one_way() || proxy.remote_region() != id {
                    continue;
                }
                let remote = store.get(&connection.remote_element).ok_or(
                    TopologyError::UnknownElement {
                        element: connection.remote_element,
                        region: id,
                    },
                )?;
                if !remote.proxies().contains_key(&connection.reverse()) {
                    return Err(TopologyError::UnknownConnection {
                        connection: connection.reverse(),
                    }
                    .into());
                }
            }
        }
        info!(
            region = %id,
            elements = store.len(),
            start = config.simulation_start,
            end = config.simulation_end,
            "region created"
        );
        Ok(Self {
            id,
            elements: store,
            config: config.clone(),
            physics,
            output: None,
            clock: RegionClock::new(config.simulation_start, config.simulation_end),
            phase: Phase::Initialize,
            cursor: ScanCursor::new(),
            router: Router::new(id),
            scratch: Vec::new(),
            metrics: RegionMetrics::default(),
            traced: config.is_traced(id),
        })
    }

    /// Send a snapshot to `sink` at every sync point.
    pub fn set_output(&mut self, sink: Box<dyn OutputSink>) {
        self.output = Some(sink);
    }

    /// Detach the output sink.
    pub fn take_output(&mut self) -> Option<Box<dyn OutputSink>> {
        self.output.take()
    }

    // ── Accessors ───────────────────────────────────────────────

    /// Region id.
    pub fn id(&self) -> RegionId {
        self.id
    }

    /// Current clock.
    pub fn clock(&self) -> &RegionClock {
        &self.clock
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the region reached the simulation end.
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Counters so far.
    pub fn metrics(&self) -> &RegionMetrics {
        &self.metrics
    }

    /// Owned elements in id order.
    pub fn elements(&self) -> &IndexMap<ElementId, Element> {
        &self.elements
    }

    /// One owned element.
    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }

    /// Give the elements back, for re-initialization in another region.
    pub fn into_elements(self) -> Vec<Element> {
        self.elements.into_values().collect()
    }

    /// Mass balance terms over every owned element.
    pub fn budget(&self) -> WaterBudget {
        self.elements
            .values()
            .map(WaterBudget::of)
            .fold(WaterBudget::default(), <WaterBudget as Add>::add)
    }

    /// Output record for the current time.
    pub fn snapshot(&self) -> RegionSnapshot {
        RegionSnapshot {
            region: self.id,
            time: self.clock.current_time,
            elements: self.elements.values().map(Element::snapshot).collect(),
        }
    }

    // ── Messaging ───────────────────────────────────────────────

    /// Apply a batch from another region.
    pub fn deliver(&mut self, batch: MessageBatch) -> Result<(), RegionError> {
        self.metrics.batches_received += 1;
        for envelope in batch.envelopes {
            self.dispatch(envelope)?;
        }
        Ok(())
    }

    /// Batches produced since the last call, one per destination region.
    pub fn take_outgoing(&mut self) -> Vec<MessageBatch> {
        let batches = self.router.take_batches();
        self.metrics.batches_sent += batches.len() as u64;
        batches
    }

    fn dispatch(&mut self, envelope: Envelope) -> Result<(), RegionError> {
        let target = envelope.receiver_connection();
        let element = self.elements.get_mut(&target.local_element).ok_or(
            TopologyError::UnknownElement {
                element: target.local_element,
                region: self.id,
            },
        )?;
        let proxy = element
            .proxy_mut(&target)
            .ok_or(TopologyError::UnknownConnection { connection: target })?;
        proxy.receive(envelope.message)?;
        self.metrics.messages_received += 1;
        Ok(())
    }

    /// Route everything the elements emitted, then dispatch same-region
    /// envelopes. Returns how many were dispatched locally.
    fn flush(&mut self) -> Result<usize, RegionError> {
        let mut emitted = std::mem::take(&mut self.scratch);
        self.metrics.messages_sent += emitted.len() as u64;
        for envelope in emitted.drain(..) {
            let connection = envelope.connection;
            let destination = self
                .elements
                .get(&connection.local_element)
                .and_then(|e| e.proxies().get(&connection))
                .map(|p| p.remote_region())
                .ok_or(TopologyError::UnknownConnection { connection })?;
            self.router.route(envelope, destination);
        }
        self.scratch = emitted;
        let local = self.router.take_local();
        let count = local.len();
        for envelope in local {
            self.dispatch(envelope)?;
        }
        Ok(count)
    }

    // ── Stepping ────────────────────────────────────────────────

    /// Run phases until the region finishes or must wait for another
    /// region.
    pub fn advance(&mut self) -> Result<Advance, RegionError> {
        let mut progressed = false;
        while self.phase != Phase::Finished {
            let complete = match self.phase {
                Phase::Initialize => self.initialize()?,
                Phase::Negotiate => self.negotiate()?,
                Phase::SelectTimestep => self.select_timestep()?,
                Phase::PointProcess => self.point_process()?,
                Phase::ReceiveInflows => self.receive_inflows()?,
                Phase::Sync => self.sync()?,
                Phase::Finished => true,
            };
            let dispatched = self.flush()?;
            if complete {
                progressed = true;
            } else if dispatched == 0 {
                break;
            }
        }
        if self.phase == Phase::Finished {
            Ok(Advance::Finished)
        } else if progressed {
            Ok(Advance::Progressed)
        } else {
            self.metrics.blocked_turns += 1;
            Ok(Advance::Blocked)
        }
    }

    fn enter(&mut self, phase: Phase) {
        self.cursor.reset();
        self.phase = phase;
    }

    fn initialize(&mut self) -> Result<bool, RegionError> {
        if !self.cursor.is_started() {
            for element in self.elements.values_mut() {
                element.send_neighbor_messages(&mut self.scratch);
            }
            self.cursor.start();
        }
        let done = self.cursor.scan(&mut self.elements, |e, i| {
            Ok::<_, RegionError>(
                e.proxies()
                    .get_index(i)
                    .is_none_or(|(_, p)| p.attributes_initialized()),
            )
        })?;
        if !done {
            return Ok(false);
        }
        let flags = self.config.startup_flags();
        let now = self.clock.current_time;
        for element in self.elements.values_mut() {
            element.apply_startup(flags, now);
        }
        self.enter_sync()?;
        Ok(true)
    }

    fn negotiate(&mut self) -> Result<bool, RegionError> {
        let now = self.clock.current_time;
        let out = &mut self.scratch;
        if !self.cursor.is_started() {
            visit_all(&mut self.elements, |e, i| e.negotiate_at(i, now, out))?;
            self.cursor.start();
        }
        if !self
            .cursor
            .scan(&mut self.elements, |e, i| e.negotiate_at(i, now, out))?
        {
            return Ok(false);
        }
        self.enter(Phase::SelectTimestep);
        Ok(true)
    }

    fn select_timestep(&mut self) -> Result<bool, RegionError> {
        let now = self.clock.current_time;
        let end = self
            .elements
            .values()
            .filter_map(Element::min_expiration)
            .fold(
                self.clock
                    .next_sync_time
                    .min(now + self.config.regional_dt_limit),
                f64::min,
            );
        if end <= now {
            return Err(InvariantError::ClockOrder {
                region: self.id,
                reason: format!("timestep end {end} does not follow {now}"),
            }
            .into());
        }
        self.clock.timestep_end_time = end;
        self.clock.check(self.id)?;
        if self.traced {
            debug!(region = %self.id, time = now, dt = end - now, "timestep selected");
        }
        self.enter(Phase::PointProcess);
        Ok(true)
    }

    fn point_process(&mut self) -> Result<bool, RegionError> {
        let (now, end) = (self.clock.current_time, self.clock.timestep_end_time);
        let ctx = StepContext {
            land_surface: self.physics.land_surface.as_ref(),
            vadose: self.physics.vadose.as_ref(),
            drain_down: self.config.drain_down_mode,
        };
        for element in self.elements.values_mut() {
            let rationed = element.point_process(&ctx, now, end, &mut self.scratch)?;
            self.metrics.rationed_outflows += rationed as u64;
        }
        self.enter(Phase::ReceiveInflows);
        Ok(true)
    }

    fn receive_inflows(&mut self) -> Result<bool, RegionError> {
        let (now, end) = (self.clock.current_time, self.clock.timestep_end_time);
        let arrived = self.cursor.scan(&mut self.elements, |e, i| {
            Ok::<_, RegionError>(e.water_arrived_at(i, now, end))
        })?;
        if !arrived {
            return Ok(false);
        }
        let ctx = StepContext {
            land_surface: self.physics.land_surface.as_ref(),
            vadose: self.physics.vadose.as_ref(),
            drain_down: self.config.drain_down_mode,
        };
        for element in self.elements.values_mut() {
            element.receive_inflows(&ctx, now, end)?;
        }
        self.metrics.timesteps += 1;
        self.metrics.last_dt = end - now;
        self.clock.current_time = end;
        self.clock.check(self.id)?;
        if self.traced {
            debug!(
                region = %self.id,
                time = end,
                dt = end - now,
                storage = self.budget().storage,
                "timestep complete"
            );
        }
        if self.clock.current_time >= self.clock.next_sync_time {
            self.enter_sync()?;
        } else {
            self.enter(Phase::Negotiate);
        }
        Ok(true)
    }

    /// Entry actions at a sync point: refresh forcing and boundary
    /// inflows, write output, report ledgers, and send invariant reports.
    fn enter_sync(&mut self) -> Result<(), RegionError> {
        let now = self.clock.current_time;
        for element in self.elements.values_mut() {
            let forcing = self.physics.forcing.forcing(element.id(), now);
            element.set_forcing(forcing);
            element.set_boundary_inflows(self.physics.forcing.as_ref(), now);
        }
        self.metrics.sync_points += 1;
        self.metrics.duplicate_transfers = self
            .elements
            .values()
            .flat_map(|e| e.proxies().values())
            .map(|p| p.duplicate_transfers())
            .sum();
        if self.output.is_some() {
            let snapshot = self.snapshot();
            if let Some(output) = self.output.as_mut() {
                output.write(&snapshot)?;
            }
        }
        self.report_ledgers();
        if self.config.check_invariants {
            for element in self.elements.values() {
                element.invariant_reports(now, &mut self.scratch);
            }
        }
        self.enter(Phase::Sync);
        Ok(())
    }

    fn report_ledgers(&self) {
        let now = self.clock.current_time;
        if self.config.verbosity >= Verbosity::Normal {
            let threshold = self.config.water_created_warning_threshold;
            for element in self.elements.values() {
                let created = element.water_created();
                if created.abs() > threshold {
                    warn!(
                        region = %self.id,
                        element = %element.id(),
                        time = now,
                        water_created = created,
                        "water created exceeds threshold"
                    );
                }
            }
            info!(
                region = %self.id,
                time = now,
                storage = self.budget().storage,
                timesteps = self.metrics.timesteps,
                "sync point"
            );
        }
    }

    fn sync(&mut self) -> Result<bool, RegionError> {
        let now = self.clock.current_time;
        if self.config.check_invariants {
            let checked = self.cursor.scan(&mut self.elements, |e, i| {
                e.check_invariant_at(i, now).map_err(RegionError::from)
            })?;
            if !checked {
                return Ok(false);
            }
        }
        if now >= self.clock.simulation_end_time {
            info!(
                region = %self.id,
                time = now,
                timesteps = self.metrics.timesteps,
                "region finished"
            );
            self.enter(Phase::Finished);
            return Ok(true);
        }
        self.clock.next_sync_time = self.config.next_sync_after(now);
        self.clock.timestep_end_time = now;
        self.clock.check(self.id)?;
        self.enter(Phase::Negotiate);
        Ok(true)
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.id)
            .field("elements", &self.elements.len())
            .field("phase", &self.phase)
            .field("clock", &self.clock)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runnel_element::{Forcing, MemorySink, OutputError};
    use runnel_test_utils::fixtures::{inert_land_surface, link_surface, mesh, sealed_vadose};

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
            sync_interval: 3600.0,
            regional_dt_limit: 600.0,
            check_invariants: true,
            ..SimulationConfig::default()
        }
    }

    fn pair(region_a: RegionId, region_b: RegionId) -> (Element, Element) {
        let mut a = mesh(1, 0.0, 10.0, 0.05);
        let mut b = mesh(2, 100.0, 9.5, 0.0);
        link_surface(&mut a, region_a, &mut b, region_b);
        (a, b)
    }

    /// Sink that shares its snapshots with the test through an `Arc`.
    struct SharedSink(Arc<std::sync::Mutex<Vec<RegionSnapshot>>>);

    impl OutputSink for SharedSink {
        fn write(&mut self, snapshot: &RegionSnapshot) -> Result<(), OutputError> {
            self.0
                .lock()
                .map_err(|_| OutputError::Rejected {
                    reason: "poisoned".to_string(),
                })?
                .push(snapshot.clone());
            Ok(())
        }
    }

    #[test]
    fn clock_check_rejects_disorder() {
        let mut clock = RegionClock::new(0.0, 100.0);
        assert!(clock.check(RegionId(0)).is_ok());
        clock.next_sync_time = 50.0;
        clock.timestep_end_time = 60.0;
        match clock.check(RegionId(0)) {
            Err(InvariantError::ClockOrder { .. }) => {}
            other => panic!("expected ClockOrder, got {other:?}"),
        }
    }

    #[test]
    fn new_rejects_duplicate_elements() {
        let result = Region::new(
            RegionId(0),
            vec![mesh(1, 0.0, 10.0, 0.0), mesh(1, 0.0, 10.0, 0.0)],
            &config(3600.0),
            physics(),
        );
        match result {
            Err(RegionError::Topology(TopologyError::DuplicateElement { .. })) => {}
            other => panic!("expected DuplicateElement, got {other:?}"),
        }
    }

    #[test]
    fn new_rejects_missing_local_neighbor() {
        let (a, _b) = pair(RegionId(0), RegionId(0));
        match Region::new(RegionId(0), vec![a], &config(3600.0), physics()) {
            Err(RegionError::Topology(TopologyError::UnknownElement { .. })) => {}
            other => panic!("expected UnknownElement, got {other:?}"),
        }
    }

    #[test]
    fn new_rejects_invalid_config() {
        let cfg = SimulationConfig {
            sync_interval: 0.0,
            ..SimulationConfig::default()
        };
        match Region::new(RegionId(0), Vec::new(), &cfg, physics()) {
            Err(RegionError::Config(_)) => {}
            other => panic!("expected Config, got {other:?}"),
        }
    }

    #[test]
    fn single_region_runs_to_end_and_conserves_water() {
        let (a, b) = pair(RegionId(0), RegionId(0));
        let mut region = Region::new(RegionId(0), vec![a, b], &config(7200.0), physics()).unwrap();
        let before = region.budget().initial_water();
        let mut turns = 0;
        while region.advance().unwrap() != Advance::Finished {
            turns += 1;
            assert!(turns < 10_000, "region did not finish");
        }
        assert!(region.take_outgoing().is_empty());
        assert_eq!(region.clock().current_time, 7200.0);
        let budget = region.budget();
        assert!((budget.initial_water() - before).abs() < 1e-9 * before);
        assert_eq!(budget.pending, 0.0);
        assert!(region.metrics().timesteps >= 12);
        assert_eq!(region.metrics().sync_points, 3);
        assert!(region.element(ElementId(2)).unwrap().total_water() > 0.0);
    }

    #[test]
    fn empty_region_finishes_at_once() {
        let mut region = Region::new(RegionId(3), Vec::new(), &config(3600.0), physics()).unwrap();
        assert_eq!(region.advance().unwrap(), Advance::Finished);
        assert_eq!(region.metrics().timesteps, 6);
    }

    #[test]
    fn timesteps_respect_dt_limit_and_sync_grid() {
        let (a, b) = pair(RegionId(0), RegionId(0));
        let cfg = SimulationConfig {
            simulation_end: 1000.0,
            sync_interval: 300.0,
            regional_dt_limit: 128.0,
            ..config(1000.0)
        };
        let mut region = Region::new(RegionId(0), vec![a, b], &cfg, physics()).unwrap();
        while region.advance().unwrap() != Advance::Finished {}
        assert!(region.metrics().last_dt <= 128.0);
        // Sync points at 0, 300, 600, 900, 1000.
        assert_eq!(region.metrics().sync_points, 5);
    }

    #[test]
    fn cross_region_edge_blocks_until_delivery() {
        let (a, b) = pair(RegionId(0), RegionId(1));
        let cfg = config(3600.0);
        let mut left = Region::new(RegionId(0), vec![a], &cfg, physics()).unwrap();
        let mut right = Region::new(RegionId(1), vec![b], &cfg, physics()).unwrap();

        assert_eq!(left.advance().unwrap(), Advance::Blocked);
        let batches = left.take_outgoing();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].to, RegionId(1));

        let mut inflight = batches;
        for _ in 0..10_000 {
            if left.is_finished() && right.is_finished() {
                break;
            }
            for batch in inflight.drain(..) {
                if batch.to == RegionId(0) {
                    left.deliver(batch).unwrap();
                } else {
                    right.deliver(batch).unwrap();
                }
            }
            left.advance().unwrap();
            right.advance().unwrap();
            inflight.extend(left.take_outgoing());
            inflight.extend(right.take_outgoing());
        }
        assert!(left.is_finished() && right.is_finished());
        let total = left.budget() + right.budget();
        assert_eq!(total.pending, 0.0);
        assert!(right.metrics().batches_received > 0);
        assert_eq!(left.metrics().timesteps, right.metrics().timesteps);
    }

    #[test]
    fn deliver_rejects_unknown_element() {
        let (a, _b) = pair(RegionId(0), RegionId(1));
        let cfg = config(3600.0);
        let mut left = Region::new(RegionId(0), vec![a], &cfg, physics()).unwrap();
        left.advance().unwrap();
        let batch = left.take_outgoing().remove(0);
        // Region 1 exists but does not own element 2.
        let mut wrong = Region::new(RegionId(1), Vec::new(), &cfg, physics()).unwrap();
        match wrong.deliver(batch) {
            Err(RegionError::Topology(TopologyError::UnknownElement { .. })) => {}
            other => panic!("expected UnknownElement, got {other:?}"),
        }
    }

    #[test]
    fn sync_points_write_snapshots_with_forcing() {
        let (a, b) = pair(RegionId(0), RegionId(0));
        let rain = Forcing {
            precipitation: 1.0e-6,
            temperature: 10.0,
            potential_evaporation: 0.0,
        };
        let physics = Physics {
            forcing: Arc::new(ConstantForcing(rain)),
            ..physics()
        };
        let mut region = Region::new(RegionId(0), vec![a, b], &config(7200.0), physics).unwrap();
        let shared = Arc::new(std::sync::Mutex::new(Vec::new()));
        region.set_output(Box::new(SharedSink(Arc::clone(&shared))));
        while region.advance().unwrap() != Advance::Finished {}
        let snapshots = shared.lock().unwrap();
        let times: Vec<f64> = snapshots.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![0.0, 3600.0, 7200.0]);
        assert!(snapshots[2].elements.iter().all(|e| e.precipitation > 0.0));
        assert!(region.budget().precipitation > 0.0);
    }

    #[test]
    fn memory_sink_can_be_taken_back() {
        let mut region = Region::new(RegionId(0), Vec::new(), &config(3600.0), physics()).unwrap();
        region.set_output(Box::new(MemorySink::default()));
        region.advance().unwrap();
        assert!(region.take_output().is_some());
        assert!(region.take_output().is_none());
    }
}
