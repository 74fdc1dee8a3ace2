//! Per-edge protocol state.

use std::io::{Read, Write};

use smallvec::SmallVec;

use runnel_core::codec::{read_f64_le, read_u64_le, write_f64_le, write_u64_le, Decode, Encode};
use runnel_core::time::epsilon_equal;
use runnel_core::{
    CodecError, EdgeGeometry, ElementId, InvariantError, NeighborAttributes, NeighborConnection,
    NeighborEndpoint, RegionId, WaterTransfer,
};

use crate::accumulator::CumulativeFlow;
use crate::flow::{nominal_flow_rate_calculation, FlowSide};
use crate::lease::FlowLease;
use crate::message::{InvariantReport, Message};
use crate::transfer_set::TransferSet;

/// Where an edge is in its protocol lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyState {
    /// Attributes have not been sent yet.
    Uninitialized,
    /// Attributes sent, the remote side's not yet received.
    AttributesPending,
    /// The lease is valid.
    Ready,
    /// The lease must be renegotiated.
    Expired,
}

/// One element's view of one edge.
///
/// Owned exclusively by the element on the local side. Everything the
/// proxy learns about the remote side arrives as a [`Message`].
#[derive(Clone, Debug, PartialEq)]
pub struct NeighborProxy {
    connection: NeighborConnection,
    remote_region: RegionId,
    geometry: EdgeGeometry,
    remote_attributes: Option<NeighborAttributes>,
    attributes_sent: bool,
    lease: FlowLease,
    inflow: CumulativeFlow,
    outflow: CumulativeFlow,
    pending: TransferSet,
    // m³/s, one-way inflow edges only; refreshed at sync points.
    boundary_inflow_rate: f64,
    // (time, level) we sent for the negotiation in progress.
    local_state_sent: Option<(f64, f64)>,
    // A fast neighbor can deliver its next state before we consume this one.
    remote_states: SmallVec<[(f64, f64); 2]>,
    pending_invariants: SmallVec<[InvariantReport; 1]>,
    invariant_checked_at: Option<f64>,
    duplicate_transfers: u64,
}

impl NeighborProxy {
    /// A proxy whose lease is already stale at `start_time`.
    pub fn new(
        connection: NeighborConnection,
        remote_region: RegionId,
        geometry: EdgeGeometry,
        start_time: f64,
    ) -> Self {
        let lease = if connection.is_recipient() {
            FlowLease::Recipient
        } else {
            FlowLease::expired_at(start_time)
        };
        Self {
            connection,
            remote_region,
            geometry,
            remote_attributes: None,
            attributes_sent: false,
            lease,
            inflow: CumulativeFlow::new(),
            outflow: CumulativeFlow::new(),
            pending: TransferSet::new(),
            boundary_inflow_rate: 0.0,
            local_state_sent: None,
            remote_states: SmallVec::new(),
            pending_invariants: SmallVec::new(),
            invariant_checked_at: None,
            duplicate_transfers: 0,
        }
    }

    // ── Accessors ───────────────────────────────────────────────

    /// The edge in this side's frame.
    pub fn connection(&self) -> &NeighborConnection {
        &self.connection
    }

    /// Region owning the remote element.
    pub fn remote_region(&self) -> RegionId {
        self.remote_region
    }

    /// Static edge geometry in this side's frame.
    pub fn geometry(&self) -> &EdgeGeometry {
        &self.geometry
    }

    /// Cached remote attributes, once received.
    pub fn remote_attributes(&self) -> Option<&NeighborAttributes> {
        self.remote_attributes.as_ref()
    }

    /// The current lease.
    pub fn lease(&self) -> FlowLease {
        self.lease
    }

    /// Rate the local side must send (m³/s, ≥ 0).
    pub fn outflow_rate(&self) -> f64 {
        self.lease.outflow_rate()
    }

    /// Whether this side owes the remote a water message every step.
    ///
    /// True while the rate is outgoing, and always toward a pinned
    /// recipient, which cannot tell a dry sender from a late one.
    pub fn sends_water(&self) -> bool {
        self.outflow_rate() > 0.0 || self.connection.feeds_recipient()
    }

    /// Inflow rate across a boundary inflow edge (m³/s).
    pub fn boundary_inflow_rate(&self) -> f64 {
        self.boundary_inflow_rate
    }

    /// Set the rate at which water enters across this edge until the next
    /// sync point. Ignored unless the remote is a boundary inflow kind;
    /// negative rates count as zero.
    pub fn set_boundary_inflow_rate(&mut self, rate: f64) {
        if self.connection.remote_endpoint.is_boundary_inflow() {
            self.boundary_inflow_rate = rate.max(0.0);
        }
    }

    /// Total water received across this edge (m³).
    pub fn cumulative_inflow(&self) -> f64 {
        self.inflow.total()
    }

    /// Total water sent across this edge (m³).
    pub fn cumulative_outflow(&self) -> f64 {
        self.outflow.total()
    }

    /// Transfers received but not yet drained.
    pub fn pending(&self) -> &TransferSet {
        &self.pending
    }

    /// Overlapping water messages rejected so far.
    pub fn duplicate_transfers(&self) -> u64 {
        self.duplicate_transfers
    }

    /// Whether the remote side's attributes are known (or not needed).
    pub fn attributes_initialized(&self) -> bool {
        !self.connection.negotiates() || self.remote_attributes.is_some()
    }

    /// Lifecycle state at `now`.
    pub fn state(&self, now: f64) -> ProxyState {
        if !self.attributes_initialized() {
            if self.attributes_sent {
                ProxyState::AttributesPending
            } else {
                ProxyState::Uninitialized
            }
        } else if self.lease.is_expired(now) {
            ProxyState::Expired
        } else {
            ProxyState::Ready
        }
    }

    // ── Initialization ──────────────────────────────────────────

    /// The attributes message to send, or `None` when the edge has no
    /// real remote to tell.
    pub fn neighbor_message(&mut self, local: &NeighborAttributes) -> Option<Message> {
        if !self.connection.negotiates() {
            return None;
        }
        self.attributes_sent = true;
        Some(Message::Neighbor(*local))
    }

    /// Cache the remote side's attributes.
    pub fn receive_neighbor_attributes(
        &mut self,
        attributes: NeighborAttributes,
    ) -> Result<(), InvariantError> {
        if !self.connection.negotiates() {
            return Err(self.unexpected("attributes on an edge with no real remote"));
        }
        match self.remote_attributes {
            Some(existing) if existing != attributes => Err(InvariantError::NeighborMismatch {
                connection: self.connection,
                field: "attributes",
            }),
            _ => {
                self.remote_attributes = Some(attributes);
                Ok(())
            }
        }
    }

    // ── Negotiation ─────────────────────────────────────────────

    /// Whether the lease must be renegotiated at `now`.
    pub fn is_expired(&self, now: f64) -> bool {
        self.lease.is_expired(now)
    }

    /// Start renegotiating at `now` with the local `level`.
    ///
    /// Returns the state message for the remote side the first time it is
    /// called for `now` on a negotiating edge, and `None` otherwise.
    pub fn begin_negotiation(&mut self, now: f64, level: f64) -> Option<Message> {
        if !self.lease.is_expired(now) || self.negotiation_started(now) {
            return None;
        }
        self.local_state_sent = Some((now, level));
        self.connection
            .negotiates()
            .then_some(Message::State { time: now, level })
    }

    /// Whether [`begin_negotiation`](Self::begin_negotiation) already ran for `now`.
    pub fn negotiation_started(&self, now: f64) -> bool {
        matches!(self.local_state_sent, Some((t, _)) if t == now)
    }

    /// Queue the remote side's level stamped `time`.
    pub fn receive_state(&mut self, time: f64, level: f64) -> Result<(), InvariantError> {
        if !self.connection.negotiates() {
            return Err(self.unexpected("state on an edge that never negotiates"));
        }
        if let Some(expiration) = self.lease.expiration() {
            if time < expiration {
                return Err(self.unexpected(&format!(
                    "state at {time} precedes lease expiration {expiration}"
                )));
            }
        }
        if self.remote_states.iter().any(|(t, _)| *t == time) {
            return Err(self.unexpected(&format!("second state at {time}")));
        }
        self.remote_states.push((time, level));
        Ok(())
    }

    /// Finish renegotiating at `now` if both levels are in hand.
    ///
    /// Returns `true` once the lease is valid at `now`.
    pub fn try_complete_negotiation(
        &mut self,
        local: &NeighborAttributes,
        now: f64,
    ) -> Result<bool, InvariantError> {
        if !self.lease.is_expired(now) {
            return Ok(true);
        }
        let Some((t, local_level)) = self.local_state_sent else {
            return Ok(false);
        };
        if t != now {
            return Ok(false);
        }
        let (remote_attributes, remote_level) = if self.connection.negotiates() {
            let Some(idx) = self.remote_states.iter().position(|(t, _)| *t == now) else {
                return Ok(false);
            };
            let Some(attrs) = self.remote_attributes else {
                return Err(self.unexpected("negotiating before attributes arrived"));
            };
            let (_, level) = self.remote_states.remove(idx);
            (attrs, level)
        } else {
            (*local, local_level)
        };
        let local_side = FlowSide {
            endpoint: self.connection.local_endpoint,
            element: self.connection.local_element,
            attributes: local,
            level: local_level,
        };
        let remote_side = FlowSide {
            endpoint: self.connection.remote_endpoint,
            element: self.connection.remote_element,
            attributes: &remote_attributes,
            level: remote_level,
        };
        self.lease = nominal_flow_rate_calculation(&local_side, &remote_side, &self.geometry, now);
        self.local_state_sent = None;
        Ok(true)
    }

    /// Make the lease stale at `now`. Recipients stay pinned.
    pub fn force_expire(&mut self, now: f64) {
        if let FlowLease::Negotiated { .. } = self.lease {
            self.lease = FlowLease::expired_at(now);
        }
    }

    // ── Water ───────────────────────────────────────────────────

    /// Record `amount` leaving over `[start, end)`.
    ///
    /// Returns the water message for the remote side, sent even when
    /// `amount` is zero. Edges to a boundary have nobody to tell and
    /// return `None`.
    pub fn send_water(
        &mut self,
        amount: f64,
        start: f64,
        end: f64,
    ) -> Result<Option<Message>, InvariantError> {
        let transfer = WaterTransfer::new(amount, start, end).map_err(|reason| {
            InvariantError::StateOutOfBounds {
                element: self.connection.local_element,
                reason,
            }
        })?;
        self.outflow.add(amount);
        if self.connection.is_one_way() {
            Ok(None)
        } else {
            Ok(Some(Message::Water(transfer)))
        }
    }

    /// Store an inbound transfer. Returns `false` if it overlaps one
    /// already stored and was dropped.
    pub fn receive_water_message(&mut self, transfer: WaterTransfer) -> bool {
        let inserted = self.pending.insert(transfer);
        if !inserted {
            self.duplicate_transfers += 1;
        }
        inserted
    }

    /// Whether every inbound interval covering `[now, end)` has arrived.
    pub fn all_water_has_arrived(&self, now: f64, end: f64) -> bool {
        if self.connection.is_one_way() || !self.lease.expects_inflow() {
            return true;
        }
        self.pending.covers(now, end)
    }

    /// Drain and sum inbound water for `[now, end)`.
    ///
    /// Boundary inflow edges have no sender; their water is the configured
    /// rate over the interval.
    pub fn receive_water(&mut self, now: f64, end: f64) -> f64 {
        let amount = if self.connection.is_one_way() {
            self.boundary_inflow_rate * (end - now)
        } else {
            self.pending.take(now, end)
        };
        self.inflow.add(amount);
        amount
    }

    /// Restore cumulative totals carried over from an earlier run.
    pub fn restore_cumulative_flow(&mut self, inflow: f64, outflow: f64) {
        self.inflow = CumulativeFlow::from_parts(0.0, inflow);
        self.outflow = CumulativeFlow::from_parts(0.0, outflow);
    }

    /// Zero both cumulative accumulators.
    pub fn reset_cumulative_flow(&mut self) {
        self.inflow.reset();
        self.outflow.reset();
    }

    // ── Invariant cross-check ───────────────────────────────────

    /// This side's report for `now`, or `None` on edges with no real
    /// remote or before attributes are known.
    pub fn invariant_report(&self, local: &NeighborAttributes, now: f64) -> Option<Message> {
        if !self.connection.negotiates() {
            return None;
        }
        let remote_attributes = self.remote_attributes?;
        Some(Message::Invariant(InvariantReport {
            time: now,
            attributes: *local,
            remote_attributes,
            geometry: self.geometry,
            lease: self.lease,
            cumulative_outflow: self.outflow.total(),
            cumulative_inflow: self.inflow.total(),
        }))
    }

    /// Queue a report from the remote side.
    pub fn receive_invariant_report(
        &mut self,
        report: InvariantReport,
    ) -> Result<(), InvariantError> {
        if !self.connection.negotiates() {
            return Err(self.unexpected("invariant report on an edge with no real remote"));
        }
        self.pending_invariants.push(report);
        Ok(())
    }

    /// Check the remote report stamped `now`, if it has arrived.
    ///
    /// Returns `true` once the edge has been checked at `now`.
    pub fn try_check_invariant(
        &mut self,
        local: &NeighborAttributes,
        now: f64,
    ) -> Result<bool, InvariantError> {
        if !self.connection.negotiates() || self.invariant_checked_at == Some(now) {
            return Ok(true);
        }
        let Some(idx) = self.pending_invariants.iter().position(|r| r.time == now) else {
            return Ok(false);
        };
        let report = self.pending_invariants.remove(idx);
        self.check_neighbor_invariant(&report, local)?;
        self.invariant_checked_at = Some(now);
        Ok(true)
    }

    /// Compare what the remote side believes about this edge with what
    /// this side holds. Any difference is a protocol defect.
    pub fn check_neighbor_invariant(
        &self,
        report: &InvariantReport,
        local: &NeighborAttributes,
    ) -> Result<(), InvariantError> {
        let mismatch = |field: &'static str| InvariantError::NeighborMismatch {
            connection: self.connection,
            field,
        };
        if self.remote_attributes != Some(report.attributes) {
            return Err(mismatch("attributes"));
        }
        if report.remote_attributes != *local {
            return Err(mismatch("remote_attributes"));
        }
        if report.geometry.reverse() != self.geometry {
            return Err(mismatch("geometry"));
        }
        if report.lease.reversed() != Some(self.lease) {
            return Err(mismatch("lease"));
        }
        if !epsilon_equal(report.cumulative_outflow, self.inflow.total()) {
            return Err(mismatch("cumulative_inflow"));
        }
        if !epsilon_equal(report.cumulative_inflow, self.outflow.total()) {
            return Err(mismatch("cumulative_outflow"));
        }
        Ok(())
    }

    // ── Dispatch ────────────────────────────────────────────────

    /// Apply an inbound message to this proxy.
    pub fn receive(&mut self, message: Message) -> Result<(), InvariantError> {
        match message {
            Message::Neighbor(attributes) => self.receive_neighbor_attributes(attributes),
            Message::State { time, level } => self.receive_state(time, level),
            Message::Water(transfer) => {
                if self.connection.is_one_way()
                    || self.connection.local_endpoint == NeighborEndpoint::ReservoirRelease
                {
                    return Err(self.unexpected("water on an edge that only sends"));
                }
                self.receive_water_message(transfer);
                Ok(())
            }
            Message::Invariant(report) => self.receive_invariant_report(report),
        }
    }

    fn unexpected(&self, reason: &str) -> InvariantError {
        InvariantError::UnexpectedMessage {
            connection: self.connection,
            reason: reason.to_string(),
        }
    }

    /// Flattened export for output.
    pub fn snapshot(&self) -> ProxySnapshot {
        ProxySnapshot {
            local_endpoint: self.connection.local_endpoint,
            remote_endpoint: self.connection.remote_endpoint,
            remote_element: self.connection.remote_element,
            lease: self.lease,
            cumulative_inflow: self.inflow.total(),
            cumulative_outflow: self.outflow.total(),
        }
    }
}

/// Output record for one proxy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProxySnapshot {
    /// Local endpoint kind.
    pub local_endpoint: NeighborEndpoint,
    /// Remote endpoint kind.
    pub remote_endpoint: NeighborEndpoint,
    /// Remote element.
    pub remote_element: ElementId,
    /// Lease at snapshot time.
    pub lease: FlowLease,
    /// Total received (m³).
    pub cumulative_inflow: f64,
    /// Total sent (m³).
    pub cumulative_outflow: f64,
}

impl ProxySnapshot {
    /// Negotiated rate, `None` for a pinned recipient.
    pub fn nominal_flow_rate(&self) -> Option<f64> {
        self.lease.rate()
    }

    /// Lease expiration, `None` if it never expires.
    pub fn expiration_time(&self) -> Option<f64> {
        self.lease.expiration()
    }
}

// ── Codec ───────────────────────────────────────────────────────

impl Encode for ProxySnapshot {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        self.local_endpoint.encode(w)?;
        self.remote_endpoint.encode(w)?;
        self.remote_element.encode(w)?;
        self.lease.encode(w)?;
        write_f64_le(w, self.cumulative_inflow)?;
        write_f64_le(w, self.cumulative_outflow)
    }
}

impl Decode for ProxySnapshot {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(Self {
            local_endpoint: NeighborEndpoint::decode(r)?,
            remote_endpoint: NeighborEndpoint::decode(r)?,
            remote_element: ElementId::decode(r)?,
            lease: FlowLease::decode(r)?,
            cumulative_inflow: read_f64_le(r)?,
            cumulative_outflow: read_f64_le(r)?,
        })
    }
}

struct TimedLevel(f64, f64);

impl Encode for TimedLevel {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_f64_le(w, self.0)?;
        write_f64_le(w, self.1)
    }
}

impl Decode for TimedLevel {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(Self(read_f64_le(r)?, read_f64_le(r)?))
    }
}

impl Encode for NeighborProxy {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        self.connection.encode(w)?;
        self.remote_region.encode(w)?;
        self.geometry.encode(w)?;
        self.remote_attributes.encode(w)?;
        self.attributes_sent.encode(w)?;
        self.lease.encode(w)?;
        self.inflow.encode(w)?;
        self.outflow.encode(w)?;
        self.pending.encode(w)?;
        write_f64_le(w, self.boundary_inflow_rate)?;
        self.local_state_sent
            .map(|(t, l)| TimedLevel(t, l))
            .encode(w)?;
        self.remote_states
            .iter()
            .map(|&(t, l)| TimedLevel(t, l))
            .collect::<Vec<_>>()
            .encode(w)?;
        self.pending_invariants.to_vec().encode(w)?;
        self.invariant_checked_at.encode(w)?;
        write_u64_le(w, self.duplicate_transfers)
    }
}

impl Decode for NeighborProxy {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(Self {
            connection: NeighborConnection::decode(r)?,
            remote_region: RegionId::decode(r)?,
            geometry: EdgeGeometry::decode(r)?,
            remote_attributes: Option::<NeighborAttributes>::decode(r)?,
            attributes_sent: bool::decode(r)?,
            lease: FlowLease::decode(r)?,
            inflow: CumulativeFlow::decode(r)?,
            outflow: CumulativeFlow::decode(r)?,
            pending: TransferSet::decode(r)?,
            boundary_inflow_rate: read_f64_le(r)?,
            local_state_sent: Option::<TimedLevel>::decode(r)?.map(|TimedLevel(t, l)| (t, l)),
            remote_states: Vec::<TimedLevel>::decode(r)?
                .into_iter()
                .map(|TimedLevel(t, l)| (t, l))
                .collect(),
            pending_invariants: Vec::<InvariantReport>::decode(r)?.into_iter().collect(),
            invariant_checked_at: Option::<f64>::decode(r)?,
            duplicate_transfers: read_u64_le(r)?,
        })
    }
}
