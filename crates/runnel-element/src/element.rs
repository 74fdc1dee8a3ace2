//! The element abstraction the region scheduler drives.
//!
//! [`Element`] is a closed enum over the two container kinds. Everything
//! to do with edges (attribute exchange, negotiation, water arrival, and
//! invariant reports) is shared here; the variants only differ in how they
//! store water and which endpoints they own.

use std::io::{Read, Write};

use indexmap::IndexMap;

use runnel_core::codec::{read_u8, write_u8, Decode, Encode};
use runnel_core::{
    CodecError, ElementId, InvariantError, NeighborAttributes, NeighborConnection,
    NeighborEndpoint, TopologyError,
};
use runnel_neighbor::{Envelope, NeighborProxy};

use crate::channel::ChannelElement;
use crate::forcing::{Forcing, ForcingSource};
use crate::mesh::MeshElement;
use crate::physics::{LandSurface, VadoseSolver};
use crate::snapshot::{ElementSnapshot, ElementState};

/// Shared collaborators for one step.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    /// Land-surface black box.
    pub land_surface: &'a dyn LandSurface,
    /// Vadose-zone black box.
    pub vadose: &'a dyn VadoseSolver,
    /// Whether channels discard water above bank-full.
    pub drain_down: bool,
}

/// One-time resets applied when a run starts from existing state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StartupFlags {
    /// Make every negotiated lease stale so it is renegotiated at once.
    pub force_lease_expiration: bool,
    /// Zero every cumulative flow accumulator.
    pub zero_cumulative_flow: bool,
    /// Zero every water-created ledger.
    pub zero_water_created: bool,
}

/// A mesh or channel element.
#[derive(Clone, Debug, PartialEq)]
pub enum Element {
    /// Land surface, soil and aquifer.
    Mesh(MeshElement),
    /// A channel reach.
    Channel(ChannelElement),
}

impl From<MeshElement> for Element {
    fn from(mesh: MeshElement) -> Self {
        Self::Mesh(mesh)
    }
}

impl From<ChannelElement> for Element {
    fn from(channel: ChannelElement) -> Self {
        Self::Channel(channel)
    }
}

impl Element {
    /// Element id.
    pub fn id(&self) -> ElementId {
        match self {
            Self::Mesh(m) => m.id,
            Self::Channel(c) => c.id,
        }
    }

    /// Attributes sent to every neighbor.
    pub fn attributes(&self) -> &NeighborAttributes {
        match self {
            Self::Mesh(m) => &m.attributes,
            Self::Channel(c) => &c.attributes,
        }
    }

    /// Every edge, in key order once [`sort_proxies`](Self::sort_proxies) ran.
    pub fn proxies(&self) -> &IndexMap<NeighborConnection, NeighborProxy> {
        match self {
            Self::Mesh(m) => &m.proxies,
            Self::Channel(c) => &c.proxies,
        }
    }

    fn proxies_mut(&mut self) -> &mut IndexMap<NeighborConnection, NeighborProxy> {
        match self {
            Self::Mesh(m) => &mut m.proxies,
            Self::Channel(c) => &mut c.proxies,
        }
    }

    /// Number of edges.
    pub fn proxy_count(&self) -> usize {
        self.proxies().len()
    }

    /// The proxy for `connection` in this element's frame.
    pub fn proxy_mut(&mut self, connection: &NeighborConnection) -> Option<&mut NeighborProxy> {
        self.proxies_mut().get_mut(connection)
    }

    fn owns_endpoint(&self, endpoint: NeighborEndpoint) -> bool {
        match self {
            Self::Mesh(m) => m.owns_endpoint(endpoint),
            Self::Channel(c) => c.owns_endpoint(endpoint),
        }
    }

    fn level(&self, endpoint: NeighborEndpoint) -> f64 {
        match self {
            Self::Mesh(m) => m.level(endpoint),
            Self::Channel(c) => c.level(endpoint),
        }
    }

    /// Attach an edge.
    pub fn add_proxy(&mut self, proxy: NeighborProxy) -> Result<(), TopologyError> {
        let connection = *proxy.connection();
        if connection.local_element != self.id() || !self.owns_endpoint(connection.local_endpoint) {
            return Err(TopologyError::WrongElementKind { connection });
        }
        let proxies = self.proxies_mut();
        if proxies.contains_key(&connection) {
            return Err(TopologyError::DuplicateConnection { connection });
        }
        proxies.insert(connection, proxy);
        Ok(())
    }

    /// Order edges by key so every scan visits them deterministically.
    pub fn sort_proxies(&mut self) {
        self.proxies_mut().sort_keys();
    }

    /// Install forcing for the interval up to the next sync point.
    pub fn set_forcing(&mut self, forcing: Forcing) {
        match self {
            Self::Mesh(m) => m.set_forcing(forcing),
            Self::Channel(c) => c.set_forcing(forcing),
        }
    }

    /// Refresh the inflow rate of every boundary inflow edge from `source`
    /// for the interval starting at `time`.
    pub fn set_boundary_inflows(&mut self, source: &dyn ForcingSource, time: f64) {
        for (connection, proxy) in self.proxies_mut() {
            if connection.remote_endpoint.is_boundary_inflow() {
                proxy.set_boundary_inflow_rate(source.boundary_inflow(connection, time));
            }
        }
    }

    // ── Initialization ──────────────────────────────────────────

    /// Queue this element's attributes for every neighbor that needs them.
    pub fn send_neighbor_messages(&mut self, out: &mut Vec<Envelope>) {
        let attributes = *self.attributes();
        for (connection, proxy) in self.proxies_mut() {
            if let Some(message) = proxy.neighbor_message(&attributes) {
                out.push(Envelope::new(*connection, message));
            }
        }
    }

    /// Whether every neighbor's attributes have arrived.
    pub fn attributes_initialized(&self) -> bool {
        self.proxies().values().all(NeighborProxy::attributes_initialized)
    }

    /// Apply startup resets at `now`.
    pub fn apply_startup(&mut self, flags: StartupFlags, now: f64) {
        if flags.zero_water_created {
            match self {
                Self::Mesh(m) => m.reset_water_created(),
                Self::Channel(c) => c.reset_water_created(),
            }
        }
        if flags.zero_cumulative_flow {
            match self {
                Self::Mesh(m) => m.reset_atmosphere(),
                Self::Channel(c) => c.reset_atmosphere(),
            }
        }
        for proxy in self.proxies_mut().values_mut() {
            if flags.force_lease_expiration {
                proxy.force_expire(now);
            }
            if flags.zero_cumulative_flow {
                proxy.reset_cumulative_flow();
            }
        }
    }

    // ── Negotiation ─────────────────────────────────────────────

    /// Advance negotiation on the edge at `index`.
    ///
    /// Sends this side's state the first time the edge is found expired
    /// at `now`. Returns `true` once the edge holds a lease valid at `now`.
    pub fn negotiate_at(
        &mut self,
        index: usize,
        now: f64,
        out: &mut Vec<Envelope>,
    ) -> Result<bool, InvariantError> {
        let attributes = *self.attributes();
        let Some(endpoint) = self
            .proxies()
            .get_index(index)
            .map(|(c, _)| c.local_endpoint)
        else {
            return Ok(true);
        };
        let level = self.level(endpoint);
        let Some((connection, proxy)) = self.proxies_mut().get_index_mut(index) else {
            return Ok(true);
        };
        if !proxy.is_expired(now) {
            return Ok(true);
        }
        if let Some(message) = proxy.begin_negotiation(now, level) {
            out.push(Envelope::new(*connection, message));
        }
        proxy.try_complete_negotiation(&attributes, now)
    }

    /// Earliest lease expiration over every edge.
    pub fn min_expiration(&self) -> Option<f64> {
        self.proxies()
            .values()
            .filter_map(|p| p.lease().expiration())
            .reduce(f64::min)
    }

    // ── Stepping ────────────────────────────────────────────────

    /// Run physics and send outflows for `[now, end)`. Returns how many
    /// containers could not pay their outflows in full.
    pub fn point_process(
        &mut self,
        ctx: &StepContext<'_>,
        now: f64,
        end: f64,
        out: &mut Vec<Envelope>,
    ) -> Result<usize, InvariantError> {
        match self {
            Self::Mesh(m) => m.point_process(ctx, now, end, out),
            Self::Channel(c) => c.point_process(ctx, now, end, out),
        }
    }

    /// Whether the edge at `index` has all its inflow for `[now, end)`.
    pub fn water_arrived_at(&self, index: usize, now: f64, end: f64) -> bool {
        self.proxies()
            .get_index(index)
            .is_none_or(|(_, p)| p.all_water_has_arrived(now, end))
    }

    /// Drain inflows for `[now, end)` and settle internal storage.
    pub fn receive_inflows(
        &mut self,
        ctx: &StepContext<'_>,
        now: f64,
        end: f64,
    ) -> Result<(), InvariantError> {
        match self {
            Self::Mesh(m) => m.receive_inflows(ctx, now, end),
            Self::Channel(c) => c.receive_inflows(ctx, now, end),
        }
    }

    // ── Invariants ──────────────────────────────────────────────

    /// Queue this element's invariant report on every two-way edge.
    pub fn invariant_reports(&self, now: f64, out: &mut Vec<Envelope>) {
        let attributes = self.attributes();
        for (connection, proxy) in self.proxies() {
            if let Some(message) = proxy.invariant_report(attributes, now) {
                out.push(Envelope::new(*connection, message));
            }
        }
    }

    /// Check the remote report on the edge at `index` if it has arrived.
    pub fn check_invariant_at(&mut self, index: usize, now: f64) -> Result<bool, InvariantError> {
        let attributes = *self.attributes();
        match self.proxies_mut().get_index_mut(index) {
            Some((_, proxy)) => proxy.try_check_invariant(&attributes, now),
            None => Ok(true),
        }
    }

    // ── Accounting ──────────────────────────────────────────────

    /// Water stored in the element (m³).
    pub fn total_water(&self) -> f64 {
        match self {
            Self::Mesh(m) => m.total_water(),
            Self::Channel(c) => c.total_water(),
        }
    }

    /// Water created from nothing (m³).
    pub fn water_created(&self) -> f64 {
        match self {
            Self::Mesh(m) => m.water_created(),
            Self::Channel(c) => c.water_created(),
        }
    }

    /// Precipitation received (m³).
    pub fn precipitation(&self) -> f64 {
        match self {
            Self::Mesh(m) => m.precipitation(),
            Self::Channel(c) => c.precipitation(),
        }
    }

    /// Water returned to the atmosphere (m³).
    pub fn evaporation(&self) -> f64 {
        match self {
            Self::Mesh(m) => m.evaporation(),
            Self::Channel(c) => c.evaporation(),
        }
    }

    /// Water received from boundary edges with no element behind them (m³).
    pub fn boundary_inflow(&self) -> f64 {
        self.proxies()
            .iter()
            .filter(|(c, _)| c.is_one_way())
            .map(|(_, p)| p.cumulative_inflow())
            .sum()
    }

    /// Water sent over boundary edges with no element behind them (m³).
    pub fn boundary_outflow(&self) -> f64 {
        self.proxies()
            .iter()
            .filter(|(c, _)| c.is_one_way())
            .map(|(_, p)| p.cumulative_outflow())
            .sum()
    }

    /// Water received on edges but not yet drained (m³).
    pub fn pending_inflow(&self) -> f64 {
        self.proxies().values().map(|p| p.pending().pending_amount()).sum()
    }

    /// Output record.
    pub fn snapshot(&self) -> ElementSnapshot {
        let state = match self {
            Self::Mesh(m) => ElementState::Mesh {
                surface_depth: m.surface_depth(),
                mode: m.groundwater().mode(),
                soil_head: m.groundwater().soil().head,
                aquifer_head: m.groundwater().aquifer().head,
                vadose_water: m.vadose().water,
                canopy: m.land().canopy,
                snow: m.land().snow,
            },
            Self::Channel(c) => ElementState::Channel { depth: c.depth() },
        };
        ElementSnapshot {
            element: self.id(),
            state,
            total_water: self.total_water(),
            water_created: self.water_created(),
            precipitation: self.precipitation(),
            evaporation: self.evaporation(),
            proxies: self.proxies().values().map(NeighborProxy::snapshot).collect(),
        }
    }
}

// ── Codec ───────────────────────────────────────────────────────

pub(crate) fn encode_proxies(
    proxies: &IndexMap<NeighborConnection, NeighborProxy>,
    w: &mut dyn Write,
) -> Result<(), CodecError> {
    runnel_core::codec::write_len(w, proxies.len())?;
    for proxy in proxies.values() {
        proxy.encode(w)?;
    }
    Ok(())
}

pub(crate) fn decode_proxies(
    r: &mut dyn Read,
) -> Result<IndexMap<NeighborConnection, NeighborProxy>, CodecError> {
    let proxies = Vec::<NeighborProxy>::decode(r)?;
    let mut map = IndexMap::with_capacity(proxies.len());
    for proxy in proxies {
        let connection = *proxy.connection();
        if map.insert(connection, proxy).is_some() {
            return Err(CodecError::Malformed {
                detail: format!("duplicate proxy {connection}"),
            });
        }
    }
    Ok(map)
}

impl Encode for Element {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        match self {
            Self::Mesh(m) => {
                write_u8(w, 0)?;
                m.encode(w)
            }
            Self::Channel(c) => {
                write_u8(w, 1)?;
                c.encode(w)
            }
        }
    }
}

impl Decode for Element {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        match read_u8(r)? {
            0 => Ok(Self::Mesh(MeshElement::decode(r)?)),
            1 => Ok(Self::Channel(ChannelElement::decode(r)?)),
            tag => Err(CodecError::UnknownTag {
                what: "element",
                tag,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelParameters;
    use crate::mesh::{LayerParameters, MeshInitialState, MeshParameters};
    use crate::physics::{BucketLandSurface, BucketVadoseSolver};
    use runnel_core::{ChannelShape, EdgeGeometry, RegionId};
    use runnel_neighbor::{FlowLease, Message};

    fn mesh(id: u32, x: f64, ground: f64, depth: f64) -> Element {
        let params = MeshParameters {
            x,
            y: 0.0,
            ground,
            area: 1.0e4,
            manning_n: 0.04,
            soil: None,
            aquifer: Some(LayerParameters {
                bottom: ground - 10.0,
                top: ground - 1.0,
                porosity: 0.2,
                conductivity: 1.0e-5,
            }),
            vadose_porosity: 0.3,
        };
        let initial = MeshInitialState {
            surface_depth: depth,
            aquifer_head: ground - 5.0,
            ..MeshInitialState::default()
        };
        MeshElement::new(ElementId(id), &params, &initial).unwrap().into()
    }

    fn channel(id: u32, depth: f64) -> Element {
        let params = ChannelParameters {
            x: 50.0,
            y: 0.0,
            bank: 9.0,
            bed: 7.0,
            length: 100.0,
            manning_n: 0.03,
            shape: ChannelShape {
                base_width: 2.0,
                side_slope: 1.0,
                bank_full_depth: 2.0,
            },
            bed_conductivity: 0.0,
            bed_thickness: 0.5,
        };
        ChannelElement::new(ElementId(id), &params, depth).unwrap().into()
    }

    fn surface_edge(a: u32, b: u32) -> NeighborConnection {
        NeighborConnection::new(
            NeighborEndpoint::MeshSurface,
            ElementId(a),
            NeighborEndpoint::MeshSurface,
            ElementId(b),
        )
        .unwrap()
    }

    fn link(a: &mut Element, b: &mut Element, connection: NeighborConnection) {
        let geometry = EdgeGeometry {
            length: 100.0,
            normal_x: 1.0,
            normal_y: 0.0,
            z_offset: 0.0,
        };
        a.add_proxy(NeighborProxy::new(connection, RegionId(0), geometry, 0.0))
            .unwrap();
        b.add_proxy(NeighborProxy::new(
            connection.reverse(),
            RegionId(0),
            geometry.reverse(),
            0.0,
        ))
        .unwrap();
    }

    /// Deliver every envelope in `out` to whichever of `elements` owns it.
    fn deliver(elements: &mut [&mut Element], out: &mut Vec<Envelope>) {
        for env in out.drain(..) {
            let target = env.receiver_connection();
            let element = elements
                .iter_mut()
                .find(|e| e.id() == target.local_element)
                .unwrap();
            element.proxy_mut(&target).unwrap().receive(env.message).unwrap();
        }
    }

    #[test]
    fn add_proxy_rejects_foreign_endpoints() {
        let mut c = channel(1, 1.0);
        let wrong = surface_edge(1, 2);
        match c.add_proxy(NeighborProxy::new(wrong, RegionId(0), EdgeGeometry::with_length(1.0), 0.0)) {
            Err(TopologyError::WrongElementKind { .. }) => {}
            other => panic!("expected WrongElementKind, got {other:?}"),
        }
    }

    #[test]
    fn add_proxy_rejects_duplicates() {
        let mut a = mesh(1, 0.0, 10.0, 0.0);
        let mut b = mesh(2, 100.0, 9.0, 0.0);
        link(&mut a, &mut b, surface_edge(1, 2));
        let again = NeighborProxy::new(surface_edge(1, 2), RegionId(0), EdgeGeometry::with_length(1.0), 0.0);
        match a.add_proxy(again) {
            Err(TopologyError::DuplicateConnection { .. }) => {}
            other => panic!("expected DuplicateConnection, got {other:?}"),
        }
    }

    #[test]
    fn soil_edge_needs_a_soil_layer() {
        let mut a = mesh(1, 0.0, 10.0, 0.0);
        let soil = NeighborConnection::new(
            NeighborEndpoint::MeshSoil,
            ElementId(1),
            NeighborEndpoint::MeshSoil,
            ElementId(2),
        )
        .unwrap();
        match a.add_proxy(NeighborProxy::new(soil, RegionId(0), EdgeGeometry::with_length(1.0), 0.0)) {
            Err(TopologyError::WrongElementKind { .. }) => {}
            other => panic!("expected WrongElementKind, got {other:?}"),
        }
    }

    #[test]
    fn two_meshes_negotiate_opposite_leases_and_conserve_water() {
        let mut a = mesh(1, 0.0, 10.0, 0.1);
        let mut b = mesh(2, 100.0, 9.0, 0.0);
        link(&mut a, &mut b, surface_edge(1, 2));
        let land = BucketLandSurface {
            canopy_capacity: 0.0,
            melt_factor: 0.0,
            transpiration_fraction: 0.0,
        };
        let vadose = BucketVadoseSolver {
            infiltration_rate: 0.0,
            drainage_rate: 0.0,
        };
        let ctx = StepContext {
            land_surface: &land,
            vadose: &vadose,
            drain_down: false,
        };
        let before = a.total_water() + b.total_water();

        let mut out = Vec::new();
        a.send_neighbor_messages(&mut out);
        b.send_neighbor_messages(&mut out);
        deliver(&mut [&mut a, &mut b], &mut out);
        assert!(a.attributes_initialized() && b.attributes_initialized());

        let mut now = 0.0;
        for _ in 0..10 {
            // First pass sends states, second completes.
            for _ in 0..2 {
                a.negotiate_at(0, now, &mut out).unwrap();
                b.negotiate_at(0, now, &mut out).unwrap();
                deliver(&mut [&mut a, &mut b], &mut out);
            }
            let la = a.proxies()[0].lease();
            let lb = b.proxies()[0].lease();
            assert_eq!(la.reversed(), Some(lb));
            let end = a.min_expiration().unwrap().min(now + 600.0);
            a.point_process(&ctx, now, end, &mut out).unwrap();
            b.point_process(&ctx, now, end, &mut out).unwrap();
            deliver(&mut [&mut a, &mut b], &mut out);
            assert!(a.water_arrived_at(0, now, end) && b.water_arrived_at(0, now, end));
            a.receive_inflows(&ctx, now, end).unwrap();
            b.receive_inflows(&ctx, now, end).unwrap();
            now = end;
        }
        let after = a.total_water() + b.total_water();
        let created = a.water_created() + b.water_created();
        assert!((after - created - before).abs() < 1e-9 * before);
        assert!(b.total_water() > mesh(2, 100.0, 9.0, 0.0).total_water());
        assert!(matches!(a.proxies()[0].lease(), FlowLease::Negotiated { .. }));
    }

    #[test]
    fn invariant_reports_cross_check() {
        let mut a = mesh(1, 0.0, 10.0, 0.1);
        let mut b = mesh(2, 100.0, 9.0, 0.0);
        link(&mut a, &mut b, surface_edge(1, 2));
        let mut out = Vec::new();
        a.send_neighbor_messages(&mut out);
        b.send_neighbor_messages(&mut out);
        deliver(&mut [&mut a, &mut b], &mut out);
        a.invariant_reports(0.0, &mut out);
        b.invariant_reports(0.0, &mut out);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0].message, Message::Invariant(_)));
        deliver(&mut [&mut a, &mut b], &mut out);
        assert!(a.check_invariant_at(0, 0.0).unwrap());
        assert!(b.check_invariant_at(0, 0.0).unwrap());
    }

    #[test]
    fn startup_flags_reset_state() {
        let mut a = mesh(1, 0.0, 10.0, 0.1);
        let mut b = mesh(2, 100.0, 9.0, 0.0);
        link(&mut a, &mut b, surface_edge(1, 2));
        a.apply_startup(
            StartupFlags {
                force_lease_expiration: true,
                zero_cumulative_flow: true,
                zero_water_created: true,
            },
            50.0,
        );
        assert!(a.proxies()[0].is_expired(50.0));
        assert_eq!(a.water_created(), 0.0);
        assert_eq!(a.proxies()[0].cumulative_outflow(), 0.0);
    }

    #[test]
    fn codec_round_trip() {
        let mut a = mesh(1, 0.0, 10.0, 0.1);
        let mut b = channel(2, 1.0);
        let conn = NeighborConnection::new(
            NeighborEndpoint::MeshSurface,
            ElementId(1),
            NeighborEndpoint::ChannelSurface,
            ElementId(2),
        )
        .unwrap();
        link(&mut a, &mut b, conn);
        for e in [a, b] {
            let bytes = runnel_core::codec::to_bytes(&e).unwrap();
            assert_eq!(runnel_core::codec::from_bytes::<Element>(&bytes).unwrap(), e);
        }
    }
}
