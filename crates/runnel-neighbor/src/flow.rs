//! Nominal flow-rate calculation for one edge.
//!
//! Both sides of an edge call [`nominal_flow_rate_calculation`] with the
//! same two levels and must arrive at bit-identical magnitudes with
//! opposite signs, and at the same expiration time. That is guaranteed by
//! evaluating every two-sided formula exactly once, from the side whose
//! `(endpoint, element)` pair sorts first, and negating on the other side.
//!
//! The formulas themselves are deliberately simple and replaceable:
//! Manning's equation for overland and channel flow, a broad-crested weir
//! between mesh surface and channel, Darcy's law between groundwater
//! layers and through channel beds, and critical-depth outflow at open
//! boundaries.

use runnel_core::time::{new_expiration_time, MAX_LEASE};
use runnel_core::{EdgeGeometry, ElementId, NeighborAttributes, NeighborEndpoint};

use crate::lease::FlowLease;

/// Gravitational acceleration (m/s²).
pub const GRAVITY: f64 = 9.81;

/// Broad-crested weir discharge coefficient.
const WEIR_COEFFICIENT: f64 = 0.385;

/// Fraction of the upstream drain time (or wave travel time) granted as a
/// lease.
const COURANT: f64 = 0.5;

/// One side of an edge as the flow calculation sees it.
///
/// `level` is a water depth (m) for surface and channel endpoints and a
/// water-table elevation (m) for soil and aquifer endpoints.
#[derive(Clone, Copy, Debug)]
pub struct FlowSide<'a> {
    /// Endpoint kind.
    pub endpoint: NeighborEndpoint,
    /// Element id.
    pub element: ElementId,
    /// That element's attributes.
    pub attributes: &'a NeighborAttributes,
    /// Depth or head.
    pub level: f64,
}

impl FlowSide<'_> {
    fn sorts_before(&self, other: &FlowSide<'_>) -> bool {
        (self.endpoint, self.element) <= (other.endpoint, other.element)
    }
}

/// Compute the lease for an edge at `current_time`.
///
/// For one-way and reservoir-release edges `remote` is ignored apart from
/// its endpoint kind; callers conventionally pass the local attributes.
/// A reservoir recipient always gets [`FlowLease::Recipient`].
pub fn nominal_flow_rate_calculation(
    local: &FlowSide<'_>,
    remote: &FlowSide<'_>,
    geometry: &EdgeGeometry,
    current_time: f64,
) -> FlowLease {
    if local.endpoint == NeighborEndpoint::ReservoirRecipient {
        return FlowLease::Recipient;
    }
    let (rate, dt) =
        if remote.endpoint.is_one_way() || local.endpoint == NeighborEndpoint::ReservoirRelease {
            one_sided(local, remote.endpoint, geometry)
        } else if local.sorts_before(remote) {
            two_sided(local, remote, geometry)
        } else {
            let (rate, dt) = two_sided(remote, local, geometry);
            (-rate, dt)
        };
    debug_assert!(rate.is_finite(), "non-finite flow rate {rate}");
    FlowLease::Negotiated {
        rate,
        expiration: new_expiration_time(current_time, dt),
    }
}

type RateAndDt = (f64, f64);

const NO_FLOW: RateAndDt = (0.0, MAX_LEASE);

fn one_sided(local: &FlowSide<'_>, remote: NeighborEndpoint, geometry: &EdgeGeometry) -> RateAndDt {
    use NeighborEndpoint::*;
    match (local.endpoint, remote) {
        (ReservoirRelease, _) | (ChannelSurface, BoundaryOutflow) => channel_critical_outflow(local),
        (MeshSurface, BoundaryOutflow) => mesh_critical_outflow(local, geometry),
        (MeshSoil | MeshAquifer, BoundaryOutflow) => groundwater_boundary_outflow(local, geometry),
        _ => NO_FLOW,
    }
}

/// Evaluate a two-sided formula with `a` on the canonical side.
fn two_sided(a: &FlowSide<'_>, b: &FlowSide<'_>, geometry: &EdgeGeometry) -> RateAndDt {
    use NeighborEndpoint::*;
    match (a.endpoint, b.endpoint) {
        (MeshSurface, MeshSurface) => overland_manning(a, b, geometry),
        (MeshSurface, ChannelSurface) => weir(a, b, geometry),
        (ChannelSurface, MeshSurface) => negate(weir(b, a, geometry)),
        (MeshSoil | MeshAquifer, MeshSoil | MeshAquifer) => darcy_lateral(a, b, geometry),
        (MeshSoil | MeshAquifer, ChannelSurface) => bed_seepage(a, b, geometry),
        (ChannelSurface, MeshSoil | MeshAquifer) => negate(bed_seepage(b, a, geometry)),
        (ChannelSurface, ChannelSurface) => channel_manning(a, b),
        _ => NO_FLOW,
    }
}

fn negate((rate, dt): RateAndDt) -> RateAndDt {
    (-rate, dt)
}

/// Lease length for a flow of `rate` draining `storage`, further bounded
/// by any extra limits.
fn lease_dt(rate: f64, storage: f64, limits: &[f64]) -> f64 {
    if rate == 0.0 {
        return MAX_LEASE;
    }
    let mut dt = COURANT * storage / rate.abs();
    for limit in limits {
        dt = dt.min(COURANT * limit);
    }
    dt
}

// ── Mesh surface ────────────────────────────────────────────────

fn overland_manning(a: &FlowSide<'_>, b: &FlowSide<'_>, geometry: &EdgeGeometry) -> RateAndDt {
    let ea = a.attributes.z_top + a.level;
    let eb = b.attributes.z_top + b.level;
    let dist = a.attributes.distance_to(b.attributes);
    if ea == eb || !(dist > 0.0) {
        return NO_FLOW;
    }
    let (up, down, sign) = if ea > eb { (a, b, 1.0) } else { (b, a, -1.0) };
    let depth = up.level;
    if depth <= 0.0 {
        return NO_FLOW;
    }
    let drop = (ea - eb).abs();
    let velocity = depth.powf(2.0 / 3.0) * (drop / dist).sqrt() / up.attributes.manning_n;
    let rate = sign * velocity * depth * geometry.length;
    // Volume that would level the two surfaces.
    let (area_up, area_down) = (up.attributes.area_or_length, down.attributes.area_or_length);
    let equalize = drop * area_up * area_down / (area_up + area_down);
    let dt = lease_dt(rate, depth * area_up, &[dist / velocity, equalize / rate.abs()]);
    (rate, dt)
}

/// Positive from mesh to channel.
fn weir(mesh: &FlowSide<'_>, channel: &FlowSide<'_>, geometry: &EdgeGeometry) -> RateAndDt {
    let Some(shape) = channel.attributes.channel_shape else {
        return NO_FLOW;
    };
    let bank = channel.attributes.z_top + geometry.z_offset;
    let em = mesh.attributes.z_top + mesh.level;
    let ec = channel.attributes.z_bottom + channel.level;
    let (up_elevation, down_elevation, sign, up_level) = if em > ec {
        (em, ec, 1.0, mesh.level)
    } else {
        (ec, em, -1.0, channel.level)
    };
    if up_level <= 0.0 || up_elevation <= bank {
        return NO_FLOW;
    }
    let head = up_elevation - bank;
    let tail = (down_elevation - bank).max(0.0);
    // Villemonte submergence correction.
    let submergence = (1.0 - (tail / head).powf(1.5)).powf(0.385);
    let rate = sign
        * WEIR_COEFFICIENT
        * geometry.length
        * (2.0 * GRAVITY).sqrt()
        * head.powf(1.5)
        * submergence;
    let storage = if sign > 0.0 {
        mesh.level * mesh.attributes.area_or_length
    } else {
        shape.area(channel.level) * channel.attributes.area_or_length
    };
    (rate, lease_dt(rate, storage, &[]))
}

fn mesh_critical_outflow(local: &FlowSide<'_>, geometry: &EdgeGeometry) -> RateAndDt {
    let depth = local.level;
    if depth <= 0.0 {
        return NO_FLOW;
    }
    let rate = GRAVITY.sqrt() * depth.powf(1.5) * geometry.length;
    (rate, lease_dt(rate, depth * local.attributes.area_or_length, &[]))
}

// ── Channels ────────────────────────────────────────────────────

fn channel_manning(a: &FlowSide<'_>, b: &FlowSide<'_>) -> RateAndDt {
    let ea = a.attributes.z_bottom + a.level;
    let eb = b.attributes.z_bottom + b.level;
    let dist = 0.5 * (a.attributes.area_or_length + b.attributes.area_or_length);
    if ea == eb || !(dist > 0.0) {
        return NO_FLOW;
    }
    let (up, sign) = if ea > eb { (a, 1.0) } else { (b, -1.0) };
    let Some(shape) = up.attributes.channel_shape else {
        return NO_FLOW;
    };
    let depth = up.level;
    if depth <= 0.0 {
        return NO_FLOW;
    }
    let area = shape.area(depth);
    let radius = area / shape.wetted_perimeter(depth);
    let velocity = radius.powf(2.0 / 3.0) * ((ea - eb).abs() / dist).sqrt() / up.attributes.manning_n;
    let rate = sign * area * velocity;
    let storage = area * up.attributes.area_or_length;
    (rate, lease_dt(rate, storage, &[dist / velocity]))
}

fn channel_critical_outflow(local: &FlowSide<'_>) -> RateAndDt {
    let Some(shape) = local.attributes.channel_shape else {
        return NO_FLOW;
    };
    let depth = local.level;
    if depth <= 0.0 {
        return NO_FLOW;
    }
    let area = shape.area(depth);
    let rate = (GRAVITY * area.powi(3) / shape.top_width(depth)).sqrt();
    (rate, lease_dt(rate, area * local.attributes.area_or_length, &[]))
}

// ── Groundwater ─────────────────────────────────────────────────

fn harmonic_mean(a: f64, b: f64) -> f64 {
    if a <= 0.0 || b <= 0.0 {
        0.0
    } else {
        2.0 * a * b / (a + b)
    }
}

fn darcy_lateral(a: &FlowSide<'_>, b: &FlowSide<'_>, geometry: &EdgeGeometry) -> RateAndDt {
    let dist = a.attributes.distance_to(b.attributes);
    if a.level == b.level || !(dist > 0.0) {
        return NO_FLOW;
    }
    let (up, sign) = if a.level > b.level { (a, 1.0) } else { (b, -1.0) };
    let thickness = up.level - up.attributes.z_bottom;
    let conductivity = harmonic_mean(a.attributes.conductivity, b.attributes.conductivity);
    if thickness <= 0.0 || conductivity == 0.0 {
        return NO_FLOW;
    }
    let rate = sign * conductivity * thickness * geometry.length * (a.level - b.level).abs() / dist;
    let storage = thickness * up.attributes.porosity_or_bed_thickness * up.attributes.area_or_length;
    (rate, lease_dt(rate, storage, &[]))
}

/// Positive from groundwater into the channel.
fn bed_seepage(ground: &FlowSide<'_>, channel: &FlowSide<'_>, geometry: &EdgeGeometry) -> RateAndDt {
    let Some(shape) = channel.attributes.channel_shape else {
        return NO_FLOW;
    };
    let bed_thickness = channel.attributes.porosity_or_bed_thickness;
    let conductivity = channel.attributes.conductivity;
    if bed_thickness <= 0.0 || conductivity <= 0.0 {
        return NO_FLOW;
    }
    let depth = channel.level.max(0.0);
    let surface = channel.attributes.z_bottom + depth;
    let contact = geometry.length * shape.wetted_perimeter(depth);
    let ground_thickness = ground.level - ground.attributes.z_bottom;
    if ground.level > surface && ground_thickness > 0.0 {
        let rate = conductivity * (ground.level - surface) / bed_thickness * contact;
        let storage = ground_thickness
            * ground.attributes.porosity_or_bed_thickness
            * ground.attributes.area_or_length;
        (rate, lease_dt(rate, storage, &[]))
    } else if depth > 0.0 {
        // Losing reach: the water table cannot pull below the bed bottom.
        let floor = ground.level.max(channel.attributes.z_bottom - bed_thickness);
        if surface <= floor {
            return NO_FLOW;
        }
        let rate = -conductivity * (surface - floor) / bed_thickness * contact;
        let storage = shape.area(depth) * channel.attributes.area_or_length;
        (rate, lease_dt(rate, storage, &[]))
    } else {
        NO_FLOW
    }
}

fn groundwater_boundary_outflow(local: &FlowSide<'_>, geometry: &EdgeGeometry) -> RateAndDt {
    let attrs = local.attributes;
    let thickness = local.level - attrs.z_bottom;
    if thickness <= 0.0 || attrs.conductivity <= 0.0 {
        return NO_FLOW;
    }
    // Gradient of the saturated thickness across half the element.
    let half_width = 0.5 * attrs.area_or_length.sqrt();
    let rate = attrs.conductivity * thickness * geometry.length * thickness / half_width;
    let storage = thickness * attrs.porosity_or_bed_thickness * attrs.area_or_length;
    (rate, lease_dt(rate, storage, &[]))
}
