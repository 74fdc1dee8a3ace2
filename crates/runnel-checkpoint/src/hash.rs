//! Hashing utilities for snapshot and configuration comparison.
//!
//! Uses FNV-1a for fast, deterministic hashing of simulation state.
//! These hashes are not cryptographically secure; they are used for
//! fast equality checks between runs.

use runnel_core::NeighborEndpoint;
use runnel_element::{ElementState, GroundwaterMode, RegionSnapshot};
use runnel_engine::SimulationConfig;
use runnel_neighbor::FlowLease;

/// FNV-1a offset basis for 64-bit.
const FNV_OFFSET: u64 = 0xcbf29ce484222325;
/// FNV-1a prime for 64-bit.
const FNV_PRIME: u64 = 0x00000100000001B3;

/// Feed a single byte into an FNV-1a hash state.
#[inline]
fn fnv1a_byte(hash: u64, byte: u8) -> u64 {
    (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
}

/// Feed a u32 (as 4 LE bytes) into an FNV-1a hash state.
#[inline]
fn fnv1a_u32(mut hash: u64, v: u32) -> u64 {
    for &b in &v.to_le_bytes() {
        hash = fnv1a_byte(hash, b);
    }
    hash
}

/// Feed a u64 (as 8 LE bytes) into an FNV-1a hash state.
#[inline]
fn fnv1a_u64(mut hash: u64, v: u64) -> u64 {
    for &b in &v.to_le_bytes() {
        hash = fnv1a_byte(hash, b);
    }
    hash
}

/// Feed an f64 by its bit pattern, so `-0.0` and `0.0` differ.
#[inline]
fn fnv1a_f64(hash: u64, v: f64) -> u64 {
    fnv1a_u64(hash, v.to_bits())
}

fn fnv1a_endpoint(hash: u64, endpoint: NeighborEndpoint) -> u64 {
    fnv1a_byte(hash, endpoint.tag())
}

fn fnv1a_mode(hash: u64, mode: GroundwaterMode) -> u64 {
    let tag = match mode {
        GroundwaterMode::SaturatedAquifer => 0,
        GroundwaterMode::UnsaturatedAquifer => 1,
        GroundwaterMode::PerchedWaterTable => 2,
        GroundwaterMode::NoMultilayer => 3,
    };
    fnv1a_byte(hash, tag)
}

fn fnv1a_lease(hash: u64, lease: &FlowLease) -> u64 {
    match *lease {
        FlowLease::Negotiated { rate, expiration } => {
            fnv1a_f64(fnv1a_f64(fnv1a_byte(hash, 0), rate), expiration)
        }
        FlowLease::Recipient => fnv1a_byte(hash, 1),
    }
}

/// Compute a hash over every value in a region snapshot.
///
/// Elements and proxies are hashed in snapshot order, which is id order
/// for elements and key order for proxies, so equal states always hash
/// equal. The element id is folded in at each element boundary.
pub fn snapshot_hash(snapshot: &RegionSnapshot) -> u64 {
    let mut hash = FNV_OFFSET;
    hash = fnv1a_u32(hash, snapshot.region.0);
    hash = fnv1a_f64(hash, snapshot.time);

    for element in &snapshot.elements {
        hash = fnv1a_u32(hash, element.element.0);
        match element.state {
            ElementState::Mesh {
                surface_depth,
                mode,
                soil_head,
                aquifer_head,
                vadose_water,
                canopy,
                snow,
            } => {
                hash = fnv1a_byte(hash, 0);
                hash = fnv1a_f64(hash, surface_depth);
                hash = fnv1a_mode(hash, mode);
                for v in [soil_head, aquifer_head, vadose_water, canopy, snow] {
                    hash = fnv1a_f64(hash, v);
                }
            }
            ElementState::Channel { depth } => {
                hash = fnv1a_byte(hash, 1);
                hash = fnv1a_f64(hash, depth);
            }
        }
        for v in [
            element.total_water,
            element.water_created,
            element.precipitation,
            element.evaporation,
        ] {
            hash = fnv1a_f64(hash, v);
        }
        hash = fnv1a_u32(hash, element.proxies.len() as u32);
        for proxy in &element.proxies {
            hash = fnv1a_endpoint(hash, proxy.local_endpoint);
            hash = fnv1a_endpoint(hash, proxy.remote_endpoint);
            hash = fnv1a_u32(hash, proxy.remote_element.0);
            hash = fnv1a_lease(hash, &proxy.lease);
            hash = fnv1a_f64(hash, proxy.cumulative_inflow);
            hash = fnv1a_f64(hash, proxy.cumulative_outflow);
        }
    }

    hash
}

/// Compute a hash over the configuration knobs that shape a run.
///
/// Output-only settings (verbosity, traced regions, stall timeout) are
/// left out, so changing them does not invalidate a checkpoint.
pub fn config_hash(config: &SimulationConfig) -> u64 {
    let mut hash = FNV_OFFSET;
    for v in [
        config.simulation_start,
        config.simulation_end,
        config.sync_interval,
        config.regional_dt_limit,
    ] {
        hash = fnv1a_f64(hash, v);
    }
    for flag in [
        config.drain_down_mode,
        config.force_lease_expiration,
        config.zero_cumulative_flow,
        config.zero_water_created,
        config.check_invariants,
    ] {
        hash = fnv1a_byte(hash, u8::from(flag));
    }
    hash
}
