//! Proportional scale-down of simultaneous outflows.

use indexmap::IndexMap;

use runnel_core::{InvariantError, NeighborConnection, NeighborEndpoint};
use runnel_neighbor::{Envelope, NeighborProxy};

/// Outcome of rationing one container.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ration {
    /// Share of every nominal outflow that can be satisfied, in `[0, 1]`.
    pub fraction: f64,
    /// Water left in the container after all outflows are paid.
    pub remaining: f64,
}

/// Sum of the outgoing parts of `rates` (m³/s).
pub fn total_outflow(rates: impl IntoIterator<Item = f64>) -> f64 {
    rates.into_iter().map(|r| r.max(0.0)).sum()
}

/// Ration `available` water (m³) among outflows totalling
/// `total_outflow_rate` (m³/s) for `dt` seconds.
///
/// With nothing available or nothing demanded the fraction is zero. When
/// demand meets or exceeds supply every drop is sent and `remaining` is
/// exactly zero; otherwise the full demand is paid.
pub fn ration(available: f64, total_outflow_rate: f64, dt: f64) -> Ration {
    if available <= 0.0 || total_outflow_rate <= 0.0 {
        return Ration {
            fraction: 0.0,
            remaining: available,
        };
    }
    let demand = total_outflow_rate * dt;
    if available <= demand {
        Ration {
            fraction: (available / demand).clamp(0.0, 1.0),
            remaining: 0.0,
        }
    } else {
        Ration {
            fraction: 1.0,
            remaining: available - demand,
        }
    }
}

/// Result of [`emit_rationed_outflows`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Emission {
    /// The ration applied.
    pub ration: Ration,
    /// Sum of the amounts actually sent (m³).
    pub sent: f64,
    /// `sent` minus what left the container. Nonzero only through
    /// roundoff; the caller books it as water created.
    pub created: f64,
    /// Whether demand exceeded supply and every outflow was scaled down.
    pub rationed: bool,
}

/// Ration `available` water among every proxy whose local endpoint
/// satisfies `owns`, send each its share for `[now, end)`, and push the
/// resulting messages to `out`.
///
/// Proxies with a positive rate, and every proxy feeding a pinned
/// recipient, are always sent a message, even for a zero amount.
pub fn emit_rationed_outflows(
    proxies: &mut IndexMap<NeighborConnection, NeighborProxy>,
    owns: impl Fn(NeighborEndpoint) -> bool,
    available: f64,
    now: f64,
    end: f64,
    out: &mut Vec<Envelope>,
) -> Result<Emission, InvariantError> {
    let dt = end - now;
    let total = total_outflow(
        proxies
            .iter()
            .filter(|(c, _)| owns(c.local_endpoint))
            .map(|(_, p)| p.outflow_rate()),
    );
    let ration = ration(available, total, dt);
    let mut sent = 0.0;
    for (connection, proxy) in proxies.iter_mut() {
        if !owns(connection.local_endpoint) {
            continue;
        }
        if !proxy.sends_water() {
            continue;
        }
        let amount = proxy.outflow_rate() * dt * ration.fraction;
        sent += amount;
        if let Some(message) = proxy.send_water(amount, now, end)? {
            out.push(Envelope::new(*connection, message));
        }
    }
    let removed = if total > 0.0 && available > 0.0 {
        available - ration.remaining
    } else {
        0.0
    };
    Ok(Emission {
        ration,
        sent,
        created: sent - removed,
        rationed: total > 0.0 && ration.fraction < 1.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use runnel_core::{EdgeGeometry, ElementId, NeighborAttributes, RegionId};
    use runnel_neighbor::Message;

    #[test]
    fn nothing_available_sends_nothing() {
        assert_eq!(ration(0.0, 5.0, 10.0).fraction, 0.0);
        assert_eq!(ration(5.0, 0.0, 10.0).fraction, 0.0);
        assert_eq!(ration(5.0, 0.0, 10.0).remaining, 5.0);
    }

    #[test]
    fn demand_exceeding_supply_scales_down() {
        // 120 m³/s demanded for 1 s with only 80 m³ available.
        let r = ration(80.0, 120.0, 1.0);
        assert!((r.fraction - 80.0 / 120.0).abs() < 1e-15);
        assert_eq!(r.remaining, 0.0);
    }

    #[test]
    fn ample_supply_pays_in_full() {
        let r = ration(100.0, 2.0, 10.0);
        assert_eq!(r.fraction, 1.0);
        assert_eq!(r.remaining, 80.0);
    }

    #[test]
    fn negative_rates_do_not_count_as_outflow() {
        assert_eq!(total_outflow([60.0, -10.0, 60.0, 0.0]), 120.0);
    }

    fn outlet(element: u32, remote: u32) -> NeighborConnection {
        NeighborConnection::new(
            NeighborEndpoint::MeshSurface,
            ElementId(element),
            NeighborEndpoint::MeshSurface,
            ElementId(remote),
        )
        .unwrap()
    }

    fn attrs(x: f64, z_top: f64) -> NeighborAttributes {
        NeighborAttributes {
            x,
            y: 0.0,
            z_top,
            z_bottom: 0.0,
            area_or_length: 1.0e4,
            manning_n: 0.04,
            conductivity: 0.0,
            porosity_or_bed_thickness: 0.3,
            channel_shape: None,
        }
    }

    /// A proxy from element 1 to `remote` with a positive negotiated rate.
    fn flowing_proxy(remote: u32) -> NeighborProxy {
        let c = outlet(1, remote);
        let mut p = NeighborProxy::new(c, RegionId(0), EdgeGeometry::with_length(50.0), 0.0);
        p.receive(Message::Neighbor(attrs(100.0, 9.0))).unwrap();
        p.begin_negotiation(0.0, 1.0);
        p.receive(Message::State {
            time: 0.0,
            level: 0.0,
        })
        .unwrap();
        assert!(p.try_complete_negotiation(&attrs(0.0, 10.0), 0.0).unwrap());
        assert!(p.outflow_rate() > 0.0);
        p
    }

    #[test]
    fn every_outflow_gets_the_same_fraction() {
        let mut proxies = IndexMap::new();
        for remote in [2, 3] {
            let p = flowing_proxy(remote);
            proxies.insert(*p.connection(), p);
        }
        let rates: Vec<f64> = proxies.values().map(|p| p.outflow_rate()).collect();
        let dt = 1.0;
        let demand = total_outflow(rates.iter().copied()) * dt;
        let mut out = Vec::new();
        let emission = emit_rationed_outflows(
            &mut proxies,
            |e| e == NeighborEndpoint::MeshSurface,
            demand * 0.5,
            0.0,
            dt,
            &mut out,
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert!(emission.rationed);
        assert_eq!(emission.ration.remaining, 0.0);
        for (env, rate) in out.iter().zip(&rates) {
            match env.message {
                Message::Water(t) => assert_eq!(t.amount, rate * dt * emission.ration.fraction),
                other => panic!("expected water, got {other:?}"),
            }
        }
        assert!(emission.created.abs() < 1e-9 * demand);
    }

    #[test]
    fn zero_fraction_still_sends_messages() {
        let mut proxies = IndexMap::new();
        let p = flowing_proxy(2);
        proxies.insert(*p.connection(), p);
        let mut out = Vec::new();
        let emission = emit_rationed_outflows(
            &mut proxies,
            |e| e == NeighborEndpoint::MeshSurface,
            0.0,
            0.0,
            1.0,
            &mut out,
        )
        .unwrap();
        assert_eq!(emission.sent, 0.0);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn dry_release_reports_zero_to_its_recipient() {
        let c = NeighborConnection::new(
            NeighborEndpoint::ReservoirRelease,
            ElementId(1),
            NeighborEndpoint::ReservoirRecipient,
            ElementId(2),
        )
        .unwrap();
        let mut release = NeighborProxy::new(c, RegionId(0), EdgeGeometry::with_length(5.0), 0.0);
        let mut local = attrs(0.0, 9.0);
        local.channel_shape = Some(runnel_core::ChannelShape {
            base_width: 2.0,
            side_slope: 1.0,
            bank_full_depth: 2.0,
        });
        release.begin_negotiation(0.0, 0.0);
        assert!(release.try_complete_negotiation(&local, 0.0).unwrap());
        assert_eq!(release.outflow_rate(), 0.0);

        let mut proxies = IndexMap::new();
        proxies.insert(c, release);
        let mut out = Vec::new();
        let emission = emit_rationed_outflows(
            &mut proxies,
            NeighborEndpoint::is_channel_local,
            0.0,
            0.0,
            60.0,
            &mut out,
        )
        .unwrap();
        assert_eq!(emission.sent, 0.0);
        assert!(!emission.rationed);
        assert_eq!(out.len(), 1);
        match out[0].message {
            Message::Water(t) => {
                assert_eq!(t.amount, 0.0);
                assert_eq!((t.start_time, t.end_time), (0.0, 60.0));
            }
            other => panic!("expected water, got {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn fraction_in_unit_interval(
            available in 0.0f64..1.0e6,
            rate in 0.0f64..1.0e4,
            dt in 1.0f64..3600.0,
        ) {
            let r = ration(available, rate, dt);
            prop_assert!((0.0..=1.0).contains(&r.fraction));
            prop_assert!(r.remaining >= 0.0);
            if r.fraction < 1.0 && rate > 0.0 && available > 0.0 {
                prop_assert_eq!(r.remaining, 0.0);
            }
        }
    }
}
