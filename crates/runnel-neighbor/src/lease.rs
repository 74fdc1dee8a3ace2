//! Flow-rate leases.

use std::io::{Read, Write};

use runnel_core::codec::{read_f64_le, read_u8, write_f64_le, write_u8, Decode, Encode};
use runnel_core::CodecError;

/// The negotiated flow across one edge, as seen from one side.
///
/// A recipient edge is pinned: it accepts whatever its sender delivers and
/// never renegotiates, so it carries no rate and no expiration at all.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FlowLease {
    /// A rate valid until `expiration`.
    Negotiated {
        /// Signed rate (m³/s). Positive means local to remote.
        rate: f64,
        /// Simulation time at which the rate must be renegotiated (s).
        expiration: f64,
    },
    /// Pinned receiver.
    Recipient,
}

impl FlowLease {
    /// A zero-rate lease that is already stale at `time`.
    pub fn expired_at(time: f64) -> Self {
        Self::Negotiated {
            rate: 0.0,
            expiration: time,
        }
    }

    /// Whether the rate must be renegotiated before use at `now`.
    pub fn is_expired(&self, now: f64) -> bool {
        match self {
            Self::Negotiated { expiration, .. } => now >= *expiration,
            Self::Recipient => false,
        }
    }

    /// Negotiated rate, or `None` for a recipient.
    pub fn rate(&self) -> Option<f64> {
        match self {
            Self::Negotiated { rate, .. } => Some(*rate),
            Self::Recipient => None,
        }
    }

    /// Expiration time, or `None` if the lease never expires.
    pub fn expiration(&self) -> Option<f64> {
        match self {
            Self::Negotiated { expiration, .. } => Some(*expiration),
            Self::Recipient => None,
        }
    }

    /// The part of the rate that leaves the local side (m³/s, ≥ 0).
    pub fn outflow_rate(&self) -> f64 {
        match self {
            Self::Negotiated { rate, .. } if *rate > 0.0 => *rate,
            _ => 0.0,
        }
    }

    /// Whether the remote side will send water while this lease holds.
    pub fn expects_inflow(&self) -> bool {
        match self {
            Self::Negotiated { rate, .. } => *rate < 0.0,
            Self::Recipient => true,
        }
    }

    /// The same lease seen from the other side of the edge.
    ///
    /// The remote side of a recipient is its sender, whose lease is
    /// independent, so a recipient has no counterpart and returns `None`.
    pub fn reversed(&self) -> Option<Self> {
        match self {
            Self::Negotiated { rate, expiration } => Some(Self::Negotiated {
                rate: -rate,
                expiration: *expiration,
            }),
            Self::Recipient => None,
        }
    }
}

impl Encode for FlowLease {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        match self {
            Self::Negotiated { rate, expiration } => {
                write_u8(w, 0)?;
                write_f64_le(w, *rate)?;
                write_f64_le(w, *expiration)
            }
            Self::Recipient => write_u8(w, 1),
        }
    }
}

impl Decode for FlowLease {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        match read_u8(r)? {
            0 => Ok(Self::Negotiated {
                rate: read_f64_le(r)?,
                expiration: read_f64_le(r)?,
            }),
            1 => Ok(Self::Recipient),
            tag => Err(CodecError::UnknownTag {
                what: "flow lease",
                tag,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runnel_core::codec::{from_bytes, to_bytes};

    #[test]
    fn expiry_is_inclusive() {
        let lease = FlowLease::Negotiated {
            rate: 1.0,
            expiration: 64.0,
        };
        assert!(!lease.is_expired(63.0));
        assert!(lease.is_expired(64.0));
        assert!(FlowLease::expired_at(0.0).is_expired(0.0));
    }

    #[test]
    fn recipient_never_expires_and_always_receives() {
        let lease = FlowLease::Recipient;
        assert!(!lease.is_expired(f64::MAX));
        assert!(lease.expects_inflow());
        assert_eq!(lease.outflow_rate(), 0.0);
        assert_eq!(lease.rate(), None);
        assert_eq!(lease.reversed(), None);
    }

    #[test]
    fn sign_decides_direction() {
        let out = FlowLease::Negotiated {
            rate: 2.0,
            expiration: 8.0,
        };
        assert_eq!(out.outflow_rate(), 2.0);
        assert!(!out.expects_inflow());
        let back = out.reversed().unwrap();
        assert_eq!(back.outflow_rate(), 0.0);
        assert!(back.expects_inflow());
        assert_eq!(back.expiration(), Some(8.0));
    }

    #[test]
    fn zero_rate_neither_sends_nor_waits() {
        let zero = FlowLease::Negotiated {
            rate: 0.0,
            expiration: 8.0,
        };
        let neg_zero = zero.reversed().unwrap();
        for lease in [zero, neg_zero] {
            assert_eq!(lease.outflow_rate(), 0.0);
            assert!(!lease.expects_inflow());
        }
    }

    #[test]
    fn codec_preserves_variant() {
        for lease in [
            FlowLease::Recipient,
            FlowLease::Negotiated {
                rate: -3.5,
                expiration: 128.0,
            },
        ] {
            let bytes = to_bytes(&lease).unwrap();
            assert_eq!(from_bytes::<FlowLease>(&bytes).unwrap(), lease);
        }
        match from_bytes::<FlowLease>(&[9]) {
            Err(CodecError::UnknownTag { tag: 9, .. }) => {}
            other => panic!("expected UnknownTag, got {other:?}"),
        }
    }
}
