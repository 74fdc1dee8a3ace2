//! Simulation-time helpers shared by both sides of every edge.
//!
//! Lease expiration times are snapped to a power-of-two grid so that
//! neighboring edges tend to expire together, which keeps regional
//! timesteps long. Every value produced here is exact in binary floating
//! point as long as times stay below 2^52 seconds.

/// Shortest lease a flow-rate negotiation may grant (s).
pub const MIN_LEASE: f64 = 1.0;

/// Longest lease a flow-rate negotiation may grant (s).
pub const MAX_LEASE: f64 = 3600.0;

/// Relative tolerance used by [`epsilon_equal`].
pub const EPSILON: f64 = 1e-10;

/// Largest power of two not greater than `dt`.
///
/// `dt` must be finite and positive.
pub fn power_of_two_floor(dt: f64) -> f64 {
    debug_assert!(dt.is_finite() && dt > 0.0);
    let mut step = 2f64.powi(dt.log2().floor() as i32);
    // log2 can land one ulp on the wrong side of an exact power.
    if step > dt {
        step *= 0.5;
    } else if step * 2.0 <= dt {
        step *= 2.0;
    }
    step
}

/// Expiration time for a lease of at most `dt_new` seconds granted at
/// `current_time`.
///
/// `dt_new` is clamped to `[MIN_LEASE, MAX_LEASE]` and rounded down to a
/// power of two `step`; the result is the first multiple of `step`
/// strictly after `current_time`. The result therefore lies in
/// `(current_time, current_time + dt_new]`.
pub fn new_expiration_time(current_time: f64, dt_new: f64) -> f64 {
    let dt = if dt_new.is_nan() {
        MIN_LEASE
    } else {
        dt_new.clamp(MIN_LEASE, MAX_LEASE)
    };
    let step = power_of_two_floor(dt);
    ((current_time / step).floor() + 1.0) * step
}

/// Whether `a` and `b` agree to within [`EPSILON`] relative error.
pub fn epsilon_equal(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= EPSILON * scale
}

/// Whether `a` is less than `b` by more than [`EPSILON`] relative error.
pub fn epsilon_less(a: f64, b: f64) -> bool {
    a < b && !epsilon_equal(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn power_of_two_floor_exact_powers() {
        assert_eq!(power_of_two_floor(1.0), 1.0);
        assert_eq!(power_of_two_floor(64.0), 64.0);
        assert_eq!(power_of_two_floor(100.0), 64.0);
        assert_eq!(power_of_two_floor(3600.0), 2048.0);
        assert_eq!(power_of_two_floor(0.3), 0.25);
    }

    #[test]
    fn expiration_is_aligned_to_grid() {
        assert_eq!(new_expiration_time(0.0, 100.0), 64.0);
        assert_eq!(new_expiration_time(64.0, 100.0), 128.0);
        assert_eq!(new_expiration_time(70.0, 100.0), 128.0);
        assert_eq!(new_expiration_time(70.0, 10.0), 72.0);
    }

    #[test]
    fn expiration_respects_bounds() {
        assert_eq!(new_expiration_time(0.0, 0.001), MIN_LEASE);
        assert_eq!(new_expiration_time(0.0, f64::INFINITY), 2048.0);
        assert_eq!(new_expiration_time(0.0, f64::NAN), MIN_LEASE);
    }

    #[test]
    fn epsilon_comparisons() {
        assert!(epsilon_equal(1.0, 1.0 + 1e-12));
        assert!(!epsilon_equal(1.0, 1.0 + 1e-6));
        assert!(epsilon_less(1.0, 2.0));
        assert!(!epsilon_less(1.0, 1.0 + 1e-12));
    }

    proptest! {
        #[test]
        fn expiration_strictly_after_and_within_dt(
            current in 0.0f64..1.0e7,
            dt in 0.5f64..10_000.0,
        ) {
            let exp = new_expiration_time(current, dt);
            prop_assert!(exp > current);
            prop_assert!(exp - current <= dt.clamp(MIN_LEASE, MAX_LEASE));
        }
    }
}
