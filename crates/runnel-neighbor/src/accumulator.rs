//! Two-cell cumulative flow accumulator.
//!
//! A running total over millions of small increments loses precision once
//! the total dwarfs each increment. [`CumulativeFlow`] keeps a short-term
//! cell that absorbs increments and a long-term cell that absorbs the
//! short-term cell whenever folding introduces less relative error than
//! adding one more increment to the short-term cell would.

use std::io::{Read, Write};

use runnel_core::codec::{read_f64_le, write_f64_le, Decode, Encode};
use runnel_core::CodecError;

/// Short-term/long-term accumulator pair.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CumulativeFlow {
    short_term: f64,
    long_term: f64,
}

impl CumulativeFlow {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore an accumulator from its two cells.
    pub fn from_parts(short_term: f64, long_term: f64) -> Self {
        Self {
            short_term,
            long_term,
        }
    }

    /// Add `increment`.
    ///
    /// The short-term cell is folded into the long-term cell first when
    /// `|short / increment| > |long / short|`. Zero increments are ignored.
    pub fn add(&mut self, increment: f64) {
        if increment == 0.0 {
            return;
        }
        if self.short_term != 0.0
            && (self.short_term / increment).abs() > (self.long_term / self.short_term).abs()
        {
            self.long_term += self.short_term;
            self.short_term = 0.0;
        }
        self.short_term += increment;
    }

    /// Total of everything added so far.
    pub fn total(&self) -> f64 {
        self.long_term + self.short_term
    }

    /// The short-term cell.
    pub fn short_term(&self) -> f64 {
        self.short_term
    }

    /// The long-term cell.
    pub fn long_term(&self) -> f64 {
        self.long_term
    }

    /// Zero both cells.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Encode for CumulativeFlow {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_f64_le(w, self.short_term)?;
        write_f64_le(w, self.long_term)
    }
}

impl Decode for CumulativeFlow {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(Self::from_parts(read_f64_le(r)?, read_f64_le(r)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_increment_lands_short_term() {
        let mut acc = CumulativeFlow::new();
        acc.add(2.5);
        assert_eq!(acc.short_term(), 2.5);
        assert_eq!(acc.long_term(), 0.0);
    }

    #[test]
    fn second_increment_folds_when_long_is_empty() {
        // |2.5 / 1.0| > |0 / 2.5| so the short cell folds before adding.
        let mut acc = CumulativeFlow::new();
        acc.add(2.5);
        acc.add(1.0);
        assert_eq!(acc.long_term(), 2.5);
        assert_eq!(acc.short_term(), 1.0);
        assert_eq!(acc.total(), 3.5);
    }

    #[test]
    fn short_term_grows_until_relative_error_warrants_fold() {
        let mut acc = CumulativeFlow::from_parts(1.0, 1.0e6);
        // |1 / 1| = 1 is not greater than |1e6 / 1|, so no fold.
        acc.add(1.0);
        assert_eq!(acc.short_term(), 2.0);
        assert_eq!(acc.long_term(), 1.0e6);
    }

    #[test]
    fn zero_increment_is_ignored() {
        let mut acc = CumulativeFlow::from_parts(3.0, 4.0);
        acc.add(0.0);
        assert_eq!(acc, CumulativeFlow::from_parts(3.0, 4.0));
    }

    #[test]
    fn long_run_sum_is_accurate() {
        let mut acc = CumulativeFlow::new();
        let mut naive = 0.0f64;
        for _ in 0..1_000_000 {
            acc.add(0.1);
            naive += 0.1;
        }
        let exact = 100_000.0;
        assert!((acc.total() - exact).abs() <= (naive - exact).abs());
        assert!((acc.total() - exact).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn total_matches_sum_of_exact_increments(incs in prop::collection::vec(1u32..1000, 1..200)) {
            // Integer-valued increments are exact in f64, so the total must be exact.
            let mut acc = CumulativeFlow::new();
            let mut expected = 0u64;
            for i in &incs {
                acc.add(f64::from(*i));
                expected += u64::from(*i);
            }
            prop_assert_eq!(acc.total(), expected as f64);
        }

        #[test]
        fn total_independent_of_fold_points(
            incs in prop::collection::vec(1u32..1000, 1..300),
            seed_short in 0u32..10_000,
            seed_long in 0u32..10_000,
            fold_at in 0usize..300,
        ) {
            // Integer-valued cells stay exact, so where the short cell is
            // folded must not change the total.
            let seed = f64::from(seed_short) + f64::from(seed_long);
            let mut a = CumulativeFlow::from_parts(0.0, seed);
            let mut b = CumulativeFlow::from_parts(f64::from(seed_short), f64::from(seed_long));
            for (i, inc) in incs.iter().enumerate() {
                if i == fold_at {
                    b = CumulativeFlow::from_parts(0.0, b.long_term() + b.short_term());
                }
                a.add(f64::from(*inc));
                b.add(f64::from(*inc));
            }
            let expected = seed + incs.iter().map(|i| f64::from(*i)).sum::<f64>();
            prop_assert_eq!(a.total(), expected);
            prop_assert_eq!(b.total(), expected);
        }
    }
}
