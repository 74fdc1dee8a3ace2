//! Time-ordered set of pending inbound transfers.

use std::io::{Read, Write};

use runnel_core::codec::{Decode, Encode};
use runnel_core::{CodecError, WaterTransfer};

/// Pending inbound transfers for one edge, sorted by time.
///
/// Stored intervals never overlap. Inserting a transfer whose interval
/// overlaps a stored one is treated as a second delivery of the same slot
/// and rejected, so water is never counted twice.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransferSet {
    transfers: Vec<WaterTransfer>,
}

impl TransferSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `transfer`. Returns `false` if it overlaps a stored interval.
    pub fn insert(&mut self, transfer: WaterTransfer) -> bool {
        let idx = self
            .transfers
            .partition_point(|t| t.end_time <= transfer.start_time);
        if let Some(next) = self.transfers.get(idx) {
            if next.start_time < transfer.end_time {
                return false;
            }
        }
        self.transfers.insert(idx, transfer);
        true
    }

    /// Whether the stored intervals cover `[start, end)` without a gap.
    pub fn covers(&self, start: f64, end: f64) -> bool {
        let mut reached = start;
        for t in &self.transfers {
            if reached >= end {
                break;
            }
            if t.end_time <= reached {
                continue;
            }
            if t.start_time > reached {
                return false;
            }
            reached = t.end_time;
        }
        reached >= end
    }

    /// Remove and sum every transfer that starts before `end`.
    ///
    /// A transfer that straddles `end` is split by duration; the later part
    /// stays in the set. Transfers that ended at or before `start` should
    /// not exist (they would have been drained by an earlier step) but are
    /// still summed so no water is ever dropped.
    pub fn take(&mut self, start: f64, end: f64) -> f64 {
        debug_assert!(
            self.transfers.first().map_or(true, |t| t.end_time > start),
            "stale transfer before {start}"
        );
        let split = self.transfers.partition_point(|t| t.start_time < end);
        let mut total = 0.0;
        let mut remainder = None;
        for t in self.transfers.drain(..split) {
            if t.end_time > end {
                let (before, after) = t.split_at(end);
                total += before.amount;
                remainder = Some(after);
            } else {
                total += t.amount;
            }
        }
        if let Some(after) = remainder {
            self.transfers.insert(0, after);
        }
        total
    }

    /// Number of stored transfers.
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Stored transfers in time order.
    pub fn iter(&self) -> impl Iterator<Item = &WaterTransfer> {
        self.transfers.iter()
    }

    /// Sum of all stored amounts.
    pub fn pending_amount(&self) -> f64 {
        self.transfers.iter().map(|t| t.amount).sum()
    }
}

impl Encode for TransferSet {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        self.transfers.encode(w)
    }
}

impl Decode for TransferSet {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        let transfers = Vec::<WaterTransfer>::decode(r)?;
        let mut set = TransferSet::new();
        for t in transfers {
            if !set.insert(t) {
                return Err(CodecError::Malformed {
                    detail: format!(
                        "overlapping transfer [{}, {}) in pending set",
                        t.start_time, t.end_time
                    ),
                });
            }
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn t(amount: f64, start: f64, end: f64) -> WaterTransfer {
        WaterTransfer::new(amount, start, end).unwrap()
    }

    #[test]
    fn overlapping_insert_rejected() {
        let mut set = TransferSet::new();
        assert!(set.insert(t(1.0, 0.0, 10.0)));
        assert!(!set.insert(t(1.0, 5.0, 15.0)));
        assert!(!set.insert(t(1.0, 0.0, 10.0)));
        assert!(set.insert(t(1.0, 10.0, 20.0)));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn out_of_order_inserts_are_sorted() {
        let mut set = TransferSet::new();
        assert!(set.insert(t(1.0, 20.0, 30.0)));
        assert!(set.insert(t(1.0, 0.0, 10.0)));
        assert!(set.insert(t(1.0, 10.0, 20.0)));
        let starts: Vec<f64> = set.iter().map(|x| x.start_time).collect();
        assert_eq!(starts, vec![0.0, 10.0, 20.0]);
    }

    #[test]
    fn gap_detected() {
        let mut set = TransferSet::new();
        set.insert(t(1.0, 0.0, 10.0));
        set.insert(t(1.0, 20.0, 30.0));
        assert!(set.covers(0.0, 10.0));
        assert!(!set.covers(0.0, 30.0));
        assert!(set.covers(20.0, 25.0));
        assert!(!set.covers(5.0, 15.0));
        set.insert(t(1.0, 10.0, 20.0));
        assert!(set.covers(0.0, 30.0));
    }

    #[test]
    fn empty_set_covers_nothing_but_empty_window() {
        let set = TransferSet::new();
        assert!(!set.covers(0.0, 1.0));
        assert!(set.covers(1.0, 1.0));
    }

    #[test]
    fn take_drains_window_and_splits_straddler() {
        let mut set = TransferSet::new();
        set.insert(t(4.0, 0.0, 16.0));
        set.insert(t(8.0, 16.0, 32.0));
        let got = set.take(0.0, 24.0);
        assert_eq!(got, 8.0);
        assert_eq!(set.len(), 1);
        let rest = set.iter().next().unwrap();
        assert_eq!(rest.start_time, 24.0);
        assert_eq!(rest.amount, 4.0);
        assert!(set.covers(24.0, 32.0));
    }

    #[test]
    fn take_leaves_later_transfers() {
        let mut set = TransferSet::new();
        set.insert(t(1.0, 0.0, 10.0));
        set.insert(t(2.0, 10.0, 20.0));
        assert_eq!(set.take(0.0, 10.0), 1.0);
        assert_eq!(set.pending_amount(), 2.0);
    }

    proptest! {
        #[test]
        fn stored_intervals_never_overlap(
            raw in prop::collection::vec((0u32..100, 1u32..20), 1..60),
        ) {
            let mut set = TransferSet::new();
            for (start, len) in raw {
                let start = f64::from(start);
                set.insert(t(1.0, start, start + f64::from(len)));
            }
            let stored: Vec<WaterTransfer> = set.iter().copied().collect();
            for pair in stored.windows(2) {
                prop_assert!(pair[0].end_time <= pair[1].start_time);
            }
        }

        #[test]
        fn covers_iff_no_gap(
            cuts in prop::collection::btree_set(1u32..99, 0..10),
            missing in 0usize..12,
        ) {
            // Tile [0, 100) with pieces, optionally drop one, compare with covers().
            let mut bounds: Vec<u32> = vec![0];
            bounds.extend(cuts.iter().copied());
            bounds.push(100);
            let pieces: Vec<(u32, u32)> = bounds.windows(2).map(|w| (w[0], w[1])).collect();
            let mut set = TransferSet::new();
            for (i, (a, b)) in pieces.iter().enumerate() {
                if i != missing {
                    set.insert(t(0.0, f64::from(*a), f64::from(*b)));
                }
            }
            let complete = missing >= pieces.len();
            prop_assert_eq!(set.covers(0.0, 100.0), complete);
        }
    }
}
