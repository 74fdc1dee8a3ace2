//! A quantity of water tied to the time interval it represents.

/// Water sent across one edge for the half-open interval
/// `[start_time, end_time)`.
///
/// `amount` is a volume (m³). It may be less than the nominal rate times
/// the interval length when the sender had to ration its outflows, and it
/// may be zero: a zero transfer still tells the receiver the interval is
/// accounted for.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WaterTransfer {
    /// Volume of water (m³), never negative.
    pub amount: f64,
    /// Start of the interval (s).
    pub start_time: f64,
    /// End of the interval (s), strictly after `start_time`.
    pub end_time: f64,
}

impl WaterTransfer {
    /// Build a transfer, checking the interval and the amount.
    pub fn new(amount: f64, start_time: f64, end_time: f64) -> Result<Self, String> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(format!("transfer amount must be finite and >= 0, got {amount}"));
        }
        if !(start_time < end_time) {
            return Err(format!(
                "transfer interval [{start_time}, {end_time}) is empty or inverted"
            ));
        }
        Ok(Self {
            amount,
            start_time,
            end_time,
        })
    }

    /// Whether this transfer's interval intersects `other`'s.
    pub fn overlaps(&self, other: &WaterTransfer) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }

    /// Length of the interval (s).
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Split at `time`, returning the part before and the part after.
    ///
    /// The amount is apportioned by duration. The later part is computed
    /// as the remainder so the two parts sum back to `amount` as closely
    /// as floating point allows. `time` must lie strictly inside the
    /// interval.
    pub fn split_at(&self, time: f64) -> (WaterTransfer, WaterTransfer) {
        debug_assert!(self.start_time < time && time < self.end_time);
        let before = self.amount * ((time - self.start_time) / self.duration());
        let after = self.amount - before;
        (
            WaterTransfer {
                amount: before,
                start_time: self.start_time,
                end_time: time,
            },
            WaterTransfer {
                amount: after.max(0.0),
                start_time: time,
                end_time: self.end_time,
            },
        )
    }
}
