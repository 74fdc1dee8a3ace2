//! Per-region counters.
//!
//! [`RegionMetrics`] is cumulative over the run. The region updates it as
//! it steps; runners and tests read it after the fact.

/// Counters collected by one region.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegionMetrics {
    /// Completed timesteps.
    pub timesteps: u64,
    /// Sync points passed, including the start and the end.
    pub sync_points: u64,
    /// Envelopes emitted by this region's elements.
    pub messages_sent: u64,
    /// Envelopes dispatched to this region's proxies, local ones included.
    pub messages_received: u64,
    /// Cross-region batches handed to the runner.
    pub batches_sent: u64,
    /// Cross-region batches delivered to this region.
    pub batches_received: u64,
    /// Overlapping water transfers dropped by proxies.
    pub duplicate_transfers: u64,
    /// Containers that paid their outflows less than in full.
    pub rationed_outflows: u64,
    /// Turns that ended waiting on a barrier.
    pub blocked_turns: u64,
    /// Length of the most recent timestep (s).
    pub last_dt: f64,
}
