//! Data types for checkpoint recording and playback.

use runnel_core::RegionId;
use runnel_element::RegionSnapshot;

/// Run description stored in the checkpoint header.
///
/// Enough to tell whether a checkpoint belongs to the run reading it, and
/// to restart a run from its last sync point.
///
/// # Examples
///
/// ```
/// use runnel_checkpoint::CheckpointHeader;
///
/// let header = CheckpointHeader {
///     runnel_version: "0.1.0".into(),
///     config_hash: 0xDEAD_BEEF,
///     simulation_start: 0.0,
///     simulation_end: 86_400.0,
///     sync_interval: 3600.0,
///     region_count: 4,
/// };
///
/// assert_eq!(header.region_count, 4);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct CheckpointHeader {
    /// Runnel crate version that wrote the file.
    pub runnel_version: String,
    /// [`config_hash`](crate::config_hash) of the writing run.
    pub config_hash: u64,
    /// Start of the simulated period (s).
    pub simulation_start: f64,
    /// End of the simulated period (s).
    pub simulation_end: f64,
    /// Spacing of sync points (s).
    pub sync_interval: f64,
    /// Regions in the run.
    pub region_count: u32,
}

/// One region at one sync point.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// FNV-1a hash of `snapshot`.
    pub snapshot_hash: u64,
    /// The region's state.
    pub snapshot: RegionSnapshot,
}

impl Frame {
    /// Region the frame belongs to.
    pub fn region(&self) -> RegionId {
        self.snapshot.region
    }

    /// Sync time of the frame (s).
    pub fn time(&self) -> f64 {
        self.snapshot.time
    }
}
