//! Run configuration, validation, and error types.
//!
//! [`SimulationConfig`] holds every startup knob. It is read once when a
//! [`Region`](crate::region::Region) is constructed and never changes
//! during a run. [`validate()`](SimulationConfig::validate) checks the
//! structural invariants up front so a bad knob fails before any thread
//! is spawned.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use runnel_core::time::{MAX_LEASE, MIN_LEASE};
use runnel_core::RegionId;
use runnel_element::StartupFlags;

// ── Verbosity ─────────────────────────────────────────────────────

/// How much a region reports about itself beyond errors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Ledger warnings and sync-point summaries.
    #[default]
    Normal,
    /// Per-step detail for traced regions.
    Detailed,
}

// ── ConfigError ───────────────────────────────────────────────────

/// Errors detected during [`SimulationConfig::validate()`].
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigError {
    /// Start or end time is not finite, or end does not follow start.
    InvalidTimeSpan {
        /// Configured start (s).
        start: f64,
        /// Configured end (s).
        end: f64,
    },
    /// `sync_interval` is not finite and positive.
    InvalidSyncInterval {
        /// The invalid value.
        value: f64,
    },
    /// `regional_dt_limit` is outside `[MIN_LEASE, MAX_LEASE]`.
    InvalidDtLimit {
        /// The invalid value.
        value: f64,
    },
    /// `water_created_warning_threshold` is negative or NaN.
    InvalidWarningThreshold {
        /// The invalid value.
        value: f64,
    },
    /// `stall_timeout` is zero.
    ZeroStallTimeout,
    /// A background thread could not be spawned.
    ThreadSpawnFailed {
        /// Description of which thread failed.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTimeSpan { start, end } => {
                write!(f, "simulation span [{start}, {end}] is empty or not finite")
            }
            Self::InvalidSyncInterval { value } => {
                write!(f, "sync_interval must be finite and positive, got {value}")
            }
            Self::InvalidDtLimit { value } => write!(
                f,
                "regional_dt_limit must be in [{MIN_LEASE}, {MAX_LEASE}], got {value}"
            ),
            Self::InvalidWarningThreshold { value } => write!(
                f,
                "water_created_warning_threshold must be >= 0, got {value}"
            ),
            Self::ZeroStallTimeout => write!(f, "stall_timeout must be non-zero"),
            Self::ThreadSpawnFailed { reason } => write!(f, "thread spawn failed: {reason}"),
        }
    }
}

impl Error for ConfigError {}

// ── SimulationConfig ──────────────────────────────────────────────

/// Complete configuration for a run.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationConfig {
    /// Simulation start time (s).
    pub simulation_start: f64,
    /// Simulation end time (s).
    pub simulation_end: f64,
    /// Interval between sync points (s). Default: one hour.
    pub sync_interval: f64,
    /// Longest timestep any region may take (s). Default: [`MAX_LEASE`].
    pub regional_dt_limit: f64,
    /// Whether channels discard water above bank-full.
    pub drain_down_mode: bool,
    /// Make every lease stale at startup.
    pub force_lease_expiration: bool,
    /// Zero every cumulative flow accumulator at startup.
    pub zero_cumulative_flow: bool,
    /// Zero every water-created ledger at startup.
    pub zero_water_created: bool,
    /// Reporting level.
    pub verbosity: Verbosity,
    /// Per-element water-created magnitude above which a warning is logged
    /// at sync points (m³).
    pub water_created_warning_threshold: f64,
    /// Exchange and check invariant reports on every two-way edge at
    /// every sync point.
    pub check_invariants: bool,
    /// Regions that log per-step detail.
    pub traced_regions: Vec<RegionId>,
    /// How long a blocked region waits for a message before the run is
    /// declared stalled.
    pub stall_timeout: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            simulation_start: 0.0,
            simulation_end: 86_400.0,
            sync_interval: 3600.0,
            regional_dt_limit: MAX_LEASE,
            drain_down_mode: false,
            force_lease_expiration: false,
            zero_cumulative_flow: false,
            zero_water_created: false,
            verbosity: Verbosity::Normal,
            water_created_warning_threshold: 1.0e-6,
            check_invariants: false,
            traced_regions: Vec::new(),
            stall_timeout: Duration::from_secs(30),
        }
    }
}

impl SimulationConfig {
    /// Validate all structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (start, end) = (self.simulation_start, self.simulation_end);
        if !start.is_finite() || !end.is_finite() || end <= start {
            return Err(ConfigError::InvalidTimeSpan { start, end });
        }
        if !self.sync_interval.is_finite() || self.sync_interval <= 0.0 {
            return Err(ConfigError::InvalidSyncInterval {
                value: self.sync_interval,
            });
        }
        if !(MIN_LEASE..=MAX_LEASE).contains(&self.regional_dt_limit) {
            return Err(ConfigError::InvalidDtLimit {
                value: self.regional_dt_limit,
            });
        }
        if !(self.water_created_warning_threshold >= 0.0) {
            return Err(ConfigError::InvalidWarningThreshold {
                value: self.water_created_warning_threshold,
            });
        }
        if self.stall_timeout.is_zero() {
            return Err(ConfigError::ZeroStallTimeout);
        }
        Ok(())
    }

    /// The three startup resets as element flags.
    pub fn startup_flags(&self) -> StartupFlags {
        StartupFlags {
            force_lease_expiration: self.force_lease_expiration,
            zero_cumulative_flow: self.zero_cumulative_flow,
            zero_water_created: self.zero_water_created,
        }
    }

    /// Whether `region` logs per-step detail.
    pub fn is_traced(&self, region: RegionId) -> bool {
        self.verbosity >= Verbosity::Detailed || self.traced_regions.contains(&region)
    }

    /// The first sync point after `time`, capped at the simulation end.
    pub fn next_sync_after(&self, time: f64) -> f64 {
        let offset = time - self.simulation_start;
        let k = (offset / self.sync_interval).floor() + 1.0;
        (self.simulation_start + k * self.sync_interval).min(self.simulation_end)
    }
}
