//! Error types for region stepping and whole-run orchestration.
//!
//! [`RegionError`] is produced by a single [`Region`](crate::region::Region)
//! and wraps the lower-level topology, invariant, and output errors.
//! [`SimulationError`] is what the runners return: it adds the region
//! that failed, plus stalls and thread failures.

use std::error::Error;
use std::fmt;

use runnel_core::{InvariantError, RegionId, TopologyError};
use runnel_element::OutputError;

use crate::config::ConfigError;

// ── RegionError ─────────────────────────────────────────────────

/// A fatal error inside one region.
#[derive(Debug)]
pub enum RegionError {
    /// The configuration is invalid.
    Config(ConfigError),
    /// A message was addressed to an element or edge this region lacks.
    Topology(TopologyError),
    /// A protocol or physical invariant was violated.
    Invariant(InvariantError),
    /// The output sink failed.
    Output(OutputError),
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Topology(e) => write!(f, "topology: {e}"),
            Self::Invariant(e) => write!(f, "invariant: {e}"),
            Self::Output(e) => write!(f, "output: {e}"),
        }
    }
}

impl Error for RegionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Topology(e) => Some(e),
            Self::Invariant(e) => Some(e),
            Self::Output(e) => Some(e),
        }
    }
}

impl From<ConfigError> for RegionError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<TopologyError> for RegionError {
    fn from(e: TopologyError) -> Self {
        Self::Topology(e)
    }
}

impl From<InvariantError> for RegionError {
    fn from(e: InvariantError) -> Self {
        Self::Invariant(e)
    }
}

impl From<OutputError> for RegionError {
    fn from(e: OutputError) -> Self {
        Self::Output(e)
    }
}

// ── SimulationError ─────────────────────────────────────────────

/// Why a run stopped before every region reached the end time.
#[derive(Debug)]
pub enum SimulationError {
    /// The configuration is invalid.
    Config(ConfigError),
    /// The region set is inconsistent.
    Topology(TopologyError),
    /// Two regions share an id.
    DuplicateRegion {
        /// The repeated id.
        region: RegionId,
    },
    /// One region failed.
    Region {
        /// The failing region.
        region: RegionId,
        /// What went wrong.
        error: RegionError,
    },
    /// No region can make progress and nothing is in flight.
    Stalled {
        /// Regions that had not finished.
        regions: Vec<RegionId>,
    },
    /// A region thread panicked.
    ThreadPanicked {
        /// The region whose thread died.
        region: RegionId,
    },
    /// A message was addressed to a region that does not exist or has
    /// already shut down.
    Disconnected {
        /// The destination region.
        region: RegionId,
    },
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Topology(e) => write!(f, "topology: {e}"),
            Self::DuplicateRegion { region } => write!(f, "duplicate region {region}"),
            Self::Region { region, error } => write!(f, "region {region}: {error}"),
            Self::Stalled { regions } => {
                write!(f, "simulation stalled with {} unfinished regions:", regions.len())?;
                for region in regions {
                    write!(f, " {region}")?;
                }
                Ok(())
            }
            Self::ThreadPanicked { region } => write!(f, "region {region} thread panicked"),
            Self::Disconnected { region } => write!(f, "region {region} is not reachable"),
        }
    }
}

impl Error for SimulationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Topology(e) => Some(e),
            Self::Region { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<ConfigError> for SimulationError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<TopologyError> for SimulationError {
    fn from(e: TopologyError) -> Self {
        Self::Topology(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runnel_core::ElementId;

    #[test]
    fn region_error_wraps_source() {
        let err = RegionError::from(TopologyError::UnknownElement {
            element: ElementId(7),
            region: RegionId(1),
        });
        assert!(err.source().is_some());
        assert!(format!("{err}").contains("element 7"));
    }

    #[test]
    fn stalled_lists_regions() {
        let err = SimulationError::Stalled {
            regions: vec![RegionId(2), RegionId(5)],
        };
        let msg = format!("{err}");
        assert!(msg.contains("2 unfinished"));
        assert!(msg.contains('5'));
    }

    #[test]
    fn region_failure_names_region() {
        let err = SimulationError::Region {
            region: RegionId(4),
            error: RegionError::Invariant(InvariantError::ClockOrder {
                region: RegionId(4),
                reason: "end before start".to_string(),
            }),
        };
        assert!(format!("{err}").starts_with("region 4"));
        assert!(err.source().is_some());
    }
}
